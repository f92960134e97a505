//! Progress store (spec.md component D).
//!
//! Keeps the latest known state per `(scope, project_id, task_id)`, folding
//! incoming bus events the same way `task_progress_store.py` folds its event
//! dicts: a `type` of `queued`/`progress`/`completed`/`failed`/`cancelled`
//! maps to a `ProgressStatus`, and any `percent`/`message`/`detail` on the
//! event overwrite the snapshot's corresponding field.

use std::collections::HashMap;
use std::sync::Mutex;

use time::OffsetDateTime;

use super::event::{ProgressEvent, ProgressStatus};

#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub scope: String,
    pub project_id: String,
    pub task_id: String,
    pub status: ProgressStatus,
    pub percent: Option<f64>,
    pub message: Option<String>,
    pub detail: Option<serde_json::Value>,
    pub updated_at: OffsetDateTime,
}

fn normalize_status(event_type: &str) -> Option<ProgressStatus> {
    match event_type {
        "queued" => Some(ProgressStatus::Queued),
        "progress" | "started" | "processing" => Some(ProgressStatus::Processing),
        "completed" | "done" => Some(ProgressStatus::Completed),
        "failed" | "error" => Some(ProgressStatus::Failed),
        "cancelled" | "canceled" => Some(ProgressStatus::Cancelled),
        _ => None,
    }
}

type Key = (String, String, String);

#[derive(Default)]
pub struct ProgressStore {
    snapshots: Mutex<HashMap<Key, TaskSnapshot>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(event: &ProgressEvent) -> Key {
        (event.scope.clone(), event.project_id.clone(), event.task_id.clone())
    }

    /// Folds an event into the store. Unknown `event_type`s are recorded as
    /// an update to message/detail only, keeping whatever status was
    /// already there (mirrors the Python store's tolerant handling of
    /// unrecognized event types rather than raising).
    pub fn update_from_event(&self, event: &ProgressEvent) {
        let mut map = self.snapshots.lock().unwrap();
        let key = Self::key(event);
        let status = normalize_status(&event.event_type);
        let entry = map.entry(key).or_insert_with(|| TaskSnapshot {
            scope: event.scope.clone(),
            project_id: event.project_id.clone(),
            task_id: event.task_id.clone(),
            status: status.unwrap_or(ProgressStatus::Queued),
            percent: None,
            message: None,
            detail: None,
            updated_at: event.at,
        });
        if let Some(status) = status {
            entry.status = status;
        }
        if event.percent.is_some() {
            entry.percent = event.percent;
        }
        if event.message.is_some() {
            entry.message = event.message.clone();
        }
        if event.detail.is_some() {
            entry.detail = event.detail.clone();
        }
        entry.updated_at = event.at;
    }

    pub fn get(&self, scope: &str, project_id: &str, task_id: &str) -> Option<TaskSnapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .get(&(scope.to_string(), project_id.to_string(), task_id.to_string()))
            .cloned()
    }

    /// Returns the most recently updated running (queued or processing)
    /// task for a project within a scope, matching `get_latest_running`.
    pub fn get_latest_running(&self, scope: &str, project_id: &str) -> Option<TaskSnapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .values()
            .filter(|s| {
                s.scope == scope
                    && s.project_id == project_id
                    && matches!(s.status, ProgressStatus::Queued | ProgressStatus::Processing)
            })
            .max_by_key(|s| s.updated_at)
            .cloned()
    }

    pub fn remove(&self, scope: &str, project_id: &str, task_id: &str) {
        self.snapshots
            .lock()
            .unwrap()
            .remove(&(scope.to_string(), project_id.to_string(), task_id.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_progress_then_completed() {
        let store = ProgressStore::new();
        let e1 = ProgressEvent::new("tts", "p1", "t1", "queued");
        store.update_from_event(&e1);
        assert_eq!(store.get("tts", "p1", "t1").unwrap().status, ProgressStatus::Queued);

        let e2 = ProgressEvent::new("tts", "p1", "t1", "progress").with_percent(50.0);
        store.update_from_event(&e2);
        let snap = store.get("tts", "p1", "t1").unwrap();
        assert_eq!(snap.status, ProgressStatus::Processing);
        assert_eq!(snap.percent, Some(50.0));

        let e3 = ProgressEvent::new("tts", "p1", "t1", "completed");
        store.update_from_event(&e3);
        assert_eq!(store.get("tts", "p1", "t1").unwrap().status, ProgressStatus::Completed);
    }

    #[test]
    fn latest_running_excludes_terminal_tasks() {
        let store = ProgressStore::new();
        store.update_from_event(&ProgressEvent::new("tts", "p1", "t1", "completed"));
        store.update_from_event(&ProgressEvent::new("tts", "p1", "t2", "processing"));
        let latest = store.get_latest_running("tts", "p1").unwrap();
        assert_eq!(latest.task_id, "t2");
    }
}
