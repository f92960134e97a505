//! Scoped scheduler (spec.md component F).
//!
//! One bounded worker pool per scope, an unbounded FIFO queue shared by that
//! pool's workers, project-level dedup so a project can have at most one
//! queued-or-running task per scope, and a resize operation that grows the
//! pool by spawning more workers or shrinks it by feeding poison pills down
//! the queue until enough workers exit. 1:1 with `task_scheduler.py`'s
//! `TaskScheduler`/`ScopeState`/`_worker`, translated from asyncio tasks +
//! an `asyncio.Event` per task to tokio tasks + a `CancellationToken` per
//! task (already unified with the cancel registry rather than a second,
//! scheduler-private cancellation mechanism).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::config::Scope;
use crate::error::AppError;
use crate::progress::{CancelRegistry, EventBus, ProgressEvent, ProgressStore};

pub struct TaskOutcome {
    pub file_path: Option<String>,
    /// Additional result fields a facade wants surfaced on the terminal
    /// event's detail object (spec.md 4.10: "a result dictionary with at
    /// least `{ file_path?, started_at, finished_at, segments_count? }`").
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskOutcome {
    pub fn new() -> Self {
        Self {
            file_path: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_file_path(path: impl Into<String>) -> Self {
        Self {
            file_path: Some(path.into()),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

impl Default for TaskOutcome {
    fn default() -> Self {
        Self::new()
    }
}

pub type RunFn = Arc<
    dyn Fn(String, String, CancellationToken) -> Pin<Box<dyn Future<Output = Result<TaskOutcome, AppError>> + Send>>
        + Send
        + Sync,
>;

#[derive(Clone)]
struct TaskItem {
    task_id: String,
    project_id: String,
    run_fn: RunFn,
}

struct ScopeState {
    scope: String,
    concurrency: AsyncMutex<usize>,
    queue_tx: mpsc::UnboundedSender<Option<String>>,
    queue_rx: AsyncMutex<mpsc::UnboundedReceiver<Option<String>>>,
    pending: std::sync::Mutex<HashMap<String, TaskItem>>,
    running: std::sync::Mutex<std::collections::HashSet<String>>,
    dedup: std::sync::Mutex<HashMap<String, String>>,
    workers: AsyncMutex<Vec<tokio::task::JoinHandle<()>>>,
    lock: AsyncMutex<()>,
}

#[derive(Default, Clone, Copy)]
pub struct EnqueueOptions {
    pub dedup: bool,
    pub allow_same_project_parallel: bool,
}

impl EnqueueOptions {
    pub fn default_dedup() -> Self {
        Self {
            dedup: true,
            allow_same_project_parallel: false,
        }
    }
}

pub struct TaskScheduler {
    scopes: std::sync::Mutex<HashMap<String, Arc<ScopeState>>>,
    event_bus: Arc<EventBus>,
    progress_store: Arc<ProgressStore>,
    cancel_registry: Arc<CancelRegistry>,
}

impl TaskScheduler {
    pub fn new(event_bus: Arc<EventBus>, progress_store: Arc<ProgressStore>, cancel_registry: Arc<CancelRegistry>) -> Self {
        Self {
            scopes: std::sync::Mutex::new(HashMap::new()),
            event_bus,
            progress_store,
            cancel_registry,
        }
    }

    fn get_scope(&self, scope: &str) -> Option<Arc<ScopeState>> {
        self.scopes.lock().unwrap().get(scope).cloned()
    }

    pub async fn ensure_scope(self: &Arc<Self>, scope: Scope, concurrency: usize) -> Arc<ScopeState> {
        let concurrency = concurrency.max(1);
        let scope_name = scope.as_str().to_string();
        let existing = self.get_scope(&scope_name);
        if let Some(state) = existing {
            self.resize(scope, concurrency).await;
            return self.get_scope(&scope_name).unwrap_or(state);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(ScopeState {
            scope: scope_name.clone(),
            concurrency: AsyncMutex::new(concurrency),
            queue_tx: tx,
            queue_rx: AsyncMutex::new(rx),
            pending: std::sync::Mutex::new(HashMap::new()),
            running: std::sync::Mutex::new(std::collections::HashSet::new()),
            dedup: std::sync::Mutex::new(HashMap::new()),
            workers: AsyncMutex::new(Vec::new()),
            lock: AsyncMutex::new(()),
        });

        self.scopes.lock().unwrap().insert(scope_name, state.clone());

        let mut workers = state.workers.lock().await;
        for _ in 0..concurrency {
            workers.push(self.spawn_worker(state.clone()));
        }
        drop(workers);

        state
    }

    fn spawn_worker(self: &Arc<Self>, state: Arc<ScopeState>) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.worker_loop(state).await;
        })
    }

    async fn worker_loop(self: Arc<Self>, state: Arc<ScopeState>) {
        loop {
            let item_id = {
                let mut rx = state.queue_rx.lock().await;
                rx.recv().await
            };
            let task_id = match item_id {
                Some(Some(id)) => id,
                Some(None) => return,
                None => return,
            };

            let item = state.pending.lock().unwrap().remove(&task_id);
            let item = match item {
                Some(item) => item,
                None => continue,
            };

            // The token was created at enqueue time so a cancel requested
            // while the task was still pending is visible here; re-registering
            // would silently replace an already-cancelled token.
            let token = self
                .cancel_registry
                .token_for(&task_id)
                .unwrap_or_else(|| self.cancel_registry.register_token(&task_id));

            if token.is_cancelled() {
                self.emit(&state.scope, &item.project_id, &task_id, "cancelled", "cancelled", 0.0, "task cancelled before start", None);
                self.finish_task(&state, &item);
                self.cancel_registry.unregister(&task_id);
                continue;
            }

            self.emit(&state.scope, &item.project_id, &task_id, "processing", "progress", 1.0, "task started", None);
            state.running.lock().unwrap().insert(task_id.clone());

            let result = (item.run_fn)(item.project_id.clone(), task_id.clone(), token.clone()).await;

            match result {
                Ok(outcome) => {
                    self.emit_completed(&state.scope, &item.project_id, &task_id, outcome);
                }
                Err(err) if err.is_cancelled() => {
                    self.emit(&state.scope, &item.project_id, &task_id, "cancelled", "cancelled", 0.0, "task cancelled", None);
                }
                Err(err) => {
                    self.emit(&state.scope, &item.project_id, &task_id, "failed", "error", 0.0, &err.message, None);
                }
            }

            state.running.lock().unwrap().remove(&task_id);
            self.cancel_registry.unregister(&task_id);
            {
                let mut dedup = state.dedup.lock().unwrap();
                if dedup.get(&item.project_id) == Some(&task_id) {
                    dedup.remove(&item.project_id);
                }
            }
        }
    }

    fn finish_task(&self, state: &Arc<ScopeState>, item: &TaskItem) {
        let mut dedup = state.dedup.lock().unwrap();
        if dedup.get(&item.project_id) == Some(&item.task_id) {
            dedup.remove(&item.project_id);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        scope: &str,
        project_id: &str,
        task_id: &str,
        status: &str,
        msg_type: &str,
        percent: f64,
        message: &str,
        file_path: Option<String>,
    ) {
        let mut event = ProgressEvent::new(scope, project_id, task_id, msg_type)
            .with_percent(percent)
            .with_message(message);
        if let Some(path) = file_path {
            event = event.with_detail(serde_json::json!({ "status": status, "file_path": path }));
        } else {
            event = event.with_detail(serde_json::json!({ "status": status }));
        }
        self.progress_store.update_from_event(&event);
        self.event_bus.publish(event);
    }

    /// Emits the single terminal "completed" event for a task, folding the
    /// facade's `TaskOutcome::extra` fields (e.g. `segments_count`,
    /// `started_at`/`finished_at`) into the detail object alongside
    /// `file_path`.
    fn emit_completed(&self, scope: &str, project_id: &str, task_id: &str, outcome: TaskOutcome) {
        let mut detail = outcome.extra;
        detail.insert("status".to_string(), serde_json::json!("completed"));
        if let Some(path) = &outcome.file_path {
            detail.insert("file_path".to_string(), serde_json::json!(path));
        }
        let mut event = ProgressEvent::new(scope, project_id, task_id, "completed")
            .with_percent(100.0)
            .with_message("task completed");
        event = event.with_detail(serde_json::Value::Object(detail));
        self.progress_store.update_from_event(&event);
        self.event_bus.publish(event);
    }

    pub async fn enqueue(
        self: &Arc<Self>,
        scope: Scope,
        project_id: impl Into<String>,
        run_fn: RunFn,
        opts: EnqueueOptions,
    ) -> Result<String, AppError> {
        let project_id = project_id.into();
        if project_id.is_empty() {
            return Err(AppError::input_invalid("project_id is required"));
        }

        let concurrency = scope.recommended_concurrency();
        let state = self.ensure_scope(scope, concurrency).await;

        let _guard = state.lock.lock().await;
        self.cleanup_workers(&state).await;

        if opts.dedup && !opts.allow_same_project_parallel {
            let existing = state.dedup.lock().unwrap().get(&project_id).cloned();
            if let Some(existing_id) = existing {
                let still_live = state.pending.lock().unwrap().contains_key(&existing_id)
                    || state.running.lock().unwrap().contains(&existing_id);
                if still_live {
                    return Ok(existing_id);
                }
            }
        }

        let task_id = generate_task_id(scope.as_str(), &project_id);
        self.cancel_registry.register_token(&task_id);

        let item = TaskItem {
            task_id: task_id.clone(),
            project_id: project_id.clone(),
            run_fn,
        };
        state.pending.lock().unwrap().insert(task_id.clone(), item);
        if opts.dedup && !opts.allow_same_project_parallel {
            state.dedup.lock().unwrap().insert(project_id.clone(), task_id.clone());
        }
        state
            .queue_tx
            .send(Some(task_id.clone()))
            .map_err(|_| AppError::internal_invariant("scheduler queue closed"))?;
        drop(_guard);

        self.emit(scope.as_str(), &project_id, &task_id, "queued", "progress", 0.0, "entered queue", None);
        Ok(task_id)
    }

    /// Cancels a task whether it's still pending or already running.
    /// Idempotent and tolerant of an unknown scope/task id.
    pub fn cancel(&self, scope: Scope, project_id: &str, task_id: &str) -> bool {
        let state = match self.get_scope(scope.as_str()) {
            Some(state) => state,
            None => return false,
        };

        if state.running.lock().unwrap().contains(task_id) {
            return self.cancel_registry.cancel(task_id);
        }

        let removed = state.pending.lock().unwrap().remove(task_id);
        match removed {
            Some(item) => {
                self.cancel_registry.cancel(task_id);
                self.cancel_registry.unregister(task_id);
                let mut dedup = state.dedup.lock().unwrap();
                if dedup.get(project_id) == Some(&task_id.to_string()) {
                    dedup.remove(project_id);
                }
                drop(dedup);
                self.emit(scope.as_str(), &item.project_id, task_id, "cancelled", "cancelled", 0.0, "stopped", None);
                true
            }
            None => false,
        }
    }

    pub async fn resize(self: &Arc<Self>, scope: Scope, concurrency: usize) {
        let concurrency = concurrency.max(1);
        let state = match self.get_scope(scope.as_str()) {
            Some(state) => state,
            None => {
                self.ensure_scope(scope, concurrency).await;
                return;
            }
        };

        let _guard = state.lock.lock().await;
        self.cleanup_workers(&state).await;

        let mut current = state.concurrency.lock().await;
        if *current == concurrency {
            return;
        }
        *current = concurrency;
        drop(current);

        let mut workers = state.workers.lock().await;
        let alive = workers.len();
        if alive < concurrency {
            for _ in 0..(concurrency - alive) {
                workers.push(self.spawn_worker(state.clone()));
            }
        } else if alive > concurrency {
            for _ in 0..(alive - concurrency) {
                let _ = state.queue_tx.send(None);
            }
        }
    }

    async fn cleanup_workers(&self, state: &Arc<ScopeState>) {
        let mut workers = state.workers.lock().await;
        workers.retain(|handle| !handle.is_finished());
    }

    pub async fn shutdown(&self) {
        let scopes: Vec<Arc<ScopeState>> = self.scopes.lock().unwrap().values().cloned().collect();
        for state in scopes {
            let _guard = state.lock.lock().await;
            self.cleanup_workers(&state).await;
            let worker_count = state.workers.lock().await.len();
            for _ in 0..worker_count {
                let _ = state.queue_tx.send(None);
            }
        }
    }
}

/// Builds `{scope}_{project}_{YYYYMMDD_HHMMSS}_{rand6hex}`, matching
/// `task_scheduler.py`'s task id format.
fn generate_task_id(scope: &str, project_id: &str) -> String {
    let now = OffsetDateTime::now_utc();
    let stamp = format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    );
    let suffix: String = {
        let mut rng = rand::thread_rng();
        (0..6).map(|_| format!("{:x}", rng.gen_range(0..16))).collect()
    };
    format!("{scope}_{project_id}_{stamp}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_scheduler() -> Arc<TaskScheduler> {
        Arc::new(TaskScheduler::new(
            Arc::new(EventBus::new()),
            Arc::new(ProgressStore::new()),
            Arc::new(CancelRegistry::new()),
        ))
    }

    fn ok_run_fn(calls: Arc<AtomicUsize>) -> RunFn {
        Arc::new(move |_project, _task, _token| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(TaskOutcome::new())
            })
        })
    }

    #[tokio::test]
    async fn enqueue_dedups_same_project() {
        let scheduler = test_scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        let run_fn = Arc::new(move |_p: String, _t: String, _c: CancellationToken| {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                Ok(TaskOutcome::new())
            }) as Pin<Box<dyn Future<Output = Result<TaskOutcome, AppError>> + Send>>
        });
        let _ = calls;
        let id1 = scheduler
            .enqueue(Scope::Tts, "proj-1", run_fn.clone(), EnqueueOptions::default_dedup())
            .await
            .unwrap();
        let id2 = scheduler
            .enqueue(Scope::Tts, "proj-1", run_fn, EnqueueOptions::default_dedup())
            .await
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn enqueue_runs_task_to_completion() {
        let scheduler = test_scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        let run_fn = ok_run_fn(calls.clone());
        let task_id = scheduler
            .enqueue(Scope::Tts, "proj-2", run_fn, EnqueueOptions::default_dedup())
            .await
            .unwrap();
        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(task_id.starts_with("tts_proj-2_"));
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_false() {
        let scheduler = test_scheduler();
        assert!(!scheduler.cancel(Scope::Tts, "proj-x", "nope"));
    }
}
