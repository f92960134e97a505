//! Project data model and the `ProjectStore` persistence seam.
//!
//! Field set and status enum follow `projects_store.py`; persistence itself
//! (spec.md treats it as an external capability, like the LM/TTS/ASR
//! providers) is expressed as a trait with an in-memory reference impl for
//! tests, the same way the teacher seams its `Db`/`MetadataProvider` traits
//! in `app_state.rs`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AppError;
use crate::script::model::Script;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Processing,
    Completed,
    Failed,
}

/// A single feature's prompt selection, e.g. `{"script_generation": {kind:
/// official, key_or_id: "default"}}` in the original project document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSelectionKind {
    Official,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSelection {
    pub kind: PromptSelectionKind,
    pub key_or_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub source_video_path: String,
    pub subtitle_path: Option<String>,
    /// Extracted source audio, used as the ASR fallback input when no
    /// subtitle has been uploaded or generated yet (spec.md §3).
    pub audio_path: Option<String>,
    pub script_path: Option<String>,
    pub output_video_path: Option<String>,
    pub status: ProjectStatus,
    /// Structured narration script, set once script assembly completes.
    pub script: Option<Script>,
    /// Per-feature prompt template selection, keyed by feature name
    /// (e.g. `"script_generation"`).
    pub prompt_selection: HashMap<String, PromptSelection>,
    /// User-facing length selector, e.g. `"20～30条"` or a free-typed count.
    pub script_length: String,
    /// Original-footage ratio as a percent in `10..=90`, default 70.
    pub original_ratio: u8,
    /// Target narration language, `"zh"` or `"en"`.
    pub script_language: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Project {
    /// The audio track to feed an ASR transcription fallback when no
    /// subtitle is available yet.
    pub fn audio_path_for_asr(&self) -> Option<String> {
        self.audio_path.clone()
    }

    pub fn new(id: impl Into<String>, name: impl Into<String>, source_video_path: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            name: name.into(),
            source_video_path: source_video_path.into(),
            subtitle_path: None,
            audio_path: None,
            script_path: None,
            output_video_path: None,
            status: ProjectStatus::Draft,
            script: None,
            prompt_selection: HashMap::new(),
            script_length: "20～30条".to_string(),
            original_ratio: 70,
            script_language: "zh".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Project, AppError>;
    async fn put(&self, project: Project) -> Result<(), AppError>;
    async fn set_status(&self, id: &str, status: ProjectStatus) -> Result<(), AppError>;
    async fn list(&self) -> Result<Vec<Project>, AppError>;
    async fn delete(&self, id: &str) -> Result<(), AppError>;
}

#[derive(Default)]
pub struct InMemoryProjectStore {
    projects: Mutex<HashMap<String, Project>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn get(&self, id: &str) -> Result<Project, AppError> {
        self.projects
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("project {id} not found")))
    }

    async fn put(&self, project: Project) -> Result<(), AppError> {
        self.projects.lock().unwrap().insert(project.id.clone(), project);
        Ok(())
    }

    async fn set_status(&self, id: &str, status: ProjectStatus) -> Result<(), AppError> {
        let mut projects = self.projects.lock().unwrap();
        let project = projects
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("project {id} not found")))?;
        project.status = status;
        project.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Project>, AppError> {
        Ok(self.projects.lock().unwrap().values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        self.projects.lock().unwrap().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = InMemoryProjectStore::new();
        let project = Project::new("p1", "demo", "uploads/p1/source.mp4");
        store.put(project.clone()).await.unwrap();
        let fetched = store.get("p1").await.unwrap();
        assert_eq!(fetched.name, "demo");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = InMemoryProjectStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert_eq!(err.kind, crate::error::AppErrorKind::NotFound);
    }

    #[tokio::test]
    async fn set_status_updates_timestamp() {
        let store = InMemoryProjectStore::new();
        let project = Project::new("p1", "demo", "uploads/p1/source.mp4");
        let created_at = project.created_at;
        store.put(project).await.unwrap();
        store.set_status("p1", ProjectStatus::Processing).await.unwrap();
        let fetched = store.get("p1").await.unwrap();
        assert_eq!(fetched.status, ProjectStatus::Processing);
        assert!(fetched.updated_at >= created_at);
    }
}
