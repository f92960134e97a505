//! The event shape published on the event bus and folded into the progress
//! store. Field names follow `task_progress_store.py`'s event dict, whose
//! `type` field drives the status normalization in `store::normalize_status`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub scope: String,
    pub project_id: String,
    pub task_id: String,
    /// Raw event discriminant, e.g. "queued"/"progress"/"completed"/"failed"/
    /// "cancelled" — mirrors the Python event dict's `type` key before
    /// normalization into `ProgressStatus`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub message: Option<String>,
    pub percent: Option<f64>,
    pub detail: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl ProgressEvent {
    pub fn new(scope: impl Into<String>, project_id: impl Into<String>, task_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            project_id: project_id.into(),
            task_id: task_id.into(),
            event_type: event_type.into(),
            message: None,
            percent: None,
            detail: None,
            at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(crate::redact::redact(&message.into()));
        self
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}
