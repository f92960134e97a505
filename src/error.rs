use std::fmt::Display;

/// Coarse error classification surfaced to callers and over the wire.
///
/// Mirrors the error kinds named in the orchestrator spec: invalid input,
/// a missing external dependency, an unreachable provider, a media-processing
/// failure that survived every fallback, and an internal invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppErrorKind {
    InputInvalid,
    DependencyMissing,
    ProviderUnavailable,
    MediaProcessingFailure,
    InternalInvariant,
    NotFound,
    Duplicate,
    Cancelled,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AppError {
    pub message: String,
    #[serde(skip)]
    pub kind: AppErrorKind,
}

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn new(kind: AppErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn input_invalid(msg: impl Into<String>) -> Self {
        Self::new(AppErrorKind::InputInvalid, msg)
    }

    pub fn dependency_missing(msg: impl Into<String>) -> Self {
        Self::new(AppErrorKind::DependencyMissing, msg)
    }

    pub fn provider_unavailable(msg: impl Into<String>) -> Self {
        Self::new(AppErrorKind::ProviderUnavailable, msg)
    }

    pub fn media_processing_failure(msg: impl Into<String>) -> Self {
        Self::new(AppErrorKind::MediaProcessingFailure, msg)
    }

    pub fn internal_invariant(msg: impl Into<String>) -> Self {
        Self::new(AppErrorKind::InternalInvariant, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(AppErrorKind::NotFound, msg)
    }

    pub fn cancelled() -> Self {
        Self::new(AppErrorKind::Cancelled, "task was cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == AppErrorKind::Cancelled
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            kind: AppErrorKind::InternalInvariant,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::NotFound => {
                Self::new(AppErrorKind::NotFound, value.to_string())
            }
            _ => Self::new(AppErrorKind::InternalInvariant, value.to_string()),
        }
    }
}
