//! Model download capability interface (spec.md §2 scopes `fun_asr_models`/
//! `qwen3_tts_models`, §6 "Model download progress"). The download job
//! itself is part of the core's scheduled work; the concrete model registry
//! and credential store it talks to are external per spec.md §1.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AppError;

/// Reports `(downloaded_bytes, total_bytes)`; `total_bytes` is `0` when the
/// provider can't report a content length up front.
pub type DownloadProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[async_trait]
pub trait ModelDownloadProvider: Send + Sync {
    /// Downloads the snapshot named `key` into `dest_dir`, reporting
    /// progress through `on_progress`, and returns the snapshot's local
    /// path (`models/<family>/<key>/` per spec.md §6).
    async fn download(
        &self,
        key: &str,
        dest_dir: &Path,
        on_progress: DownloadProgressFn,
    ) -> Result<PathBuf, AppError>;
}
