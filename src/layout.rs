//! Uploads filesystem layout (spec.md §6), relative to the configured
//! uploads root. Centralizes the directory/file-naming conventions that
//! `main.rs` bootstraps and the facades (`facade.rs`) build task working
//! directories under, so the layout is defined once instead of re-spelled
//! at each call site.

use std::path::PathBuf;

use crate::config::CONFIG;

/// Top-level subdirectories created at startup.
pub const BOOTSTRAP_DIRS: &[&str] = &[
    "videos",
    "subtitles",
    "audios",
    "analyses",
    "videos/tmp",
    "audios/tmp",
    "videos/outputs",
    "jianying_drafts/outputs",
    "models",
    "asr_cache",
];

pub fn videos_dir() -> PathBuf {
    CONFIG.uploads_dir().join("videos")
}

pub fn subtitles_dir() -> PathBuf {
    CONFIG.uploads_dir().join("subtitles")
}

pub fn audios_dir() -> PathBuf {
    CONFIG.uploads_dir().join("audios")
}

pub fn analyses_dir() -> PathBuf {
    CONFIG.uploads_dir().join("analyses")
}

/// `videos/tmp/<job>/`, a scratch dir for a video-generation task's segment
/// clips. Owned by the task for its duration; deleted on exit.
pub fn video_tmp_dir(job: &str) -> PathBuf {
    videos_dir().join("tmp").join(job)
}

/// `audios/tmp/<job>/`, a scratch dir for a task's segment TTS clips.
pub fn audio_tmp_dir(job: &str) -> PathBuf {
    audios_dir().join("tmp").join(job)
}

/// `videos/outputs/<project>/<task_id>.mp4`.
pub fn video_output_path(project_name: &str, task_id: &str) -> PathBuf {
    videos_dir()
        .join("outputs")
        .join(project_name)
        .join(format!("{task_id}.mp4"))
}

/// `jianying_drafts/outputs/<project>/<task_id>/`.
pub fn draft_output_dir(project_name: &str, task_id: &str) -> PathBuf {
    CONFIG
        .uploads_dir()
        .join("jianying_drafts")
        .join("outputs")
        .join(project_name)
        .join(task_id)
}

/// `models/<family>/<key>/`, the destination for a downloaded model
/// snapshot.
pub fn model_dir(family: &str, key: &str) -> PathBuf {
    CONFIG.uploads_dir().join("models").join(family).join(key)
}

/// `asr_cache/`, the on-disk cache backing `asr::AsrCache`'s in-memory LRU
/// front.
pub fn asr_cache_dir() -> PathBuf {
    CONFIG.uploads_dir().join("asr_cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_output_path_is_scoped_by_project_and_task() {
        let path = video_output_path("demo", "generate_video_p1_20260101_000000_abcdef");
        assert!(path.ends_with("videos/outputs/demo/generate_video_p1_20260101_000000_abcdef.mp4"));
    }

    #[test]
    fn draft_output_dir_is_scoped_by_project_and_task() {
        let path = draft_output_dir("demo", "task-1");
        assert!(path.ends_with("jianying_drafts/outputs/demo/task-1"));
    }
}
