//! Orchestrator facades (spec.md component J, §4.10).
//!
//! Thin per-operation services: each validates prerequisites, publishes a
//! "start" event, builds a scheduler `RunFn` closure that drives the
//! corresponding pipeline (G/H/I), and enqueues it through the scheduler
//! (F). None of them schedule themselves or import each other — the
//! scheduler receives a capability closure, never a service handle (spec.md
//! design note 9). Grounded on the various top-level `*_service.py` entry
//! points as the call shape being wrapped.

use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;

use crate::asr::{AsrCache, AsrProvider};
use crate::config::Scope;
use crate::draft::{self, DraftRequest};
use crate::error::AppError;
use crate::layout;
use crate::lm::LmChatProvider;
use crate::media::pipeline::{self, GenerateRequest};
use crate::model_download::ModelDownloadProvider;
use crate::progress::{EventBus, ProgressEvent, ProgressStore};
use crate::project::{Project, ProjectStatus, ProjectStore};
use crate::scheduler::{EnqueueOptions, RunFn, TaskOutcome, TaskScheduler};
use crate::script::assemble::{assemble_script, AssembleRequest};
use crate::script::subtitle::{write_compressed, SubtitleCue};
use crate::tts::TtsProvider;

pub struct Facades {
    pub project_store: Arc<dyn ProjectStore>,
    pub scheduler: Arc<TaskScheduler>,
    pub event_bus: Arc<EventBus>,
    pub progress_store: Arc<ProgressStore>,
    pub lm: Arc<dyn LmChatProvider>,
    pub tts: Arc<dyn TtsProvider>,
    pub asr: Arc<dyn AsrProvider>,
    pub asr_cache: Arc<AsrCache>,
    pub asr_model_download: Arc<dyn ModelDownloadProvider>,
    pub tts_model_download: Arc<dyn ModelDownloadProvider>,
}

/// Reads the subtitle content to feed the script assembler: the project's
/// recorded subtitle file if one exists, otherwise a compressed-dialect
/// transcript produced by transcribing `audio_path` through the cached ASR
/// provider (spec.md §6 "ASR provider" + the CRC-keyed cache in `asr.rs`).
async fn resolve_subtitle_content(
    project: &Project,
    asr: &Arc<dyn AsrProvider>,
    asr_cache: &Arc<AsrCache>,
) -> Result<String, AppError> {
    if let Some(path) = &project.subtitle_path {
        return Ok(tokio::fs::read_to_string(path).await?);
    }
    let audio_path = project
        .audio_path_for_asr()
        .ok_or_else(|| AppError::input_invalid("project has neither a subtitle nor an audio track to transcribe"))?;
    let cues = asr_cache
        .transcribe_cached(asr.as_ref(), "default", std::path::Path::new(&audio_path), "")
        .await?;
    let subtitle_cues: Vec<SubtitleCue> = cues
        .into_iter()
        .map(|c| SubtitleCue {
            start_s: c.start_ms as f64 / 1000.0,
            end_s: c.end_ms as f64 / 1000.0,
            text: c.text,
        })
        .collect();
    Ok(write_compressed(&subtitle_cues))
}

fn to_rfc3339(at: OffsetDateTime) -> String {
    at.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// Publishes a "start" event directly on the bus/store, ahead of the
/// scheduler's own "processing" event, matching spec.md 4.10's "publishes a
/// start event" step of each facade.
fn publish_start(event_bus: &EventBus, progress_store: &ProgressStore, scope: &str, project_id: &str, task_id: &str, phase: &str) {
    let event = ProgressEvent::new(scope, project_id, task_id, "progress")
        .with_percent(0.0)
        .with_message(phase)
        .with_detail(serde_json::json!({ "status": "processing", "phase": phase }));
    progress_store.update_from_event(&event);
    event_bus.publish(event);
}

fn progress_cb(event_bus: Arc<EventBus>, progress_store: Arc<ProgressStore>, scope: &'static str, project_id: String, task_id: String) -> Arc<dyn Fn(f64, String) + Send + Sync> {
    Arc::new(move |pct: f64, phase: String| {
        let event = ProgressEvent::new(scope, project_id.clone(), task_id.clone(), "progress")
            .with_percent(pct)
            .with_message(phase.clone())
            .with_detail(serde_json::json!({ "status": "processing", "phase": phase }));
        progress_store.update_from_event(&event);
        event_bus.publish(event);
    })
}

impl Facades {
    async fn get_project(&self, project_id: &str) -> Result<Project, AppError> {
        self.project_store.get(project_id).await
    }

    /// Enqueues script assembly for `project_id` (spec.md 4.7). `plot_analysis`
    /// is supplied by the caller (the route layer reads it off the upload the
    /// user provided); subtitle content is read from the project's recorded
    /// subtitle path.
    pub async fn enqueue_generate_script(&self, project_id: String, plot_analysis: String) -> Result<String, AppError> {
        let project = self.get_project(&project_id).await?;
        if project.subtitle_path.is_none() && project.audio_path_for_asr().is_none() {
            return Err(AppError::input_invalid(
                "project has neither a subtitle nor an audio track to build a script from",
            ));
        }

        let project_store = self.project_store.clone();
        let event_bus = self.event_bus.clone();
        let progress_store = self.progress_store.clone();
        let lm = self.lm.clone();
        let asr = self.asr.clone();
        let asr_cache = self.asr_cache.clone();

        let run_fn: RunFn = Arc::new(move |project_id, task_id, _cancel| {
            let project_store = project_store.clone();
            let event_bus = event_bus.clone();
            let progress_store = progress_store.clone();
            let lm = lm.clone();
            let asr = asr.clone();
            let asr_cache = asr_cache.clone();
            let plot_analysis = plot_analysis.clone();
            Box::pin(async move {
                publish_start(&event_bus, &progress_store, Scope::GenerateScript.as_str(), &project_id, &task_id, "start");
                let started_at = OffsetDateTime::now_utc();

                let project = project_store.get(&project_id).await?;
                let subtitle_content = resolve_subtitle_content(&project, &asr, &asr_cache).await?;

                let request = AssembleRequest::from_project(&project, plot_analysis, subtitle_content);
                let script = assemble_script(lm, request).await?;

                let mut project = project;
                project.script = Some(script.clone());
                project.status = ProjectStatus::Draft;
                project_store.put(project).await?;

                let finished_at = OffsetDateTime::now_utc();
                Ok(TaskOutcome::new()
                    .with_extra("segments_count", script.segments.len())
                    .with_extra("started_at", to_rfc3339(started_at))
                    .with_extra("finished_at", to_rfc3339(finished_at)))
            })
        });

        self.scheduler
            .enqueue(Scope::GenerateScript, project_id, run_fn, EnqueueOptions::default_dedup())
            .await
    }

    /// Enqueues the full cut/TTS/align/replace/concat pipeline (spec.md
    /// 4.8) for a project whose script has already been validated.
    pub async fn enqueue_generate_video(&self, project_id: String) -> Result<String, AppError> {
        let project = self.get_project(&project_id).await?;
        let script = project
            .script
            .clone()
            .ok_or_else(|| AppError::input_invalid("project has no script to render"))?;
        if script.segments.is_empty() {
            return Err(AppError::input_invalid("script has no segments to render"));
        }

        let project_store = self.project_store.clone();
        let event_bus = self.event_bus.clone();
        let progress_store = self.progress_store.clone();
        let tts = self.tts.clone();
        let source_video_path = PathBuf::from(project.source_video_path.clone());
        let project_name = project.name.clone();

        let run_fn: RunFn = Arc::new(move |project_id, task_id, cancel| {
            let project_store = project_store.clone();
            let event_bus = event_bus.clone();
            let progress_store = progress_store.clone();
            let tts = tts.clone();
            let source_video_path = source_video_path.clone();
            let project_name = project_name.clone();
            let script = script.clone();
            Box::pin(async move {
                publish_start(&event_bus, &progress_store, Scope::GenerateVideo.as_str(), &project_id, &task_id, "start");
                let started_at = OffsetDateTime::now_utc();
                project_store.set_status(&project_id, ProjectStatus::Processing).await?;

                let work_dir = layout::video_tmp_dir(&task_id);
                let output_path = layout::video_output_path(&project_name, &task_id);

                let on_progress = progress_cb(event_bus.clone(), progress_store.clone(), Scope::GenerateVideo.as_str(), project_id.clone(), task_id.clone());

                let req = GenerateRequest {
                    project_id: project_id.clone(),
                    source_video_path,
                    script: script.clone(),
                    work_dir,
                    output_path,
                    tts,
                    on_progress,
                };

                let result = pipeline::generate_from_script(req, &cancel).await;
                match &result {
                    Ok(out) => {
                        let mut project = project_store.get(&project_id).await?;
                        project.output_video_path = Some(out.to_string_lossy().into_owned());
                        project.status = ProjectStatus::Completed;
                        project_store.put(project).await?;
                    }
                    Err(_) => {
                        project_store.set_status(&project_id, ProjectStatus::Failed).await?;
                    }
                }
                let out = result?;

                let finished_at = OffsetDateTime::now_utc();
                Ok(TaskOutcome::with_file_path(out.to_string_lossy().into_owned())
                    .with_extra("segments_count", script.segments.len())
                    .with_extra("started_at", to_rfc3339(started_at))
                    .with_extra("finished_at", to_rfc3339(finished_at)))
            })
        });

        self.scheduler
            .enqueue(Scope::GenerateVideo, project_id, run_fn, EnqueueOptions::default_dedup())
            .await
    }

    /// Enqueues draft-folder packaging (spec.md 4.9) for a project with a
    /// validated script.
    pub async fn enqueue_generate_draft(&self, project_id: String) -> Result<String, AppError> {
        let project = self.get_project(&project_id).await?;
        let script = project
            .script
            .clone()
            .ok_or_else(|| AppError::input_invalid("project has no script to package"))?;
        if script.segments.is_empty() {
            return Err(AppError::input_invalid("script has no segments to package"));
        }

        let project_store = self.project_store.clone();
        let event_bus = self.event_bus.clone();
        let progress_store = self.progress_store.clone();
        let tts = self.tts.clone();
        let source_video_path = PathBuf::from(project.source_video_path.clone());
        let project_name = project.name.clone();

        let run_fn: RunFn = Arc::new(move |project_id, task_id, cancel| {
            let event_bus = event_bus.clone();
            let progress_store = progress_store.clone();
            let tts = tts.clone();
            let source_video_path = source_video_path.clone();
            let project_name = project_name.clone();
            let script = script.clone();
            Box::pin(async move {
                publish_start(&event_bus, &progress_store, Scope::GenerateJianyingDraft.as_str(), &project_id, &task_id, "start");
                let started_at = OffsetDateTime::now_utc();

                let output_dir = layout::draft_output_dir(&project_name, &task_id);

                let on_progress = progress_cb(event_bus.clone(), progress_store.clone(), Scope::GenerateJianyingDraft.as_str(), project_id.clone(), task_id.clone());

                let req = DraftRequest {
                    project_id: project_id.clone(),
                    project_name: project_name.clone(),
                    source_video_path,
                    script: script.clone(),
                    output_dir,
                    tts,
                    on_progress,
                };

                let out = draft::build_draft(req, &cancel).await?;

                let finished_at = OffsetDateTime::now_utc();
                Ok(TaskOutcome::with_file_path(out.to_string_lossy().into_owned())
                    .with_extra("segments_count", script.segments.len())
                    .with_extra("started_at", to_rfc3339(started_at))
                    .with_extra("finished_at", to_rfc3339(finished_at)))
            })
        });

        self.scheduler
            .enqueue(Scope::GenerateJianyingDraft, project_id, run_fn, EnqueueOptions::default_dedup())
            .await
    }

    /// Enqueues a model snapshot download for an ASR or TTS family
    /// (spec.md scopes `fun_asr_models`/`qwen3_tts_models`, §6 "Model
    /// download progress").
    pub async fn enqueue_model_download(&self, scope: Scope, family: &'static str, key: String) -> Result<String, AppError> {
        if !matches!(scope, Scope::FunAsrModels | Scope::Qwen3TtsModels) {
            return Err(AppError::input_invalid("unsupported model download scope"));
        }
        let provider = match scope {
            Scope::FunAsrModels => self.asr_model_download.clone(),
            Scope::Qwen3TtsModels => self.tts_model_download.clone(),
            _ => unreachable!(),
        };
        let event_bus = self.event_bus.clone();
        let progress_store = self.progress_store.clone();

        let run_fn: RunFn = Arc::new(move |project_id, task_id, _cancel| {
            let provider = provider.clone();
            let event_bus = event_bus.clone();
            let progress_store = progress_store.clone();
            let key = key.clone();
            Box::pin(async move {
                publish_start(&event_bus, &progress_store, scope.as_str(), &project_id, &task_id, "start");
                let started_at = OffsetDateTime::now_utc();

                let dest_dir = layout::model_dir(family, &key);
                let event_bus_cb = event_bus.clone();
                let progress_store_cb = progress_store.clone();
                let project_id_cb = project_id.clone();
                let task_id_cb = task_id.clone();
                let on_progress: crate::model_download::DownloadProgressFn = Arc::new(move |downloaded: u64, total: u64| {
                    let pct = if total > 0 { (downloaded as f64 / total as f64) * 100.0 } else { 0.0 };
                    let event = ProgressEvent::new(scope.as_str(), project_id_cb.clone(), task_id_cb.clone(), "progress")
                        .with_percent(pct)
                        .with_detail(serde_json::json!({
                            "status": "processing",
                            "downloaded_bytes": downloaded,
                            "total_bytes": total,
                        }));
                    progress_store_cb.update_from_event(&event);
                    event_bus_cb.publish(event);
                });

                let path = provider.download(&key, &dest_dir, on_progress).await?;

                let finished_at = OffsetDateTime::now_utc();
                Ok(TaskOutcome::with_file_path(path.to_string_lossy().into_owned())
                    .with_extra("started_at", to_rfc3339(started_at))
                    .with_extra("finished_at", to_rfc3339(finished_at)))
            })
        });

        self.scheduler
            .enqueue(scope, format!("model:{family}:{key}"), run_fn, EnqueueOptions::default_dedup())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::test_support::ScriptedLm;
    use crate::progress::{CancelRegistry, EventBus, ProgressStore};
    use crate::project::InMemoryProjectStore;
    use crate::tts::{TtsProvider, TtsRequest, TtsResult};
    use std::path::Path;

    struct NoopTts;
    #[async_trait::async_trait]
    impl TtsProvider for NoopTts {
        async fn synthesize(&self, _request: TtsRequest, _output_dir: &Path) -> Result<TtsResult, AppError> {
            Err(AppError::provider_unavailable("unused"))
        }
    }

    struct NoopDownload;
    #[async_trait::async_trait]
    impl ModelDownloadProvider for NoopDownload {
        async fn download(&self, _key: &str, _dest_dir: &Path, _on_progress: crate::model_download::DownloadProgressFn) -> Result<PathBuf, AppError> {
            Err(AppError::provider_unavailable("unused"))
        }
    }

    struct NoopAsr;
    #[async_trait::async_trait]
    impl AsrProvider for NoopAsr {
        async fn transcribe(&self, _audio_path: &Path) -> Result<Vec<crate::asr::AsrCue>, AppError> {
            Err(AppError::provider_unavailable("unused"))
        }
    }

    fn test_facades() -> Facades {
        let event_bus = Arc::new(EventBus::new());
        let progress_store = Arc::new(ProgressStore::new());
        Facades {
            project_store: Arc::new(InMemoryProjectStore::new()),
            scheduler: Arc::new(TaskScheduler::new(event_bus.clone(), progress_store.clone(), Arc::new(CancelRegistry::new()))),
            event_bus,
            progress_store,
            lm: Arc::new(ScriptedLm::new(vec![])),
            tts: Arc::new(NoopTts),
            asr: Arc::new(NoopAsr),
            asr_cache: Arc::new(AsrCache::new(16)),
            asr_model_download: Arc::new(NoopDownload),
            tts_model_download: Arc::new(NoopDownload),
        }
    }

    #[tokio::test]
    async fn generate_script_requires_subtitle_path() {
        let facades = test_facades();
        let project = Project::new("p1", "demo", "uploads/p1/source.mp4");
        facades.project_store.put(project).await.unwrap();
        let err = facades.enqueue_generate_script("p1".to_string(), "plot".to_string()).await.unwrap_err();
        assert_eq!(err.kind, crate::error::AppErrorKind::InputInvalid);
    }

    #[tokio::test]
    async fn generate_video_requires_script() {
        let facades = test_facades();
        let project = Project::new("p1", "demo", "uploads/p1/source.mp4");
        facades.project_store.put(project).await.unwrap();
        let err = facades.enqueue_generate_video("p1".to_string()).await.unwrap_err();
        assert_eq!(err.kind, crate::error::AppErrorKind::InputInvalid);
    }

    #[tokio::test]
    async fn generate_draft_requires_script() {
        let facades = test_facades();
        let project = Project::new("p1", "demo", "uploads/p1/source.mp4");
        facades.project_store.put(project).await.unwrap();
        let err = facades.enqueue_generate_draft("p1".to_string()).await.unwrap_err();
        assert_eq!(err.kind, crate::error::AppErrorKind::InputInvalid);
    }

    #[tokio::test]
    async fn model_download_rejects_unsupported_scope() {
        let facades = test_facades();
        let err = facades
            .enqueue_model_download(Scope::Tts, "fun_asr", "key".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::AppErrorKind::InputInvalid);
    }
}
