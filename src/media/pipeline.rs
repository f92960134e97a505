//! Top-level video generation state machine (spec.md §4.8 "Video
//! pipeline"), grounded on `video_generation_service.py::generate_video`.
//!
//! Phases: per-segment cut (and, for narrated segments, TTS synth + align +
//! loudnorm + audio replace) fanned out with a bounded semaphore, then a
//! final concat of the ordered clips. Each phase reports percent progress
//! through `on_progress` so the caller (the facade's scheduler `RunFn`) can
//! publish it on the event bus without this module depending on the bus
//! directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::TTS_FANOUT_LIMIT;
use crate::error::AppError;
use crate::script::model::{Script, Segment};
use crate::tts::{TtsProvider, TtsRequest};

use super::{align, concat, cut, loudnorm, replace_audio};

/// Weight given to the per-segment cut/TTS/align phase versus the final
/// concat phase when computing an overall percentage.
const SEGMENTS_PHASE_WEIGHT: f64 = 0.85;

pub type ProgressFn = Arc<dyn Fn(f64, String) + Send + Sync>;

pub struct GenerateRequest {
    pub project_id: String,
    pub source_video_path: PathBuf,
    pub script: Script,
    pub work_dir: PathBuf,
    pub output_path: PathBuf,
    pub tts: Arc<dyn TtsProvider>,
    pub on_progress: ProgressFn,
}

async fn process_segment(
    idx: usize,
    segment: Segment,
    source_video: PathBuf,
    video_dur: f64,
    work_dir: PathBuf,
    tts: Arc<dyn TtsProvider>,
    cancel: CancellationToken,
) -> Result<(usize, PathBuf), AppError> {
    let clip_path = work_dir.join(format!("seg_{idx:04}.mp4"));

    if segment.is_original_audio() {
        cut::cut_video_segment(&source_video, segment.start_time, segment.duration(), &clip_path, &cancel).await?;
        return Ok((idx, clip_path));
    }

    let tts_result = tts
        .synthesize(
            TtsRequest {
                text: segment.text.clone(),
                voice: None,
                speed: None,
            },
            &work_dir,
        )
        .await?;
    let audio_path = PathBuf::from(&tts_result.audio_path);

    let window = align::align_window(segment.start_time, segment.duration(), tts_result.duration_secs, video_dur);

    let raw_clip = work_dir.join(format!("seg_{idx:04}_raw.mp4"));
    cut::cut_video_segment(&source_video, window.start, window.duration, &raw_clip, &cancel).await?;

    let normalized_audio = work_dir.join(format!("seg_{idx:04}_norm.wav"));
    loudnorm::normalize_loudness(&audio_path, &normalized_audio, &cancel).await?;

    replace_audio::replace_audio_with_narration(&raw_clip, &normalized_audio, &clip_path, &cancel).await?;
    let _ = tokio::fs::remove_file(&raw_clip).await;
    let _ = tokio::fs::remove_file(&normalized_audio).await;
    let _ = tokio::fs::remove_file(&audio_path).await;

    Ok((idx, clip_path))
}

/// Removes every file in `output_dir` other than `keep`, matching the
/// teacher's "keep only the newest output" housekeeping in
/// `video_generation_service.py`. `output_dir` is already scoped to one
/// project (`outputs/<project_name>/`), so no further per-file filtering by
/// project is needed.
async fn prune_old_outputs(output_dir: &Path, keep: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(output_dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path == keep {
            continue;
        }
        let _ = tokio::fs::remove_file(&path).await;
    }
}

async fn run_segments(
    segments: Vec<Segment>,
    source_video: &Path,
    video_dur: f64,
    work_dir: &Path,
    tts: Arc<dyn TtsProvider>,
    cancel: &CancellationToken,
    on_progress: &ProgressFn,
) -> Result<Vec<PathBuf>, AppError> {
    let total = segments.len().max(1);
    let semaphore = Arc::new(Semaphore::new(TTS_FANOUT_LIMIT));
    let mut tasks = FuturesUnordered::new();

    for (idx, segment) in segments.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let source_video = source_video.to_path_buf();
        let work_dir = work_dir.to_path_buf();
        let tts = tts.clone();
        let cancel = cancel.clone();
        tasks.push(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            process_segment(idx, segment, source_video, video_dur, work_dir, tts, cancel).await
        });
    }

    let mut ordered: Vec<Option<PathBuf>> = std::iter::repeat_with(|| None).take(total).collect();
    let mut completed = 0usize;
    while let Some(result) = tasks.next().await {
        let (idx, path) = result?;
        ordered[idx] = Some(path);
        completed += 1;
        let pct = (completed as f64 / total as f64) * SEGMENTS_PHASE_WEIGHT * 100.0;
        on_progress(pct, format!("cut {completed}/{total} segments"));
    }

    ordered
        .into_iter()
        .enumerate()
        .map(|(idx, p)| p.ok_or_else(|| AppError::internal_invariant(format!("segment {idx} never completed"))))
        .collect()
}

/// Runs the full script-to-video pipeline, returning the output path on
/// success. Cleans up `work_dir` and prunes stale outputs regardless of the
/// outcome.
pub async fn generate_from_script(req: GenerateRequest, cancel: &CancellationToken) -> Result<PathBuf, AppError> {
    tokio::fs::create_dir_all(&req.work_dir).await.map_err(AppError::from)?;

    let video_dur = crate::ffprobe::duration_secs(&req.source_video_path).await.unwrap_or(f64::MAX);

    let result = run_pipeline_inner(&req, video_dur, cancel).await;

    let _ = tokio::fs::remove_dir_all(&req.work_dir).await;

    match &result {
        Ok(out) => {
            if let Some(parent) = req.output_path.parent() {
                prune_old_outputs(parent, out).await;
            }
        }
        Err(_) => {}
    }

    result
}

async fn run_pipeline_inner(req: &GenerateRequest, video_dur: f64, cancel: &CancellationToken) -> Result<PathBuf, AppError> {
    if req.script.segments.is_empty() {
        return Err(AppError::input_invalid("script has no segments to render"));
    }

    (req.on_progress)(1.0, "preparing".to_string());

    let clips = run_segments(
        req.script.segments.clone(),
        &req.source_video_path,
        video_dur,
        &req.work_dir,
        req.tts.clone(),
        cancel,
        &req.on_progress,
    )
    .await?;

    (req.on_progress)(SEGMENTS_PHASE_WEIGHT * 100.0, "concatenating".to_string());

    let weight = SEGMENTS_PHASE_WEIGHT;
    let on_progress = req.on_progress.clone();
    let concat_cb = move |pct: f64| {
        let overall = weight * 100.0 + (1.0 - weight) * pct;
        on_progress(overall, "concatenating".to_string());
    };

    if let Some(parent) = req.output_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(AppError::from)?;
    }

    concat::concat_videos_with_progress(&clips, &req.output_path, &req.work_dir, cancel, concat_cb).await?;

    (req.on_progress)(100.0, "done".to_string());
    Ok(req.output_path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::model::Segment;

    fn segment(id: &str, start: f64, end: f64, ost: u8, text: &str) -> Segment {
        Segment {
            id: id.to_string(),
            start_time: start,
            end_time: end,
            text: text.to_string(),
            subtitle: None,
            ost,
        }
    }

    #[test]
    fn original_audio_segment_skips_tts() {
        let seg = segment("1", 0.0, 5.0, 1, "anything");
        assert!(seg.is_original_audio());
    }

    #[tokio::test]
    async fn empty_script_is_rejected() {
        let req = GenerateRequest {
            project_id: "p1".into(),
            source_video_path: PathBuf::from("/tmp/does-not-exist.mp4"),
            script: Script::new(0.0, vec![]),
            work_dir: PathBuf::from("/tmp/autocut-test-empty"),
            output_path: PathBuf::from("/tmp/autocut-test-empty-out.mp4"),
            tts: Arc::new(NoopTts),
            on_progress: Arc::new(|_, _| {}),
        };
        let cancel = CancellationToken::new();
        let err = generate_from_script(req, &cancel).await.unwrap_err();
        assert_eq!(err.kind, crate::error::AppErrorKind::InputInvalid);
    }

    struct NoopTts;

    #[async_trait::async_trait]
    impl TtsProvider for NoopTts {
        async fn synthesize(&self, _request: TtsRequest, _output_dir: &Path) -> Result<crate::tts::TtsResult, AppError> {
            Err(AppError::provider_unavailable("unused in this test"))
        }
    }
}
