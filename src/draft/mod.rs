//! Draft builder (spec.md component I, §4.9): given a project and its
//! validated script, emits a video-editor project folder instead of a
//! rendered video. Grounded on `services/jianying_draft_manager.py` and
//! `services/jianying_draft_packager.py`, simplified to the fields spec.md
//! 4.9 names — the opaque editor-specific layout beyond that is out of
//! scope per spec.md §1.
//!
//! Reuses the video pipeline's duration-alignment rule (`media::align`) to
//! decide each narrated segment's `(new_start, new_dur)` window before
//! writing it into the draft, and its loudnorm pass (`media::loudnorm`) for
//! the same -20 LUFS / -1 dBTP / LRA 7 policy used when rendering a real
//! video.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::TTS_FANOUT_LIMIT;
use crate::error::AppError;
use crate::media::align::{self, AlignedWindow};
use crate::media::loudnorm;
use crate::script::model::{Script, Segment};
use crate::tts::{TtsProvider, TtsRequest};

/// Microsecond conversion; the target editor's project file expresses every
/// duration/position in microseconds (spec.md §4.9).
fn secs_to_us(secs: f64) -> i64 {
    (secs * 1_000_000.0).round() as i64
}

pub struct DraftRequest {
    pub project_id: String,
    pub project_name: String,
    pub source_video_path: PathBuf,
    pub script: Script,
    pub output_dir: PathBuf,
    pub tts: Arc<dyn TtsProvider>,
    pub on_progress: Arc<dyn Fn(f64, String) + Send + Sync>,
}

struct AlignedSegment {
    segment: Segment,
    window: AlignedWindow,
    audio_path: Option<PathBuf>,
}

async fn prepare_segment(
    idx: usize,
    segment: Segment,
    video_dur: f64,
    work_dir: PathBuf,
    tts: Arc<dyn TtsProvider>,
    cancel: CancellationToken,
) -> Result<(usize, AlignedSegment), AppError> {
    if segment.is_original_audio() {
        let window = AlignedWindow {
            start: segment.start_time,
            duration: segment.duration(),
        };
        return Ok((
            idx,
            AlignedSegment {
                segment,
                window,
                audio_path: None,
            },
        ));
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

    let window = align::align_window(segment.start_time, segment.duration(), tts_result.duration_secs, video_dur);

    let raw_audio = PathBuf::from(&tts_result.audio_path);
    let normalized = work_dir.join(format!("seg_{idx:04}.wav"));
    loudnorm::normalize_loudness(&raw_audio, &normalized, &cancel).await?;
    let _ = tokio::fs::remove_file(&raw_audio).await;

    Ok((
        idx,
        AlignedSegment {
            segment,
            window,
            audio_path: Some(normalized),
        },
    ))
}

async fn prepare_segments(
    segments: Vec<Segment>,
    video_dur: f64,
    work_dir: &Path,
    tts: Arc<dyn TtsProvider>,
    cancel: &CancellationToken,
    on_progress: &Arc<dyn Fn(f64, String) + Send + Sync>,
) -> Result<Vec<AlignedSegment>, AppError> {
    let total = segments.len().max(1);
    let semaphore = Arc::new(Semaphore::new(TTS_FANOUT_LIMIT));
    let mut tasks = FuturesUnordered::new();

    for (idx, segment) in segments.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let work_dir = work_dir.to_path_buf();
        let tts = tts.clone();
        let cancel = cancel.clone();
        tasks.push(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            prepare_segment(idx, segment, video_dur, work_dir, tts, cancel).await
        });
    }

    let mut ordered: Vec<Option<AlignedSegment>> = std::iter::repeat_with(|| None).take(total).collect();
    let mut completed = 0usize;
    while let Some(result) = tasks.next().await {
        let (idx, aligned) = result?;
        ordered[idx] = Some(aligned);
        completed += 1;
        let pct = (completed as f64 / total as f64) * 70.0;
        on_progress(pct, format!("prepared {completed}/{total} segments"));
    }

    Ok(ordered.into_iter().enumerate().filter_map(|(_, a)| a).collect())
}

/// `draft_info.json`'s canvas block.
fn canvas_json(width: i64, height: i64, fps: f64) -> serde_json::Value {
    serde_json::json!({
        "width": width,
        "height": height,
        "fps": fps,
    })
}

fn build_draft_info(
    canvas: serde_json::Value,
    video_material_id: &str,
    video_path: &Path,
    aligned: &[AlignedSegment],
) -> serde_json::Value {
    let mut video_segments = Vec::new();
    let mut audio_materials = Vec::new();
    let mut audio_segments = Vec::new();
    let mut timeline_cursor_us: i64 = 0;

    for (idx, a) in aligned.iter().enumerate() {
        let source_start_us = secs_to_us(a.window.start);
        let duration_us = secs_to_us(a.window.duration);
        let muted = a.audio_path.is_some();

        video_segments.push(serde_json::json!({
            "material_id": video_material_id,
            "source_start_us": source_start_us,
            "duration_us": duration_us,
            "target_start_us": timeline_cursor_us,
            "mute": muted,
        }));

        if let Some(audio_path) = &a.audio_path {
            let audio_id = format!("audio_{idx:04}");
            audio_materials.push(serde_json::json!({
                "id": audio_id,
                "path": audio_path.to_string_lossy(),
                "duration_us": duration_us,
            }));
            audio_segments.push(serde_json::json!({
                "material_id": audio_id,
                "target_start_us": timeline_cursor_us,
                "duration_us": duration_us,
                "speed": 1.0,
            }));
        }

        timeline_cursor_us += duration_us;
        let _ = &a.segment.id;
    }

    serde_json::json!({
        "canvas": canvas,
        "materials": {
            "videos": [{
                "id": video_material_id,
                "path": video_path.to_string_lossy(),
            }],
            "audios": audio_materials,
        },
        "tracks": [
            { "type": "video", "name": "main", "segments": [{
                "material_id": video_material_id,
                "source_start_us": 0,
                "duration_us": timeline_cursor_us,
                "target_start_us": 0,
                "mute": true,
            }] },
            { "type": "video", "name": "segments", "segments": video_segments },
            { "type": "audio", "name": "narration", "segments": audio_segments },
        ],
        "total_duration_us": timeline_cursor_us,
    })
}

/// Minimal companion metadata the target editor also expects alongside
/// `draft_info.json` (spec.md §4.9: "draft metadata, agency config, biz
/// config, attachments"). Field contents beyond presence/shape are opaque
/// to this crate per spec.md §1.
fn companion_files(project_id: &str, project_name: &str) -> Vec<(&'static str, serde_json::Value)> {
    vec![
        (
            "draft_meta_info.json",
            serde_json::json!({
                "draft_id": project_id,
                "draft_name": project_name,
                "draft_fold_path": ".",
            }),
        ),
        ("draft_agency_config.json", serde_json::json!({})),
        ("draft_biz_config.json", serde_json::json!({})),
        ("draft_attachments.json", serde_json::json!({ "attachments": [] })),
        (
            "performance_opt_info.json",
            serde_json::json!({
                "preload_all": false,
                "cache_apply": true,
            }),
        ),
    ]
}

/// Builds the draft folder under `req.output_dir`, returning its path.
/// Copies the source video, loudness-normalizes and aligns per-segment TTS,
/// and writes `draft_info.json` plus the companion metadata files.
pub async fn build_draft(req: DraftRequest, cancel: &CancellationToken) -> Result<PathBuf, AppError> {
    if req.script.segments.is_empty() {
        return Err(AppError::input_invalid("script has no segments to package"));
    }

    let video_dir = req.output_dir.join("assets").join("video");
    let audio_dir = req.output_dir.join("assets").join("audio");
    tokio::fs::create_dir_all(&video_dir).await?;
    tokio::fs::create_dir_all(&audio_dir).await?;

    (req.on_progress)(1.0, "preparing draft".to_string());

    let video_dur = crate::ffprobe::duration_secs(&req.source_video_path).await.unwrap_or(f64::MAX);
    let video_stream = crate::ffprobe::first_video_stream(&req.source_video_path).await;

    let ext = req
        .source_video_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4");
    let dest_video = video_dir.join(format!("source.{ext}"));
    tokio::fs::copy(&req.source_video_path, &dest_video).await?;

    let aligned = prepare_segments(
        req.script.segments.clone(),
        video_dur,
        &audio_dir,
        req.tts.clone(),
        cancel,
        &req.on_progress,
    )
    .await?;

    if cancel.is_cancelled() {
        return Err(AppError::cancelled());
    }

    (req.on_progress)(80.0, "writing draft_info.json".to_string());

    let canvas = match video_stream {
        Some(s) => canvas_json(s.width.unwrap_or(1920), s.height.unwrap_or(1080), s.frame_rate.unwrap_or(30.0)),
        None => canvas_json(1920, 1080, 30.0),
    };

    let draft_info = build_draft_info(canvas, "video_main", &dest_video, &aligned);
    let draft_info_path = req.output_dir.join("draft_info.json");
    write_json(&draft_info_path, &draft_info).await?;

    for (name, value) in companion_files(&req.project_id, &req.project_name) {
        write_json(&req.output_dir.join(name), &value).await?;
    }

    (req.on_progress)(100.0, "done".to_string());
    Ok(req.output_dir.clone())
}

async fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), AppError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| AppError::internal_invariant(e.to_string()))?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppErrorKind;
    use crate::script::model::Segment;
    use std::path::Path;

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

    struct NoopTts;

    #[async_trait::async_trait]
    impl TtsProvider for NoopTts {
        async fn synthesize(&self, _request: TtsRequest, _output_dir: &Path) -> Result<crate::tts::TtsResult, AppError> {
            Err(AppError::provider_unavailable("unused"))
        }
    }

    #[tokio::test]
    async fn empty_script_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let req = DraftRequest {
            project_id: "p1".into(),
            project_name: "demo".into(),
            source_video_path: PathBuf::from("/tmp/does-not-exist.mp4"),
            script: Script::new(0.0, vec![]),
            output_dir: dir.path().to_path_buf(),
            tts: Arc::new(NoopTts),
            on_progress: Arc::new(|_, _| {}),
        };
        let cancel = CancellationToken::new();
        let err = build_draft(req, &cancel).await.unwrap_err();
        assert_eq!(err.kind, AppErrorKind::InputInvalid);
    }

    #[test]
    fn build_draft_info_lays_out_timeline_sequentially() {
        let aligned = vec![
            AlignedSegment {
                segment: segment("1", 0.0, 10.0, 1, "播放原片"),
                window: AlignedWindow { start: 0.0, duration: 10.0 },
                audio_path: None,
            },
            AlignedSegment {
                segment: segment("2", 10.0, 25.0, 0, "Hello world"),
                window: AlignedWindow { start: 10.0, duration: 17.0 },
                audio_path: Some(PathBuf::from("/tmp/a.wav")),
            },
        ];
        let canvas = canvas_json(1920, 1080, 24.0);
        let info = build_draft_info(canvas, "video_main", Path::new("/tmp/source.mp4"), &aligned);
        assert_eq!(info["total_duration_us"], 27_000_000i64);
        let segments_track = &info["tracks"][1]["segments"];
        assert_eq!(segments_track[0]["target_start_us"], 0);
        assert_eq!(segments_track[1]["target_start_us"], 10_000_000i64);
        assert_eq!(segments_track[1]["mute"], true);
        assert_eq!(segments_track[0]["mute"], false);
    }
}
