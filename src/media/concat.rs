//! Concatenation with multiple codec strategies and fallbacks (spec.md §4.8
//! "Concatenation"), grounded on `video_processor.py::concat_videos`.

use std::path::{Path, PathBuf};

use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

use crate::config::CONFIG;
use crate::error::AppError;
use crate::ffprobe::{self, StreamInfo};
use crate::process::{run_drain, spawn_line_stream, RunOutcome};

use super::encoder::encoder_priority_list;

const FRAME_RATE_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatTier {
    Demuxer,
    TsConcat,
    FilterComplex,
}

struct ClipProfile {
    path: PathBuf,
    format_name: Option<String>,
    video: Option<StreamInfo>,
    audio: Option<StreamInfo>,
}

async fn profile_clip(path: &Path) -> ClipProfile {
    ClipProfile {
        path: path.to_path_buf(),
        format_name: ffprobe::format_name(path).await,
        video: ffprobe::first_video_stream(path).await,
        audio: ffprobe::first_audio_stream(path).await,
    }
}

fn frame_rates_match(a: &[ClipProfile]) -> bool {
    let rates: Vec<f64> = a.iter().filter_map(|c| c.video.as_ref().and_then(|v| v.frame_rate)).collect();
    if rates.len() != a.len() {
        return false;
    }
    rates.windows(2).all(|w| (w[0] - w[1]).abs() <= FRAME_RATE_TOLERANCE)
}

fn tier1_compatible(clips: &[ClipProfile]) -> bool {
    let Some(first) = clips.first() else { return false };
    let Some(first_v) = &first.video else { return false };
    if !frame_rates_match(clips) {
        return false;
    }
    clips.iter().all(|c| match (&c.video, &first_v) {
        (Some(v), first_v) => v.codec_name == first_v.codec_name && v.width == first_v.width && v.height == first_v.height,
        _ => false,
    }) && clips.iter().all(|c| c.audio.is_some() == first.audio.is_some())
        && clips.iter().all(|c| match (&c.audio, &first.audio) {
            (Some(a), Some(fa)) => a.codec_name == fa.codec_name && a.sample_rate == fa.sample_rate && a.channels == fa.channels,
            (None, None) => true,
            _ => false,
        })
}

fn tier2_compatible(clips: &[ClipProfile]) -> bool {
    clips.iter().all(|c| {
        let video_ok = c.video.as_ref().is_some_and(|v| v.codec_name == "h264" || v.codec_name == "hevc");
        let container_ok = c
            .format_name
            .as_ref()
            .is_some_and(|f| f.contains("mp4") || f.contains("mov"));
        let audio_ok = c.audio.is_none() || c.audio.as_ref().is_some_and(|a| a.codec_name == "aac");
        video_ok && container_ok && audio_ok
    })
}

fn choose_tier(clips: &[ClipProfile]) -> ConcatTier {
    if tier1_compatible(clips) {
        ConcatTier::Demuxer
    } else if tier2_compatible(clips) {
        ConcatTier::TsConcat
    } else {
        ConcatTier::FilterComplex
    }
}

/// Parses ffmpeg's `-progress pipe:1` stdout stream, calling `on_progress`
/// with a percentage capped at 99 until a `progress=end` line is observed,
/// at which point it reports 100. Races every line read against `cancel`.
async fn run_with_progress(
    args: &[String],
    total_duration_secs: f64,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(f64),
) -> Result<bool, AppError> {
    let ffmpeg = CONFIG.ffmpeg_path();
    let mut job = spawn_line_stream(&ffmpeg, args).map_err(AppError::from)?;
    let total_ms = (total_duration_secs * 1000.0).max(1.0);

    loop {
        let line = tokio::select! {
            line = job.lines.next_line() => line,
            _ = cancel.cancelled() => {
                let _ = job.wait_or_cancel(cancel).await;
                return Err(AppError::cancelled());
            }
        };
        match line {
            Ok(Some(line)) => {
                if let Some(ms_str) = line.strip_prefix("out_time_ms=") {
                    if let Ok(ms) = ms_str.trim().parse::<f64>() {
                        let pct = (ms / total_ms * 100.0).clamp(0.0, 99.0);
                        on_progress(pct);
                    }
                } else if line.trim() == "progress=end" {
                    on_progress(100.0);
                }
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }

    let outcome = job.wait_or_cancel(cancel).await;
    if matches!(outcome, RunOutcome::Cancelled) {
        return Err(AppError::cancelled());
    }
    Ok(outcome.success())
}

fn base_args() -> Vec<String> {
    vec!["-y".into(), "-hide_banner".into(), "-loglevel".into(), "error".into()]
}

async fn total_video_duration(clips: &[PathBuf]) -> f64 {
    let mut total = 0.0;
    for clip in clips {
        total += ffprobe::duration_secs(clip).await.unwrap_or(0.0);
    }
    total
}

async fn remux_single(clip: &Path, out: &Path, cancel: &CancellationToken) -> Result<bool, AppError> {
    let ffmpeg = CONFIG.ffmpeg_path();
    let mut args = base_args();
    args.extend([
        "-i".into(),
        clip.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
        "-movflags".into(),
        "+faststart".into(),
        out.to_string_lossy().into_owned(),
    ]);
    let outcome = run_drain(&ffmpeg, &args, cancel).await?;
    if matches!(outcome, RunOutcome::Cancelled) {
        return Err(AppError::cancelled());
    }
    Ok(outcome.success())
}

async fn reencode_single(clip: &Path, out: &Path, cancel: &CancellationToken) -> Result<bool, AppError> {
    let ffmpeg = CONFIG.ffmpeg_path();
    let encoders = encoder_priority_list().await;
    for encoder in encoders {
        let mut args = base_args();
        args.extend(["-i".into(), clip.to_string_lossy().into_owned()]);
        args.extend(encoder.args.iter().cloned());
        args.extend(["-c:a".into(), "aac".into(), out.to_string_lossy().into_owned()]);
        let outcome = run_drain(&ffmpeg, &args, cancel).await?;
        if matches!(outcome, RunOutcome::Cancelled) {
            return Err(AppError::cancelled());
        }
        if outcome.success() {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn concat_demuxer(clips: &[PathBuf], out: &Path, tmp_dir: &Path, cancel: &CancellationToken) -> Result<bool, AppError> {
    let list_path = tmp_dir.join("concat_list.txt");
    let list_body = clips
        .iter()
        .map(|p| format!("file '{}'", p.to_string_lossy().replace('\'', "'\\''")))
        .collect::<Vec<_>>()
        .join("\n");
    tokio::fs::write(&list_path, list_body).await.map_err(AppError::from)?;

    let ffmpeg = CONFIG.ffmpeg_path();
    let mut args = base_args();
    args.extend([
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list_path.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
        "-movflags".into(),
        "+faststart".into(),
        out.to_string_lossy().into_owned(),
    ]);
    let outcome = run_drain(&ffmpeg, &args, cancel).await;
    let _ = tokio::fs::remove_file(&list_path).await;
    let outcome = outcome?;
    if matches!(outcome, RunOutcome::Cancelled) {
        return Err(AppError::cancelled());
    }
    Ok(outcome.success())
}

async fn concat_ts(clips: &[ClipProfile], out: &Path, tmp_dir: &Path, cancel: &CancellationToken) -> Result<bool, AppError> {
    let ffmpeg = CONFIG.ffmpeg_path();
    let mut ts_paths = Vec::with_capacity(clips.len());

    for (i, clip) in clips.iter().enumerate() {
        let ts_path = tmp_dir.join(format!("seg_{i}.ts"));
        let bsf = if clip.video.as_ref().map(|v| v.codec_name.as_str()) == Some("hevc") {
            "hevc_mp4toannexb"
        } else {
            "h264_mp4toannexb"
        };
        let mut args = base_args();
        args.extend(["-i".into(), clip.path.to_string_lossy().into_owned()]);
        args.extend(["-c".into(), "copy".into(), "-bsf:v".into(), bsf.to_string()]);
        if clip.audio.is_some() {
            args.extend(["-bsf:a".into(), "aac_adtstoasc".into()]);
        }
        args.extend(["-f".into(), "mpegts".into(), ts_path.to_string_lossy().into_owned()]);
        let outcome = run_drain(&ffmpeg, &args, cancel).await;
        if let Ok(outcome) = &outcome {
            if !outcome.success() {
                cleanup_ts(&ts_paths).await;
                return Ok(false);
            }
        } else {
            cleanup_ts(&ts_paths).await;
            return Err(outcome.unwrap_err().into());
        }
        ts_paths.push(ts_path);
    }

    let concat_uri = format!("concat:{}", ts_paths.iter().map(|p| p.to_string_lossy().into_owned()).collect::<Vec<_>>().join("|"));
    let mut args = base_args();
    args.extend([
        "-i".into(),
        concat_uri,
        "-c".into(),
        "copy".into(),
        "-movflags".into(),
        "+faststart".into(),
        out.to_string_lossy().into_owned(),
    ]);
    let outcome = run_drain(&ffmpeg, &args, cancel).await;
    cleanup_ts(&ts_paths).await;
    let outcome = outcome?;
    if matches!(outcome, RunOutcome::Cancelled) {
        return Err(AppError::cancelled());
    }
    Ok(outcome.success())
}

async fn cleanup_ts(paths: &[PathBuf]) {
    for p in paths {
        let _ = tokio::fs::remove_file(p).await;
    }
}

async fn concat_filter_complex(clips: &[PathBuf], out: &Path, cancel: &CancellationToken) -> Result<bool, AppError> {
    let n = clips.len();
    let fps = 30.0;
    let mut filter_parts = Vec::new();
    let mut concat_inputs = String::new();
    for i in 0..n {
        filter_parts.push(format!(
            "[{i}:v:0]scale=trunc(iw/2)*2:trunc(ih/2)*2,fps={fps},format=yuv420p,setpts=PTS-STARTPTS[v{i}]"
        ));
        filter_parts.push(format!("[{i}:a:0]aresample=48000,asetpts=PTS-STARTPTS[a{i}]"));
        concat_inputs.push_str(&format!("[v{i}][a{i}]"));
    }
    filter_parts.push(format!("{concat_inputs}concat=n={n}:v=1:a=1[outv][outa]"));
    let filter = filter_parts.join(";");

    let encoders = encoder_priority_list().await;
    for encoder in encoders {
        let ffmpeg = CONFIG.ffmpeg_path();
        let mut args = base_args();
        for clip in clips {
            args.extend(["-i".into(), clip.to_string_lossy().into_owned()]);
        }
        args.extend(["-filter_complex".into(), filter.clone()]);
        args.extend(["-map".into(), "[outv]".into(), "-map".into(), "[outa]".into()]);
        args.extend(encoder.args.iter().cloned());
        args.extend(["-c:a".into(), "aac".into(), "-b:a".into(), "192k".into()]);
        args.push(out.to_string_lossy().into_owned());
        let outcome = run_drain(&ffmpeg, &args, cancel).await?;
        if matches!(outcome, RunOutcome::Cancelled) {
            return Err(AppError::cancelled());
        }
        if outcome.success() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Concatenates `clips` into `out`, remuxing directly for a single input and
/// otherwise trying concat tiers in decreasing order of efficiency. Temp
/// files (concat list, TS segments) are always cleaned up.
pub async fn concat_videos(clips: &[PathBuf], out: &Path, tmp_dir: &Path, cancel: &CancellationToken) -> Result<(), AppError> {
    if clips.is_empty() {
        return Err(AppError::input_invalid("concat_videos requires at least one clip"));
    }
    if clips.len() == 1 {
        if remux_single(&clips[0], out, cancel).await? {
            return Ok(());
        }
        if reencode_single(&clips[0], out, cancel).await? {
            return Ok(());
        }
        return Err(AppError::media_processing_failure("single-clip remux and re-encode both failed"));
    }

    let mut profiles = Vec::with_capacity(clips.len());
    for clip in clips {
        profiles.push(profile_clip(clip).await);
    }

    match choose_tier(&profiles) {
        ConcatTier::Demuxer => {
            if concat_demuxer(clips, out, tmp_dir, cancel).await? {
                return Ok(());
            }
        }
        ConcatTier::TsConcat => {
            if concat_ts(&profiles, out, tmp_dir, cancel).await? {
                return Ok(());
            }
        }
        ConcatTier::FilterComplex => {}
    }

    if concat_filter_complex(clips, out, cancel).await? {
        return Ok(());
    }

    Err(AppError::media_processing_failure("all concat tiers failed"))
}

/// Concatenates with progress reporting, used by `media::pipeline`'s
/// `concat_start` phase. Progress percentage is derived from the sum of
/// clip video-stream durations.
pub async fn concat_videos_with_progress(
    clips: &[PathBuf],
    out: &Path,
    tmp_dir: &Path,
    cancel: &CancellationToken,
    on_progress: impl FnMut(f64),
) -> Result<(), AppError> {
    let total_duration = total_video_duration(clips).await;
    if clips.len() == 1 {
        return concat_videos(clips, out, tmp_dir, cancel).await;
    }
    let profiles = {
        let mut profiles = Vec::with_capacity(clips.len());
        for clip in clips {
            profiles.push(profile_clip(clip).await);
        }
        profiles
    };
    if choose_tier(&profiles) == ConcatTier::Demuxer {
        let list_path = tmp_dir.join("concat_list.txt");
        let list_body = clips
            .iter()
            .map(|p| format!("file '{}'", p.to_string_lossy().replace('\'', "'\\''")))
            .collect::<Vec<_>>()
            .join("\n");
        tokio::fs::write(&list_path, list_body).await.map_err(AppError::from)?;
        let args = {
            let mut a = base_args();
            a.extend([
                "-f".into(),
                "concat".into(),
                "-safe".into(),
                "0".into(),
                "-i".into(),
                list_path.to_string_lossy().into_owned(),
                "-c".into(),
                "copy".into(),
                "-movflags".into(),
                "+faststart".into(),
                "-progress".into(),
                "pipe:1".into(),
                out.to_string_lossy().into_owned(),
            ]);
            a
        };
        let result = run_with_progress(&args, total_duration, cancel, on_progress).await;
        let _ = tokio::fs::remove_file(&list_path).await;
        if result? {
            return Ok(());
        }
    }
    concat_videos(clips, out, tmp_dir, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(codec: &str, w: i64, h: i64, fps: f64, has_audio: bool) -> ClipProfile {
        ClipProfile {
            path: PathBuf::from("clip.mp4"),
            format_name: Some("mov,mp4,m4a,3gp,3g2,mj2".to_string()),
            video: Some(StreamInfo {
                codec_type: "video".into(),
                codec_name: codec.into(),
                width: Some(w),
                height: Some(h),
                frame_rate: Some(fps),
                sample_rate: None,
                channels: None,
            }),
            audio: has_audio.then_some(StreamInfo {
                codec_type: "audio".into(),
                codec_name: "aac".into(),
                width: None,
                height: None,
                frame_rate: None,
                sample_rate: Some(48000),
                channels: Some(2),
            }),
        }
    }

    #[test]
    fn identical_clips_pick_demuxer_tier() {
        let clips = vec![profile("h264", 1920, 1080, 24.0, true), profile("h264", 1920, 1080, 24.0, true)];
        assert_eq!(choose_tier(&clips), ConcatTier::Demuxer);
    }

    #[test]
    fn mismatched_resolution_falls_to_lower_tier() {
        let clips = vec![profile("h264", 1920, 1080, 24.0, true), profile("h264", 1280, 720, 24.0, true)];
        assert_eq!(choose_tier(&clips), ConcatTier::TsConcat);
    }

    #[test]
    fn mismatched_codec_falls_to_filter_complex() {
        let clips = vec![profile("h264", 1920, 1080, 24.0, true), profile("vp9", 1920, 1080, 24.0, true)];
        assert_eq!(choose_tier(&clips), ConcatTier::FilterComplex);
    }
}
