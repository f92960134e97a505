//! Audio replacement (spec.md §4.8 "Audio replacement"), grounded on
//! `video_processor.py::replace_audio_with_narration`.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::CONFIG;
use crate::error::AppError;
use crate::process::{run_drain, RunOutcome};

use super::align::SHORTEST_TOLERANCE_SECS;
use super::encoder::encoder_priority_list;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplaceOutcome {
    /// The replacement succeeded and `out` carries the TTS audio track.
    Replaced,
    /// Every replacement attempt failed to yield a valid video stream; `out`
    /// is a plain copy of the original clip with its original audio.
    FellBackToOriginal,
}

async fn mux_shortest(video: &Path, audio: &Path, out: &Path, cancel: &CancellationToken) -> anyhow::Result<bool> {
    let ffmpeg = CONFIG.ffmpeg_path();
    let args = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-i".into(),
        audio.to_string_lossy().into_owned(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "192k".into(),
        "-ar".into(),
        "48000".into(),
        "-shortest".into(),
        out.to_string_lossy().into_owned(),
    ];
    let outcome = run_drain(&ffmpeg, &args, cancel).await?;
    if matches!(outcome, RunOutcome::Cancelled) {
        anyhow::bail!("cancelled");
    }
    Ok(outcome.success())
}

async fn mux_with_filter(
    video: &Path,
    audio: &Path,
    out: &Path,
    filter: &str,
    video_label: &str,
    audio_label: &str,
    encoder_args: &[String],
    cancel: &CancellationToken,
) -> anyhow::Result<bool> {
    let ffmpeg = CONFIG.ffmpeg_path();
    let mut args = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-i".into(),
        audio.to_string_lossy().into_owned(),
        "-filter_complex".into(),
        filter.to_string(),
        "-map".into(),
        video_label.to_string(),
        "-map".into(),
        audio_label.to_string(),
    ];
    args.extend(encoder_args.iter().cloned());
    args.extend(["-c:a".into(), "aac".into(), "-b:a".into(), "192k".into(), "-ar".into(), "48000".into()]);
    args.push(out.to_string_lossy().into_owned());
    let outcome = run_drain(&ffmpeg, &args, cancel).await?;
    if matches!(outcome, RunOutcome::Cancelled) {
        anyhow::bail!("cancelled");
    }
    Ok(outcome.success())
}

/// Maps an `attempt_replace` failure to `AppError::cancelled()` only if
/// `cancel` was actually triggered; otherwise propagates the real ffmpeg
/// failure as a media-processing error.
fn map_attempt_err(err: anyhow::Error, cancel: &CancellationToken) -> AppError {
    if cancel.is_cancelled() {
        AppError::cancelled()
    } else {
        AppError::media_processing_failure(err.to_string())
    }
}

async fn attempt_replace(video: &Path, audio: &Path, out: &Path, encoder_args: &[String], cancel: &CancellationToken) -> anyhow::Result<bool> {
    let adur = crate::ffprobe::duration_secs(audio).await.unwrap_or(0.0);
    let vdur = crate::ffprobe::duration_secs(video).await.unwrap_or(0.0);

    if (adur - vdur).abs() <= SHORTEST_TOLERANCE_SECS {
        return mux_shortest(video, audio, out, cancel).await;
    }
    if adur >= vdur {
        let pad = adur - vdur;
        let filter = format!(
            "[0:v]tpad=stop_mode=clone:stop_duration={pad:.3},setpts=PTS-STARTPTS[v];[1:a]asetpts=PTS-STARTPTS[a]"
        );
        return mux_with_filter(video, audio, out, &filter, "[v]", "[a]", encoder_args, cancel).await;
    }
    let filter = format!("[0:v]trim=0:{adur:.3},setpts=PTS-STARTPTS[v]");
    mux_with_filter(video, audio, out, &filter, "[v]", "1:a:0", encoder_args, cancel).await
}

/// Replaces `video`'s audio with `audio`, picking a mux/tpad/trim graph by
/// duration comparison, verifying the output retains a video stream, and
/// falling back first to a CPU-only re-encode and then to a plain copy of
/// the original clip with its original audio.
pub async fn replace_audio_with_narration(video: &Path, audio: &Path, out: &Path, cancel: &CancellationToken) -> Result<ReplaceOutcome, AppError> {
    let encoders = encoder_priority_list().await;
    let first_encoder = encoders.first().map(|e| e.args.clone()).unwrap_or_default();

    let succeeded = attempt_replace(video, audio, out, &first_encoder, cancel)
        .await
        .map_err(|err| map_attempt_err(err, cancel))?;
    if succeeded && crate::ffprobe::first_video_stream(out).await.is_some() {
        return Ok(ReplaceOutcome::Replaced);
    }

    // CPU-only re-encode fallback, forcing libx264 regardless of what the
    // first attempt used.
    let libx264_args: Vec<String> = vec!["-c:v".into(), "libx264".into(), "-preset".into(), "superfast".into(), "-crf".into(), "18".into()];
    let retried = attempt_replace(video, audio, out, &libx264_args, cancel)
        .await
        .map_err(|err| map_attempt_err(err, cancel))?;
    if retried && crate::ffprobe::first_video_stream(out).await.is_some() {
        return Ok(ReplaceOutcome::Replaced);
    }

    tokio::fs::copy(video, out).await.map_err(AppError::from)?;
    Ok(ReplaceOutcome::FellBackToOriginal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_constant_is_policy_fixed() {
        assert!((SHORTEST_TOLERANCE_SECS - 0.05).abs() < 1e-12);
    }
}
