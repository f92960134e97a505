//! Segment cutting (spec.md §4.8 "Per-segment cut"), grounded on
//! `video_processor.py::cut_video_segment`.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::CONFIG;
use crate::error::AppError;
use crate::process::{run_drain, RunOutcome};

use super::encoder::encoder_priority_list;

const PROBE_MIN_DURATION_SECS: f64 = 0.01;

fn to_args(source: &Path, start: f64, duration: f64, out: &Path, fast: bool, encoder_args: &[String]) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-hide_banner".to_string(), "-loglevel".to_string(), "error".to_string()];
    if fast {
        args.extend(["-ss".to_string(), format!("{start:.3}")]);
        args.extend(["-i".to_string(), source.to_string_lossy().into_owned()]);
        args.extend(["-t".to_string(), format!("{duration:.3}")]);
        args.extend(["-c".to_string(), "copy".to_string()]);
    } else {
        args.extend(["-i".to_string(), source.to_string_lossy().into_owned()]);
        args.extend(["-ss".to_string(), format!("{start:.3}")]);
        args.extend(["-t".to_string(), format!("{duration:.3}")]);
        args.extend(encoder_args.iter().cloned());
        args.extend(["-c:a".to_string(), "aac".to_string(), "-b:a".to_string(), "192k".to_string()]);
    }
    args.push(out.to_string_lossy().into_owned());
    args
}

/// Cuts `[start, start+duration)` out of `source` into `out`, trying a fast
/// stream-copy cut first and falling back to a re-encode with the best
/// available encoder if the copy fails or produces a near-zero-length file.
pub async fn cut_video_segment(source: &Path, start: f64, duration: f64, out: &Path, cancel: &CancellationToken) -> Result<(), AppError> {
    if duration <= 0.0 {
        return Err(AppError::input_invalid(format!("segment duration must be positive, got {duration}")));
    }
    let ffmpeg = CONFIG.ffmpeg_path();

    let fast_args = to_args(source, start, duration, out, true, &[]);
    let outcome = run_drain(&ffmpeg, &fast_args, cancel).await?;
    if let RunOutcome::Cancelled = outcome {
        return Err(AppError::cancelled());
    }
    if outcome.success() {
        if let Some(probed) = crate::ffprobe::duration_secs(out).await {
            if probed > PROBE_MIN_DURATION_SECS {
                return Ok(());
            }
        }
    }

    let encoders = encoder_priority_list().await;
    for encoder in encoders {
        let args = to_args(source, start, duration, out, false, &encoder.args);
        let outcome = run_drain(&ffmpeg, &args, cancel).await?;
        if let RunOutcome::Cancelled = outcome {
            return Err(AppError::cancelled());
        }
        if outcome.success() {
            if let Some(probed) = crate::ffprobe::duration_secs(out).await {
                if probed > PROBE_MIN_DURATION_SECS {
                    return Ok(());
                }
            }
        }
    }

    Err(AppError::media_processing_failure(format!(
        "cut_video_segment: all encoders failed for {}",
        source.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_positive_duration() {
        let cancel = CancellationToken::new();
        let err = cut_video_segment(Path::new("/nonexistent.mp4"), 0.0, 0.0, Path::new("/tmp/out.mp4"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::AppErrorKind::InputInvalid);
    }
}
