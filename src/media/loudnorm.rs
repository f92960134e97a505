//! Two-pass loudness normalization (spec.md §4.8 "Loudness normalization"),
//! grounded on `audio_normalizer.py`.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::CONFIG;
use crate::error::AppError;
use crate::process::{run_drain, RunOutcome};

/// EBU R128 integrated loudness target in LUFS.
const TARGET_I: f64 = -20.0;
/// True-peak ceiling in dBTP.
const TARGET_TP: f64 = -1.0;
/// Loudness range target.
const TARGET_LRA: f64 = 7.0;

#[derive(Debug, Clone, serde::Deserialize)]
struct LoudnormMeasurement {
    input_i: String,
    input_tp: String,
    input_lra: String,
    input_thresh: String,
    target_offset: String,
}

fn loudnorm_measure_filter() -> String {
    format!("loudnorm=I={TARGET_I}:TP={TARGET_TP}:LRA={TARGET_LRA}:print_format=json")
}

fn loudnorm_apply_filter(m: &LoudnormMeasurement) -> String {
    format!(
        "loudnorm=I={TARGET_I}:TP={TARGET_TP}:LRA={TARGET_LRA}:measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:offset={}:linear=true:print_format=summary",
        m.input_i, m.input_tp, m.input_lra, m.input_thresh, m.target_offset
    )
}

/// Extracts the trailing `{...}` JSON block loudnorm prints to stderr on its
/// measurement pass, tolerating the surrounding log lines.
fn extract_measurement(stderr: &[u8]) -> Option<LoudnormMeasurement> {
    let text = String::from_utf8_lossy(stderr);
    let start = text.rfind('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

async fn run_pass(args: Vec<String>, cancel: &CancellationToken) -> Result<RunOutcome, AppError> {
    let ffmpeg = CONFIG.ffmpeg_path();
    run_drain(&ffmpeg, &args, cancel).await.map_err(AppError::from)
}

fn base_args() -> Vec<String> {
    vec!["-y".into(), "-hide_banner".into()]
}

async fn single_pass(input: &Path, out: &Path, cancel: &CancellationToken) -> Result<bool, AppError> {
    let mut args = base_args();
    args.extend([
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-af".into(),
        format!("loudnorm=I={TARGET_I}:TP={TARGET_TP}:LRA={TARGET_LRA}"),
        "-ar".into(),
        "48000".into(),
        out.to_string_lossy().into_owned(),
    ]);
    let outcome = run_pass(args, cancel).await?;
    if outcome.is_cancelled() {
        return Err(AppError::cancelled());
    }
    Ok(outcome.success())
}

/// Runs two-pass loudnorm on `input`, writing the normalized result to
/// `out`. Falls back to a single uncalibrated pass if the first pass's
/// measurement JSON can't be parsed.
pub async fn normalize_loudness(input: &Path, out: &Path, cancel: &CancellationToken) -> Result<(), AppError> {
    let mut measure_args = base_args();
    measure_args.extend([
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-af".into(),
        loudnorm_measure_filter(),
        "-f".into(),
        "null".into(),
        "-".into(),
    ]);
    let measure_outcome = run_pass(measure_args, cancel).await?;
    if measure_outcome.is_cancelled() {
        return Err(AppError::cancelled());
    }

    let measurement = match &measure_outcome {
        RunOutcome::Finished { stderr, .. } => extract_measurement(stderr),
        RunOutcome::Cancelled => None,
    };

    let Some(measurement) = measurement else {
        if single_pass(input, out, cancel).await? {
            return Ok(());
        }
        return Err(AppError::media_processing_failure("loudnorm single-pass fallback failed"));
    };

    let mut apply_args = base_args();
    apply_args.extend([
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-af".into(),
        loudnorm_apply_filter(&measurement),
        "-ar".into(),
        "48000".into(),
        out.to_string_lossy().into_owned(),
    ]);
    let apply_outcome = run_pass(apply_args, cancel).await?;
    if apply_outcome.is_cancelled() {
        return Err(AppError::cancelled());
    }
    if apply_outcome.success() {
        return Ok(());
    }

    if single_pass(input, out, cancel).await? {
        return Ok(());
    }
    Err(AppError::media_processing_failure("loudnorm: both two-pass apply and single-pass fallback failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_measurement_json_amid_log_noise() {
        let stderr = b"[Parsed_loudnorm_0 @ 0x0] some log line\n{\n\"input_i\" : \"-23.5\",\n\"input_tp\" : \"-3.2\",\n\"input_lra\" : \"4.0\",\n\"input_thresh\" : \"-33.8\",\n\"output_i\" : \"-20.0\",\n\"output_tp\" : \"-1.0\",\n\"output_lra\" : \"7.0\",\n\"output_thresh\" : \"-30.0\",\n\"normalization_type\" : \"dynamic\",\n\"target_offset\" : \"0.3\"\n}\n";
        let parsed = extract_measurement(stderr).expect("should parse");
        assert_eq!(parsed.input_i, "-23.5");
        assert_eq!(parsed.target_offset, "0.3");
    }

    #[test]
    fn missing_braces_yields_none() {
        let stderr = b"no json here at all";
        assert!(extract_measurement(stderr).is_none());
    }

    #[test]
    fn malformed_json_yields_none() {
        let stderr = b"{ \"input_i\": \"-23.5\" "; // missing closing brace and fields
        assert!(extract_measurement(stderr).is_none());
    }
}
