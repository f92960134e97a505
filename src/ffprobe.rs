//! Media inspector (spec.md component B).
//!
//! Read-only ffprobe wrappers: duration, per-stream codec info, container
//! format name, and "does the file start on a keyframe" — all used by the
//! video pipeline to pick fast paths and by the draft builder to size
//! canvases. Every probe returns `None` on any failure instead of
//! propagating an error: a missing probe just disables a fast path.

use serde::Deserialize;

use crate::config::CONFIG;

#[derive(Debug, Clone, Deserialize)]
struct FFprobeFormat {
    duration: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FFprobeStreamRaw {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    r_frame_rate: Option<String>,
    sample_rate: Option<String>,
    channels: Option<i64>,
    #[serde(default)]
    disposition: std::collections::HashMap<String, i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct FFprobeOutput {
    #[serde(default)]
    streams: Vec<FFprobeStreamRaw>,
    format: Option<FFprobeFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub codec_type: String,
    pub codec_name: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub frame_rate: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<i64>,
}

async fn run_ffprobe_json(args: &[String]) -> Option<FFprobeOutput> {
    let ffprobe = CONFIG.ffprobe_path();
    let cancel = tokio_util::sync::CancellationToken::new();
    let outcome = crate::process::run_drain(&ffprobe, args, &cancel).await.ok()?;
    match outcome {
        crate::process::RunOutcome::Finished { status, .. } if status.success() => {}
        _ => return None,
    }
    // ffprobe with -print_format json writes to stdout; run_drain only
    // buffers stderr, so json output is re-fetched via a plain Command
    // capture here to keep `process::run_drain`'s contract (stderr-only
    // buffering) uniform across callers.
    let output = tokio::process::Command::new(&ffprobe)
        .args(args)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    serde_json::from_slice(&output.stdout).ok()
}

/// Probes container duration in seconds, matching `_ffprobe_duration`.
pub async fn duration_secs(path: &std::path::Path) -> Option<f64> {
    let args = vec![
        "-v".into(),
        "error".into(),
        "-show_entries".into(),
        "format=duration".into(),
        "-of".into(),
        "json".into(),
        path.to_string_lossy().into_owned(),
    ];
    let out = run_ffprobe_json(&args).await?;
    out.format?.duration?.parse::<f64>().ok()
}

/// Probes the container format name, matching `_ffprobe_format_name`.
pub async fn format_name(path: &std::path::Path) -> Option<String> {
    let args = vec![
        "-v".into(),
        "error".into(),
        "-show_entries".into(),
        "format=format_name".into(),
        "-of".into(),
        "json".into(),
        path.to_string_lossy().into_owned(),
    ];
    let out = run_ffprobe_json(&args).await?;
    out.format?.format_name
}

/// Probes stream info for both the first video and first audio stream,
/// matching `_probe_stream_info`.
pub async fn probe_streams(path: &std::path::Path) -> Option<Vec<StreamInfo>> {
    let args = vec![
        "-v".into(),
        "error".into(),
        "-show_entries".into(),
        "stream=codec_type,codec_name,width,height,r_frame_rate,sample_rate,channels".into(),
        "-of".into(),
        "json".into(),
        path.to_string_lossy().into_owned(),
    ];
    let out = run_ffprobe_json(&args).await?;
    Some(
        out.streams
            .into_iter()
            .map(|s| StreamInfo {
                codec_type: s.codec_type.unwrap_or_default(),
                codec_name: s.codec_name.unwrap_or_default(),
                width: s.width,
                height: s.height,
                frame_rate: s.r_frame_rate.as_deref().and_then(parse_rational_rate),
                sample_rate: s.sample_rate.and_then(|v| v.parse().ok()),
                channels: s.channels,
            })
            .collect(),
    )
}

fn parse_rational_rate(s: &str) -> Option<f64> {
    let mut parts = s.split('/');
    let num: f64 = parts.next()?.parse().ok()?;
    let den: f64 = parts.next().unwrap_or("1").parse().ok()?;
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

pub async fn first_video_stream(path: &std::path::Path) -> Option<StreamInfo> {
    probe_streams(path)
        .await?
        .into_iter()
        .find(|s| s.codec_type == "video")
}

pub async fn first_audio_stream(path: &std::path::Path) -> Option<StreamInfo> {
    probe_streams(path)
        .await?
        .into_iter()
        .find(|s| s.codec_type == "audio")
}

/// Checks whether the file's first video frame is a keyframe, matching
/// `_first_frame_is_keyframe` — used to decide whether a stream-copy cut at
/// an arbitrary `-ss` offset is safe without a re-encode.
pub async fn first_frame_is_keyframe(path: &std::path::Path) -> Option<bool> {
    let args = vec![
        "-v".into(),
        "error".into(),
        "-select_streams".into(),
        "v:0".into(),
        "-show_entries".into(),
        "frame=key_frame".into(),
        "-read_intervals".into(),
        "%+#1".into(),
        "-of".into(),
        "json".into(),
        path.to_string_lossy().into_owned(),
    ];
    let ffprobe = CONFIG.ffprobe_path();
    let output = tokio::process::Command::new(&ffprobe)
        .args(&args)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    #[derive(Deserialize)]
    struct Frame {
        key_frame: i64,
    }
    #[derive(Deserialize)]
    struct FramesOut {
        #[serde(default)]
        frames: Vec<Frame>,
    }
    let parsed: FramesOut = serde_json::from_slice(&output.stdout).ok()?;
    parsed.frames.first().map(|f| f.key_frame == 1)
}

#[cfg(test)]
mod tests {
    use super::parse_rational_rate;

    #[test]
    fn parses_ntsc_rate() {
        assert!((parse_rational_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn rejects_zero_denominator() {
        assert_eq!(parse_rational_rate("30/0"), None);
    }
}
