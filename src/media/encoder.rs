//! Encoder priority detection (spec.md §4.8 "Encoder priority"), grounded on
//! `video_processor.py`'s `_get_encoder_priority_list`/`_detect_encoders`/
//! `_detect_cuda`. `libx264` is always tried first regardless of GPU
//! availability, to maximize the odds any single attempt succeeds; hardware
//! encoders are appended only when detected.

use tokio::sync::OnceCell;

use crate::config::CONFIG;

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderChoice {
    pub name: &'static str,
    pub args: Vec<String>,
}

fn args(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn libx264() -> EncoderChoice {
    EncoderChoice {
        name: "libx264",
        args: args(&["-c:v", "libx264", "-preset", "superfast", "-crf", "18"]),
    }
}

fn h264_nvenc() -> EncoderChoice {
    EncoderChoice {
        name: "h264_nvenc",
        args: args(&["-c:v", "h264_nvenc", "-preset", "p3", "-rc:v", "vbr_hq", "-cq:v", "19"]),
    }
}

fn h264_qsv() -> EncoderChoice {
    EncoderChoice {
        name: "h264_qsv",
        args: args(&["-c:v", "h264_qsv"]),
    }
}

fn h264_amf() -> EncoderChoice {
    EncoderChoice {
        name: "h264_amf",
        args: args(&["-c:v", "h264_amf"]),
    }
}

#[derive(Debug, Clone, Default)]
struct DetectedEncoders {
    nvenc: bool,
    qsv: bool,
    amf: bool,
    cuda_hwaccel: bool,
}

static DETECTED: OnceCell<DetectedEncoders> = OnceCell::const_new();

async fn run_and_capture_stdout(args: &[&str]) -> String {
    let ffmpeg = CONFIG.ffmpeg_path();
    match tokio::process::Command::new(&ffmpeg).args(args).output().await {
        Ok(output) => String::from_utf8_lossy(&output.stdout).into_owned(),
        Err(_) => String::new(),
    }
}

async fn detect() -> DetectedEncoders {
    let encoders_text = run_and_capture_stdout(&["-hide_banner", "-encoders"]).await;
    let hwaccels_text = run_and_capture_stdout(&["-hide_banner", "-hwaccels"]).await;
    DetectedEncoders {
        nvenc: encoders_text.contains("h264_nvenc"),
        qsv: encoders_text.contains("h264_qsv"),
        amf: encoders_text.contains("h264_amf"),
        cuda_hwaccel: hwaccels_text.lines().any(|l| l.trim() == "cuda"),
    }
}

/// Builds the ordered list of encoders to try, detecting hardware support
/// once per process (cached for subsequent calls).
pub async fn encoder_priority_list() -> Vec<EncoderChoice> {
    let detected = DETECTED.get_or_init(detect).await;
    let mut list = vec![libx264()];
    if detected.nvenc && detected.cuda_hwaccel {
        list.push(h264_nvenc());
    }
    if detected.qsv {
        list.push(h264_qsv());
    }
    if detected.amf {
        list.push(h264_amf());
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libx264_is_always_first_regardless_of_detection() {
        let detected = DetectedEncoders {
            nvenc: true,
            qsv: true,
            amf: true,
            cuda_hwaccel: true,
        };
        let mut list = vec![libx264()];
        if detected.nvenc && detected.cuda_hwaccel {
            list.push(h264_nvenc());
        }
        assert_eq!(list[0].name, "libx264");
    }

    #[tokio::test]
    async fn priority_list_always_contains_libx264() {
        let list = encoder_priority_list().await;
        assert_eq!(list[0].name, "libx264");
    }
}
