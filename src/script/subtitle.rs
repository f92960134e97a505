//! Subtitle parsing and the compressed-bracket dialect (spec.md §4.7, §6),
//! grounded on `subtitle_utils.py`. Two input dialects are auto-detected:
//! standard SRT (`index\nHH:MM:SS,mmm --> HH:MM:SS,mmm\ntext`) and the
//! project-private compressed form `[HH:MM:SS,mmm-HH:MM:SS,mmm] text`.

use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
}

static SRT_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{2}):(\d{2}):(\d{2}),(\d{3})\s*-->\s*(\d{2}):(\d{2}):(\d{2}),(\d{3})").unwrap()
});

static BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{2}:\d{2}:\d{2},\d{3})-(\d{2}:\d{2}:\d{2},\d{3})\]\s*(.*)$").unwrap()
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Parses `HH:MM:SS,mmm` into seconds.
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let s = s.trim();
    let mut parts = s.splitn(2, ',');
    let hms = parts.next()?;
    let millis: f64 = parts.next().unwrap_or("0").parse().ok()?;
    let mut hms_parts = hms.split(':');
    let h: f64 = hms_parts.next()?.parse().ok()?;
    let m: f64 = hms_parts.next()?.parse().ok()?;
    let s: f64 = hms_parts.next()?.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s + millis / 1000.0)
}

/// Formats seconds back into `HH:MM:SS,mmm`.
pub fn format_timestamp(secs: f64) -> String {
    let secs = secs.max(0.0);
    let total_ms = (secs * 1000.0).round() as i64;
    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;
    let s = total_s % 60;
    let total_m = total_s / 60;
    let m = total_m % 60;
    let h = total_m / 60;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Parses a `start-end` exchange range like `00:00:01,000-00:00:05,500`.
pub fn parse_timestamp_range(s: &str) -> Option<(f64, f64)> {
    let (start, end) = s.split_once('-')?;
    Some((parse_timestamp(start)?, parse_timestamp(end)?))
}

fn clean_text(text: &str) -> String {
    let without_tags = TAG_RE.replace_all(text, "");
    WS_RE.replace_all(without_tags.trim(), " ").into_owned()
}

fn strip_bom(s: &str) -> &str {
    s.strip_prefix('\u{feff}').unwrap_or(s)
}

/// Parses a compressed bracket-dialect subtitle file.
fn parse_compressed(content: &str) -> Vec<SubtitleCue> {
    let mut cues = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = BRACKET_RE.captures(line) {
            let start = parse_timestamp(&caps[1]);
            let end = parse_timestamp(&caps[2]);
            if let (Some(start_s), Some(end_s)) = (start, end) {
                cues.push(SubtitleCue {
                    start_s,
                    end_s,
                    text: clean_text(&caps[3]),
                });
            }
        }
    }
    cues
}

/// Parses a standard SRT file: blocks separated by blank lines, each an
/// optional index line, a time-range line, then one or more text lines.
fn parse_srt(content: &str) -> Vec<SubtitleCue> {
    let mut cues = Vec::new();
    for block in content.split("\r\n\r\n").flat_map(|b| b.split("\n\n")) {
        let lines: Vec<&str> = block.lines().map(|l| l.trim_end()).collect();
        let mut idx = 0;
        if idx < lines.len() && lines[idx].trim().parse::<u64>().is_ok() {
            idx += 1;
        }
        if idx >= lines.len() {
            continue;
        }
        let Some(caps) = SRT_TIME_RE.captures(lines[idx]) else {
            continue;
        };
        let start = parse_timestamp(&format!("{}:{}:{},{}", &caps[1], &caps[2], &caps[3], &caps[4]));
        let end = parse_timestamp(&format!("{}:{}:{},{}", &caps[5], &caps[6], &caps[7], &caps[8]));
        idx += 1;
        let text = lines[idx..].join(" ");
        if let (Some(start_s), Some(end_s)) = (start, end) {
            if !text.trim().is_empty() {
                cues.push(SubtitleCue {
                    start_s,
                    end_s,
                    text: clean_text(&text),
                });
            }
        }
    }
    cues
}

/// Auto-detects the dialect by pattern presence, parses, and returns cues
/// sorted by start time (matching the teacher's `sort by start_s` step in
/// `_parse_subtitle_content`).
pub fn parse_subtitle_content(content: &str) -> Vec<SubtitleCue> {
    let content = strip_bom(content);
    let mut cues = if BRACKET_RE.is_match(content.lines().find(|l| !l.trim().is_empty()).unwrap_or("")) {
        parse_compressed(content)
    } else {
        parse_srt(content)
    };
    cues.sort_by(|a, b| a.start_s.partial_cmp(&b.start_s).unwrap_or(std::cmp::Ordering::Equal));
    cues
}

/// Serializes cues to the compressed bracket dialect. Idempotent:
/// `compress(parse(compress(x))) == compress(x)` because `clean_text` is
/// itself idempotent and the timestamp round-trips to millisecond precision.
pub fn write_compressed(cues: &[SubtitleCue]) -> String {
    cues.iter()
        .map(|c| format!("[{}-{}] {}", format_timestamp(c.start_s), format_timestamp(c.end_s), clean_text(&c.text)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_srt() {
        let srt = "1\n00:00:01,000 --> 00:00:03,500\nHello <b>world</b>\n\n2\n00:00:04,000 --> 00:00:05,000\nSecond  line\n";
        let cues = parse_subtitle_content(srt);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "Hello world");
        assert!((cues[0].start_s - 1.0).abs() < 1e-6);
        assert!((cues[1].end_s - 5.0).abs() < 1e-6);
    }

    #[test]
    fn parses_compressed_bracket_form() {
        let content = "[00:00:01,000-00:00:03,500] Hello world\n[00:00:04,000-00:00:05,000] Second line";
        let cues = parse_subtitle_content(content);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[1].text, "Second line");
    }

    #[test]
    fn compressed_writer_is_idempotent() {
        let srt = "1\n00:00:01,000 --> 00:00:03,500\nHello world\n";
        let cues = parse_subtitle_content(srt);
        let once = write_compressed(&cues);
        let twice = write_compressed(&parse_subtitle_content(&once));
        assert_eq!(once, twice);
    }

    #[test]
    fn timestamp_round_trips_to_millis() {
        let secs = 3725.123;
        let formatted = format_timestamp(secs);
        let parsed = parse_timestamp(&formatted).unwrap();
        assert!((parsed - secs).abs() < 1e-3);
    }
}
