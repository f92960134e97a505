//! Plot-analysis time-window filtering (spec.md §4.7 supplemented feature),
//! grounded on `plot_analysis.py`. A free-text plot summary is organized in
//! blocks separated by blank lines, each optionally carrying a `时间：` (or
//! `time:`) tag with one or more timestamps; only blocks whose tag falls
//! inside a chunk's time window are forwarded to that chunk's prompt, so a
//! long plot summary does not blow a single call's token budget.

use std::sync::LazyLock;

use regex::Regex;

static TIME_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:时间|time)\s*[:：]\s*([0-9:]+(?:\s*[-~～]\s*[0-9:]+)?)").unwrap());
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{1,2}:\d{2}(?::\d{2})?").unwrap());

fn parse_clock(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.split(':').collect();
    match parts.len() {
        2 => {
            let m: f64 = parts[0].parse().ok()?;
            let s: f64 = parts[1].parse().ok()?;
            Some(m * 60.0 + s)
        }
        3 => {
            let h: f64 = parts[0].parse().ok()?;
            let m: f64 = parts[1].parse().ok()?;
            let s: f64 = parts[2].parse().ok()?;
            Some(h * 3600.0 + m * 60.0 + s)
        }
        _ => None,
    }
}

fn block_times(block: &str) -> Vec<f64> {
    let mut times = Vec::new();
    if let Some(caps) = TIME_TAG_RE.captures(block) {
        for m in TIME_RE.find_iter(&caps[1]) {
            if let Some(t) = parse_clock(m.as_str()) {
                times.push(t);
            }
        }
    }
    if times.is_empty() {
        for m in TIME_RE.find_iter(block) {
            if let Some(t) = parse_clock(m.as_str()) {
                times.push(t);
            }
        }
    }
    times
}

/// Filters a free-text plot analysis down to the blocks relevant to
/// `[chunk_start, chunk_end]`. Blocks carrying no time tag at all are kept
/// unconditionally (global context), matching the original's conservative
/// default of not dropping untagged narrative context.
pub fn filter_plot_analysis_by_time(analysis: &str, chunk_start: f64, chunk_end: f64) -> String {
    if analysis.trim().is_empty() {
        return String::new();
    }
    analysis
        .split("\n\n")
        .filter(|block| {
            let times = block_times(block);
            times.is_empty() || times.iter().any(|t| *t >= chunk_start && *t <= chunk_end)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_blocks_inside_window_and_drops_outside() {
        let analysis = "爆点1\n时间：00:00:05\n男主发现真相\n\n爆点2\n时间：00:10:00\n反派登场";
        let filtered = filter_plot_analysis_by_time(analysis, 0.0, 30.0);
        assert!(filtered.contains("男主发现真相"));
        assert!(!filtered.contains("反派登场"));
    }

    #[test]
    fn keeps_untagged_blocks() {
        let analysis = "背景设定：古装悬疑剧";
        let filtered = filter_plot_analysis_by_time(analysis, 100.0, 200.0);
        assert_eq!(filtered, analysis);
    }

    #[test]
    fn empty_analysis_is_empty() {
        assert_eq!(filter_plot_analysis_by_time("  ", 0.0, 10.0), "");
    }
}
