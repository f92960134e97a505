//! Script-length selector parsing and output-count allocation, grounded on
//! `length_planner.py`. The exact preset table in the original's
//! `constants.py` was not retrievable; the values below are a reasonable,
//! internally consistent recreation of the `N～M条` preset family described
//! in spec.md §4.7.

use std::sync::LazyLock;

use regex::Regex;

pub const CUSTOM_SCRIPT_LENGTH_MIN: u32 = 5;
pub const CUSTOM_SCRIPT_LENGTH_MAX: u32 = 200;
pub const MAX_SUBS_PER_CALL: usize = 220;
pub const SOFT_FACTOR: f64 = 0.85;
pub const DEFAULT_SCRIPT_LENGTH_SELECTION: &str = "20～30条";

/// Named presets recognized verbatim as a selector, mapping to an inclusive
/// `(min, max)` item-count range.
const SCRIPT_LENGTH_PRESETS: &[(&str, u32, u32)] = &[
    ("10～20条", 10, 20),
    ("20～30条", 20, 30),
    ("30～50条", 30, 50),
    ("50～100条", 50, 100),
];

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*[～~\-]\s*(\d+)\s*条?$").unwrap());
static SINGLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*条?$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptTargetPlan {
    pub target_min: u32,
    pub target_max: u32,
    pub preferred_calls: usize,
    pub final_target_count: u32,
}

fn clamp_count(n: u32) -> u32 {
    n.clamp(CUSTOM_SCRIPT_LENGTH_MIN, CUSTOM_SCRIPT_LENGTH_MAX)
}

/// Resolves a user-facing length selector — a named preset, a free-typed
/// `a-b`/`a～b` range, or a single free-typed target count expanded to a
/// ±20% range — to a concrete target plan.
pub fn parse_script_length_selection(selector: &str) -> ScriptTargetPlan {
    let trimmed = selector.trim();

    if let Some(&(_, min, max)) = SCRIPT_LENGTH_PRESETS.iter().find(|(name, _, _)| *name == trimmed) {
        return finalize(min, max, max);
    }

    if let Some(caps) = RANGE_RE.captures(trimmed) {
        let a: u32 = caps[1].parse().unwrap_or(CUSTOM_SCRIPT_LENGTH_MIN);
        let b: u32 = caps[2].parse().unwrap_or(CUSTOM_SCRIPT_LENGTH_MAX);
        let (min, max) = if a <= b { (a, b) } else { (b, a) };
        return finalize(clamp_count(min), clamp_count(max), clamp_count(max));
    }

    if let Some(caps) = SINGLE_RE.captures(trimmed) {
        let n: u32 = caps[1].parse().unwrap_or(20);
        let min = clamp_count((n as f64 * 0.8).floor() as u32);
        let max = clamp_count((n as f64 * 1.2).ceil() as u32);
        return finalize(min, max, clamp_count(n));
    }

    // Unparseable selector: fall back to the default preset.
    let (_, min, max) = SCRIPT_LENGTH_PRESETS
        .iter()
        .find(|(name, _, _)| *name == DEFAULT_SCRIPT_LENGTH_SELECTION)
        .copied()
        .unwrap();
    finalize(min, max, max)
}

fn finalize(target_min: u32, target_max: u32, final_target_count: u32) -> ScriptTargetPlan {
    let preferred_calls = ((target_max as f64) / 20.0).ceil().max(1.0) as usize;
    ScriptTargetPlan {
        target_min,
        target_max,
        preferred_calls,
        final_target_count,
    }
}

/// Computes how many chunks the subtitle stream should be split into, given
/// `preferred_calls` (from the length plan) and the subtitle count, matching
/// spec.md §4.7: `calls = max(1, desired_calls, min_calls)` where
/// `min_calls = ceil(n / (MAX_SUBS_PER_CALL * SOFT_FACTOR))`.
pub fn resolve_call_count(preferred_calls: usize, subtitle_count: usize) -> usize {
    let min_calls = ((subtitle_count as f64) / (MAX_SUBS_PER_CALL as f64 * SOFT_FACTOR)).ceil().max(1.0) as usize;
    preferred_calls.max(min_calls).max(1)
}

/// Distributes `target` items across `chunk_count` chunks as evenly as
/// possible, remainder going to the first chunks; falls back to one item per
/// chunk once `chunk_count >= target`, and also defaults to one item per
/// chunk if `target` is not positive.
pub fn allocate_output_counts(target: i64, chunk_count: usize) -> Vec<usize> {
    if chunk_count == 0 {
        return Vec::new();
    }
    if target <= 0 {
        return vec![1; chunk_count];
    }
    let target = target as usize;
    if chunk_count >= target {
        return vec![1; chunk_count];
    }
    let base = target / chunk_count;
    let remainder = target % chunk_count;
    (0..chunk_count)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_selector_resolves_exactly() {
        let plan = parse_script_length_selection("20～30条");
        assert_eq!(plan.target_min, 20);
        assert_eq!(plan.target_max, 30);
        assert_eq!(plan.preferred_calls, 2);
        assert_eq!(plan.final_target_count, 30);
    }

    #[test]
    fn free_typed_count_expands_to_plus_minus_20_percent() {
        let plan = parse_script_length_selection("50");
        assert_eq!(plan.target_min, 40);
        assert_eq!(plan.target_max, 60);
        assert_eq!(plan.final_target_count, 50);
    }

    #[test]
    fn free_typed_range_is_order_independent() {
        let plan = parse_script_length_selection("30-25");
        assert_eq!(plan.target_min, 25);
        assert_eq!(plan.target_max, 30);
    }

    #[test]
    fn custom_counts_clamp_to_bounds() {
        let plan = parse_script_length_selection("1000");
        assert_eq!(plan.target_max, CUSTOM_SCRIPT_LENGTH_MAX);
    }

    #[test]
    fn call_count_matches_worked_example() {
        // spec.md 4.7 scenario 4: target_max=30, n=500.
        let calls = resolve_call_count(2, 500);
        assert_eq!(calls, 3);
    }

    #[test]
    fn allocate_counts_distributes_remainder_to_first_chunks() {
        let counts = allocate_output_counts(30, 3);
        assert_eq!(counts, vec![10, 10, 10]);
        let counts = allocate_output_counts(31, 3);
        assert_eq!(counts, vec![11, 10, 10]);
    }

    #[test]
    fn allocate_counts_gives_one_per_chunk_when_chunks_exceed_target() {
        assert_eq!(allocate_output_counts(2, 5), vec![1, 1, 1, 1, 1]);
    }
}
