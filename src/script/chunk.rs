//! Subtitle chunking (spec.md §4.7 "Chunking"/"Item-count allocation"),
//! grounded on `subtitle_utils.py`'s chunk-splitting helper.

use super::length_plan::{allocate_output_counts, MAX_SUBS_PER_CALL, SOFT_FACTOR};
use super::subtitle::SubtitleCue;

/// One contiguous slice of subtitles handed to a single LM call, matching
/// the `PlanItem` data-model entry in spec.md §3.
#[derive(Debug, Clone)]
pub struct PlanItem {
    pub idx: usize,
    pub start_s: f64,
    pub end_s: f64,
    pub subs: Vec<SubtitleCue>,
    pub target_items_count: usize,
}

fn soft_cap() -> usize {
    ((MAX_SUBS_PER_CALL as f64) * SOFT_FACTOR).ceil() as usize
}

/// Splits `cues` into `calls` contiguous slices of roughly equal size, then
/// recursively bisects any slice whose size still exceeds the soft cap.
fn split_into_slices(cues: &[SubtitleCue], calls: usize) -> Vec<Vec<SubtitleCue>> {
    if cues.is_empty() || calls == 0 {
        return Vec::new();
    }
    let calls = calls.min(cues.len().max(1));
    let base = cues.len() / calls;
    let remainder = cues.len() % calls;
    let mut slices = Vec::with_capacity(calls);
    let mut offset = 0;
    for i in 0..calls {
        let size = base + usize::from(i < remainder);
        let size = size.max(1).min(cues.len() - offset);
        slices.push(cues[offset..offset + size].to_vec());
        offset += size;
        if offset >= cues.len() {
            break;
        }
    }
    if offset < cues.len() {
        slices.last_mut().unwrap().extend(cues[offset..].to_vec());
    }

    let cap = soft_cap();
    let mut result = Vec::new();
    for slice in slices {
        bisect_oversize(slice, cap, &mut result);
    }
    result
}

fn bisect_oversize(slice: Vec<SubtitleCue>, cap: usize, out: &mut Vec<Vec<SubtitleCue>>) {
    if slice.len() <= cap || slice.len() < 2 {
        out.push(slice);
        return;
    }
    let mid = slice.len() / 2;
    let (left, right) = slice.split_at(mid);
    bisect_oversize(left.to_vec(), cap, out);
    bisect_oversize(right.to_vec(), cap, out);
}

/// Builds the full chunk plan: slices the subtitle stream into `calls`
/// soft-cap-respecting chunks, records each chunk's time window from its
/// first/last subtitle, and allocates the target output-item count per
/// chunk.
pub fn build_plan(cues: &[SubtitleCue], calls: usize, final_target_count: u32) -> Vec<PlanItem> {
    let slices = split_into_slices(cues, calls);
    let counts = allocate_output_counts(final_target_count as i64, slices.len());
    slices
        .into_iter()
        .enumerate()
        .map(|(idx, subs)| {
            let start_s = subs.first().map(|c| c.start_s).unwrap_or(0.0);
            let end_s = subs.last().map(|c| c.end_s).unwrap_or(start_s);
            PlanItem {
                idx,
                start_s,
                end_s,
                target_items_count: counts.get(idx).copied().unwrap_or(1),
                subs,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(start: f64, end: f64) -> SubtitleCue {
        SubtitleCue {
            start_s: start,
            end_s: end,
            text: format!("line at {start}"),
        }
    }

    #[test]
    fn splits_into_requested_call_count_for_small_input() {
        let cues: Vec<_> = (0..30).map(|i| cue(i as f64, i as f64 + 1.0)).collect();
        let plan = build_plan(&cues, 3, 30);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.iter().map(|p| p.subs.len()).sum::<usize>(), 30);
        assert_eq!(plan.iter().map(|p| p.target_items_count).sum::<usize>(), 30);
    }

    #[test]
    fn oversize_slice_is_recursively_bisected() {
        let cues: Vec<_> = (0..500).map(|i| cue(i as f64, i as f64 + 1.0)).collect();
        let plan = build_plan(&cues, 3, 30);
        let cap = soft_cap();
        assert!(plan.iter().all(|p| p.subs.len() <= cap));
        assert_eq!(plan.iter().map(|p| p.subs.len()).sum::<usize>(), 500);
    }

    #[test]
    fn chunk_windows_reflect_first_and_last_cue() {
        let cues: Vec<_> = (0..10).map(|i| cue(i as f64, i as f64 + 1.0)).collect();
        let plan = build_plan(&cues, 1, 10);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].start_s, 0.0);
        assert_eq!(plan[0].end_s, 10.0);
    }
}
