//! Global item merge-by-overlap (spec.md §4.7 "Global merge"), grounded on
//! `script_builder.py`'s merge step.

use super::model::ScriptItem;

const MIN_ITEM_DURATION_S: f64 = 0.8;
const OVERLAP_RATIO: f64 = 0.4;
const OVERLAP_SLACK_S: f64 = 0.1;

fn duration(item: &ScriptItem) -> f64 {
    item.end_s - item.start_s
}

fn overlap(a: &ScriptItem, b: &ScriptItem) -> f64 {
    (a.end_s.min(b.end_s) - a.start_s.max(b.start_s)).max(0.0)
}

/// Sorts by start time, drops the shorter of any adjacent pair whose overlap
/// exceeds 40% of the shorter item's duration plus a 0.1s slack, drops any
/// surviving item shorter than 0.8s, then renumbers `_id` from 1.
pub fn merge_items(mut items: Vec<ScriptItem>) -> Vec<ScriptItem> {
    items.sort_by(|a, b| a.start_s.partial_cmp(&b.start_s).unwrap_or(std::cmp::Ordering::Equal));

    let mut survivors: Vec<ScriptItem> = Vec::with_capacity(items.len());
    for item in items {
        match survivors.last() {
            Some(prev) => {
                let ov = overlap(prev, &item);
                let threshold = OVERLAP_RATIO * duration(prev).min(duration(&item)) + OVERLAP_SLACK_S;
                if ov > threshold {
                    if duration(&item) > duration(prev) {
                        survivors.pop();
                        survivors.push(item);
                    }
                    // else: drop the incoming (shorter) item by not pushing it.
                } else {
                    survivors.push(item);
                }
            }
            None => survivors.push(item),
        }
    }

    survivors.retain(|item| duration(item) >= MIN_ITEM_DURATION_S);

    for (idx, item) in survivors.iter_mut().enumerate() {
        item.id = (idx + 1).to_string();
    }
    survivors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, start: f64, end: f64) -> ScriptItem {
        ScriptItem {
            id: id.to_string(),
            timestamp: String::new(),
            picture: String::new(),
            narration: format!("item {id}"),
            ost: 0,
            start_s: start,
            end_s: end,
        }
    }

    #[test]
    fn drops_heavily_overlapping_shorter_item() {
        let items = vec![item("1", 0.0, 5.0), item("2", 4.0, 4.9)];
        let merged = merge_items(items);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].narration, "item 1");
        assert_eq!(merged[0].id, "1");
    }

    #[test]
    fn keeps_lightly_overlapping_items() {
        let items = vec![item("1", 0.0, 5.0), item("2", 4.9, 10.0)];
        let merged = merge_items(items);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn drops_items_shorter_than_min_duration() {
        let items = vec![item("1", 0.0, 0.5), item("2", 2.0, 8.0)];
        let merged = merge_items(items);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "1");
        assert_eq!(merged[0].narration, "item 2");
    }

    #[test]
    fn ids_are_renumbered_contiguously() {
        let items = vec![item("9", 0.0, 5.0), item("3", 6.0, 10.0), item("7", 11.0, 15.0)];
        let merged = merge_items(items);
        let ids: Vec<&str> = merged.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
