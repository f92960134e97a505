//! Refine-pass selection application (spec.md §4.7 "Refine pass"), grounded
//! on `script_builder.py`'s refine step.
//!
//! The LM is asked to select a subset of existing `_id`s (never invent new
//! ones) and may reorder them in its response; since the segments are video
//! content that must still play back in chronological order, the selected
//! subset is always re-expressed in the merged list's original time order
//! here rather than the LM's returned order — this is the one place the
//! reimplementation deliberately diverges from a literal "LM order wins"
//! reading, because scrambled segment order is not a valid output for this
//! pipeline.

use super::model::ScriptItem;

/// One id the refine call selected, with optional narration/picture/OST
/// overrides it may also have supplied for that id.
#[derive(Debug, Clone, Default)]
pub struct RefineSelection {
    pub id: String,
    pub narration: Option<String>,
    pub picture: Option<String>,
    pub ost: Option<u8>,
}

/// Applies a refine-pass selection to the merged item list: keeps only the
/// selected ids, in the merged list's original (time-sorted) order, with any
/// per-id overrides applied, truncated to `target` if the selection is
/// larger than that.
pub fn apply_refine_selection(merged: &[ScriptItem], selections: &[RefineSelection], target: usize) -> Vec<ScriptItem> {
    let overrides: std::collections::HashMap<&str, &RefineSelection> =
        selections.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut selected: Vec<ScriptItem> = merged
        .iter()
        .filter(|item| overrides.contains_key(item.id.as_str()))
        .cloned()
        .map(|mut item| {
            if let Some(sel) = overrides.get(item.id.as_str()) {
                if let Some(narration) = &sel.narration {
                    item.narration = narration.clone();
                }
                if let Some(picture) = &sel.picture {
                    item.picture = picture.clone();
                }
                if let Some(ost) = sel.ost {
                    item.ost = ost;
                }
            }
            item
        })
        .collect();

    if target > 0 && selected.len() > target {
        selected.truncate(target);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, start: f64) -> ScriptItem {
        ScriptItem {
            id: id.to_string(),
            timestamp: String::new(),
            picture: String::new(),
            narration: format!("n{id}"),
            ost: 0,
            start_s: start,
            end_s: start + 1.0,
        }
    }

    #[test]
    fn preserves_original_time_order_despite_llm_order() {
        let merged = vec![item("1", 0.0), item("2", 5.0), item("3", 10.0)];
        // LM returned ids in reverse order.
        let selections = vec![
            RefineSelection {
                id: "3".into(),
                ..Default::default()
            },
            RefineSelection {
                id: "1".into(),
                ..Default::default()
            },
        ];
        let result = apply_refine_selection(&merged, &selections, 10);
        let ids: Vec<&str> = result.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn applies_narration_override() {
        let merged = vec![item("1", 0.0)];
        let selections = vec![RefineSelection {
            id: "1".into(),
            narration: Some("revised".into()),
            ..Default::default()
        }];
        let result = apply_refine_selection(&merged, &selections, 10);
        assert_eq!(result[0].narration, "revised");
    }

    #[test]
    fn truncates_to_target_keeping_earliest() {
        let merged = vec![item("1", 0.0), item("2", 5.0), item("3", 10.0)];
        let selections: Vec<_> = merged
            .iter()
            .map(|i| RefineSelection {
                id: i.id.clone(),
                ..Default::default()
            })
            .collect();
        let result = apply_refine_selection(&merged, &selections, 2);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, "1");
        assert_eq!(result[1].id, "2");
    }

    #[test]
    fn never_invents_ids_not_in_merged() {
        let merged = vec![item("1", 0.0)];
        let selections = vec![RefineSelection {
            id: "99".into(),
            ..Default::default()
        }];
        let result = apply_refine_selection(&merged, &selections, 10);
        assert!(result.is_empty());
    }
}
