//! Top-level script assembly orchestration (spec.md §4.7), grounded on
//! `script_generation/service.py::generate_script_json` and
//! `script_builder.py`. Chunks the subtitle stream, runs per-chunk LM calls
//! bounded by `SCRIPT_CHUNK_FANOUT_LIMIT`, merges overlapping items, refines
//! to the target count, and converts to the persisted `Script` shape.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::config::SCRIPT_CHUNK_FANOUT_LIMIT;
use crate::error::AppError;
use crate::lm::{ChatMessage, LmChatProvider, ResponseFormat};
use crate::project::{Project, PromptSelectionKind};

use super::chunk::{build_plan, PlanItem};
use super::json_sanitize::sanitize_and_parse;
use super::length_plan::parse_script_length_selection;
use super::merge::merge_items;
use super::model::{Script, ScriptItem, Segment};
use super::plot_analysis::filter_plot_analysis_by_time;
use super::refine::{apply_refine_selection, RefineSelection};
use super::subtitle::{parse_subtitle_content, parse_timestamp_range};

const CHUNK_TIME_PAD_S: f64 = 5.0;
const MAX_CHUNK_RETRIES: usize = 3;
const DEFAULT_ORIGINAL_RATIO: u8 = 70;

/// All the caller-supplied inputs to one script-assembly run (spec.md §4.7
/// "Inputs").
pub struct AssembleRequest {
    pub drama_name: String,
    pub plot_analysis: String,
    pub subtitle_content: String,
    pub prompt_selection: HashMap<String, crate::project::PromptSelection>,
    pub script_length_selector: String,
    pub original_ratio: u8,
    pub script_language: String,
}

impl AssembleRequest {
    pub fn from_project(project: &Project, plot_analysis: String, subtitle_content: String) -> Self {
        Self {
            drama_name: project.name.clone(),
            plot_analysis,
            subtitle_content,
            prompt_selection: project.prompt_selection.clone(),
            script_length_selector: project.script_length.clone(),
            original_ratio: project.original_ratio,
            script_language: project.script_language.clone(),
        }
    }
}

/// Clamps the original-footage ratio to `10..=90`, matching
/// `_normalize_original_ratio`.
pub fn normalize_original_ratio(ratio: u8) -> u8 {
    ratio.clamp(10, 90)
}

/// Labels a chunk's narrative position so its system prompt can ask for the
/// right thing: the opening chunk may introduce plot, middle chunks must not
/// repeat an opening/closing, the final chunk must resolve the plot.
pub fn position_label(idx: usize, total: usize) -> &'static str {
    if total <= 1 {
        "standalone"
    } else if idx == 0 {
        "opening"
    } else if idx == total - 1 {
        "ending"
    } else {
        "middle"
    }
}

/// Resolves which prompt template key a chunk call should use: an explicit
/// user/official selection for the `script_generation` feature, falling
/// back to `"default"`, with an `_en` suffix when the target language isn't
/// Chinese, matching `prompt_resolver.py`.
fn resolve_prompt_key(prompt_selection: &HashMap<String, crate::project::PromptSelection>, language: &str) -> String {
    let base = prompt_selection
        .get("script_generation")
        .map(|sel| match sel.kind {
            PromptSelectionKind::Official => sel.key_or_id.clone(),
            PromptSelectionKind::User => format!("user:{}", sel.key_or_id),
        })
        .unwrap_or_else(|| "default".to_string());
    if language.eq_ignore_ascii_case("en") {
        format!("{base}_en")
    } else {
        base
    }
}

/// Builds the merged system message for one chunk call: position, required
/// JSON shape, exact item count, original-footage ratio, and a language
/// mandate, matching `_generate_script_chunk`'s system-message assembly.
fn build_system_message(plan_item: &PlanItem, total_chunks: usize, ratio: u8, language: &str, target_count: usize) -> String {
    let position = position_label(plan_item.idx, total_chunks);
    let lang_mandate = if language.eq_ignore_ascii_case("en") {
        "Write all narration in English, never Chinese.".to_string()
    } else {
        "请用中文撰写全部解说内容，禁止使用英文。".to_string()
    };
    format!(
        "Position: {position} chunk ({} of {total_chunks}). \
         Return a JSON object shaped {{\"items\": [{{\"_id\", \"timestamp\" (HH:MM:SS,mmm-HH:MM:SS,mmm), \
         \"picture\", \"narration\", \"OST\" (0 or 1)}}]}} with exactly {target_count} items. \
         Original-footage ratio target: {ratio}% original / {}% narrated. {lang_mandate}",
        plan_item.idx + 1,
        100 - ratio,
    )
}

fn build_user_message(drama_name: &str, plot_analysis: &str, subtitle_content: &str) -> String {
    format!("drama_name: {drama_name}\nplot_analysis:\n{plot_analysis}\nsubtitle_content:\n{subtitle_content}")
}

/// Validates and converts a tolerant-parsed JSON value into `ScriptItem`s,
/// matching spec.md §4.7's required-field list.
fn parse_items_envelope(value: &serde_json::Value) -> Result<Vec<ScriptItem>, String> {
    let items = value
        .get("items")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "response is missing an `items` array".to_string())?;

    items
        .iter()
        .map(|raw| {
            let id = raw.get("_id").and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
                .ok_or("item missing _id")?;
            let timestamp = raw.get("timestamp").and_then(|v| v.as_str()).ok_or("item missing timestamp")?.to_string();
            let picture = raw.get("picture").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let narration = raw.get("narration").and_then(|v| v.as_str()).ok_or("item missing narration")?.to_string();
            let ost = raw
                .get("OST")
                .and_then(|v| v.as_u64())
                .map(|n| n as u8)
                .filter(|v| *v == 0 || *v == 1)
                .ok_or("item OST must be 0 or 1")?;
            let (start_s, end_s) = parse_timestamp_range(&timestamp).ok_or("item timestamp unparseable")?;
            Ok(ScriptItem {
                id,
                timestamp,
                picture,
                narration,
                ost,
                start_s,
                end_s,
            })
        })
        .collect()
}

/// Drops items whose time window lies entirely outside the chunk's padded
/// window, then truncates to `target` if the model overproduced.
fn filter_and_truncate(items: Vec<ScriptItem>, chunk_start: f64, chunk_end: f64, target: usize) -> Vec<ScriptItem> {
    let window_start = chunk_start - CHUNK_TIME_PAD_S;
    let window_end = chunk_end + CHUNK_TIME_PAD_S;
    let mut filtered: Vec<ScriptItem> = items
        .into_iter()
        .filter(|item| item.end_s >= window_start && item.start_s <= window_end)
        .collect();
    if target > 0 && filtered.len() > target {
        filtered.truncate(target);
    }
    filtered
}

async fn generate_chunk_items(
    lm: &dyn LmChatProvider,
    plan_item: &PlanItem,
    total_chunks: usize,
    request: &AssembleRequest,
) -> Result<Vec<ScriptItem>, AppError> {
    let ratio = normalize_original_ratio(request.original_ratio);
    let chunk_plot = filter_plot_analysis_by_time(&request.plot_analysis, plan_item.start_s, plan_item.end_s);
    let subtitle_slice = super::subtitle::write_compressed(&plan_item.subs);

    let system = build_system_message(plan_item, total_chunks, ratio, &request.script_language, plan_item.target_items_count);
    let user = build_user_message(&request.drama_name, &chunk_plot, &subtitle_slice);
    let _prompt_key = resolve_prompt_key(&request.prompt_selection, &request.script_language);
    let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];

    let mut last_err = AppError::provider_unavailable("no attempt made");
    for _attempt in 0..MAX_CHUNK_RETRIES {
        let response = match lm.chat(&messages, ResponseFormat::JsonObject).await {
            Ok(resp) => resp,
            Err(err) => {
                last_err = err;
                continue;
            }
        };
        let value = match sanitize_and_parse(&response.content) {
            Ok(value) => value,
            Err(msg) => {
                last_err = AppError::provider_unavailable(msg);
                continue;
            }
        };
        let items = match parse_items_envelope(&value) {
            Ok(items) => items,
            Err(msg) => {
                last_err = AppError::provider_unavailable(msg);
                continue;
            }
        };
        return Ok(filter_and_truncate(items, plan_item.start_s, plan_item.end_s, plan_item.target_items_count));
    }
    Err(last_err)
}

/// The refine call receives the merged JSON and must respond with a subset
/// of existing `_id`s (optionally with narration/picture/OST overrides),
/// matching `script_builder.py`'s refine step.
async fn refine_merged(
    lm: &dyn LmChatProvider,
    merged: &[ScriptItem],
    target: usize,
    request: &AssembleRequest,
) -> Result<Vec<ScriptItem>, AppError> {
    if target == 0 || merged.len() <= target {
        return Ok(merged.to_vec());
    }
    let ratio = normalize_original_ratio(request.original_ratio);
    let system = format!(
        "Select exactly {target} of the following items by `_id`; do not invent new items. \
         You may revise `narration`/`picture`/`OST` for selected items. \
         Return JSON shaped {{\"items\": [{{\"_id\", \"narration\"?, \"picture\"?, \"OST\"?}}]}}. \
         Original-footage ratio target: {ratio}% original."
    );
    let merged_json = serde_json::to_string(&super::model::ItemsEnvelope {
        items: merged.to_vec(),
    })
    .unwrap_or_default();
    let messages = vec![ChatMessage::system(system), ChatMessage::user(merged_json)];

    let mut last_err = AppError::provider_unavailable("no attempt made");
    for _attempt in 0..MAX_CHUNK_RETRIES {
        let response = match lm.chat(&messages, ResponseFormat::JsonObject).await {
            Ok(resp) => resp,
            Err(err) => {
                last_err = err;
                continue;
            }
        };
        let value = match sanitize_and_parse(&response.content) {
            Ok(value) => value,
            Err(msg) => {
                last_err = AppError::provider_unavailable(msg);
                continue;
            }
        };
        let items = value.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let selections: Vec<RefineSelection> = items
            .iter()
            .filter_map(|raw| {
                let id = raw
                    .get("_id")
                    .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))?;
                Some(RefineSelection {
                    id,
                    narration: raw.get("narration").and_then(|v| v.as_str()).map(str::to_string),
                    picture: raw.get("picture").and_then(|v| v.as_str()).map(str::to_string),
                    ost: raw.get("OST").and_then(|v| v.as_u64()).map(|n| n as u8),
                })
            })
            .collect();
        if selections.is_empty() {
            last_err = AppError::provider_unavailable("refine response selected no items");
            continue;
        }
        return Ok(apply_refine_selection(merged, &selections, target));
    }
    Err(last_err)
}

fn item_to_segment(item: &ScriptItem) -> Segment {
    Segment {
        id: item.id.clone(),
        start_time: item.start_s,
        end_time: item.end_s,
        text: item.narration.clone(),
        subtitle: if item.picture.is_empty() { None } else { Some(item.picture.clone()) },
        ost: item.ost,
    }
}

/// Converts a finalized, time-sorted item list into the persisted `Script`
/// JSON shape, matching `service.py::to_video_script`.
pub fn to_video_script(items: &[ScriptItem], total_duration: f64) -> Script {
    let segments = items.iter().map(item_to_segment).collect();
    Script::new(total_duration, segments)
}

/// Runs the full pipeline: parse subtitles, plan chunks, generate per-chunk
/// items (bounded fan-out), merge by overlap, refine to the target count
/// (when there is more than one chunk), and convert to a `Script`.
pub async fn assemble_script(lm: Arc<dyn LmChatProvider>, request: AssembleRequest) -> Result<Script, AppError> {
    let cues = parse_subtitle_content(&request.subtitle_content);
    if cues.is_empty() {
        return Err(AppError::input_invalid("subtitle content yielded zero cues"));
    }
    let total_duration = cues.last().map(|c| c.end_s).unwrap_or(0.0);

    let plan = parse_script_length_selection(&request.script_length_selector);
    let calls = super::length_plan::resolve_call_count(plan.preferred_calls, cues.len());
    let chunks = build_plan(&cues, calls, plan.final_target_count);
    let total_chunks = chunks.len();

    let request = Arc::new(request);
    let semaphore = Arc::new(Semaphore::new(SCRIPT_CHUNK_FANOUT_LIMIT));
    let mut futs = FuturesUnordered::new();
    for plan_item in chunks {
        let lm = lm.clone();
        let request = request.clone();
        let semaphore = semaphore.clone();
        futs.push(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            generate_chunk_items(lm.as_ref(), &plan_item, total_chunks, &request).await
        });
    }

    let mut all_items = Vec::new();
    while let Some(result) = futs.next().await {
        all_items.extend(result?);
    }

    let merged = merge_items(all_items);
    let final_items = if total_chunks >= 2 {
        refine_merged(lm.as_ref(), &merged, plan.final_target_count as usize, &request).await?
    } else {
        let target = plan.final_target_count as usize;
        if target > 0 && merged.len() > target {
            merged.into_iter().take(target).collect()
        } else {
            merged
        }
    };

    Ok(to_video_script(&final_items, total_duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::test_support::ScriptedLm;

    fn chunk_response(ids: &[&str], start: f64) -> String {
        let items: Vec<serde_json::Value> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let s = start + i as f64 * 2.0;
                serde_json::json!({
                    "_id": id,
                    "timestamp": format!("{}-{}", super::super::subtitle::format_timestamp(s), super::super::subtitle::format_timestamp(s + 1.9)),
                    "picture": "a shot",
                    "narration": format!("narration {id}"),
                    "OST": 0,
                })
            })
            .collect();
        serde_json::json!({ "items": items }).to_string()
    }

    #[tokio::test]
    async fn single_chunk_path_skips_refine_and_truncates_to_target() {
        let response = chunk_response(&["1", "2", "3"], 0.0);
        let lm = Arc::new(ScriptedLm::new(vec![Ok(response)]));
        let request = AssembleRequest {
            drama_name: "demo".into(),
            plot_analysis: String::new(),
            subtitle_content: "[00:00:00,000-00:00:05,000] hello\n[00:00:05,000-00:00:10,000] world".into(),
            prompt_selection: HashMap::new(),
            script_length_selector: "2".into(),
            original_ratio: 70,
            script_language: "zh".into(),
        };
        let script = assemble_script(lm, request).await.unwrap();
        assert!(!script.segments.is_empty() && script.segments.len() <= 3);
    }

    #[test]
    fn position_label_identifies_opening_middle_ending() {
        assert_eq!(position_label(0, 3), "opening");
        assert_eq!(position_label(1, 3), "middle");
        assert_eq!(position_label(2, 3), "ending");
        assert_eq!(position_label(0, 1), "standalone");
    }

    #[test]
    fn ratio_normalization_clamps_to_bounds() {
        assert_eq!(normalize_original_ratio(5), 10);
        assert_eq!(normalize_original_ratio(95), 90);
        assert_eq!(normalize_original_ratio(70), 70);
    }
}
