//! The persisted narration `Script` shape (spec.md §3, §6) and the
//! intermediate `Item` shape the LM exchange speaks in `HH:MM:SS,mmm-...`
//! timestamps, matching `script_builder.py`'s item dicts before
//! `to_video_script` converts them.

use serde::{Deserialize, Serialize};

/// One cut-and-narrate (or original-audio) unit of the final script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(rename = "OST")]
    pub ost: u8,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// A segment is original-audio iff `OST==1` or its narration begins with
    /// the sentinel literal in either language, matching spec.md §3.
    pub fn is_original_audio(&self) -> bool {
        self.ost == 1
            || self.text.trim_start().starts_with("播放原片")
            || self
                .text
                .trim_start()
                .to_lowercase()
                .starts_with("play original footage")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptMetadata {
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub version: String,
    pub total_duration: f64,
    pub segments: Vec<Segment>,
    pub metadata: ScriptMetadata,
}

impl Script {
    pub fn new(total_duration: f64, segments: Vec<Segment>) -> Self {
        let now = time::OffsetDateTime::now_utc();
        let version = format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}",
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second()
        );
        Self {
            version,
            total_duration,
            segments,
            metadata: ScriptMetadata { created_at: now },
        }
    }
}

/// A raw item as produced by a per-chunk LM call or by the merge/refine
/// passes, indexed by `_id` and carrying the `HH:MM:SS,mmm-...` exchange
/// timestamp rather than float seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptItem {
    #[serde(rename = "_id")]
    pub id: String,
    pub timestamp: String,
    pub picture: String,
    pub narration: String,
    #[serde(rename = "OST")]
    pub ost: u8,
    #[serde(skip)]
    pub start_s: f64,
    #[serde(skip)]
    pub end_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ItemsEnvelope {
    pub items: Vec<ScriptItem>,
}
