//! Tolerant JSON cleanup for LM responses (spec.md §4.7, design note §9),
//! grounded on `modules/json_sanitizer.py`. LM providers routinely wrap JSON
//! in markdown code fences, leave trailing commas, or use curly "smart"
//! quotes inside string values; this is the single entry point that turns
//! that into a validated `serde_json::Value`, so no untyped map leaks past
//! it into the rest of the pipeline.

use std::sync::LazyLock;

use regex::Regex;

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```(?:json)?").unwrap());
static TRAILING_COMMA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

fn strip_code_fences(s: &str) -> String {
    CODE_FENCE_RE.replace_all(s, "").trim().to_string()
}

/// Extracts the outermost `{...}` substring, tolerating leading/trailing
/// prose the model adds around the JSON payload.
fn extract_outer_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&s[start..=end])
}

fn remove_trailing_commas(s: &str) -> String {
    TRAILING_COMMA_RE.replace_all(s, "$1").into_owned()
}

/// Walks the string char-by-char tracking in-string state (honoring
/// backslash escapes) and replaces curly smart quotes with straight ones
/// only while inside a string literal, so quotes used as apostrophes in
/// narration text outside JSON structure are left alone.
fn normalize_smart_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in s.chars() {
        if in_string {
            if escaped {
                out.push(ch);
                escaped = false;
                continue;
            }
            match ch {
                '\\' => {
                    out.push(ch);
                    escaped = true;
                }
                '"' => {
                    in_string = false;
                    out.push(ch);
                }
                '\u{201c}' | '\u{201d}' | '\u{2018}' | '\u{2019}' => out.push('\''),
                _ => out.push(ch),
            }
        } else {
            match ch {
                '"' => {
                    in_string = true;
                    out.push(ch);
                }
                _ => out.push(ch),
            }
        }
    }
    out
}

/// Parses a raw LM response into a JSON `Value`, tolerating the usual mess:
/// code fences, trailing commas, smart quotes, or a bare top-level array
/// (wrapped as `{"items": [...]}`).
pub fn sanitize_and_parse(raw: &str) -> Result<serde_json::Value, String> {
    let stripped = strip_code_fences(raw);

    if let Some(obj_str) = extract_outer_object(&stripped) {
        let cleaned = remove_trailing_commas(obj_str);
        if let Ok(value) = serde_json::from_str(&cleaned) {
            return Ok(value);
        }
        let requoted = normalize_smart_quotes(&cleaned);
        let requoted = remove_trailing_commas(&requoted);
        if let Ok(value) = serde_json::from_str(&requoted) {
            return Ok(value);
        }
    }

    // No recoverable `{...}`: maybe the model returned a bare array.
    let arr_start = stripped.find('[');
    let arr_end = stripped.rfind(']');
    if let (Some(start), Some(end)) = (arr_start, arr_end) {
        if end > start {
            let arr_str = &stripped[start..=end];
            let cleaned = remove_trailing_commas(arr_str);
            if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(&cleaned) {
                return Ok(serde_json::json!({ "items": items }));
            }
            let requoted = remove_trailing_commas(&normalize_smart_quotes(&cleaned));
            if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(&requoted) {
                return Ok(serde_json::json!({ "items": items }));
            }
        }
    }

    Err(format!("could not recover a JSON object from LM response: {stripped}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_fence_and_trailing_comma() {
        let raw = "```json\n{\"items\": [{\"a\": 1},]}\n```";
        let value = sanitize_and_parse(raw).unwrap();
        assert_eq!(value["items"][0]["a"], 1);
    }

    #[test]
    fn extracts_object_amid_prose() {
        let raw = "Sure, here you go:\n{\"items\": []}\nHope that helps!";
        let value = sanitize_and_parse(raw).unwrap();
        assert_eq!(value["items"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn normalizes_smart_quotes_inside_strings_only() {
        let raw = "{\"items\": [{\"narration\": \u{201c}hello\u{201d}}]}";
        let value = sanitize_and_parse(raw).unwrap();
        assert_eq!(value["items"][0]["narration"], "'hello'");
    }

    #[test]
    fn wraps_bare_array_as_items() {
        let raw = "[{\"a\": 1}, {\"a\": 2}]";
        let value = sanitize_and_parse(raw).unwrap();
        assert_eq!(value["items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn unrecoverable_input_is_an_error() {
        assert!(sanitize_and_parse("not json at all").is_err());
    }
}
