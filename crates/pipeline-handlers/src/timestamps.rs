//! Timestamp-outline parser cascade.
//!
//! The timestamp adapter call asks an LLM for a strict JSON array of
//! `{timestamp, text}` entries, but LLM output is not reliably strict JSON.
//! [`parse_cascade`] tries progressively looser extraction strategies and
//! accepts the first that yields a non-empty array.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// One entry in a parsed timestamp outline.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimestampEntry {
    /// Timestamp label as produced by the model (e.g. `"00:01:30"`).
    pub timestamp: String,
    /// Outline text for that point in the recording.
    pub text: String,
}

fn markdown_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("static regex"))
}

fn array_substring() -> &'static Regex {
    static ARRAY: OnceLock<Regex> = OnceLock::new();
    ARRAY.get_or_init(|| Regex::new(r"\[[\s\S]*\]").expect("static regex"))
}

fn entry_object() -> &'static Regex {
    static ENTRY: OnceLock<Regex> = OnceLock::new();
    ENTRY.get_or_init(|| {
        Regex::new(r#"\{\s*"timestamp"\s*:\s*"([^"]*)"\s*,\s*"text"\s*:\s*"((?:[^"\\]|\\.)*)"\s*\}"#)
            .expect("static regex")
    })
}

fn timestamp_text_pair() -> &'static Regex {
    static PAIR: OnceLock<Regex> = OnceLock::new();
    PAIR.get_or_init(|| {
        Regex::new(r"(?m)^\s*(\d{1,2}:\d{2}(?::\d{2})?)\s*[-—:]\s*(.+)$").expect("static regex")
    })
}

fn values_to_entries(value: &Value) -> Option<Vec<TimestampEntry>> {
    let array = value.as_array()?;
    if array.is_empty() {
        return None;
    }
    let entries: Vec<TimestampEntry> = array
        .iter()
        .filter_map(|entry| {
            let timestamp = entry.get("timestamp")?.as_str()?.to_string();
            let text = entry.get("text")?.as_str()?.to_string();
            Some(TimestampEntry { timestamp, text })
        })
        .collect();
    (!entries.is_empty()).then_some(entries)
}

/// Strategy 1: the whole response is already a valid JSON array.
fn try_raw_parse(raw: &str) -> Option<Vec<TimestampEntry>> {
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    values_to_entries(&value)
}

/// Strategy 2: extract the contents of the first ```json fenced block.
fn try_markdown_fence(raw: &str) -> Option<Vec<TimestampEntry>> {
    let captured = markdown_fence().captures(raw)?.get(1)?.as_str();
    let value: Value = serde_json::from_str(captured.trim()).ok()?;
    values_to_entries(&value)
}

/// Strategy 3: extract the first `[...]` substring anywhere in the response.
fn try_array_substring(raw: &str) -> Option<Vec<TimestampEntry>> {
    let captured = array_substring().find(raw)?.as_str();
    let value: Value = serde_json::from_str(captured).ok()?;
    values_to_entries(&value)
}

/// Strategy 4: regex over individual `{"timestamp": "...", "text": "..."}`
/// object literals, tolerating surrounding noise that breaks whole-array
/// parsing.
fn try_entry_regex(raw: &str) -> Option<Vec<TimestampEntry>> {
    let entries: Vec<TimestampEntry> = entry_object()
        .captures_iter(raw)
        .map(|captures| TimestampEntry {
            timestamp: captures[1].to_string(),
            text: captures[2].replace("\\\"", "\""),
        })
        .collect();
    (!entries.is_empty()).then_some(entries)
}

/// Strategy 5: regex over loose `timestamp - text` lines, for responses that
/// abandoned JSON entirely.
fn try_timestamp_text_pairs(raw: &str) -> Option<Vec<TimestampEntry>> {
    let entries: Vec<TimestampEntry> = timestamp_text_pair()
        .captures_iter(raw)
        .map(|captures| TimestampEntry {
            timestamp: captures[1].to_string(),
            text: captures[2].trim().to_string(),
        })
        .collect();
    (!entries.is_empty()).then_some(entries)
}

/// Run the full cascade, returning the first strategy that yields a
/// non-empty array, or `None` if every strategy fails.
#[must_use]
pub fn parse_cascade(raw: &str) -> Option<Vec<TimestampEntry>> {
    try_raw_parse(raw)
        .or_else(|| try_markdown_fence(raw))
        .or_else(|| try_array_substring(raw))
        .or_else(|| try_entry_regex(raw))
        .or_else(|| try_timestamp_text_pairs(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json_array() {
        let raw = r#"[{"timestamp": "00:00:00", "text": "Intro"}]"#;
        let entries = parse_cascade(raw).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp, "00:00:00");
    }

    #[test]
    fn parses_markdown_fenced_array() {
        let raw = "Here you go:\n```json\n[{\"timestamp\": \"00:01:00\", \"text\": \"Topic\"}]\n```";
        let entries = parse_cascade(raw).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "Topic");
    }

    #[test]
    fn parses_array_substring_amid_prose() {
        let raw = "Sure, the outline is [{\"timestamp\": \"00:02:00\", \"text\": \"Middle\"}] — done.";
        let entries = parse_cascade(raw).unwrap();
        assert_eq!(entries[0].text, "Middle");
    }

    #[test]
    fn falls_back_to_entry_regex_on_broken_json() {
        let raw = "not quite json but has {\"timestamp\": \"00:03:00\", \"text\": \"Fragment\"} inline";
        let entries = parse_cascade(raw).unwrap();
        assert_eq!(entries[0].timestamp, "00:03:00");
    }

    #[test]
    fn falls_back_to_loose_pairs_when_json_entirely_absent() {
        let raw = "00:04:00 - Closing remarks\n00:05:30: Q&A session";
        let entries = parse_cascade(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].timestamp, "00:05:30");
    }

    #[test]
    fn returns_none_when_every_strategy_fails() {
        assert!(parse_cascade("no structure here at all").is_none());
    }

    #[test]
    fn empty_array_is_treated_as_failure_not_success() {
        assert!(parse_cascade("[]").is_none());
    }
}
