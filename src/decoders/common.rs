//! Helpers shared by all three decoders: timestamp parsing, content-block
//! flattening, and decode metrics.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Aggregate counters for a single decode pass over one file or archive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodeMetrics {
    pub total_conversations: usize,
    pub total_messages: usize,
    pub failed_conversations: usize,
    pub schema_errors: usize,
}

/// Parses a timestamp using a prioritized format list, falling back to the
/// current time rather than rejecting the message. Grounded on
/// `connectors/mod.rs::parse_timestamp`'s epoch-magnitude heuristic and
/// `original_source/daemon/jsonl_parser.py::_parse_timestamp`'s format
/// list, with the "now" sentinel standardized across all three decoders
/// (see SPEC_FULL.md §4.1).
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    if raw.is_empty() {
        return Utc::now();
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }

    // Normalize a bare trailing "Z" the way the original's strptime-based
    // parser does, in case rfc3339 parsing above rejected it on a
    // fractional-second edge case.
    if let Some(stripped) = raw.strip_suffix('Z') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{stripped}+00:00")) {
            return dt.with_timezone(&Utc);
        }
    }

    if let Ok(epoch) = raw.parse::<f64>() {
        let millis_threshold = 100_000_000_000.0;
        let (secs, nanos) = if epoch.abs() >= millis_threshold {
            let millis = epoch as i64;
            (millis / 1000, ((millis % 1000).unsigned_abs() as u32) * 1_000_000)
        } else {
            let secs = epoch as i64;
            let frac = epoch - epoch.trunc();
            (secs, (frac.abs() * 1_000_000_000.0) as u32)
        };
        if let Some(dt) = Utc.timestamp_opt(secs, nanos).single() {
            return dt;
        }
    }

    Utc::now()
}

/// Flattens a message content field that may be a plain string or a list
/// of typed content blocks (`{"type": "text", "text": "..."}` or any dict
/// carrying a `"text"` key). Text blocks are joined with newlines,
/// matching `jsonl_parser.py::_extract_message_content` — see
/// SPEC_FULL.md §4.1 for why this crate standardizes on newline-joining
/// across all decoders rather than the web parser's space-join.
pub fn flatten_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| block.as_object())
            .filter(|obj| obj.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|obj| obj.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Recovers a human-readable project name from a dash-encoded directory
/// component, e.g. `-home-user-code-my-project` -> `my-project`.
///
/// Grounded on `connectors/mod.rs`'s path-decoding heuristic: prefer the
/// segment immediately following a literal `project` token, else fall
/// back to the last one or two segments.
pub fn decode_project_path(encoded: &str) -> String {
    let parts: Vec<&str> = encoded.split('-').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return encoded.to_string();
    }

    if let Some(idx) = parts.iter().position(|p| p.eq_ignore_ascii_case("project")) {
        if let Some(next) = parts.get(idx + 1) {
            return (*next).to_string();
        }
    }

    if parts.len() >= 2 {
        parts[parts.len() - 2..].join("-")
    } else {
        parts[0].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_fractional_seconds() {
        let dt = parse_timestamp("2024-03-01T12:30:00.123Z");
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-03-01");
    }

    #[test]
    fn parses_epoch_seconds_and_millis() {
        let secs = parse_timestamp("1700000000");
        let millis = parse_timestamp("1700000000000");
        assert_eq!(secs.timestamp(), 1_700_000_000);
        assert_eq!(millis.timestamp(), 1_700_000_000);
    }

    #[test]
    fn unparseable_falls_back_to_now() {
        let before = Utc::now();
        let dt = parse_timestamp("not a timestamp");
        assert!(dt >= before);
    }

    #[test]
    fn flattens_text_blocks_joined_by_newline() {
        let v = serde_json::json!([
            {"type": "text", "text": "a"},
            {"type": "tool_use", "name": "x"},
            {"type": "text", "text": "b"},
        ]);
        assert_eq!(flatten_content(&v), "a\nb");
    }

    #[test]
    fn flattens_plain_string() {
        assert_eq!(flatten_content(&Value::String("hi".into())), "hi");
    }

    #[test]
    fn decodes_project_path_via_last_segments() {
        assert_eq!(decode_project_path("-home-user-code-my-project"), "my-project");
    }

    #[test]
    fn decodes_project_path_via_project_keyword() {
        assert_eq!(decode_project_path("project-widgets-v2"), "widgets");
    }
}
