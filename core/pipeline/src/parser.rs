use regex::Regex;
use serde_json::Value;
use transcript_analyzer_schemas::{LanguageAnalysis, MemoryEvent, Scores};

use crate::error::ParseError;

/// Strip a markdown code fence from model output.
///
/// Tries, in order: a fenced wrapper spanning the whole trimmed text, the
/// first fenced block anywhere in the text, then any dangling leading or
/// trailing fence markers. Returns the trimmed remainder.
pub fn strip_code_fence(text: &str) -> String {
    let cleaned = text.trim();

    let exact = Regex::new(r"(?s)^```(?:json)?\s*\n?(.*?)\n?```$").unwrap();
    if let Some(caps) = exact.captures(cleaned) {
        return caps[1].trim().to_string();
    }

    let anywhere = Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?```").unwrap();
    if let Some(caps) = anywhere.captures(cleaned) {
        return caps[1].trim().to_string();
    }

    let leading = Regex::new(r"^```(?:json)?\s*\n?").unwrap();
    let trailing = Regex::new(r"\n?```$").unwrap();
    let cleaned = leading.replace(cleaned, "");
    let cleaned = trailing.replace(&cleaned, "");
    cleaned.trim().to_string()
}

/// A missing field, empty text, or the literal string "null" all mean
/// "no analysis stored" and are valid, not errors.
pub fn is_no_analysis(raw: Option<&str>) -> bool {
    match raw {
        None => true,
        Some(text) => {
            let trimmed = text.trim();
            trimmed.is_empty() || trimmed == "null"
        }
    }
}

/// Parse a stored memory analysis into its event list.
///
/// The top-level value must be a JSON array; elements are converted leniently
/// so unexpected shapes flow through with defaulted fields rather than
/// rejecting the whole payload.
pub fn parse_memory(raw: Option<&str>) -> Result<Vec<MemoryEvent>, ParseError> {
    if is_no_analysis(raw) {
        return Ok(Vec::new());
    }
    let text = raw.unwrap_or_default();

    let cleaned = strip_code_fence(text);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| ParseError::new(format!("invalid JSON: {e}"), text))?;

    match value {
        Value::Array(items) => Ok(items.iter().map(event_from_value).collect()),
        _ => Err(ParseError::new("expected a JSON array of events", text)),
    }
}

/// Parse a stored language analysis. The sole structural gate is a numeric
/// `scores.overall`; everything else defaults.
pub fn parse_language(raw: Option<&str>) -> Result<Option<LanguageAnalysis>, ParseError> {
    if is_no_analysis(raw) {
        return Ok(None);
    }
    let text = raw.unwrap_or_default();

    let cleaned = strip_code_fence(text);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| ParseError::new(format!("invalid JSON: {e}"), text))?;

    let overall_is_number = value
        .get("scores")
        .and_then(|scores| scores.get("overall"))
        .map(Value::is_number)
        .unwrap_or(false);
    if !overall_is_number {
        return Err(ParseError::new("missing numeric scores.overall", text));
    }

    Ok(Some(language_from_value(&value)))
}

/// Lenient conversion past the gate: mis-typed scores read as zero, and a
/// malformed mistake or evidence block defaults instead of rejecting the
/// payload.
fn language_from_value(value: &Value) -> LanguageAnalysis {
    let scores = value.get("scores");

    LanguageAnalysis {
        scores: Scores {
            clarity: num_field(scores, "clarity"),
            range: num_field(scores, "range"),
            flow: num_field(scores, "flow"),
            overall: num_field(scores, "overall"),
        },
        mistakes: value
            .get("mistakes")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|m| serde_json::from_value(m.clone()).unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default(),
        dimension_evidence: value
            .get("dimension_evidence")
            .cloned()
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default(),
    }
}

fn num_field(value: Option<&Value>, key: &str) -> f64 {
    value
        .and_then(|v| v.get(key))
        .and_then(Value::as_f64)
        .unwrap_or_default()
}

/// Lenient per-event conversion: missing or mis-typed fields default instead
/// of rejecting the entry.
fn event_from_value(value: &Value) -> MemoryEvent {
    MemoryEvent {
        event_id: str_field(value, "event_id"),
        event_type: str_field(value, "type"),
        actor: str_field(value, "actor"),
        subject: str_field(value, "subject"),
        content: str_field(value, "content"),
        status: str_field(value, "status"),
        evidence: value
            .get("evidence")
            .cloned()
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default(),
        timestamp: value
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT_JSON: &str = r#"[{"event_id":"e1","type":"preference","actor":"user","subject":"hiking","content":"User enjoys hiking","status":"asserted","evidence":[{"kind":"quote","ref":["I love hiking"]}],"timestamp":"2024-01-01T00:00:00Z"}]"#;

    #[test]
    fn test_strip_exact_fence_with_tag() {
        assert_eq!(strip_code_fence("```json\n[]\n```"), "[]");
    }

    #[test]
    fn test_strip_exact_fence_without_tag() {
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_strip_fence_anywhere_in_prose() {
        let text = "Here is the result:\n```json\n[1,2]\n```\nHope that helps!";
        assert_eq!(strip_code_fence(text), "[1,2]");
    }

    #[test]
    fn test_strip_dangling_fences() {
        assert_eq!(strip_code_fence("```json\n[1,2]"), "[1,2]");
        assert_eq!(strip_code_fence("[1,2]\n```"), "[1,2]");
    }

    #[test]
    fn test_unfenced_text_passes_through() {
        assert_eq!(strip_code_fence("  [1,2]  "), "[1,2]");
    }

    #[test]
    fn test_fenced_and_unfenced_extract_identically() {
        let fenced = format!("```json\n{EVENT_JSON}\n```");
        assert_eq!(strip_code_fence(&fenced), strip_code_fence(EVENT_JSON));
    }

    #[test]
    fn test_no_analysis_states_yield_empty_memory() {
        assert_eq!(parse_memory(None).unwrap().len(), 0);
        assert_eq!(parse_memory(Some("")).unwrap().len(), 0);
        assert_eq!(parse_memory(Some("  ")).unwrap().len(), 0);
        assert_eq!(parse_memory(Some("null")).unwrap().len(), 0);
    }

    #[test]
    fn test_no_analysis_states_yield_no_language() {
        assert!(parse_language(None).unwrap().is_none());
        assert!(parse_language(Some("")).unwrap().is_none());
        assert!(parse_language(Some("null")).unwrap().is_none());
    }

    #[test]
    fn test_parse_memory_events() {
        let events = parse_memory(Some(EVENT_JSON)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "preference");
        assert_eq!(events[0].evidence[0].r#ref[0], "I love hiking");
        assert_eq!(events[0].timestamp.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_parse_memory_fenced_empty_array() {
        let events = parse_memory(Some("```json\n[]\n```")).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_parse_memory_non_array_is_error() {
        let raw = r#"{"events": []}"#;
        let err = parse_memory(Some(raw)).unwrap_err();
        assert_eq!(err.raw, raw);

        let err = parse_memory(Some("42")).unwrap_err();
        assert_eq!(err.raw, "42");
    }

    #[test]
    fn test_parse_memory_invalid_json_keeps_raw() {
        let raw = "I could not produce JSON, sorry.";
        let err = parse_memory(Some(raw)).unwrap_err();
        assert_eq!(err.raw, raw);
    }

    #[test]
    fn test_malformed_event_entries_flow_through() {
        let raw = r#"[{"type":"preference"},{"unexpected":true},12]"#;
        let events = parse_memory(Some(raw)).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, "preference");
        assert!(events[1].event_type.is_empty());
        assert!(events[2].event_type.is_empty());
    }

    #[test]
    fn test_parse_language_happy_path() {
        let raw = r#"```json
{"scores":{"clarity":3,"range":2,"flow":2,"overall":2},"mistakes":[],"dimension_evidence":{"clarity":[],"range":[],"flow":[]}}
```"#;
        let analysis = parse_language(Some(raw)).unwrap().unwrap();
        assert_eq!(analysis.scores.overall, 2.0);
    }

    #[test]
    fn test_parse_language_missing_overall_is_error() {
        let raw = r#"{"scores":{"clarity":3}}"#;
        let err = parse_language(Some(raw)).unwrap_err();
        assert_eq!(err.raw, raw);

        let raw = r#"{"scores":{"overall":"high"}}"#;
        assert!(parse_language(Some(raw)).is_err());
    }

    #[test]
    fn test_parse_language_mistyped_secondary_fields_default() {
        // A numeric overall is the only gate; everything else degrades.
        let raw = r#"{"scores":{"clarity":"high","range":2,"flow":2,"overall":2},"mistakes":{"oops":true},"dimension_evidence":"none"}"#;
        let analysis = parse_language(Some(raw)).unwrap().unwrap();
        assert_eq!(analysis.scores.overall, 2.0);
        assert_eq!(analysis.scores.range, 2.0);
        assert_eq!(analysis.scores.clarity, 0.0);
        assert!(analysis.mistakes.is_empty());
        assert!(analysis.dimension_evidence.clarity.is_empty());
    }

    #[test]
    fn test_parse_language_malformed_mistake_entries_default() {
        let raw = r#"{"scores":{"overall":1},"mistakes":[{"category":"tense","quote":"I goed"},{"category":5}]}"#;
        let analysis = parse_language(Some(raw)).unwrap().unwrap();
        assert_eq!(analysis.mistakes.len(), 2);
        assert_eq!(analysis.mistakes[0].category, "tense");
        assert!(analysis.mistakes[1].category.is_empty());
    }

    #[test]
    fn test_parse_language_prose_is_error() {
        let raw = "The speaker communicates clearly overall.";
        let err = parse_language(Some(raw)).unwrap_err();
        assert_eq!(err.raw, raw);
    }
}
