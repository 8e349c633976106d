//! Tolerant parsing of LLM chronology responses.
//!
//! Models wrap JSON in markdown fences, surround it with prose, and get cut
//! off at the token limit mid-object. The parser tries a direct decode and
//! then three recovery strategies in order, returning whatever records it
//! can salvage. It never fails: an unusable response is an empty list.

use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Top-level keys models use to wrap the entry array.
const WRAPPER_KEYS: &[&str] = &["entries", "events", "chronology", "medical_events"];

pub type Record = Map<String, Value>;

/// Parse a raw LLM response into entry records.
pub fn parse_response(raw: &str) -> Vec<Record> {
    let text = strip_code_fence(raw);
    if text.is_empty() {
        return Vec::new();
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return records_from_value(value);
    }

    let balanced = extract_balanced_objects(text);
    if !balanced.is_empty() {
        warn!(
            recovered = balanced.len(),
            "Recovered entries from malformed response via object scan"
        );
        return balanced;
    }

    let repaired = repair_truncated(text);
    if !repaired.is_empty() {
        warn!(
            recovered = repaired.len(),
            "Recovered entries from truncated response via bracket repair"
        );
        return repaired;
    }

    let line_buffered = extract_line_buffered(text);
    if !line_buffered.is_empty() {
        warn!(
            recovered = line_buffered.len(),
            "Recovered entries from malformed response via line buffering"
        );
        return line_buffered;
    }

    warn!(
        response_len = raw.len(),
        "Could not recover any entries from LLM response"
    );
    Vec::new()
}

/// Strip one markdown code fence, discarding prose around it.
///
/// A missing closing fence (truncated output) keeps everything after the
/// opening one.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };

    let after_open = &trimmed[open + 3..];
    // Skip the language tag on the fence line
    let body = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open,
    };

    match body.rfind("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Turn a decoded JSON value into records, unwrapping known wrappers.
fn records_from_value(value: Value) -> Vec<Record> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Value::Object(mut map) => {
            for key in WRAPPER_KEYS {
                if matches!(map.get(*key), Some(Value::Array(_))) {
                    if let Some(inner) = map.remove(*key) {
                        return records_from_value(inner);
                    }
                }
            }
            if map.contains_key("date") {
                vec![map]
            } else {
                debug!(
                    keys = ?map.keys().collect::<Vec<_>>(),
                    "Response object has neither entries nor a date"
                );
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

fn has_date(record: &Record) -> bool {
    match record.get("date") {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Number(_)) => true,
        _ => false,
    }
}

/// Byte spans of every balanced `{...}` object, in closing order.
///
/// String contents and escapes are skipped so braces inside values don't
/// count. Structural characters are ASCII, so spans fall on char
/// boundaries.
fn balanced_object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut starts = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => starts.push(i),
            b'}' => {
                if let Some(start) = starts.pop() {
                    spans.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    spans
}

/// Strategy (a): decode every balanced object and keep the outermost ones
/// with a non-empty date.
fn extract_balanced_objects(text: &str) -> Vec<Record> {
    let mut dated: Vec<(usize, usize, Record)> = balanced_object_spans(text)
        .into_iter()
        .filter_map(|(start, end)| {
            match serde_json::from_str::<Value>(&text[start..end]) {
                Ok(Value::Object(map)) if has_date(&map) => Some((start, end, map)),
                _ => None,
            }
        })
        .collect();

    dated.sort_by_key(|(start, _, _)| *start);

    let mut records = Vec::new();
    let mut covered_until = 0;
    for (start, end, map) in dated {
        if start < covered_until {
            continue;
        }
        covered_until = end;
        records.push(map);
    }
    records
}

/// Strategy (b): close whatever the truncation left open and re-decode.
fn repair_truncated(text: &str) -> Vec<Record> {
    let repaired = close_open_structures(text);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            debug!(
                appended = repaired.len().saturating_sub(text.len()),
                "Bracket repair succeeded"
            );
            records_from_value(value)
                .into_iter()
                .filter(has_date)
                .collect()
        }
        Err(e) => {
            debug!(error = %e, "Bracket repair failed");
            Vec::new()
        }
    }
}

/// Close an unterminated string, drop a dangling comma or key separator,
/// then append the missing closers in nesting order.
fn close_open_structures(text: &str) -> String {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for b in text.bytes() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => closers.push('}'),
            b'[' => closers.push(']'),
            b'}' | b']' => {
                closers.pop();
            }
            _ => {}
        }
    }

    let mut out = text.trim_end().to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    loop {
        let trimmed = out.trim_end();
        if let Some(stripped) = trimmed.strip_suffix(',') {
            out = stripped.to_string();
        } else if trimmed.ends_with(':') {
            out = format!("{} null", trimmed);
            break;
        } else {
            out.truncate(trimmed.len());
            break;
        }
    }

    while let Some(closer) = closers.pop() {
        out.push(closer);
    }
    out
}

/// Strategy (c): accumulate lines until braces balance, then decode the
/// buffered object.
fn extract_line_buffered(text: &str) -> Vec<Record> {
    let mut records = Vec::new();
    let mut buffer = String::new();
    let mut depth: i32 = 0;

    for line in text.lines() {
        let line = line.trim();
        if buffer.is_empty() {
            // Skip array punctuation and prose between objects
            match line.find('{') {
                Some(open) => buffer.push_str(&line[open..]),
                None => continue,
            }
        } else {
            buffer.push('\n');
            buffer.push_str(line);
        }

        depth = brace_depth(&buffer);
        if depth > 0 {
            continue;
        }

        let candidate = buffer
            .trim_end_matches(|c: char| c == ',' || c == ']' || c.is_whitespace());
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            if has_date(&map) {
                records.push(map);
            }
        }
        buffer.clear();
    }

    if depth > 0 {
        debug!(
            buffered = buffer.len(),
            "Discarded unterminated object at end of response"
        );
    }
    records
}

fn brace_depth(text: &str) -> i32 {
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    for b in text.bytes() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dates(records: &[Record]) -> Vec<&str> {
        records
            .iter()
            .filter_map(|r| r.get("date").and_then(Value::as_str))
            .collect()
    }

    #[test]
    fn test_plain_array() {
        let records = parse_response(r#"[{"date": "2024-01-15"}, {"date": "2024-02-01"}]"#);
        assert_eq!(dates(&records), vec!["2024-01-15", "2024-02-01"]);
    }

    #[test]
    fn test_fenced_with_prose() {
        let raw = "Here are the entries:\n```json\n[{\"date\": \"2024-01-15\"}]\n```\nLet me know!";
        assert_eq!(dates(&parse_response(raw)), vec!["2024-01-15"]);
    }

    #[test]
    fn test_wrapper_keys_unwrapped() {
        for key in WRAPPER_KEYS {
            let raw = format!(r#"{{"{}": [{{"date": "2024-01-15"}}]}}"#, key);
            assert_eq!(dates(&parse_response(&raw)), vec!["2024-01-15"], "{}", key);
        }
    }

    #[test]
    fn test_single_object() {
        let records = parse_response(r#"{"date": "2024-01-15", "provider": "Dr. Smith"}"#);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_truncated_array_keeps_complete_entries() {
        let raw = r#"[{"date":"2024-01-15","provider":"Dr. Smith"}, {"date":"2024-02"#;
        let records = parse_response(raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["provider"], "Dr. Smith");
    }

    #[test]
    fn test_truncated_wrapper_keeps_outer_entries_only() {
        let raw = r#"{"entries": [
            {"date": "2024-01-15", "occurrence_treatment": {"labs": [{"date": "2024-01-14"}]}},
            {"date": "2024-03-01", "provider": "Dr. Lee"},
            {"date": "2024-04"#;
        let records = parse_response(raw);
        assert_eq!(dates(&records), vec!["2024-01-15", "2024-03-01"]);
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let raw = r#"[{"date": "2024-01-15", "note": "pt said \"{ok}\" today"}, {"date": "#;
        let records = parse_response(raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["note"], "pt said \"{ok}\" today");
    }

    #[test]
    fn test_bracket_repair_closes_unterminated_string() {
        // No complete object exists, so only repair can recover this
        let raw = r#"[{"date": "2024-01-15", "provider": "Dr. Sm"#;
        let records = parse_response(raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["provider"], "Dr. Sm");
    }

    #[test]
    fn test_bracket_repair_handles_dangling_key() {
        let repaired = close_open_structures(r#"[{"date": "2024-01-15", "provider":"#);
        assert_eq!(repaired, r#"[{"date": "2024-01-15", "provider": null}]"#);

        let repaired = close_open_structures(r#"[{"date": "2024-01-15"},"#);
        assert_eq!(repaired, r#"[{"date": "2024-01-15"}]"#);
    }

    #[test]
    fn test_garbage_is_empty_not_error() {
        assert!(parse_response("I could not find any medical events.").is_empty());
        assert!(parse_response("").is_empty());
        assert!(parse_response("```json\n```").is_empty());
    }

    #[test]
    fn test_line_buffered_extraction() {
        let raw = "{\n\"date\": \"2024-01-15\",\n\"provider\": \"Dr. A\"\n},\n{\n\"date\": \"2024-02-01\"\n}";
        let records = extract_line_buffered(raw);
        assert_eq!(dates(&records), vec!["2024-01-15", "2024-02-01"]);
    }
}
