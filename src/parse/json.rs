//! JSON and JSONL readers

use serde_json::Value;

use crate::error::{IngestError, IngestResult};
use crate::models::Record;

/// Parse a JSON document
pub fn parse_json(source_name: &str, bytes: &[u8]) -> IngestResult<Value> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    serde_json::from_slice(bytes).map_err(|e| {
        IngestError::parse(
            source_name,
            format!("line {}, column {}", e.line(), e.column()),
            e.to_string(),
        )
    })
}

/// Parse a JSON Lines document, skipping blank lines
pub fn parse_jsonl(source_name: &str, bytes: &[u8]) -> IngestResult<Vec<Value>> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = std::str::from_utf8(bytes).map_err(|e| {
        IngestError::parse(
            source_name,
            format!("byte offset {}", e.valid_up_to()),
            "content is not valid UTF-8",
        )
    })?;

    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = serde_json::from_str(line).map_err(|e| {
            IngestError::parse(source_name, format!("line {}", i + 1), e.to_string())
        })?;
        out.push(value);
    }
    Ok(out)
}

/// Dotted segments of a records path (`$`, `$.a.b` or `a.b`)
pub fn dotted_segments(path: &str) -> Vec<&str> {
    let path = path.trim();
    let path = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);
    path.split('.').filter(|p| !p.is_empty()).collect()
}

fn get_path<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current)
}

fn as_record(value: &Value) -> Record {
    match value {
        Value::Object(map) => map.clone(),
        other => {
            let mut record = Record::new();
            record.insert("value".to_string(), other.clone());
            record
        }
    }
}

/// Records found at `path` in a document
///
/// An array yields one record per item, an object yields itself, anything
/// else (a scalar or a missing path) is wrapped as `{"value": ...}`.
/// Non-object array items are wrapped the same way.
pub fn records_at(root: &Value, path: &str) -> Vec<Record> {
    let segments = dotted_segments(path);
    match get_path(root, &segments) {
        Some(Value::Array(items)) => items.iter().map(as_record).collect(),
        Some(Value::Object(map)) => vec![map.clone()],
        Some(other) => vec![as_record(other)],
        None => vec![as_record(&Value::Null)],
    }
}
