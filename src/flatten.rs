//! Semi-flat rows for normalized tables
//!
//! Scalars become columns and nested values are kept as JSON text in
//! `json__{key}` columns. XML records (in the lossless form produced by
//! [`XmlElement::to_lossless`](crate::parse::XmlElement::to_lossless)) get
//! `attr__{name}` columns for attributes, a `text` column for element text,
//! and text-only child elements collapsed to their text.
//!
//! All values are carried as text; the destination stores them as VARCHAR.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::{PARENT_FK_COLUMN, Record};

/// Column name to value; `None` is SQL NULL
pub type Row = BTreeMap<String, Option<String>>;

pub const PK_COLUMN: &str = "_pk";
pub const RAW_JSON_COLUMN: &str = "raw_json";
pub const SOURCE_NAME_COLUMN: &str = "__source_name";

const MAX_TABLE_NAME_LEN: usize = 120;

/// Identifier-safe table name
///
/// `-` and spaces become `_`, other characters outside `[A-Za-z0-9_]` are
/// dropped, leading/trailing `_` are trimmed, a leading digit gets a `t_`
/// prefix and the result is capped at 120 characters.
pub fn sanitize_table_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .filter_map(|c| match c {
            '-' | ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '_' => Some(c),
            _ => None,
        })
        .collect();
    let mut out = replaced.trim_matches('_').to_string();
    if out.is_empty() {
        return "collection".to_string();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out = format!("t_{}", out);
    }
    out.truncate(MAX_TABLE_NAME_LEN);
    out
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn json_text(value: &Value) -> Option<String> {
    if value.is_null() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Insert a column, suffixing the name when it collides case-insensitively
fn put(row: &mut Row, name: String, value: Option<String>) {
    let taken = |row: &Row, candidate: &str| row.keys().any(|k| k.eq_ignore_ascii_case(candidate));
    if !taken(row, &name) {
        row.insert(name, value);
        return;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}__{}", name, n);
        if !taken(row, &candidate) {
            row.insert(candidate, value);
            return;
        }
        n += 1;
    }
}

/// Columns of a record from a JSON, CSV or XLSX source
pub fn flatten_record(record: &Record) -> Row {
    let mut row = Row::new();
    for (key, value) in record {
        if key.is_empty() {
            continue;
        }
        match value {
            Value::Object(_) | Value::Array(_) => {
                put(&mut row, format!("json__{}", key), json_text(value))
            }
            scalar => put(&mut row, key.clone(), scalar_text(scalar)),
        }
    }
    row
}

/// Columns of a lossless XML record
pub fn flatten_xml_record(record: &Record) -> Row {
    let mut row = Row::new();
    for (key, value) in record {
        match (key.as_str(), value) {
            ("@", Value::Object(attrs)) => {
                for (name, v) in attrs {
                    put(&mut row, format!("attr__{}", name), scalar_text(v));
                }
            }
            ("#text", v) => put(&mut row, "text".to_string(), scalar_text(v)),
            (_, Value::Object(child)) if is_text_only(child) => {
                put(
                    &mut row,
                    key.clone(),
                    child.get("#text").and_then(scalar_text),
                );
                if let Some(attrs) = child.get("@") {
                    put(&mut row, format!("json__{}__attrs", key), json_text(attrs));
                }
            }
            (_, Value::Object(_)) | (_, Value::Array(_)) => {
                put(&mut row, format!("json__{}", key), json_text(value))
            }
            (_, scalar) => put(&mut row, key.clone(), scalar_text(scalar)),
        }
    }
    row
}

fn is_text_only(element: &Record) -> bool {
    element.keys().all(|k| k == "#text" || k == "@")
}

/// Complete normalized row: flattened columns plus the fixed ones
pub fn normalized_row(
    record: &Record,
    xml: bool,
    pk: String,
    source_name: &str,
    parent_pk: Option<String>,
) -> Row {
    let mut row = if xml {
        flatten_xml_record(record)
    } else {
        flatten_record(record)
    };
    row.retain(|k, _| {
        ![PK_COLUMN, RAW_JSON_COLUMN, SOURCE_NAME_COLUMN, PARENT_FK_COLUMN]
            .iter()
            .any(|reserved| k.eq_ignore_ascii_case(reserved))
    });
    row.insert(PK_COLUMN.to_string(), Some(pk));
    row.insert(
        RAW_JSON_COLUMN.to_string(),
        Some(Value::Object(record.clone()).to_string()),
    );
    row.insert(SOURCE_NAME_COLUMN.to_string(), Some(source_name.to_string()));
    if let Some(parent) = parent_pk {
        row.insert(PARENT_FK_COLUMN.to_string(), Some(parent));
    }
    row
}
