//! Primary key resolution
//!
//! A collection's key is chosen once for the whole collection: the first
//! field of `pk.prefer` that is present, non-empty and unique across every
//! record wins. When no preferred field qualifies the key falls back to a
//! SHA-1 hash of the record's canonical JSON.
//!
//! The hash is stable for byte-identical records but changes whenever any
//! field changes, so it cannot deduplicate updated rows. It is accepted for
//! `append` and `replace`; a `merge` collection that would fall back to it is
//! rejected with a configuration error.

use serde_json::Value;
use sha1::{Digest, Sha1};
use std::collections::HashSet;

use crate::error::{IngestError, IngestResult};
use crate::models::{Record, WriteDisposition};

/// How `_pk` values are produced for a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkStrategy {
    /// Value of a record field (`@name` reads an XML attribute)
    Field(String),
    /// SHA-1 of the record's canonical JSON
    Hash,
}

impl PkStrategy {
    pub fn is_hash(&self) -> bool {
        matches!(self, PkStrategy::Hash)
    }

    /// Key of one record under this strategy
    ///
    /// A record lacking the field (possible only for records not seen during
    /// resolution) is keyed by its hash.
    pub fn key_for(&self, record: &Record) -> String {
        match self {
            PkStrategy::Field(field) => {
                field_value(record, field).unwrap_or_else(|| stable_hash(record))
            }
            PkStrategy::Hash => stable_hash(record),
        }
    }
}

impl std::fmt::Display for PkStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PkStrategy::Field(field) => write!(f, "field '{}'", field),
            PkStrategy::Hash => f.write_str("content hash"),
        }
    }
}

/// Deterministic JSON text: object keys sorted at every level, no whitespace
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-1 hex digest of a record's canonical JSON
pub fn stable_hash(record: &Record) -> String {
    let mut hasher = Sha1::new();
    hasher.update(canonical_json(&Value::Object(record.clone())).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn lookup<'a>(map: &'a Record, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map.get("#text").and_then(scalar_text),
        Value::Array(_) => None,
    }
}

/// Usable key text of `field` in a record
///
/// Lookup is exact first, then case-insensitive. `@name` reads the
/// attribute map of an XML record and element values wrapped as
/// `{"#text": ...}` are unwrapped. Null, blank and non-scalar values yield
/// `None`.
pub fn field_value(record: &Record, field: &str) -> Option<String> {
    let value = match field.strip_prefix('@') {
        Some(attr) => match record.get("@") {
            Some(Value::Object(attrs)) => lookup(attrs, attr),
            _ => None,
        },
        None => lookup(record, field),
    }?;
    scalar_text(value)
}

/// Choose the key strategy for a collection
///
/// With no records the first preferred field is taken as configured.
pub fn resolve_strategy(records: &[Record], prefer: &[String]) -> PkStrategy {
    if records.is_empty() {
        return prefer
            .first()
            .map(|f| PkStrategy::Field(f.clone()))
            .unwrap_or(PkStrategy::Hash);
    }

    'candidates: for field in prefer {
        let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
        for record in records {
            let Some(value) = field_value(record, field) else {
                continue 'candidates;
            };
            if !seen.insert(value) {
                continue 'candidates;
            }
        }
        return PkStrategy::Field(field.clone());
    }
    PkStrategy::Hash
}

/// Resolve the key strategy for a collection about to be written
///
/// Falling back to the content hash is logged; for `merge` it is a
/// configuration error.
pub fn resolve_for_collection(
    collection: &str,
    field_path: &str,
    records: &[Record],
    prefer: &[String],
    disposition: WriteDisposition,
) -> IngestResult<PkStrategy> {
    let strategy = resolve_strategy(records, prefer);
    if strategy.is_hash() {
        if disposition == WriteDisposition::Merge {
            return Err(IngestError::config(
                field_path,
                format!(
                    "merge on '{}' needs a unique, non-null key from pk.prefer {:?}; \
                     none qualified and a content hash cannot deduplicate changed rows",
                    collection, prefer
                ),
            ));
        }
        tracing::warn!(
            collection,
            prefer = ?prefer,
            "No preferred key is unique and non-null, using content hash"
        );
    } else {
        tracing::debug!(collection, strategy = %strategy, "Resolved primary key");
    }
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn prefer(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": [1, "x"], "c": null}});
        assert_eq!(canonical_json(&a), r#"{"a":{"c":null,"d":[1,"x"]},"b":1}"#);
    }

    #[test]
    fn test_hash_ignores_key_order() {
        let a = rec(json!({"id": 1, "name": "x"}));
        let b = rec(json!({"name": "x", "id": 1}));
        assert_eq!(stable_hash(&a), stable_hash(&b));
        assert_eq!(stable_hash(&a).len(), 40);

        let c = rec(json!({"name": "y", "id": 1}));
        assert_ne!(stable_hash(&a), stable_hash(&c));
    }

    #[test]
    fn test_first_unique_field_wins() {
        let records = vec![
            rec(json!({"code": "A", "id": 1})),
            rec(json!({"code": "A", "id": 2})),
        ];
        assert_eq!(
            resolve_strategy(&records, &prefer(&["code", "id"])),
            PkStrategy::Field("id".to_string())
        );
    }

    #[test]
    fn test_null_anywhere_disqualifies() {
        let records = vec![rec(json!({"id": 1})), rec(json!({"id": null}))];
        assert_eq!(resolve_strategy(&records, &prefer(&["id"])), PkStrategy::Hash);
    }

    #[test]
    fn test_case_insensitive_and_attribute_lookup() {
        let record = rec(json!({
            "@": {"ID": "u1"},
            "Code": {"#text": "C-1"},
            "Key": "k"
        }));
        assert_eq!(field_value(&record, "@id"), Some("u1".to_string()));
        assert_eq!(field_value(&record, "code"), Some("C-1".to_string()));
        assert_eq!(field_value(&record, "Key"), Some("k".to_string()));
        assert_eq!(field_value(&record, "missing"), None);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let records = vec![rec(json!({"sku": "a"})), rec(json!({"sku": "b"}))];
        let p = prefer(&["id", "sku"]);
        assert_eq!(resolve_strategy(&records, &p), resolve_strategy(&records, &p));
    }

    #[test]
    fn test_empty_collection_uses_first_preference() {
        assert_eq!(
            resolve_strategy(&[], &prefer(&["invoice_id"])),
            PkStrategy::Field("invoice_id".to_string())
        );
        assert_eq!(resolve_strategy(&[], &[]), PkStrategy::Hash);
    }

    #[test]
    fn test_merge_without_usable_key_fails() {
        let records = vec![rec(json!({"a": 1})), rec(json!({"a": 1}))];
        let err = resolve_for_collection(
            "shop_orders",
            "collections.shop_orders.pk.prefer",
            &records,
            &prefer(&["a"]),
            WriteDisposition::Merge,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("collections.shop_orders.pk.prefer"));

        let ok = resolve_for_collection(
            "shop_orders",
            "collections.shop_orders.pk.prefer",
            &records,
            &prefer(&["a"]),
            WriteDisposition::Append,
        )
        .unwrap();
        assert!(ok.is_hash());
    }

    #[test]
    fn test_key_for_field_and_hash() {
        let record = rec(json!({"id": 7}));
        assert_eq!(PkStrategy::Field("id".to_string()).key_for(&record), "7");
        assert_eq!(PkStrategy::Hash.key_for(&record), stable_hash(&record));
    }
}
