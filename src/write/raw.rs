//! Raw table rows
//!
//! One row per extracted record, carrying the record as JSON plus the
//! identity of the source load it came from.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::extract::KeyedCollection;
use crate::flatten::Row;
use crate::models::{DataFormat, SourceFingerprint, WriteDisposition};

/// Source-level values stamped on every raw row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMeta {
    pub source_name: String,
    pub source_url: String,
    pub source_type: String,
    pub ingest_timestamp: DateTime<Utc>,
    pub checksum: Option<String>,
    pub size_bytes: Option<u64>,
    pub format: Option<DataFormat>,
    pub run_id: String,
    pub dataset: String,
}

impl RawMeta {
    /// Metadata of the load a fingerprint row records
    pub fn from_fingerprint(fingerprint: &SourceFingerprint) -> Self {
        Self {
            source_name: fingerprint.source_name.clone(),
            source_url: fingerprint.location.clone(),
            source_type: fingerprint.location_kind.as_str().to_string(),
            ingest_timestamp: fingerprint.last_seen_at,
            checksum: fingerprint.exact_checksum.clone(),
            size_bytes: fingerprint.size_bytes,
            format: fingerprint.format,
            run_id: fingerprint.last_run_id.clone(),
            dataset: fingerprint.dataset.clone(),
        }
    }

    fn stamp(&self, row: &mut Row) {
        let fields = [
            ("__source_name", Some(self.source_name.clone())),
            ("__source_url", Some(self.source_url.clone())),
            ("__source_type", Some(self.source_type.clone())),
            (
                "__ingest_timestamp",
                Some(
                    self.ingest_timestamp
                        .format("%Y-%m-%d %H:%M:%S%.6f")
                        .to_string(),
                ),
            ),
            ("__source_checksum", self.checksum.clone()),
            ("__source_size_bytes", self.size_bytes.map(|s| s.to_string())),
            ("__format", self.format.map(|f| f.as_str().to_string())),
            ("__run_id", Some(self.run_id.clone())),
            ("__dataset", Some(self.dataset.clone())),
        ];
        for (name, value) in fields {
            row.insert(name.to_string(), value);
        }
    }
}

/// Raw rows of every written collection
///
/// Collections whose effective disposition is `skip` contribute nothing.
pub fn raw_rows(collections: &[KeyedCollection], meta: &RawMeta) -> Vec<Row> {
    collections
        .iter()
        .filter(|c| c.is_written() && c.disposition != WriteDisposition::Skip)
        .flat_map(|collection| {
            collection.records.iter().map(move |record| {
                let mut row = Row::new();
                row.insert("collection".to_string(), Some(collection.name.clone()));
                row.insert("path".to_string(), Some(collection.path.clone()));
                row.insert(
                    "raw_json".to_string(),
                    Some(Value::Object(record.clone()).to_string()),
                );
                meta.stamp(&mut row);
                row
            })
        })
        .collect()
}
