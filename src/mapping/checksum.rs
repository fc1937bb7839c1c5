//! Per-source mapping checksum
//!
//! A mapping edit that changes how a source is read or written must force
//! that source to be reprocessed even when its content is unchanged. The
//! checksum covers only the parts of the document that affect the source.
//! Run-maintained state (`outputs.normalized.tables`) is excluded.

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::IngestResult;
use crate::models::{MappingDocument, SourceSpec};
use crate::pk::canonical_json;

/// SHA-256 hex digest of the source's effective mapping
pub fn mapping_checksum(doc: &MappingDocument, source: &SourceSpec) -> IngestResult<String> {
    let collections = doc.collections_for_source(source);
    let xml = doc.xml_infer.get(&source.name);

    let scope = json!({
        "source": serde_json::to_value(source)?,
        "collections": serde_json::to_value(&collections)?,
        "xml": serde_json::to_value(xml)?,
        "write_disposition": doc.options.write_disposition.to_string(),
        "raw": {
            "enabled": doc.outputs.raw.enabled,
            "table": doc.outputs.raw.table,
        },
        "normalized": doc.outputs.normalized.enabled,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&scope).as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
