//! v1 to v2 mapping migration (`--migrate`)
//!
//! v1 documents describe a single source under `run.source`, with the
//! destination and options nested under `run`. v2 documents list sources
//! and qualify every collection name with its source name.

use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{IngestError, IngestResult};
use crate::models::{CollectionSpec, MappingDocument, XmlSourceMapping};

const V1_SOURCE_KEYS: [&str; 9] = [
    "url",
    "file",
    "format",
    "records_path",
    "sheet",
    "delimiter",
    "encoding",
    "timeout_s",
    "member",
];

/// Result of a migration attempt
#[derive(Debug)]
pub enum MigrationOutcome {
    /// The document already lists `sources`
    AlreadyCurrent,
    /// The document has no `run.source` section
    NotV1,
    Migrated {
        source_name: String,
        collections: usize,
        document: Box<MappingDocument>,
    },
}

/// Migrate the document at `path`, rewriting it unless `dry_run`
pub fn migrate_v1_to_v2(path: &Path, dry_run: bool) -> IngestResult<MigrationOutcome> {
    let content = std::fs::read_to_string(path).map_err(|e| IngestError::io(path, e))?;
    let value: Value = serde_yaml::from_str(&content)?;

    let outcome = migrate_value(&value)?;
    if let MigrationOutcome::Migrated { document, .. } = &outcome
        && !dry_run
    {
        document.save(path)?;
    }
    Ok(outcome)
}

/// Migrate an in-memory v1 document
pub fn migrate_value(v1: &Value) -> IngestResult<MigrationOutcome> {
    if v1.get("sources").is_some() {
        return Ok(MigrationOutcome::AlreadyCurrent);
    }
    let Some(run) = v1.get("run") else {
        return Ok(MigrationOutcome::NotV1);
    };
    let Some(src) = run.get("source") else {
        return Ok(MigrationOutcome::NotV1);
    };

    let destination = run.get("destination").cloned().unwrap_or(Value::Null);
    let dataset = destination
        .get("dataset")
        .and_then(Value::as_str)
        .unwrap_or("data");
    let source_name = dataset.to_lowercase().replace([' ', '-'], "_");

    let mut source = Mapping::new();
    source.insert("name".into(), Value::String(source_name.clone()));
    for key in V1_SOURCE_KEYS {
        if let Some(v) = src.get(key).filter(|v| !v.is_null()) {
            source.insert(key.into(), v.clone());
        }
    }

    let mut doc = Mapping::new();
    doc.insert(
        "version".into(),
        v1.get("version").cloned().unwrap_or(Value::Number(1.into())),
    );
    doc.insert("sources".into(), Value::Sequence(vec![Value::Mapping(source)]));
    if !destination.is_null() {
        doc.insert("destination".into(), destination.clone());
    }
    if let Some(options) = run.get("options") {
        doc.insert("options".into(), options.clone());
    }
    if let Some(outputs) = v1.get("outputs") {
        doc.insert("outputs".into(), outputs.clone());
    }

    let mut document: MappingDocument = serde_yaml::from_value(Value::Mapping(doc))?;

    let old_collections: BTreeMap<String, CollectionSpec> = match v1.get("collections") {
        Some(v) if !v.is_null() => serde_yaml::from_value(v.clone())?,
        _ => BTreeMap::new(),
    };
    let collections = old_collections.len();
    for (name, spec) in old_collections {
        document
            .collections
            .insert(qualify(&source_name, &name), spec);
    }

    if let Some(xml) = v1.get("xml_infer").filter(|v| !v.is_null()) {
        let mut xml: XmlSourceMapping = serde_yaml::from_value(xml.clone())?;
        xml.collections = xml
            .collections
            .into_iter()
            .map(|(name, mut spec)| {
                spec.parent = spec.parent.map(|p| qualify(&source_name, &p));
                (qualify(&source_name, &name), spec)
            })
            .collect();
        document.xml_infer.insert(source_name.clone(), xml);
    }

    Ok(MigrationOutcome::Migrated {
        source_name,
        collections,
        document: Box::new(document),
    })
}

fn qualify(source_name: &str, name: &str) -> String {
    if name.starts_with(&format!("{}_", source_name)) {
        name.to_string()
    } else {
        format!("{}_{}", source_name, name)
    }
}
