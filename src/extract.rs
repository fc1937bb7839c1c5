//! Collection extraction
//!
//! Pulls the records of every enabled collection out of a parsed source and
//! assigns primary keys. XML child collections are extracted per parent
//! element so each child remembers which parent instance it came from; keys
//! are assigned in a second pass, parents first, and each child then reads
//! its `_parent_pk` from the parent's already-resolved keys.

use std::collections::HashMap;

use crate::error::{IngestError, IngestResult};
use crate::flatten::{Row, normalized_row, sanitize_table_name};
use crate::models::{CollectionSpec, MappingDocument, Record, SourceSpec, WriteDisposition};
use crate::parse::json::records_at;
use crate::parse::{ParsedDocument, XmlElement, path_segments};
use crate::pk::{PkStrategy, resolve_for_collection};

/// Records of one collection before keys are assigned
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCollection {
    pub name: String,
    pub spec: CollectionSpec,
    /// Locator recorded in the raw table (JSON path, sheet, element path)
    pub path: String,
    pub records: Vec<Record>,
    /// Position of each record's parent in the parent collection
    pub parent_index: Vec<usize>,
    pub xml: bool,
}

/// A collection with keys assigned, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedCollection {
    pub name: String,
    pub table: String,
    pub spec: CollectionSpec,
    pub disposition: WriteDisposition,
    pub path: String,
    pub strategy: PkStrategy,
    pub records: Vec<Record>,
    pub keys: Vec<String>,
    pub parent_keys: Option<Vec<String>>,
    pub xml: bool,
}

impl KeyedCollection {
    /// Whether rows are written (parents of enabled children are keyed even
    /// when disabled)
    pub fn is_written(&self) -> bool {
        self.spec.enabled
    }

    pub fn has_parent(&self) -> bool {
        self.parent_keys.is_some()
    }

    /// Normalized rows of the collection
    pub fn normalized_rows(&self, source_name: &str) -> Vec<Row> {
        self.records
            .iter()
            .zip(&self.keys)
            .enumerate()
            .map(|(i, (record, key))| {
                let parent = self
                    .parent_keys
                    .as_ref()
                    .and_then(|keys| keys.get(i).cloned());
                normalized_row(record, self.xml, key.clone(), source_name, parent)
            })
            .collect()
    }
}

/// Extract the records of every enabled collection of a source
///
/// Disabled XML parents of enabled children are extracted too, so their
/// keys are available to the children.
pub fn extract_collections(
    doc: &MappingDocument,
    source: &SourceSpec,
    parsed: &mut ParsedDocument,
) -> IngestResult<Vec<ExtractedCollection>> {
    match parsed {
        ParsedDocument::Xml(root) => extract_xml(doc, source, root),
        other => extract_flat(doc, source, other),
    }
}

fn extract_flat(
    doc: &MappingDocument,
    source: &SourceSpec,
    parsed: &mut ParsedDocument,
) -> IngestResult<Vec<ExtractedCollection>> {
    let mut out = Vec::new();
    for (name, spec) in doc.collections_for_source(source) {
        if !spec.enabled {
            continue;
        }
        let (path, records) = match &mut *parsed {
            ParsedDocument::Csv(data) => (String::new(), data.rows.clone()),
            ParsedDocument::Xlsx(workbook) => {
                let sheet = workbook.select_sheet(
                    spec.sheet.as_deref().or(source.sheet.as_deref()),
                    spec.use_first_sheet || source.use_first_sheet,
                )?;
                let data = workbook.read_sheet(&sheet)?;
                (sheet.name, data.rows)
            }
            ParsedDocument::Json(root) => {
                let path = json_locator(&spec, source);
                let records = records_at(root, &path);
                (path, records)
            }
            ParsedDocument::Jsonl(lines) => {
                let path = json_locator(&spec, source);
                let records = lines.iter().flat_map(|l| records_at(l, &path)).collect();
                (path, records)
            }
            ParsedDocument::Xml(_) => continue,
        };
        tracing::debug!(collection = %name, records = records.len(), "Extracted collection");
        out.push(ExtractedCollection {
            name,
            spec,
            path,
            records,
            parent_index: Vec::new(),
            xml: false,
        });
    }
    Ok(out)
}

fn json_locator(spec: &CollectionSpec, source: &SourceSpec) -> String {
    spec.path
        .clone()
        .or_else(|| source.records_path.clone())
        .unwrap_or_else(|| "$".to_string())
}

fn extract_xml(
    doc: &MappingDocument,
    source: &SourceSpec,
    root: &XmlElement,
) -> IngestResult<Vec<ExtractedCollection>> {
    let Some(mapping) = doc.xml_infer.get(&source.name) else {
        return Ok(Vec::new());
    };

    let field = |name: &str| format!("xml_infer.{}.collections.{}.path", source.name, name);
    let mut needed: Vec<&String> = Vec::new();
    for (name, spec) in mapping.ordered_collections() {
        if !spec.enabled {
            continue;
        }
        if let Some(parent) = spec.parent.as_ref()
            && !needed.contains(&parent)
        {
            needed.push(parent);
        }
        if !needed.contains(&name) {
            needed.push(name);
        }
    }

    // element lists per extracted collection, for child lookups
    let mut elements: HashMap<String, Vec<&XmlElement>> = HashMap::new();
    let mut out = Vec::new();
    for name in needed {
        let spec = mapping.collections.get(name).ok_or_else(|| {
            IngestError::config(
                format!("xml_infer.{}.collections", source.name),
                format!("parent collection '{}' is not defined", name),
            )
        })?;
        let path = spec
            .path
            .clone()
            .ok_or_else(|| IngestError::config(field(name), "XML collection has no path"))?;
        let segments = path_segments(&path);

        let (found, parent_index) = match spec.parent.as_ref() {
            None => (root.select(&segments), Vec::new()),
            Some(parent) => {
                let parent_len = mapping
                    .collections
                    .get(parent)
                    .and_then(|p| p.path.as_deref())
                    .map(|p| path_segments(p).len())
                    .unwrap_or(0);
                let relative = segments.get(parent_len..).ok_or_else(|| {
                    IngestError::config(field(name), "path does not extend its parent's path")
                })?;
                let mut found = Vec::new();
                let mut index = Vec::new();
                for (i, parent_el) in elements.get(parent).into_iter().flatten().copied().enumerate() {
                    for child in parent_el.descendants_at(relative) {
                        found.push(child);
                        index.push(i);
                    }
                }
                (found, index)
            }
        };

        let records = found.iter().map(|e| e.to_lossless()).collect::<Vec<_>>();
        tracing::debug!(collection = %name, records = records.len(), "Extracted XML collection");
        elements.insert(name.clone(), found);
        out.push(ExtractedCollection {
            name: name.clone(),
            spec: spec.clone(),
            path,
            records,
            parent_index,
            xml: true,
        });
    }
    Ok(out)
}

/// Resolve key strategies and assign `_pk` (and `_parent_pk`) values
///
/// Collections must be ordered parents first, as
/// [`extract_collections`] returns them.
pub fn assign_keys(
    doc: &MappingDocument,
    source: &SourceSpec,
    extracted: Vec<ExtractedCollection>,
) -> IngestResult<Vec<KeyedCollection>> {
    let mut keyed: Vec<KeyedCollection> = Vec::with_capacity(extracted.len());
    for collection in extracted {
        let disposition = doc.effective_disposition(&collection.spec);
        let field_path = if collection.xml {
            format!(
                "xml_infer.{}.collections.{}.pk.prefer",
                source.name, collection.name
            )
        } else {
            format!("collections.{}.pk.prefer", collection.name)
        };
        // only written collections can fail the merge key check
        let check = if collection.spec.enabled {
            disposition
        } else {
            WriteDisposition::Append
        };
        let strategy = resolve_for_collection(
            &collection.name,
            &field_path,
            &collection.records,
            &collection.spec.pk.prefer,
            check,
        )?;
        let keys: Vec<String> = collection
            .records
            .iter()
            .map(|r| strategy.key_for(r))
            .collect();

        let parent_keys = match collection.spec.parent.as_ref() {
            None => None,
            Some(parent) => {
                let parent_keys = keyed
                    .iter()
                    .find(|k| &k.name == parent)
                    .map(|k| k.keys.as_slice())
                    .unwrap_or_default();
                Some(
                    collection
                        .parent_index
                        .iter()
                        .map(|&i| parent_keys.get(i).cloned().unwrap_or_default())
                        .collect(),
                )
            }
        };

        keyed.push(KeyedCollection {
            table: sanitize_table_name(&collection.name),
            name: collection.name,
            spec: collection.spec,
            disposition,
            path: collection.path,
            strategy,
            records: collection.records,
            keys,
            parent_keys,
            xml: collection.xml,
        });
    }
    Ok(keyed)
}
