//! Collection inference
//!
//! When a source has no collections in the mapping (and
//! `options.infer_if_missing` is set) its parsed content is inspected to
//! propose them. Flat formats yield entries for the global `collections`
//! map; XML yields an [`XmlSourceMapping`] with parent/child collections.
//! Inferred entries are merged into the document without touching anything
//! already there, so inference over a complete mapping is a no-op.

pub mod flat;
pub mod xml;

use crate::error::{IngestError, IngestResult};
use crate::models::{CollectionSpec, DEFAULT_PK_PREFER, MappingDocument, SourceSpec, XmlSourceMapping};
use crate::parse::ParsedDocument;

pub use flat::infer_flat;
pub use xml::infer_xml;

/// Result of inference for one source
#[derive(Debug, Clone, PartialEq)]
pub enum Inferred {
    Flat(Vec<(String, CollectionSpec)>),
    Xml(XmlSourceMapping),
}

impl Inferred {
    pub fn is_empty(&self) -> bool {
        match self {
            Inferred::Flat(list) => list.is_empty(),
            Inferred::Xml(mapping) => mapping.collections.is_empty(),
        }
    }

    /// Merge into the document; returns the number of collections added
    pub fn merge_into(self, doc: &mut MappingDocument, source_name: &str) -> usize {
        match self {
            Inferred::Flat(list) => doc.merge_inferred_collections(list),
            Inferred::Xml(mapping) => doc.merge_inferred_xml(source_name, mapping),
        }
    }
}

/// Whether the document already maps collections for the parsed source
pub fn has_mapping(doc: &MappingDocument, source: &SourceSpec, parsed: &ParsedDocument) -> bool {
    match parsed {
        ParsedDocument::Xml(_) => doc
            .xml_infer
            .get(&source.name)
            .is_some_and(|m| !m.collections.is_empty()),
        _ => doc.has_collections_for(source),
    }
}

/// Infer collections for a source lacking them
///
/// Fails with a configuration error when inference is disabled.
pub fn infer_for_source(
    doc: &MappingDocument,
    source: &SourceSpec,
    parsed: &mut ParsedDocument,
) -> IngestResult<Inferred> {
    if !doc.options.infer_if_missing {
        return Err(IngestError::config(
            format!("collections.{}_*", source.name),
            format!(
                "source '{}' has no collections and options.infer_if_missing is false",
                source.name
            ),
        ));
    }

    let inferred = match parsed {
        ParsedDocument::Xml(root) => {
            Inferred::Xml(infer_xml(root, &source.name, doc.xml_infer.get(&source.name)))
        }
        other => Inferred::Flat(infer_flat(other, source)?),
    };
    tracing::info!(
        source = %source.name,
        empty = inferred.is_empty(),
        "Inferred collections"
    );
    Ok(inferred)
}

/// Default key preferences present among observed field names
///
/// Matching is case-insensitive; the observed spelling is kept.
pub fn default_prefer_for<'a>(fields: impl IntoIterator<Item = &'a str> + Clone) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for candidate in DEFAULT_PK_PREFER {
        if let Some(actual) = fields
            .clone()
            .into_iter()
            .find(|f| f.eq_ignore_ascii_case(candidate))
            && !out.iter().any(|o| o == actual)
        {
            out.push(actual.to_string());
        }
    }
    out
}
