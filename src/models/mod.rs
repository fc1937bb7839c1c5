//! Data model for mapping-driven ingestion
//!
//! The mapping document and the persisted source fingerprints are the only
//! state that survives between runs. Everything else is rebuilt per run.

pub mod fingerprint;
pub mod mapping;
pub mod run;

pub use fingerprint::{LocationKind, SourceFingerprint};
pub use mapping::{
    CollectionOverride, CollectionSpec, DEFAULT_PK_PREFER, DataFormat, DestinationKind,
    DestinationSpec, DuckLakeSpec, MappingDocument, NormalizedOutput, OptionsSpec, OutputsSpec,
    PARENT_FK_COLUMN, PkSpec, RawOutput, ReplaceStrategy, SourceFormat, SourceSpec,
    WriteDisposition, XmlSourceMapping,
};
pub use run::RunContext;

/// A single parsed record as a JSON object
pub type Record = serde_json::Map<String, serde_json::Value>;
