//! Mapping document model
//!
//! The mapping document is self-updating configuration: it is loaded once per
//! run, inference results are merged into it in memory, and it is rewritten
//! at the end of the run. Keys are kept in `BTreeMap`s so that the rewritten
//! YAML is stable between runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{IngestError, IngestResult};
use crate::models::LocationKind;

/// Default primary key candidates for flat sources, in preference order
pub const DEFAULT_PK_PREFER: [&str; 6] = ["id", "ID", "code", "Code", "key", "Key"];

/// Conventional parent foreign key column for XML child collections
pub const PARENT_FK_COLUMN: &str = "_parent_pk";

/// Default raw table name
pub const DEFAULT_RAW_TABLE: &str = "raw_ingest";

/// Default per-source fetch timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Write disposition for a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDisposition {
    /// Insert rows (default)
    #[default]
    Append,
    /// Replace the whole table
    Replace,
    /// Upsert keyed on the primary key
    Merge,
    /// Do not write; the source is still recorded as seen
    Skip,
}

impl std::str::FromStr for WriteDisposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "append" => Ok(WriteDisposition::Append),
            "replace" => Ok(WriteDisposition::Replace),
            "merge" => Ok(WriteDisposition::Merge),
            "skip" => Ok(WriteDisposition::Skip),
            _ => Err(format!(
                "Unknown write disposition: {}. Use append, replace, merge or skip.",
                s
            )),
        }
    }
}

impl std::fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteDisposition::Append => write!(f, "append"),
            WriteDisposition::Replace => write!(f, "replace"),
            WriteDisposition::Merge => write!(f, "merge"),
            WriteDisposition::Skip => write!(f, "skip"),
        }
    }
}

/// Concrete content format of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Xml,
    Json,
    Jsonl,
    Csv,
    Xlsx,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Xml => "xml",
            DataFormat::Json => "json",
            DataFormat::Jsonl => "jsonl",
            DataFormat::Csv => "csv",
            DataFormat::Xlsx => "xlsx",
        }
    }

    /// Guess the format from a file name extension
    pub fn from_extension(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".xml") {
            Some(DataFormat::Xml)
        } else if lower.ends_with(".jsonl") || lower.ends_with(".ndjson") {
            Some(DataFormat::Jsonl)
        } else if lower.ends_with(".json") {
            Some(DataFormat::Json)
        } else if lower.ends_with(".csv") {
            Some(DataFormat::Csv)
        } else if lower.ends_with(".xlsx") {
            Some(DataFormat::Xlsx)
        } else {
            None
        }
    }
}

impl std::str::FromStr for DataFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xml" => Ok(DataFormat::Xml),
            "json" => Ok(DataFormat::Json),
            "jsonl" | "ndjson" => Ok(DataFormat::Jsonl),
            "csv" => Ok(DataFormat::Csv),
            "xlsx" => Ok(DataFormat::Xlsx),
            _ => Err(format!("Unknown data format: {}", s)),
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared format of a source (`auto` resolves from the file name)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[default]
    Auto,
    Xml,
    Json,
    Jsonl,
    Csv,
    Xlsx,
}

impl SourceFormat {
    /// The explicit format, or `None` for `auto`
    pub fn explicit(&self) -> Option<DataFormat> {
        match self {
            SourceFormat::Auto => None,
            SourceFormat::Xml => Some(DataFormat::Xml),
            SourceFormat::Json => Some(DataFormat::Json),
            SourceFormat::Jsonl => Some(DataFormat::Jsonl),
            SourceFormat::Csv => Some(DataFormat::Csv),
            SourceFormat::Xlsx => Some(DataFormat::Xlsx),
        }
    }

    fn is_auto(&self) -> bool {
        matches!(self, SourceFormat::Auto)
    }
}

/// Primary key preference list
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PkSpec {
    /// Candidate field names in order; XML attributes are prefixed with `@`
    #[serde(default)]
    pub prefer: Vec<String>,
}

impl PkSpec {
    pub fn new(prefer: Vec<String>) -> Self {
        Self { prefer }
    }
}

/// A named, flattenable record set extracted from a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSON records path (`$` or `$.a.b`) or absolute XML element path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// XLSX sheet name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,

    /// XLSX: read the first sheet regardless of its name
    #[serde(default, skip_serializing_if = "is_false")]
    pub use_first_sheet: bool,

    #[serde(default)]
    pub pk: PkSpec,

    /// Inherits `options.write_disposition` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_disposition: Option<WriteDisposition>,

    /// XML only: name of the parent collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// XML only: column holding the parent's primary key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_fk: Option<String>,
}

impl Default for CollectionSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            sheet: None,
            use_first_sheet: false,
            pk: PkSpec::default(),
            write_disposition: None,
            parent: None,
            parent_fk: None,
        }
    }
}

impl CollectionSpec {
    /// Apply a per-source override on top of this spec
    pub fn overlay(&mut self, ov: &CollectionOverride) {
        if let Some(enabled) = ov.enabled {
            self.enabled = enabled;
        }
        if ov.path.is_some() {
            self.path = ov.path.clone();
        }
        if ov.sheet.is_some() {
            self.sheet = ov.sheet.clone();
        }
        if let Some(first) = ov.use_first_sheet {
            self.use_first_sheet = first;
        }
        if let Some(pk) = &ov.pk {
            self.pk = pk.clone();
        }
        if ov.write_disposition.is_some() {
            self.write_disposition = ov.write_disposition;
        }
    }

    /// Whether this collection is nested under a parent collection
    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }
}

/// Per-source collection override, keyed by the unqualified collection name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectionOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_first_sheet: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk: Option<PkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_disposition: Option<WriteDisposition>,
}

/// A source definition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Unique name; prefix of every derived table name
    pub name: String,

    /// URL template (date placeholders allowed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Local file path (date placeholders allowed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, skip_serializing_if = "SourceFormat::is_auto")]
    pub format: SourceFormat,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<u64>,

    /// ZIP member to extract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,

    /// JSON: dotted path to the records array, skips the inference walk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub use_first_sheet: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub collections: BTreeMap<String, CollectionOverride>,
}

impl SourceSpec {
    /// The unexpanded location and its kind. URLs win over files.
    pub fn location_template(&self) -> IngestResult<(LocationKind, &str)> {
        match (self.url.as_deref(), self.file.as_deref()) {
            (Some(url), _) if !url.trim().is_empty() => Ok((LocationKind::Url, url)),
            (_, Some(file)) if !file.trim().is_empty() => Ok((LocationKind::File, file)),
            _ => Err(IngestError::config(
                format!("sources.{}", self.name),
                "source must have 'url' or 'file'",
            )),
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_s.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    /// Qualified collection name for an unqualified one
    pub fn qualify(&self, collection: &str) -> String {
        format!("{}_{}", self.name, collection)
    }
}

/// Destination store type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// Plain single-file DuckDB store (default)
    #[default]
    Duckdb,
    /// Staged lake store (DuckLake)
    Ducklake,
}

impl std::str::FromStr for DestinationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "duckdb" => Ok(DestinationKind::Duckdb),
            "ducklake" => Ok(DestinationKind::Ducklake),
            _ => Err(format!(
                "Unknown destination type: {}. Use 'duckdb' or 'ducklake'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationKind::Duckdb => write!(f, "duckdb"),
            DestinationKind::Ducklake => write!(f, "ducklake"),
        }
    }
}

/// How a staged lake store materializes `replace`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplaceStrategy {
    #[default]
    TruncateAndInsert,
    InsertFromStaging,
    StagingOptimized,
}

impl std::str::FromStr for ReplaceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "truncate-and-insert" => Ok(ReplaceStrategy::TruncateAndInsert),
            "insert-from-staging" => Ok(ReplaceStrategy::InsertFromStaging),
            "staging-optimized" => Ok(ReplaceStrategy::StagingOptimized),
            _ => Err(format!(
                "Unknown replace strategy: {}. Use truncate-and-insert, insert-from-staging or staging-optimized.",
                s
            )),
        }
    }
}

impl std::fmt::Display for ReplaceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplaceStrategy::TruncateAndInsert => write!(f, "truncate-and-insert"),
            ReplaceStrategy::InsertFromStaging => write!(f, "insert-from-staging"),
            ReplaceStrategy::StagingOptimized => write!(f, "staging-optimized"),
        }
    }
}

/// DuckLake attachment settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DuckLakeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ducklake_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    #[serde(default)]
    pub replace_strategy: ReplaceStrategy,
}

/// Destination section
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DestinationSpec {
    #[serde(rename = "type", default)]
    pub kind: DestinationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duckdb_file: Option<String>,
    #[serde(default)]
    pub ducklake: DuckLakeSpec,
}

/// Global processing options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsSpec {
    #[serde(default)]
    pub infer_if_missing: bool,

    #[serde(default)]
    pub write_disposition: WriteDisposition,

    /// Size of the fetch/parse worker pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// When every collection of a source resolves to `skip`, record the new
    /// exact checksum (true) or keep the previous one (false)
    #[serde(default = "default_true")]
    pub skip_refreshes_checksum: bool,
}

impl Default for OptionsSpec {
    fn default() -> Self {
        Self {
            infer_if_missing: false,
            write_disposition: WriteDisposition::Append,
            workers: None,
            skip_refreshes_checksum: true,
        }
    }
}

/// Raw output table settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOutput {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_raw_table")]
    pub table: String,
}

fn default_raw_table() -> String {
    DEFAULT_RAW_TABLE.to_string()
}

impl Default for RawOutput {
    fn default() -> Self {
        Self {
            enabled: true,
            table: default_raw_table(),
        }
    }
}

/// Normalized output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOutput {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Normalized tables written so far (maintained by the run)
    #[serde(default)]
    pub tables: Vec<String>,
}

impl Default for NormalizedOutput {
    fn default() -> Self {
        Self {
            enabled: true,
            tables: Vec::new(),
        }
    }
}

/// Outputs section
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputsSpec {
    #[serde(default)]
    pub raw: RawOutput,
    #[serde(default)]
    pub normalized: NormalizedOutput,
}

/// Inferred or configured XML mapping for one source
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct XmlSourceMapping {
    /// Root element name
    pub root: String,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionSpec>,
}

impl XmlSourceMapping {
    /// Enabled collections, parents before children
    pub fn ordered_collections(&self) -> Vec<(&String, &CollectionSpec)> {
        let mut out: Vec<_> = self
            .collections
            .iter()
            .filter(|(_, c)| c.enabled && !c.has_parent())
            .collect();
        out.extend(
            self.collections
                .iter()
                .filter(|(_, c)| c.enabled && c.has_parent()),
        );
        out
    }
}

/// The versioned root aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingDocument {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub sources: Vec<SourceSpec>,

    #[serde(default)]
    pub destination: DestinationSpec,

    #[serde(default)]
    pub options: OptionsSpec,

    #[serde(default)]
    pub outputs: OutputsSpec,

    /// Flat-format collections keyed by qualified name (`{source}_{name}`)
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionSpec>,

    /// XML mappings keyed by source name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub xml_infer: BTreeMap<String, XmlSourceMapping>,

    /// Keys this version does not know about, preserved on rewrite
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for MappingDocument {
    fn default() -> Self {
        Self {
            version: default_version(),
            sources: Vec::new(),
            destination: DestinationSpec::default(),
            options: OptionsSpec::default(),
            outputs: OutputsSpec::default(),
            collections: BTreeMap::new(),
            xml_infer: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl MappingDocument {
    pub fn source(&self, name: &str) -> Option<&SourceSpec> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// The source owning a qualified collection name (longest matching prefix)
    pub fn owning_source(&self, collection: &str) -> Option<&SourceSpec> {
        self.sources
            .iter()
            .filter(|s| collection.starts_with(&format!("{}_", s.name)))
            .max_by_key(|s| s.name.len())
    }

    /// Effective flat collections of a source, with per-source overrides applied
    pub fn collections_for_source(&self, source: &SourceSpec) -> BTreeMap<String, CollectionSpec> {
        let prefix = format!("{}_", source.name);
        let mut out = BTreeMap::new();
        for (name, spec) in &self.collections {
            let owned = self
                .owning_source(name)
                .is_some_and(|owner| owner.name == source.name);
            if !owned {
                continue;
            }
            let mut spec = spec.clone();
            if let Some(short) = name.strip_prefix(&prefix)
                && let Some(ov) = source.collections.get(short)
            {
                spec.overlay(ov);
            }
            out.insert(name.clone(), spec);
        }
        out
    }

    /// Whether any flat collection is declared for the source
    pub fn has_collections_for(&self, source: &SourceSpec) -> bool {
        !self.collections_for_source(source).is_empty()
    }

    /// Disposition of a collection after inheritance
    pub fn effective_disposition(&self, spec: &CollectionSpec) -> WriteDisposition {
        spec.write_disposition
            .unwrap_or(self.options.write_disposition)
    }

    /// Merge inferred flat collections; existing entries are never touched.
    ///
    /// Returns the number of collections added.
    pub fn merge_inferred_collections(
        &mut self,
        inferred: impl IntoIterator<Item = (String, CollectionSpec)>,
    ) -> usize {
        let mut added = 0;
        for (name, spec) in inferred {
            if !self.collections.contains_key(&name) {
                self.collections.insert(name, spec);
                added += 1;
            }
        }
        added
    }

    /// Merge an inferred XML mapping; collections already present are kept.
    ///
    /// Returns the number of collections added.
    pub fn merge_inferred_xml(&mut self, source_name: &str, inferred: XmlSourceMapping) -> usize {
        match self.xml_infer.get_mut(source_name) {
            None => {
                let added = inferred.collections.len();
                self.xml_infer.insert(source_name.to_string(), inferred);
                added
            }
            Some(existing) => {
                if existing.root.is_empty() {
                    existing.root = inferred.root;
                }
                let mut added = 0;
                for (name, spec) in inferred.collections {
                    if !existing.collections.contains_key(&name) {
                        existing.collections.insert(name, spec);
                        added += 1;
                    }
                }
                added
            }
        }
    }

    /// Record normalized tables written by a run (sorted, de-duplicated)
    pub fn record_normalized_tables<'a>(&mut self, tables: impl IntoIterator<Item = &'a str>) {
        let list = &mut self.outputs.normalized.tables;
        for table in tables {
            if !list.iter().any(|t| t == table) {
                list.push(table.to_string());
            }
        }
        list.sort();
    }

    /// Dataset name, if configured
    pub fn dataset(&self) -> Option<&str> {
        self.destination.dataset.as_deref()
    }
}
