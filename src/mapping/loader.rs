//! Mapping document loading, validation and persistence
//!
//! Follows the configuration-file pattern: parse with serde, apply
//! environment variable overrides, save back atomically.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, IngestResult};
use crate::models::{MappingDocument, SourceSpec, WriteDisposition, XmlSourceMapping};
use crate::parse::xml::path_segments;

/// Environment variable overriding `destination.dataset`
pub const ENV_DATASET: &str = "INGEST2DUCK_DATASET";

/// Environment variable overriding `destination.duckdb_file`
pub const ENV_DUCKDB_FILE: &str = "INGEST2DUCK_DUCKDB_FILE";

/// Environment variable overriding `options.write_disposition`
pub const ENV_WRITE_DISPOSITION: &str = "INGEST2DUCK_WRITE_DISPOSITION";

/// Environment variable overriding `options.workers`
pub const ENV_WORKERS: &str = "INGEST2DUCK_WORKERS";

/// Maximum supported XML path length (`/Root/Container/Item/SubContainer/SubItem`)
const MAX_XML_PATH_LEN: usize = 5;

/// Dataset name derived from the mapping file stem
pub fn default_dataset_for(mapping_path: &Path) -> String {
    mapping_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "data".to_string())
}

impl MappingDocument {
    /// Load a mapping document from disk
    ///
    /// Overrides are not applied here; the loaded document is what gets
    /// saved back.
    pub fn load(path: &Path) -> IngestResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| IngestError::io(path, e))?;
        Self::parse(&content)
    }

    /// Parse a mapping document from a YAML string
    pub fn parse(content: &str) -> IngestResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| {
            IngestError::Serialization(format!("Failed to parse mapping document: {}", e))
        })
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> IngestResult<String> {
        serde_yaml::to_string(self).map_err(|e| {
            IngestError::Serialization(format!("Failed to serialize mapping document: {}", e))
        })
    }

    /// Atomically rewrite the document at `path`
    ///
    /// Writes a sibling temp file and renames it over the target. Returns
    /// `false` without touching the file when its content is already current.
    pub fn save(&self, path: &Path) -> IngestResult<bool> {
        let content = self.to_yaml()?;

        if let Ok(existing) = std::fs::read_to_string(path)
            && existing == content
        {
            return Ok(false);
        }

        let tmp = temp_sibling(path);
        std::fs::write(&tmp, &content).map_err(|e| IngestError::io(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(IngestError::io(path, e));
        }

        tracing::info!(path = %path.display(), "Mapping document saved");
        Ok(true)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dataset) = lookup(ENV_DATASET).filter(|v| !v.is_empty()) {
            self.destination.dataset = Some(dataset);
        }

        if let Some(file) = lookup(ENV_DUCKDB_FILE).filter(|v| !v.is_empty()) {
            self.destination.duckdb_file = Some(file);
        }

        if let Some(value) = lookup(ENV_WRITE_DISPOSITION) {
            match value.parse::<WriteDisposition>() {
                Ok(disposition) => self.options.write_disposition = disposition,
                Err(e) => tracing::warn!("Ignoring {}: {}", ENV_WRITE_DISPOSITION, e),
            }
        }

        if let Some(value) = lookup(ENV_WORKERS) {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => self.options.workers = Some(n),
                _ => tracing::warn!("Ignoring {}: not a positive integer: {}", ENV_WORKERS, value),
            }
        }
    }

    /// Take over the state a run maintains from an overridden working copy
    ///
    /// Inferred collections, XML mappings and the normalized table list are
    /// copied; everything else (including env and CLI overrides applied to
    /// `worked`) stays as loaded.
    pub fn adopt_run_state(&mut self, worked: &MappingDocument) {
        self.collections = worked.collections.clone();
        self.xml_infer = worked.xml_infer.clone();
        self.outputs.normalized.tables = worked.outputs.normalized.tables.clone();
    }

    /// Fill `destination.dataset` from the mapping file stem when absent
    pub fn ensure_dataset(&mut self, mapping_path: &Path) {
        let missing = self
            .destination
            .dataset
            .as_deref()
            .is_none_or(|d| d.trim().is_empty());
        if missing {
            self.destination.dataset = Some(default_dataset_for(mapping_path));
        }
    }

    /// Document-level validation; any error here stops the run
    pub fn validate(&self) -> IngestResult<()> {
        if self.sources.is_empty() {
            return Err(IngestError::config("sources", "no sources defined"));
        }

        let mut seen = HashSet::new();
        for (i, source) in self.sources.iter().enumerate() {
            if source.name.trim().is_empty() {
                return Err(IngestError::config(
                    format!("sources[{}].name", i),
                    "source name is required",
                ));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(IngestError::config(
                    format!("sources[{}].name", i),
                    format!("duplicate source name '{}'", source.name),
                ));
            }
        }

        if self.dataset().is_none_or(|d| d.trim().is_empty()) {
            return Err(IngestError::config(
                "destination.dataset",
                "dataset is required",
            ));
        }

        for name in self.collections.keys() {
            if self.owning_source(name).is_none() {
                return Err(IngestError::config(
                    format!("collections.{}", name),
                    "collection name must start with '{source}_' for a declared source",
                ));
            }
        }

        for source_name in self.xml_infer.keys() {
            if self.source(source_name).is_none() {
                return Err(IngestError::config(
                    format!("xml_infer.{}", source_name),
                    "no source with this name is declared",
                ));
            }
        }
        Ok(())
    }

    fn validate_xml_mapping(source_name: &str, xml: &XmlSourceMapping) -> IngestResult<()> {
        for (name, spec) in &xml.collections {
            let field = format!("xml_infer.{}.collections.{}", source_name, name);

            if spec.parent.is_some() != spec.parent_fk.is_some() {
                return Err(IngestError::config(
                    field,
                    "'parent' and 'parent_fk' must both be set or both be null",
                ));
            }

            let path = spec.path.as_deref().ok_or_else(|| {
                IngestError::config(format!("{}.path", field), "XML collection needs a path")
            })?;
            let segments = path_segments(path);

            if segments.len() > MAX_XML_PATH_LEN {
                return Err(IngestError::config(
                    format!("{}.path", field),
                    format!(
                        "nesting deeper than /Root/Container/Item/SubContainer/SubItem is not supported: {}",
                        path
                    ),
                ));
            }

            if !xml.root.is_empty()
                && segments
                    .first()
                    .is_none_or(|s| !s.eq_ignore_ascii_case(&xml.root))
            {
                return Err(IngestError::config(
                    format!("{}.path", field),
                    format!("path must start at root element '{}'", xml.root),
                ));
            }

            match &spec.parent {
                None => {
                    if !(2..=3).contains(&segments.len()) {
                        return Err(IngestError::config(
                            format!("{}.path", field),
                            "top-level collections use /Root/Container or /Root/Container/Item",
                        ));
                    }
                }
                Some(parent) => {
                    let parent_spec = xml.collections.get(parent).ok_or_else(|| {
                        IngestError::config(
                            format!("{}.parent", field),
                            format!("unknown parent collection '{}'", parent),
                        )
                    })?;
                    let parent_segments =
                        path_segments(parent_spec.path.as_deref().unwrap_or_default());
                    let extends = segments.len() == MAX_XML_PATH_LEN
                        && parent_segments.len() == 3
                        && segments
                            .iter()
                            .zip(&parent_segments)
                            .all(|(a, b)| a.eq_ignore_ascii_case(b));
                    if !extends {
                        return Err(IngestError::config(
                            format!("{}.path", field),
                            format!(
                                "child path must extend parent path '{}' by exactly two segments",
                                parent_spec.path.as_deref().unwrap_or_default()
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Source-level validation; an error here aborts only that source
    pub fn validate_source(&self, source: &SourceSpec) -> IngestResult<()> {
        source.location_template()?;

        for (name, spec) in self.collections_for_source(source) {
            if spec.enabled
                && self.effective_disposition(&spec) == WriteDisposition::Merge
                && spec.pk.prefer.is_empty()
            {
                return Err(IngestError::config(
                    format!("collections.{}.pk.prefer", name),
                    "write_disposition 'merge' requires a non-empty pk.prefer",
                ));
            }
        }

        if let Some(xml) = self.xml_infer.get(&source.name) {
            Self::validate_xml_mapping(&source.name, xml)?;
            for (name, spec) in &xml.collections {
                if spec.enabled
                    && self.effective_disposition(spec) == WriteDisposition::Merge
                    && spec.pk.prefer.is_empty()
                {
                    return Err(IngestError::config(
                        format!("xml_infer.{}.collections.{}.pk.prefer", source.name, name),
                        "write_disposition 'merge' requires a non-empty pk.prefer",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CollectionSpec, PkSpec};
    use std::collections::HashMap;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
version: 1
sources:
  - name: sales
    file: ./sales.csv
destination:
  type: duckdb
  dataset: sales
options:
  infer_if_missing: true
"#;

    #[test]
    fn test_parse_minimal_fills_defaults() {
        let doc = MappingDocument::parse(MINIMAL).unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.outputs.raw.table, "raw_ingest");
        assert!(doc.outputs.raw.enabled);
        assert!(doc.outputs.normalized.enabled);
        assert_eq!(doc.options.write_disposition, WriteDisposition::Append);
        assert!(doc.options.skip_refreshes_checksum);
        doc.validate().unwrap();
    }

    #[test]
    fn test_overrides_from_lookup() {
        let mut doc = MappingDocument::parse(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_DATASET, "other"),
            (ENV_WRITE_DISPOSITION, "replace"),
            (ENV_WORKERS, "3"),
        ]
        .into_iter()
        .collect();

        doc.apply_overrides_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(doc.dataset(), Some("other"));
        assert_eq!(doc.options.write_disposition, WriteDisposition::Replace);
        assert_eq!(doc.options.workers, Some(3));
    }

    #[test]
    fn test_invalid_override_ignored() {
        let mut doc = MappingDocument::parse(MINIMAL).unwrap();
        doc.apply_overrides_with(|k| {
            (k == ENV_WRITE_DISPOSITION).then(|| "upsert".to_string())
        });
        assert_eq!(doc.options.write_disposition, WriteDisposition::Append);
    }

    #[test]
    fn test_adopt_run_state_keeps_overrides_out() {
        let mut loaded = MappingDocument::parse(MINIMAL).unwrap();
        let mut worked = loaded.clone();
        worked.options.write_disposition = WriteDisposition::Merge;
        worked.collections.insert(
            "sales_data".to_string(),
            CollectionSpec {
                pk: PkSpec::new(vec!["invoice_id".to_string()]),
                ..Default::default()
            },
        );
        worked.record_normalized_tables(["sales_data"]);

        loaded.adopt_run_state(&worked);
        assert!(loaded.collections.contains_key("sales_data"));
        assert_eq!(loaded.outputs.normalized.tables, vec!["sales_data"]);
        assert_eq!(loaded.options.write_disposition, WriteDisposition::Append);
    }

    #[test]
    fn test_ensure_dataset_from_file_stem() {
        let mut doc = MappingDocument::parse("sources: []").unwrap();
        doc.ensure_dataset(Path::new("/tmp/nightly_feeds.yaml"));
        assert_eq!(doc.dataset(), Some("nightly_feeds"));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let yaml = r#"
sources:
  - name: a
    file: a.csv
  - name: a
    file: b.csv
destination: { dataset: d }
"#;
        let err = MappingDocument::parse(yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("sources[1].name"));
    }

    #[test]
    fn test_validate_rejects_unowned_collection() {
        let mut doc = MappingDocument::parse(MINIMAL).unwrap();
        doc.collections
            .insert("orders_data".to_string(), CollectionSpec::default());
        let err = doc.validate().unwrap_err();
        assert!(err.to_string().contains("collections.orders_data"));
    }

    #[test]
    fn test_deep_xml_paths_fail_their_source() {
        let mut doc = MappingDocument::parse(MINIMAL).unwrap();
        let mut xml = XmlSourceMapping {
            root: "R".to_string(),
            ..Default::default()
        };
        xml.collections.insert(
            "sales_deep".to_string(),
            CollectionSpec {
                path: Some("/R/A/B/C/D/E/F".to_string()),
                ..Default::default()
            },
        );
        doc.xml_infer.insert("sales".to_string(), xml);
        doc.validate().unwrap();

        let source = doc.sources[0].clone();
        let err = doc.validate_source(&source).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_validate_child_must_extend_parent() {
        let mut doc = MappingDocument::parse(MINIMAL).unwrap();
        let mut xml = XmlSourceMapping {
            root: "R".to_string(),
            ..Default::default()
        };
        xml.collections.insert(
            "sales_Units".to_string(),
            CollectionSpec {
                path: Some("/R/Units/Unit".to_string()),
                ..Default::default()
            },
        );
        xml.collections.insert(
            "sales_Parts".to_string(),
            CollectionSpec {
                path: Some("/R/Other/Unit/Parts/Part".to_string()),
                parent: Some("sales_Units".to_string()),
                parent_fk: Some("_parent_pk".to_string()),
                ..Default::default()
            },
        );
        doc.xml_infer.insert("sales".to_string(), xml.clone());
        let source = doc.sources[0].clone();
        assert!(doc.validate_source(&source).is_err());

        xml.collections.get_mut("sales_Parts").unwrap().path =
            Some("/R/units/unit/Parts/Part".to_string());
        doc.xml_infer.insert("sales".to_string(), xml);
        doc.validate_source(&source).unwrap();
    }

    #[test]
    fn test_merge_without_pk_is_source_scoped_error() {
        let mut doc = MappingDocument::parse(MINIMAL).unwrap();
        doc.options.write_disposition = WriteDisposition::Merge;
        doc.collections.insert(
            "sales_data".to_string(),
            CollectionSpec {
                pk: PkSpec::default(),
                ..Default::default()
            },
        );
        doc.validate().unwrap();

        let source = doc.sources[0].clone();
        let err = doc.validate_source(&source).unwrap_err();
        assert!(err.to_string().contains("collections.sales_data.pk.prefer"));
    }

    #[test]
    fn test_save_is_atomic_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sales.yaml");
        let doc = MappingDocument::parse(MINIMAL).unwrap();

        assert!(doc.save(&path).unwrap());
        assert!(!doc.save(&path).unwrap());
        assert!(!dir.path().join("sales.yaml.tmp").exists());

        let reloaded = MappingDocument::parse(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded, doc);
    }
}
