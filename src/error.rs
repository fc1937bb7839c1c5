//! Error taxonomy for ingestion runs
//!
//! Errors are source-scoped: a failure while processing one source never
//! aborts the remaining sources of a run. Only document-level problems
//! (an unreadable or invalid mapping, a held lock) stop the run before any
//! source is touched.

use std::path::PathBuf;

/// Result alias used across the crate
pub type IngestResult<T> = Result<T, IngestError>;

/// Error type for ingestion operations
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Missing or contradictory mapping configuration
    #[error("Configuration error at '{field}': {message}")]
    Configuration { field: String, message: String },

    /// Network, timeout or missing-file failure while fetching a source
    #[error("Fetch failed for source '{source_name}': {message}")]
    Fetch {
        source_name: String,
        message: String,
    },

    /// Content is malformed for its declared format
    #[error("Parse error in source '{source_name}' ({context}): {message}")]
    Parse {
        source_name: String,
        context: String,
        message: String,
    },

    /// The destination rejected a write or a staging apply failed
    #[error("Write failed for table '{table}': {message}")]
    Write { table: String, message: String },

    /// Destination connection or query failure outside a table write
    #[error("Database error: {0}")]
    Database(String),

    /// Filesystem error
    #[error("IO error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The mapping document is locked by another run
    #[error("Mapping document is locked by another run: {0}")]
    Locked(PathBuf),
}

impl IngestError {
    /// Build a configuration error for a field path
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Build a fetch error for a source
    pub fn fetch(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Fetch {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Build a parse error for a source with location context
    pub fn parse(
        source_name: impl Into<String>,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        IngestError::Parse {
            source_name: source_name.into(),
            context: context.into(),
            message: message.into(),
        }
    }

    /// Build a write error for a table
    pub fn write(table: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Write {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Build an IO error for a path
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Short category name used in run reports
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Configuration { .. } => "configuration",
            IngestError::Fetch { .. } => "fetch",
            IngestError::Parse { .. } => "parse",
            IngestError::Write { .. } => "write",
            IngestError::Database(_) => "database",
            IngestError::Io { .. } => "io",
            IngestError::Serialization(_) => "serialization",
            IngestError::Locked(_) => "lock",
        }
    }

    /// Whether the error aborts a single source rather than the whole run
    ///
    /// Document-level configuration errors are raised by
    /// [`MappingDocument::validate`](crate::models::MappingDocument::validate)
    /// before any source is processed and never reach this check.
    pub fn is_source_scoped(&self) -> bool {
        !matches!(self, IngestError::Locked(_))
    }
}

impl From<duckdb::Error> for IngestError {
    fn from(err: duckdb::Error) -> Self {
        IngestError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for IngestError {
    fn from(err: serde_yaml::Error) -> Self {
        IngestError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_carries_field_path() {
        let err = IngestError::config("collections.shop_orders.pk.prefer", "merge requires a key");
        let msg = err.to_string();
        assert!(msg.contains("collections.shop_orders.pk.prefer"));
        assert!(msg.contains("merge requires a key"));
        assert_eq!(err.kind(), "configuration");
        assert!(err.is_source_scoped());
        assert!(!IngestError::Locked(PathBuf::from("m.lock")).is_source_scoped());
    }

    #[test]
    fn test_parse_error_context() {
        let err = IngestError::parse("catalog", "sheet 'CN2025'", "bad cell reference");
        assert_eq!(
            err.to_string(),
            "Parse error in source 'catalog' (sheet 'CN2025'): bad cell reference"
        );
    }
}
