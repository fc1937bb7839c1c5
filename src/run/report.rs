//! Run report

use std::fmt::Write as _;
use std::path::Path;

use crate::change::Reason;

/// What happened to one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    /// Data written (possibly zero rows for `skip` collections)
    Loaded,
    /// Fetched, exact checksum matched; only the fingerprint was refreshed
    Unchanged,
    /// Not fetched; cheap fingerprint matched
    Skipped,
    Failed,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Loaded => write!(f, "loaded"),
            SourceStatus::Unchanged => write!(f, "unchanged"),
            SourceStatus::Skipped => write!(f, "skipped"),
            SourceStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source_name: String,
    pub status: SourceStatus,
    /// Gate verdict, when the gate ran
    pub reason: Option<Reason>,
    pub raw_rows: usize,
    pub rows_written: usize,
    pub tables: Vec<String>,
    /// Collections added to the mapping by inference
    pub inferred: usize,
    pub error: Option<String>,
}

impl SourceReport {
    pub fn new(source_name: impl Into<String>, status: SourceStatus) -> Self {
        Self {
            source_name: source_name.into(),
            status,
            reason: None,
            raw_rows: 0,
            rows_written: 0,
            tables: Vec::new(),
            inferred: 0,
            error: None,
        }
    }

    pub fn failed(source_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(source_name, SourceStatus::Failed)
        }
    }

    pub fn with_reason(mut self, reason: Reason) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// Outcome of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub dataset: String,
    pub destination: String,
    pub sources: Vec<SourceReport>,
    /// The mapping document was changed by the run (inference, table list)
    pub mapping_changed: bool,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|s| s.status == SourceStatus::Failed)
    }

    /// True when no source failed
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn count(&self, status: SourceStatus) -> usize {
        self.sources.iter().filter(|s| s.status == status).count()
    }

    pub fn source(&self, name: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source_name == name)
    }

    /// Summary printed at the end of a run
    pub fn render(&self, mapping_path: Option<&Path>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Done.");
        let _ = writeln!(out, "- run_id      : {}", self.run_id);
        let _ = writeln!(out, "- destination : {}", self.destination);
        let _ = writeln!(out, "- dataset     : {}", self.dataset);
        if let Some(path) = mapping_path {
            let _ = writeln!(out, "- mapping     : {}", path.display());
        }
        let _ = writeln!(
            out,
            "- sources     : {} loaded, {} unchanged, {} skipped, {} failed",
            self.count(SourceStatus::Loaded),
            self.count(SourceStatus::Unchanged),
            self.count(SourceStatus::Skipped),
            self.count(SourceStatus::Failed)
        );
        for source in &self.sources {
            let mut line = format!("  * {:<20} {}", source.source_name, source.status);
            if let Some(reason) = source.reason {
                let _ = write!(line, " ({})", reason);
            }
            if source.status == SourceStatus::Loaded {
                let _ = write!(
                    line,
                    ": {} rows in {} tables, {} raw rows",
                    source.rows_written,
                    source.tables.len(),
                    source.raw_rows
                );
            }
            if source.inferred > 0 {
                let _ = write!(line, ", {} collections inferred", source.inferred);
            }
            if let Some(error) = &source.error {
                let _ = write!(line, ": {}", error);
            }
            let _ = writeln!(out, "{}", line);
        }
        out
    }
}
