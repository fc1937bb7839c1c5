//! Destination stores
//!
//! A destination is an embedded analytical store reached through one
//! connection. Two profiles exist: a plain single-file DuckDB database and
//! a DuckLake catalog, which stages merges and (depending on the replace
//! strategy) replaces through `{dataset}_staging` tables.
//!
//! All data tables keep their values as VARCHAR; columns are added as new
//! fields appear.

pub mod duckdb;
pub mod naming;
pub mod schema;

use crate::error::IngestResult;
use crate::flatten::Row;
use crate::models::{DestinationKind, ReplaceStrategy, SourceFingerprint};

pub use self::duckdb::DuckDbDestination;
pub use naming::{TableRef, quote_ident, quote_literal, staging_schema};

/// Capability profile of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Single-file store; all dispositions write directly
    Plain,
    /// Lake store; merges always stage, replaces follow the strategy
    StagedLake(ReplaceStrategy),
}

/// What a destination supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_native_upsert: bool,
    pub supports_staging: bool,
    pub profile: Profile,
}

impl Capabilities {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Plain => Self {
                supports_native_upsert: false,
                supports_staging: false,
                profile,
            },
            Profile::StagedLake(_) => Self {
                supports_native_upsert: false,
                supports_staging: true,
                profile,
            },
        }
    }

    pub fn kind(&self) -> DestinationKind {
        match self.profile {
            Profile::Plain => DestinationKind::Duckdb,
            Profile::StagedLake(_) => DestinationKind::Ducklake,
        }
    }
}

/// A store that data, raw and fingerprint rows are written to
///
/// Calls are made by one writer at a time; `begin`/`commit`/`rollback`
/// bracket the writes of one source.
pub trait Destination: Send {
    fn capabilities(&self) -> Capabilities;

    /// Human readable location for run summaries
    fn describe(&self) -> String;

    fn begin(&self) -> IngestResult<()>;
    fn commit(&self) -> IngestResult<()>;
    fn rollback(&self) -> IngestResult<()>;

    /// Run one or more statements
    fn execute_batch(&self, sql: &str) -> IngestResult<()>;

    /// Create the table if missing and add any missing VARCHAR columns
    fn ensure_table(&self, table: &TableRef, columns: &[String]) -> IngestResult<()>;

    /// Create a fixed-layout table if missing
    fn ensure_fixed_table(&self, table: &TableRef, columns: &[(&str, &str)]) -> IngestResult<()>;

    /// Insert rows; columns absent from a row are NULL
    fn insert_rows(&self, table: &TableRef, columns: &[String], rows: &[Row]) -> IngestResult<usize>;

    /// Delete rows whose `column` equals `value`
    fn delete_where(&self, table: &TableRef, column: &str, value: &str) -> IngestResult<usize>;

    fn table_exists(&self, table: &TableRef) -> IngestResult<bool>;

    fn count_rows(&self, table: &TableRef) -> IngestResult<u64>;

    /// Latest fingerprint row of a source in a dataset
    fn load_fingerprint(
        &self,
        dataset: &str,
        source_name: &str,
    ) -> IngestResult<Option<SourceFingerprint>>;

    /// Append a fingerprint row
    fn append_fingerprint(&self, fingerprint: &SourceFingerprint) -> IngestResult<()>;
}
