//! ingest2duck - mapping-driven ingestion into DuckDB and DuckLake
//!
//! Provides:
//! - A self-updating YAML mapping document (sources, destination, collections)
//! - Two-phase change detection (cheap fingerprint, then exact checksum)
//! - Collection inference for JSON, JSONL, CSV and XLSX, and XML
//!   parent/child hierarchy inference
//! - Primary key resolution with a stable content-hash fallback
//! - Write dispositions (append, replace, merge, skip) with staging on
//!   DuckLake destinations

pub mod change;
#[cfg(feature = "cli")]
pub mod cli;
pub mod destination;
pub mod error;
pub mod extract;
pub mod flatten;
pub mod inference;
pub mod location;
pub mod mapping;
pub mod models;
pub mod parse;
pub mod pk;
pub mod run;
pub mod transport;
pub mod write;

pub use change::{Decision, GateOutcome, Reason, SourceProbe, decide};
pub use destination::{Capabilities, Destination, DuckDbDestination, Profile, TableRef};
pub use error::{IngestError, IngestResult};
pub use mapping::{MappingLock, mapping_checksum};
pub use models::{
    CollectionSpec, DataFormat, MappingDocument, RunContext, SourceFingerprint, SourceSpec,
    WriteDisposition,
};
pub use pk::PkStrategy;
pub use run::{RunCoordinator, RunReport, SourceReport, SourceStatus};
pub use transport::{DefaultTransport, MemoryTransport, Transport};
pub use write::{WritePlan, WriteStep, plan};
