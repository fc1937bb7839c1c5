//! Write-disposition orchestration
//!
//! [`plan`] turns a disposition and a destination profile into ordered
//! steps; [`orchestrator`] runs them for a whole source inside one
//! transaction and manages staging tables.

pub mod orchestrator;
pub mod plan;
pub mod raw;

pub use orchestrator::{
    CollectionBatch, RawBatch, SourceBatch, TableWrite, WriteSummary, record_fingerprint,
    write_source,
};
pub use plan::{WritePlan, WriteStep, plan};
pub use raw::{RawMeta, raw_rows};
