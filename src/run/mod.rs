//! Run coordination and reporting

pub mod coordinator;
pub mod report;

pub use coordinator::RunCoordinator;
pub use report::{RunReport, SourceReport, SourceStatus};
