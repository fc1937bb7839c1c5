//! CLI-specific error types

use crate::error::IngestError;
use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Ingest(#[from] IngestError),

    #[error("{failed} of {total} sources failed")]
    SourcesFailed { failed: usize, total: usize },
}
