//! Local file transport

use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

use super::{LocationMetadata, Transport};
use crate::error::{IngestError, IngestResult};
use crate::location::ResolvedLocation;

/// Reads sources from the local filesystem
///
/// Local reads are blocking and do not honor the fetch timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

impl Transport for FileTransport {
    fn head(
        &self,
        location: &ResolvedLocation,
        _timeout: Duration,
    ) -> IngestResult<LocationMetadata> {
        let path = Path::new(&location.value);
        let meta = std::fs::metadata(path).map_err(|e| {
            IngestError::fetch(
                location.value.clone(),
                format!("cannot stat input file: {}", e),
            )
        })?;

        Ok(LocationMetadata {
            etag: None,
            content_length: Some(meta.len()),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    fn fetch(&self, location: &ResolvedLocation, _timeout: Duration) -> IngestResult<Vec<u8>> {
        std::fs::read(&location.value).map_err(|e| {
            IngestError::fetch(
                location.value.clone(),
                format!("input file not readable: {}", e),
            )
        })
    }
}
