//! Transport for source content
//!
//! A transport answers two questions about a resolved location: what its
//! metadata looks like (without downloading it) and what its bytes are.
//! Unpacking of zip/gzip archives and format detection happen after the
//! fetch in [`unpack`].

pub mod file;
#[cfg(feature = "http")]
pub mod http;
pub mod memory;
pub mod unpack;

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::IngestResult;
use crate::location::ResolvedLocation;
use crate::models::LocationKind;

pub use file::FileTransport;
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use memory::MemoryTransport;
pub use unpack::{PreparedInput, prepare_input, select_zip_member};

/// Metadata obtained without fetching content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationMetadata {
    pub etag: Option<String>,
    pub content_length: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

/// Fetch capability for source locations
pub trait Transport: Send + Sync {
    /// Metadata-only request (HTTP HEAD, file stat)
    fn head(&self, location: &ResolvedLocation, timeout: Duration)
    -> IngestResult<LocationMetadata>;

    /// Full content fetch, bounded by `timeout`
    fn fetch(&self, location: &ResolvedLocation, timeout: Duration) -> IngestResult<Vec<u8>>;
}

/// Dispatches to the file or HTTP transport by location kind
pub struct DefaultTransport {
    file: FileTransport,
    #[cfg(feature = "http")]
    http: HttpTransport,
}

impl DefaultTransport {
    pub fn new() -> Self {
        Self {
            file: FileTransport,
            #[cfg(feature = "http")]
            http: HttpTransport,
        }
    }
}

impl Default for DefaultTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DefaultTransport {
    fn head(
        &self,
        location: &ResolvedLocation,
        timeout: Duration,
    ) -> IngestResult<LocationMetadata> {
        match location.kind {
            LocationKind::File => self.file.head(location, timeout),
            LocationKind::Url => self.url_transport(location)?.head(location, timeout),
        }
    }

    fn fetch(&self, location: &ResolvedLocation, timeout: Duration) -> IngestResult<Vec<u8>> {
        match location.kind {
            LocationKind::File => self.file.fetch(location, timeout),
            LocationKind::Url => self.url_transport(location)?.fetch(location, timeout),
        }
    }
}

impl DefaultTransport {
    #[cfg(feature = "http")]
    fn url_transport(&self, _location: &ResolvedLocation) -> IngestResult<&dyn Transport> {
        Ok(&self.http)
    }

    #[cfg(not(feature = "http"))]
    fn url_transport(&self, location: &ResolvedLocation) -> IngestResult<&dyn Transport> {
        Err(crate::error::IngestError::fetch(
            location.value.clone(),
            "URL sources require the 'http' feature",
        ))
    }
}
