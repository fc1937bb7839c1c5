//! HTTP transport (blocking reqwest)

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, ETAG, HeaderName, LAST_MODIFIED};
use std::time::Duration;

use super::{LocationMetadata, Transport};
use crate::error::{IngestError, IngestResult};
use crate::location::ResolvedLocation;

/// Fetches URL sources; a client is built per call so each source gets
/// its own timeout
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransport;

impl HttpTransport {
    fn client(location: &ResolvedLocation, timeout: Duration) -> IngestResult<Client> {
        Client::builder().timeout(timeout).build().map_err(|e| {
            IngestError::fetch(
                location.value.clone(),
                format!("Failed to create HTTP client: {}", e),
            )
        })
    }

    fn map_error(location: &ResolvedLocation, timeout: Duration, e: reqwest::Error) -> IngestError {
        let message = if e.is_timeout() {
            format!("timed out after {}s", timeout.as_secs())
        } else {
            e.to_string()
        };
        IngestError::fetch(location.value.clone(), message)
    }
}

impl Transport for HttpTransport {
    fn head(
        &self,
        location: &ResolvedLocation,
        timeout: Duration,
    ) -> IngestResult<LocationMetadata> {
        let response = Self::client(location, timeout)?
            .head(&location.value)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::map_error(location, timeout, e))?;

        let headers = response.headers();
        let header = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        Ok(LocationMetadata {
            etag: header(ETAG),
            content_length: header(CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            modified: header(LAST_MODIFIED)
                .and_then(|v| chrono::DateTime::parse_from_rfc2822(&v).ok())
                .map(|d| d.with_timezone(&chrono::Utc)),
        })
    }

    fn fetch(&self, location: &ResolvedLocation, timeout: Duration) -> IngestResult<Vec<u8>> {
        tracing::info!(url = %location.value, timeout_s = timeout.as_secs(), "Downloading");
        let bytes = Self::client(location, timeout)?
            .get(&location.value)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(|e| Self::map_error(location, timeout, e))?;
        tracing::debug!(url = %location.value, size = bytes.len(), "Download completed");
        Ok(bytes.to_vec())
    }
}
