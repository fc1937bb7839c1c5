//! In-memory transport
//!
//! Serves fixed content per location and counts calls, for dry runs and
//! tests of the change-detection gate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{LocationMetadata, Transport};
use crate::error::{IngestError, IngestResult};
use crate::location::ResolvedLocation;

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    etag: Option<String>,
    send_length: bool,
}

/// Transport backed by a location to content map
#[derive(Debug, Default)]
pub struct MemoryTransport {
    entries: Mutex<HashMap<String, Entry>>,
    heads: AtomicUsize,
    fetches: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` at `location` with no ETag and a Content-Length
    pub fn insert(&self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.put(location.into(), bytes.into(), None, true);
    }

    /// Serve `bytes` at `location` with an ETag
    pub fn insert_with_etag(
        &self,
        location: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        etag: impl Into<String>,
    ) {
        self.put(location.into(), bytes.into(), Some(etag.into()), true);
    }

    /// Serve `bytes` at `location` without any cheap metadata
    pub fn insert_opaque(&self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.put(location.into(), bytes.into(), None, false);
    }

    fn put(&self, location: String, bytes: Vec<u8>, etag: Option<String>, send_length: bool) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                location,
                Entry {
                    bytes,
                    etag,
                    send_length,
                },
            );
        }
    }

    /// Number of `head` calls served
    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    /// Number of `fetch` calls served
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn entry(&self, location: &ResolvedLocation) -> IngestResult<Entry> {
        let entries = self.entries.lock().map_err(|e| {
            IngestError::fetch(location.value.clone(), format!("Lock error: {}", e))
        })?;
        entries
            .get(&location.value)
            .cloned()
            .ok_or_else(|| IngestError::fetch(location.value.clone(), "not found"))
    }
}

impl Transport for MemoryTransport {
    fn head(
        &self,
        location: &ResolvedLocation,
        _timeout: Duration,
    ) -> IngestResult<LocationMetadata> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        let entry = self.entry(location)?;
        Ok(LocationMetadata {
            etag: entry.etag,
            content_length: entry.send_length.then_some(entry.bytes.len() as u64),
            modified: None,
        })
    }

    fn fetch(&self, location: &ResolvedLocation, _timeout: Duration) -> IngestResult<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.entry(location)?.bytes)
    }
}
