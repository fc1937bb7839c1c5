//! Change detection
//!
//! Two fingerprints guard every source. The cheap one is derived from
//! metadata (ETag or Content-Length for URLs, mtime and size for files) and
//! decides whether the source is fetched at all. The exact one is a SHA-256
//! over the fetched bytes and decides whether fetched content is actually
//! new.

pub mod gate;

use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::location::ResolvedLocation;
use crate::models::LocationKind;
use crate::transport::{LocationMetadata, Transport};

pub use gate::{Decision, GateOutcome, Reason, SourceProbe, decide, is_unchanged};

fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cheap fingerprint from location metadata, if the metadata allows one
///
/// URLs use the ETag, else the URL plus Content-Length. Files use the
/// modification time in nanoseconds plus the size.
pub fn cheap_fingerprint(location: &ResolvedLocation, meta: &LocationMetadata) -> Option<String> {
    match location.kind {
        LocationKind::Url => {
            if let Some(etag) = meta.etag.as_deref().filter(|e| !e.is_empty()) {
                return Some(sha1_hex(&format!("etag:{}", etag)));
            }
            meta.content_length
                .map(|len| sha1_hex(&format!("{}:{}", location.value, len)))
        }
        LocationKind::File => {
            let modified = meta.modified?;
            let size = meta.content_length?;
            let nanos = modified.timestamp_nanos_opt().unwrap_or_else(|| modified.timestamp());
            Some(sha1_hex(&format!("{}:{}", nanos, size)))
        }
    }
}

/// Exact checksum of fetched content (SHA-256 hex)
pub fn exact_checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Issue the metadata request and derive the cheap fingerprint
///
/// A failed metadata request is not fatal: the gate falls through to a full
/// fetch, which reports the real error if the source is unreachable.
pub fn probe_cheap(
    transport: &dyn Transport,
    location: &ResolvedLocation,
    timeout: Duration,
) -> Option<String> {
    match transport.head(location, timeout) {
        Ok(meta) => {
            let cheap = cheap_fingerprint(location, &meta);
            tracing::debug!(location = %location, cheap = ?cheap, "Probed source metadata");
            cheap
        }
        Err(e) => {
            tracing::warn!(location = %location, error = %e, "Metadata request failed");
            None
        }
    }
}
