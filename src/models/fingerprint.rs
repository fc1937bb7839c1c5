//! Persisted per-source fingerprint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DataFormat;

/// Kind of a source location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Url,
    File,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Url => "url",
            LocationKind::File => "file",
        }
    }
}

impl std::str::FromStr for LocationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "url" => Ok(LocationKind::Url),
            "file" => Ok(LocationKind::File),
            _ => Err(format!("Unknown location kind: {}", s)),
        }
    }
}

impl std::fmt::Display for LocationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known identity of a source
///
/// One logical row per source name. The store keeps history as appended
/// rows and the latest row by `last_seen_at` is the current fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub source_name: String,
    /// Resolved location (templates already expanded)
    pub location: String,
    pub location_kind: LocationKind,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// ETag/Content-Length or mtime+size digest, when one was available
    pub cheap_fingerprint: Option<String>,
    /// SHA-256 of the full content
    pub exact_checksum: Option<String>,
    pub size_bytes: Option<u64>,
    pub format: Option<DataFormat>,
    pub last_run_id: String,
    pub dataset: String,
    /// SHA-256 of the source's effective mapping
    pub mapping_checksum: Option<String>,
}

impl SourceFingerprint {
    /// Copy of this fingerprint refreshed for a run that saw the source
    /// without loading it. Only timestamps and the run id move.
    pub fn touched(&self, run_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            last_seen_at: at,
            last_run_id: run_id.to_string(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touched_keeps_checksums() {
        let t0 = Utc::now();
        let fp = SourceFingerprint {
            source_name: "sales".to_string(),
            location: "./sales.csv".to_string(),
            location_kind: LocationKind::File,
            first_seen_at: t0,
            last_seen_at: t0,
            cheap_fingerprint: Some("abc".to_string()),
            exact_checksum: Some("def".to_string()),
            size_bytes: Some(10),
            format: Some(DataFormat::Csv),
            last_run_id: "run_1".to_string(),
            dataset: "sales".to_string(),
            mapping_checksum: Some("m".to_string()),
        };

        let later = t0 + chrono::Duration::seconds(5);
        let touched = fp.touched("run_2", later);
        assert_eq!(touched.exact_checksum, fp.exact_checksum);
        assert_eq!(touched.first_seen_at, t0);
        assert_eq!(touched.last_seen_at, later);
        assert_eq!(touched.last_run_id, "run_2");
    }

    #[test]
    fn test_location_kind_parse() {
        use std::str::FromStr;
        assert_eq!(LocationKind::from_str("URL").unwrap(), LocationKind::Url);
        assert!(LocationKind::from_str("ftp").is_err());
    }
}
