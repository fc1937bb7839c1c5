//! Change-detection gate
//!
//! The gate never skips a source whose identity changed: a new resolved
//! location or a new mapping checksum always forces a fetch, and such a
//! fetch is never judged unchanged by its content checksum alone.

use crate::location::ResolvedLocation;
use crate::models::SourceFingerprint;

/// What the run does with a source before touching its content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Cheap fingerprint matches; nothing is fetched or written
    Skip,
    /// No fingerprint on record; fetch and load without comparing
    FetchCheapOnly,
    /// Fetch and compare the exact checksum before loading
    FetchAndVerify,
}

/// Why the gate decided as it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Forced,
    FirstSeen,
    LocationChanged,
    MappingChanged,
    NoCheapFingerprint,
    CheapChanged,
    CheapMatched,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Reason::Forced => "forced",
            Reason::FirstSeen => "first seen",
            Reason::LocationChanged => "resolved location changed",
            Reason::MappingChanged => "mapping changed",
            Reason::NoCheapFingerprint => "no cheap fingerprint available",
            Reason::CheapChanged => "cheap fingerprint changed",
            Reason::CheapMatched => "cheap fingerprint unchanged",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    pub decision: Decision,
    pub reason: Reason,
}

impl GateOutcome {
    fn new(decision: Decision, reason: Reason) -> Self {
        Self { decision, reason }
    }
}

/// Identity of a source as observed by the current run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProbe {
    pub location: ResolvedLocation,
    pub cheap_fingerprint: Option<String>,
    pub mapping_checksum: String,
}

impl SourceProbe {
    fn identity_changed(&self, persisted: &SourceFingerprint) -> Option<Reason> {
        if persisted.location != self.location.value
            || persisted.location_kind != self.location.kind
        {
            return Some(Reason::LocationChanged);
        }
        if persisted.mapping_checksum.as_deref() != Some(self.mapping_checksum.as_str()) {
            return Some(Reason::MappingChanged);
        }
        None
    }
}

/// Decide whether a source must be fetched
pub fn decide(
    probe: &SourceProbe,
    persisted: Option<&SourceFingerprint>,
    force: bool,
) -> GateOutcome {
    if force {
        return GateOutcome::new(Decision::FetchAndVerify, Reason::Forced);
    }
    let Some(persisted) = persisted else {
        return GateOutcome::new(Decision::FetchCheapOnly, Reason::FirstSeen);
    };
    if let Some(reason) = probe.identity_changed(persisted) {
        return GateOutcome::new(Decision::FetchAndVerify, reason);
    }
    match probe.cheap_fingerprint.as_deref() {
        None => GateOutcome::new(Decision::FetchAndVerify, Reason::NoCheapFingerprint),
        Some(cheap) if persisted.cheap_fingerprint.as_deref() == Some(cheap) => {
            GateOutcome::new(Decision::Skip, Reason::CheapMatched)
        }
        Some(_) => GateOutcome::new(Decision::FetchAndVerify, Reason::CheapChanged),
    }
}

/// Whether fetched content is unchanged since the persisted fingerprint
///
/// True only when the exact checksum matches and the source identity
/// (resolved location and mapping checksum) is the same.
pub fn is_unchanged(probe: &SourceProbe, persisted: Option<&SourceFingerprint>, exact: &str) -> bool {
    persisted.is_some_and(|p| {
        probe.identity_changed(p).is_none() && p.exact_checksum.as_deref() == Some(exact)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationKind;
    use chrono::{TimeZone, Utc};

    fn probe(location: &str, cheap: Option<&str>, mapping: &str) -> SourceProbe {
        SourceProbe {
            location: ResolvedLocation {
                kind: LocationKind::Url,
                value: location.to_string(),
            },
            cheap_fingerprint: cheap.map(str::to_string),
            mapping_checksum: mapping.to_string(),
        }
    }

    fn persisted() -> SourceFingerprint {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        SourceFingerprint {
            source_name: "sales".to_string(),
            location: "https://x/sales_20260301.csv".to_string(),
            location_kind: LocationKind::Url,
            first_seen_at: at,
            last_seen_at: at,
            cheap_fingerprint: Some("c1".to_string()),
            exact_checksum: Some("e1".to_string()),
            size_bytes: Some(10),
            format: None,
            last_run_id: "ingest_20260301_060000_abcdef01".to_string(),
            dataset: "d".to_string(),
            mapping_checksum: Some("m1".to_string()),
        }
    }

    #[test]
    fn test_force_always_fetches() {
        let p = probe("https://x/sales_20260301.csv", Some("c1"), "m1");
        let outcome = decide(&p, Some(&persisted()), true);
        assert_eq!(outcome.decision, Decision::FetchAndVerify);
        assert_eq!(outcome.reason, Reason::Forced);
    }

    #[test]
    fn test_first_seen() {
        let p = probe("https://x/sales_20260301.csv", Some("c1"), "m1");
        assert_eq!(decide(&p, None, false).decision, Decision::FetchCheapOnly);
    }

    #[test]
    fn test_cheap_match_skips() {
        let p = probe("https://x/sales_20260301.csv", Some("c1"), "m1");
        assert_eq!(decide(&p, Some(&persisted()), false).decision, Decision::Skip);
    }

    #[test]
    fn test_new_day_location_never_skips() {
        let p = probe("https://x/sales_20260302.csv", Some("c1"), "m1");
        let outcome = decide(&p, Some(&persisted()), false);
        assert_eq!(outcome.decision, Decision::FetchAndVerify);
        assert_eq!(outcome.reason, Reason::LocationChanged);
        assert!(!is_unchanged(&p, Some(&persisted()), "e1"));
    }

    #[test]
    fn test_mapping_change_never_skips() {
        let p = probe("https://x/sales_20260301.csv", Some("c1"), "m2");
        assert_eq!(
            decide(&p, Some(&persisted()), false).reason,
            Reason::MappingChanged
        );
        assert!(!is_unchanged(&p, Some(&persisted()), "e1"));
    }

    #[test]
    fn test_missing_cheap_falls_through() {
        let p = probe("https://x/sales_20260301.csv", None, "m1");
        let outcome = decide(&p, Some(&persisted()), false);
        assert_eq!(outcome.decision, Decision::FetchAndVerify);
        assert_eq!(outcome.reason, Reason::NoCheapFingerprint);
    }

    #[test]
    fn test_exact_match_is_unchanged() {
        let p = probe("https://x/sales_20260301.csv", Some("c2"), "m1");
        assert_eq!(
            decide(&p, Some(&persisted()), false).reason,
            Reason::CheapChanged
        );
        assert!(is_unchanged(&p, Some(&persisted()), "e1"));
        assert!(!is_unchanged(&p, Some(&persisted()), "e2"));
        assert!(!is_unchanged(&p, None, "e1"));
    }
}
