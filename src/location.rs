//! Location template expansion
//!
//! Source locations may carry date placeholders that are resolved against
//! the run's wall-clock start: `{today}`, `{yesterday}`, `{tomorrow}` and
//! `{now}`, each optionally followed by a strftime format
//! (`{today:%Y%m%d}`). Unknown placeholders are left as written.

use chrono::{DateTime, Duration, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write;

use crate::error::{IngestError, IngestResult};
use crate::models::{LocationKind, SourceSpec};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(today|yesterday|tomorrow|now)(?::([^{}]*))?\}").expect("Invalid regex")
});

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A source location after template expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub kind: LocationKind,
    pub value: String,
}

impl ResolvedLocation {
    /// File name at the end of the location, without any query string
    pub fn file_name(&self) -> &str {
        let trimmed = self.value.split(['?', '#']).next().unwrap_or_default();
        trimmed
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("input")
    }
}

impl std::fmt::Display for ResolvedLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

/// Expand date placeholders in `template` against `now`
pub fn expand_template(template: &str, now: DateTime<Local>) -> IngestResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        let name = &caps[1];
        let (at, default_format) = match name {
            "today" => (now, DATE_FORMAT),
            "yesterday" => (now - Duration::days(1), DATE_FORMAT),
            "tomorrow" => (now + Duration::days(1), DATE_FORMAT),
            _ => (now, DATETIME_FORMAT),
        };
        let format = caps
            .get(2)
            .map(|m| m.as_str())
            .filter(|f| !f.is_empty())
            .unwrap_or(default_format);

        write!(out, "{}", at.format(format)).map_err(|_| {
            IngestError::config(
                "url",
                format!("invalid date format '{}' in placeholder {{{}}}", format, name),
            )
        })?;
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Resolve a source's location once for the run
pub fn resolve(source: &SourceSpec, now: DateTime<Local>) -> IngestResult<ResolvedLocation> {
    let (kind, template) = source.location_template()?;
    let value = expand_template(template, now).map_err(|e| match e {
        IngestError::Configuration { message, .. } => IngestError::config(
            format!("sources.{}.{}", source.name, kind.as_str()),
            message,
        ),
        other => other,
    })?;
    Ok(ResolvedLocation { kind, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 1, 3, 14, 30, 25).unwrap()
    }

    #[test]
    fn test_expand_with_formats() {
        let url = "https://example.com/export_{today:%Y%m%d}.xlsx?d={yesterday}&n={now:%H%M}";
        assert_eq!(
            expand_template(url, at()).unwrap(),
            "https://example.com/export_20260103.xlsx?d=2026-01-02&n=1430"
        );
    }

    #[test]
    fn test_tomorrow_crosses_month() {
        let t = Local.with_ymd_and_hms(2026, 1, 31, 8, 0, 0).unwrap();
        assert_eq!(expand_template("{tomorrow:%m%d}", t).unwrap(), "0201");
    }

    #[test]
    fn test_unknown_placeholders_kept() {
        assert_eq!(
            expand_template("/data/{region}/file.csv", at()).unwrap(),
            "/data/{region}/file.csv"
        );
    }

    #[test]
    fn test_different_day_changes_location() {
        let source = SourceSpec {
            name: "daily".to_string(),
            url: Some("https://example.com/{today:%Y%m%d}.csv".to_string()),
            ..Default::default()
        };
        let a = resolve(&source, at()).unwrap();
        let b = resolve(&source, at() + Duration::days(1)).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.kind, LocationKind::Url);
        assert_eq!(a.file_name(), "20260103.csv");
    }

    #[test]
    fn test_file_name_strips_query() {
        let loc = ResolvedLocation {
            kind: LocationKind::Url,
            value: "https://x.org/a/b/data.zip?token=1".to_string(),
        };
        assert_eq!(loc.file_name(), "data.zip");
    }
}
