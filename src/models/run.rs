//! Per-invocation run context

use chrono::{DateTime, Local, Utc};
use uuid::Uuid;

/// Ephemeral context of one run, stamped into output rows
#[derive(Debug, Clone)]
pub struct RunContext {
    /// `ingest_{YYYYmmdd_HHMMSS}_{8 hex}`
    pub run_id: String,
    pub dataset: String,
    pub force: bool,
    /// Wall-clock start, also the reference time for location templates
    pub started_at: DateTime<Local>,
}

impl RunContext {
    pub fn new(dataset: impl Into<String>, force: bool) -> Self {
        let started_at = Local::now();
        Self {
            run_id: Self::generate_run_id(&started_at),
            dataset: dataset.into(),
            force,
            started_at,
        }
    }

    /// Build a context at a fixed time (tests, replays)
    pub fn at(dataset: impl Into<String>, force: bool, started_at: DateTime<Local>) -> Self {
        Self {
            run_id: Self::generate_run_id(&started_at),
            dataset: dataset.into(),
            force,
            started_at,
        }
    }

    fn generate_run_id(at: &DateTime<Local>) -> String {
        let uid = Uuid::new_v4().simple().to_string();
        format!("ingest_{}_{}", at.format("%Y%m%d_%H%M%S"), &uid[..8])
    }

    pub fn started_at_utc(&self) -> DateTime<Utc> {
        self.started_at.with_timezone(&Utc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_id_shape() {
        let at = Local.with_ymd_and_hms(2026, 1, 3, 14, 30, 25).unwrap();
        let ctx = RunContext::at("sales", false, at);
        assert!(ctx.run_id.starts_with("ingest_20260103_143025_"));
        assert_eq!(ctx.run_id.len(), "ingest_20260103_143025_".len() + 8);
    }

    #[test]
    fn test_run_ids_unique() {
        let a = RunContext::new("d", false);
        let b = RunContext::new("d", false);
        assert_ne!(a.run_id, b.run_id);
    }
}
