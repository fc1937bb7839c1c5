//! Run coordinator
//!
//! Sources are processed on a bounded rayon pool. Gate, fetch, parse,
//! inference and key assignment run in parallel; destination access goes
//! through one mutex so writes are serialized on the single connection.
//! Inferred collections are merged into a shared copy of the mapping under
//! its own mutex and handed back to the caller once every source finished.

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

use super::report::{RunReport, SourceReport, SourceStatus};
use crate::change::{self, Decision, SourceProbe, decide, is_unchanged};
use crate::destination::Destination;
use crate::error::{IngestError, IngestResult};
use crate::extract::{KeyedCollection, assign_keys, extract_collections};
use crate::inference::{has_mapping, infer_for_source};
use crate::location;
use crate::mapping::mapping_checksum;
use crate::models::{
    MappingDocument, RunContext, SourceFingerprint, SourceSpec, WriteDisposition,
};
use crate::parse::parse_document;
use crate::transport::{Transport, prepare_input};
use crate::write::{SourceBatch, record_fingerprint, write_source};

/// Drives one run over every source of a mapping
pub struct RunCoordinator {
    transport: Arc<dyn Transport>,
    destination: Mutex<Box<dyn Destination>>,
}

fn lock<'a, T: ?Sized>(mutex: &'a Mutex<T>, what: &str) -> IngestResult<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|e| IngestError::Database(format!("Lock error on {}: {}", what, e)))
}

impl RunCoordinator {
    pub fn new(transport: Arc<dyn Transport>, destination: Box<dyn Destination>) -> Self {
        Self {
            transport,
            destination: Mutex::new(destination),
        }
    }

    /// Run `f` against the destination while holding the write lock
    pub fn with_destination<T>(
        &self,
        f: impl FnOnce(&dyn Destination) -> IngestResult<T>,
    ) -> IngestResult<T> {
        let dest = lock(&self.destination, "destination")?;
        f(dest.as_ref())
    }

    /// Human readable destination location
    pub fn describe_destination(&self) -> String {
        match self.destination.lock() {
            Ok(dest) => dest.describe(),
            Err(_) => "<unavailable>".to_string(),
        }
    }

    /// Run every source of the document
    ///
    /// Document-level validation failures abort before any source is
    /// touched. Source failures, source-scoped configuration errors
    /// included, are recorded in the report and never stop the other
    /// sources. `doc` is updated in place with inferred
    /// collections and the normalized table list; persisting it is left to
    /// the caller.
    pub fn run(&self, doc: &mut MappingDocument, ctx: &RunContext) -> IngestResult<RunReport> {
        doc.validate()?;

        let mut pool = rayon::ThreadPoolBuilder::new();
        if let Some(workers) = doc.options.workers {
            pool = pool.num_threads(workers.max(1));
        }
        let pool = pool
            .build()
            .map_err(|e| IngestError::config("options.workers", e.to_string()))?;

        info!(
            run_id = %ctx.run_id,
            dataset = %ctx.dataset,
            sources = doc.sources.len(),
            force = ctx.force,
            "Starting run"
        );

        let names: Vec<String> = doc.sources.iter().map(|s| s.name.clone()).collect();
        let shared = Mutex::new(doc.clone());
        let sources: Vec<SourceReport> = pool.install(|| {
            use rayon::prelude::*;
            names
                .par_iter()
                .map(|name| self.process_source(&shared, name, ctx))
                .collect()
        });

        let updated = shared
            .into_inner()
            .map_err(|e| IngestError::Database(format!("Lock error on mapping: {}", e)))?;
        let mapping_changed = updated != *doc;
        *doc = updated;

        let report = RunReport {
            run_id: ctx.run_id.clone(),
            dataset: ctx.dataset.clone(),
            destination: self.describe_destination(),
            sources,
            mapping_changed,
        };
        info!(
            run_id = %ctx.run_id,
            failed = report.failures().count(),
            "Run finished"
        );
        Ok(report)
    }

    fn process_source(
        &self,
        shared: &Mutex<MappingDocument>,
        name: &str,
        ctx: &RunContext,
    ) -> SourceReport {
        let span = info_span!("source", source = %name, run_id = %ctx.run_id);
        let _enter = span.enter();

        match self.try_process(shared, name, ctx) {
            Ok(report) => report,
            Err(e) => {
                error!(kind = e.kind(), "Source failed: {}", e);
                SourceReport::failed(name, e.to_string())
            }
        }
    }

    fn try_process(
        &self,
        shared: &Mutex<MappingDocument>,
        name: &str,
        ctx: &RunContext,
    ) -> IngestResult<SourceReport> {
        let mut doc = lock(shared, "mapping")?.clone();
        let source: SourceSpec = doc
            .source(name)
            .cloned()
            .ok_or_else(|| IngestError::config("sources", format!("unknown source '{}'", name)))?;
        doc.validate_source(&source)?;

        let location = location::resolve(&source, ctx.started_at)?;
        let persisted = lock(&self.destination, "destination")?
            .load_fingerprint(&ctx.dataset, &source.name)?;
        let timeout = Duration::from_secs(source.timeout_secs());

        let probe = SourceProbe {
            cheap_fingerprint: change::probe_cheap(self.transport.as_ref(), &location, timeout),
            mapping_checksum: mapping_checksum(&doc, &source)?,
            location,
        };
        let outcome = decide(&probe, persisted.as_ref(), ctx.force);
        info!(
            location = %probe.location,
            decision = ?outcome.decision,
            "{}",
            outcome.reason
        );
        if outcome.decision == Decision::Skip {
            return Ok(SourceReport::new(name, SourceStatus::Skipped).with_reason(outcome.reason));
        }

        let bytes = self.transport.fetch(&probe.location, timeout)?;
        let exact = change::exact_checksum(&bytes);
        let size = bytes.len() as u64;
        debug!(exact = %exact, size, "Fetched source");

        if !ctx.force
            && let Some(previous) = persisted.as_ref()
            && is_unchanged(&probe, Some(previous), &exact)
        {
            let touched = SourceFingerprint {
                cheap_fingerprint: probe.cheap_fingerprint.clone(),
                ..previous.touched(&ctx.run_id, Utc::now())
            };
            record_fingerprint(lock(&self.destination, "destination")?.as_ref(), &touched)?;
            info!("Content unchanged, fingerprint refreshed");
            return Ok(
                SourceReport::new(name, SourceStatus::Unchanged).with_reason(outcome.reason)
            );
        }

        let input = prepare_input(
            &source.name,
            probe.location.file_name(),
            bytes,
            source.format,
            source.member.as_deref(),
        )?;
        let mut parsed = parse_document(&source, input)?;
        let format = parsed.format();

        let mut inferred = 0;
        if !has_mapping(&doc, &source, &parsed) {
            let proposal = infer_for_source(&doc, &source, &mut parsed)?;
            let mut guard = lock(shared, "mapping")?;
            inferred = proposal.merge_into(&mut guard, &source.name);
            doc = guard.clone();
        }
        doc.validate_source(&source)?;

        let extracted = extract_collections(&doc, &source, &mut parsed)?;
        let keyed = assign_keys(&doc, &source, extracted)?;

        let now = Utc::now();
        let fingerprint = match persisted.as_ref() {
            Some(previous) if keeps_previous_checksum(&doc, &keyed) => {
                debug!("All collections skip; keeping previous checksum");
                previous.touched(&ctx.run_id, now)
            }
            _ => SourceFingerprint {
                source_name: source.name.clone(),
                location: probe.location.value.clone(),
                location_kind: probe.location.kind,
                first_seen_at: persisted.as_ref().map_or(now, |p| p.first_seen_at),
                last_seen_at: now,
                cheap_fingerprint: probe.cheap_fingerprint.clone(),
                exact_checksum: Some(exact),
                size_bytes: Some(size),
                format: Some(format),
                last_run_id: ctx.run_id.clone(),
                dataset: ctx.dataset.clone(),
                mapping_checksum: Some(mapping_checksum(&doc, &source)?),
            },
        };

        let summary = {
            let dest = lock(&self.destination, "destination")?;
            let batch = SourceBatch::build(&doc, dest.capabilities().profile, &keyed, fingerprint);
            write_source(dest.as_ref(), &batch)?
        };

        let tables = summary.table_names();
        if !tables.is_empty() {
            lock(shared, "mapping")?.record_normalized_tables(tables.iter().map(String::as_str));
        }

        let mut report = SourceReport::new(name, SourceStatus::Loaded).with_reason(outcome.reason);
        report.raw_rows = summary.raw_rows;
        report.rows_written = summary.tables.iter().map(|t| t.rows).sum();
        report.tables = tables;
        report.inferred = inferred;
        Ok(report)
    }
}

/// Whether a source whose collections all `skip` keeps its old checksum
fn keeps_previous_checksum(doc: &MappingDocument, keyed: &[KeyedCollection]) -> bool {
    if doc.options.skip_refreshes_checksum {
        return false;
    }
    let mut written = keyed.iter().filter(|c| c.is_written()).peekable();
    if written.peek().is_none() {
        warn!("Source has no enabled collections");
        return false;
    }
    written.all(|c| c.disposition == WriteDisposition::Skip)
}
