//! Per-source write orchestration
//!
//! A source is written in one transaction: raw rows, every collection's
//! apply steps, then the fingerprint row. Staging tables are loaded before
//! the transaction opens and dropped after it commits. When a merge fails
//! its staging table is left in place; the next successful run recreates
//! it from scratch.

use tracing::{debug, info, warn};

use super::plan::{WritePlan, WriteStep, plan};
use super::raw::{RawMeta, raw_rows};
use crate::destination::schema::{RAW_COLUMNS, column_names, normalized_columns};
use crate::destination::{Destination, Profile, TableRef, quote_ident, quote_literal};
use crate::error::{IngestError, IngestResult};
use crate::extract::KeyedCollection;
use crate::flatten::{PK_COLUMN, Row, SOURCE_NAME_COLUMN};
use crate::models::{MappingDocument, SourceFingerprint, WriteDisposition};

const DELETE_CHUNK: usize = 500;

/// Rows for the shared raw table
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    pub table: TableRef,
    pub disposition: WriteDisposition,
    pub rows: Vec<Row>,
}

/// Rows and plan for one normalized table
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionBatch {
    pub collection: String,
    pub plan: WritePlan,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Everything one source writes
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBatch {
    pub source_name: String,
    pub raw: Option<RawBatch>,
    pub collections: Vec<CollectionBatch>,
    pub fingerprint: SourceFingerprint,
}

impl SourceBatch {
    /// Build the batch of a source from its keyed collections
    ///
    /// The raw table follows the global disposition (`merge` appends).
    pub fn build(
        doc: &MappingDocument,
        profile: Profile,
        collections: &[KeyedCollection],
        fingerprint: SourceFingerprint,
    ) -> Self {
        let dataset = fingerprint.dataset.clone();
        let source_name = fingerprint.source_name.clone();

        let raw = doc.outputs.raw.enabled.then(|| RawBatch {
            table: TableRef::new(&dataset, &doc.outputs.raw.table),
            disposition: doc.options.write_disposition,
            rows: raw_rows(collections, &RawMeta::from_fingerprint(&fingerprint)),
        });

        let mut batches = Vec::new();
        if doc.outputs.normalized.enabled {
            for collection in collections.iter().filter(|c| c.is_written()) {
                let rows = collection.normalized_rows(&source_name);
                let columns = normalized_columns(rows.iter().flat_map(|r| r.keys()));
                let target = TableRef::new(&dataset, &collection.table);
                batches.push(CollectionBatch {
                    collection: collection.name.clone(),
                    plan: plan(profile, collection.disposition, &target),
                    columns,
                    rows,
                });
            }
        }

        Self {
            source_name,
            raw,
            collections: batches,
            fingerprint,
        }
    }

    /// Batches that change a table
    fn active(&self) -> impl Iterator<Item = &CollectionBatch> {
        self.collections
            .iter()
            .filter(|b| !b.plan.is_noop() && !b.rows.is_empty())
    }
}

/// Rows written to one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableWrite {
    pub collection: String,
    pub table: String,
    pub disposition: WriteDisposition,
    pub rows: usize,
}

/// Outcome of a source write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub raw_rows: usize,
    pub tables: Vec<TableWrite>,
}

impl WriteSummary {
    pub fn total_rows(&self) -> usize {
        self.raw_rows + self.tables.iter().map(|t| t.rows).sum::<usize>()
    }

    /// Normalized table names that received rows
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.table.clone()).collect()
    }
}

fn as_write_error(table: &TableRef, err: IngestError) -> IngestError {
    match err {
        IngestError::Database(message) => IngestError::write(table.to_string(), message),
        other => other,
    }
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn delete_keys(dest: &dyn Destination, table: &TableRef, rows: &[Row]) -> IngestResult<()> {
    let keys: Vec<String> = rows
        .iter()
        .filter_map(|r| r.get(PK_COLUMN).cloned().flatten())
        .map(|k| quote_literal(&k))
        .collect();
    for chunk in keys.chunks(DELETE_CHUNK) {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            table,
            quote_ident(PK_COLUMN),
            chunk.join(", ")
        );
        dest.execute_batch(&sql)?;
    }
    Ok(())
}

/// Run one step; returns the rows it inserted
fn run_step(dest: &dyn Destination, step: &WriteStep, batch: &CollectionBatch) -> IngestResult<usize> {
    let columns = &batch.columns;
    match step {
        WriteStep::EnsureTable(table) => {
            dest.ensure_table(table, columns).map(|_| 0)
        }
        WriteStep::Insert(table) => dest.insert_rows(table, columns, &batch.rows),
        WriteStep::Truncate(table) => {
            let sql = format!("DELETE FROM {}", table);
            debug!("{}", sql);
            dest.execute_batch(&sql)
                .map(|_| 0)
                .map_err(|e| as_write_error(table, e))
        }
        WriteStep::DeleteKeys(table) => delete_keys(dest, table, &batch.rows)
            .map(|_| 0)
            .map_err(|e| as_write_error(table, e)),
        WriteStep::CreateStaging(staging) => {
            let sql = format!(
                "CREATE SCHEMA IF NOT EXISTS {};\nDROP TABLE IF EXISTS {};",
                quote_ident(&staging.schema),
                staging
            );
            debug!("{}", sql);
            dest.execute_batch(&sql)
                .map_err(|e| as_write_error(staging, e))?;
            dest.ensure_table(staging, columns).map(|_| 0)
        }
        WriteStep::InsertFromStaging { staging, target } => {
            let cols = column_list(columns);
            let sql = format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                target, cols, cols, staging
            );
            debug!("{}", sql);
            dest.execute_batch(&sql)
                .map(|_| batch.rows.len())
                .map_err(|e| as_write_error(target, e))
        }
        WriteStep::DeleteMatching { staging, target } => {
            let pk = quote_ident(PK_COLUMN);
            let sql = format!(
                "DELETE FROM {} WHERE {} IN (SELECT {} FROM {})",
                target, pk, pk, staging
            );
            debug!("{}", sql);
            dest.execute_batch(&sql)
                .map(|_| 0)
                .map_err(|e| as_write_error(target, e))
        }
        WriteStep::SwapFromStaging { staging, target } => {
            let sql = format!(
                "CREATE SCHEMA IF NOT EXISTS {};\nDROP TABLE IF EXISTS {};\nCREATE TABLE {} AS SELECT * FROM {};",
                quote_ident(&target.schema),
                target,
                target,
                staging
            );
            debug!("{}", sql);
            dest.execute_batch(&sql)
                .map(|_| batch.rows.len())
                .map_err(|e| as_write_error(target, e))
        }
        WriteStep::DropTable(table) => {
            let sql = format!("DROP TABLE IF EXISTS {}", table);
            debug!("{}", sql);
            dest.execute_batch(&sql)
                .map(|_| 0)
                .map_err(|e| as_write_error(table, e))
        }
    }
}

fn run_steps(dest: &dyn Destination, steps: &[WriteStep], batch: &CollectionBatch) -> IngestResult<usize> {
    let mut inserted = 0;
    for step in steps {
        inserted += run_step(dest, step, batch)?;
    }
    Ok(inserted)
}

fn write_raw(dest: &dyn Destination, source_name: &str, raw: &RawBatch) -> IngestResult<usize> {
    if raw.disposition == WriteDisposition::Skip || raw.rows.is_empty() {
        return Ok(0);
    }
    dest.ensure_fixed_table(&raw.table, &RAW_COLUMNS)?;
    if raw.disposition == WriteDisposition::Replace {
        let removed = dest.delete_where(&raw.table, SOURCE_NAME_COLUMN, source_name)?;
        debug!("Removed {} raw rows of '{}' from {}", removed, source_name, raw.table);
    }
    dest.insert_rows(&raw.table, &column_names(&RAW_COLUMNS), &raw.rows)
}

/// Drop the staging tables of failed plans that do not keep them
fn discard_staging<'a>(dest: &dyn Destination, batches: impl Iterator<Item = &'a CollectionBatch>) {
    for batch in batches {
        let Some(staging) = &batch.plan.staging else {
            continue;
        };
        if batch.plan.keep_staging_on_failure {
            warn!(
                "Staging table {} left in place for inspection ({} of {})",
                staging, batch.plan.disposition, batch.plan.target
            );
            continue;
        }
        if let Err(e) = run_step(dest, &WriteStep::DropTable(staging.clone()), batch) {
            warn!("Failed to drop staging table {}: {}", staging, e);
        }
    }
}

fn apply_in_transaction(dest: &dyn Destination, batch: &SourceBatch) -> IngestResult<WriteSummary> {
    let mut summary = WriteSummary::default();
    if let Some(raw) = &batch.raw {
        summary.raw_rows = write_raw(dest, &batch.source_name, raw)?;
    }
    for collection in batch.active() {
        let rows = run_steps(dest, &collection.plan.apply, collection)?;
        debug!(
            "{} {} rows into {} ({})",
            collection.plan.disposition, rows, collection.plan.target, collection.collection
        );
        summary.tables.push(TableWrite {
            collection: collection.collection.clone(),
            table: collection.plan.target.table.clone(),
            disposition: collection.plan.disposition,
            rows,
        });
    }
    dest.append_fingerprint(&batch.fingerprint)?;
    Ok(summary)
}

/// Write one source
///
/// The fingerprint row is appended inside the same transaction as the
/// data, so it is never committed without the rows it describes.
pub fn write_source(dest: &dyn Destination, batch: &SourceBatch) -> IngestResult<WriteSummary> {
    let staged: Vec<&CollectionBatch> = batch.active().filter(|b| b.plan.uses_staging()).collect();

    for (i, collection) in staged.iter().enumerate() {
        if let Err(e) = run_steps(dest, &collection.plan.stage, collection) {
            discard_staging(dest, staged[..=i].iter().copied());
            return Err(e);
        }
        debug!(
            "Staged {} rows for {}",
            collection.rows.len(),
            collection.plan.target
        );
    }

    dest.begin()?;
    let result = apply_in_transaction(dest, batch).and_then(|summary| {
        dest.commit()?;
        Ok(summary)
    });

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            if let Err(rollback_err) = dest.rollback() {
                warn!("Rollback failed for '{}': {}", batch.source_name, rollback_err);
            }
            discard_staging(dest, staged.iter().copied());
            return Err(e);
        }
    };

    for collection in &staged {
        if let Err(e) = run_steps(dest, &collection.plan.cleanup, collection) {
            warn!("Staging cleanup failed for {}: {}", collection.plan.target, e);
        }
    }

    info!(
        "Wrote source '{}': {} raw rows, {} tables",
        batch.source_name,
        summary.raw_rows,
        summary.tables.len()
    );
    Ok(summary)
}

/// Append a fingerprint row without touching data tables
pub fn record_fingerprint(dest: &dyn Destination, fingerprint: &SourceFingerprint) -> IngestResult<()> {
    dest.append_fingerprint(fingerprint)
}
