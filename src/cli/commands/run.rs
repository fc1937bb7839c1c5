//! Run command implementation

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cli::error::CliError;
use crate::destination::DuckDbDestination;
use crate::mapping::MappingLock;
use crate::models::{
    DestinationKind, MappingDocument, ReplaceStrategy, RunContext, WriteDisposition,
};
use crate::run::{RunCoordinator, RunReport};
use crate::transport::DefaultTransport;

/// Mapping overrides given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingOverrides {
    pub dataset: Option<String>,
    pub destination_type: Option<DestinationKind>,
    pub duckdb_file: Option<String>,
    pub ducklake_name: Option<String>,
    pub ducklake_catalog: Option<String>,
    pub ducklake_storage: Option<String>,
    pub ducklake_replace_strategy: Option<ReplaceStrategy>,
    pub infer_if_missing: Option<bool>,
    pub write_disposition: Option<WriteDisposition>,
    pub raw_table: Option<String>,
    pub workers: Option<usize>,
}

impl MappingOverrides {
    /// Apply on top of a document (after environment overrides)
    pub fn apply(&self, doc: &mut MappingDocument) {
        if let Some(dataset) = &self.dataset {
            doc.destination.dataset = Some(dataset.clone());
        }
        if let Some(kind) = self.destination_type {
            doc.destination.kind = kind;
        }
        if let Some(file) = &self.duckdb_file {
            doc.destination.duckdb_file = Some(file.clone());
        }
        let lake = &mut doc.destination.ducklake;
        if let Some(name) = &self.ducklake_name {
            lake.ducklake_name = Some(name.clone());
        }
        if let Some(catalog) = &self.ducklake_catalog {
            lake.catalog = Some(catalog.clone());
        }
        if let Some(storage) = &self.ducklake_storage {
            lake.storage = Some(storage.clone());
        }
        if let Some(strategy) = self.ducklake_replace_strategy {
            lake.replace_strategy = strategy;
        }
        if let Some(infer) = self.infer_if_missing {
            doc.options.infer_if_missing = infer;
        }
        if let Some(disposition) = self.write_disposition {
            doc.options.write_disposition = disposition;
        }
        if let Some(table) = &self.raw_table {
            doc.outputs.raw.table = table.clone();
        }
        if let Some(workers) = self.workers {
            doc.options.workers = Some(workers.max(1));
        }
    }
}

/// Arguments for a run
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub mapping: PathBuf,
    pub force: bool,
    pub overrides: MappingOverrides,
}

/// Handle a run: lock, load, process every source, persist the mapping
pub fn handle_run(args: &RunArgs) -> Result<RunReport, CliError> {
    if !args.mapping.exists() {
        return Err(CliError::FileNotFound(args.mapping.clone()));
    }
    let _lock = MappingLock::try_acquire(&args.mapping)?;

    info!("Starting ingest2duck with mapping file: {}", args.mapping.display());
    let mut loaded = MappingDocument::load(&args.mapping)?;

    let mut working = loaded.clone();
    working.apply_env_overrides();
    args.overrides.apply(&mut working);
    working.ensure_dataset(&args.mapping);
    working.validate()?;

    let dataset = working.dataset().unwrap_or_default().to_string();
    let ctx = RunContext::new(dataset, args.force);
    info!("Run ID: {}", ctx.run_id);

    let destination = DuckDbDestination::from_mapping(&working)?;
    let coordinator = RunCoordinator::new(Arc::new(DefaultTransport::new()), Box::new(destination));
    let report = coordinator.run(&mut working, &ctx)?;

    if report.mapping_changed {
        loaded.adopt_run_state(&working);
        if loaded.save(&args.mapping)? {
            info!("Saved updated mapping to {}", args.mapping.display());
        }
    }

    println!("{}", report.render(Some(&args.mapping)));

    if report.is_success() {
        Ok(report)
    } else {
        Err(CliError::SourcesFailed {
            failed: report.failures().count(),
            total: report.sources.len(),
        })
    }
}
