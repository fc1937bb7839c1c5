//! Write-disposition state machine
//!
//! A plan is derived from the destination profile and the collection's
//! disposition. Steps are split in three phases:
//!
//! - `stage` runs before the source transaction opens, so a staged table
//!   survives a rollback of the apply phase
//! - `apply` runs inside the per-source transaction
//! - `cleanup` runs after commit
//!
//! Merges on a lake store always stage into `{dataset}_staging.{table}`.

use crate::destination::{Profile, TableRef};
use crate::models::{ReplaceStrategy, WriteDisposition};

/// One destination operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStep {
    /// Create the table and add missing columns
    EnsureTable(TableRef),
    /// Insert the collection's rows
    Insert(TableRef),
    /// Delete every row
    Truncate(TableRef),
    /// Delete rows whose key is in the batch
    DeleteKeys(TableRef),
    /// Drop and recreate a staging table with the batch's columns
    CreateStaging(TableRef),
    /// Copy the staging rows into the target
    InsertFromStaging { staging: TableRef, target: TableRef },
    /// Delete target rows whose key is present in staging
    DeleteMatching { staging: TableRef, target: TableRef },
    /// Drop the target and recreate it from staging
    SwapFromStaging { staging: TableRef, target: TableRef },
    DropTable(TableRef),
}

/// Ordered steps for one collection write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    pub disposition: WriteDisposition,
    pub target: TableRef,
    pub staging: Option<TableRef>,
    pub stage: Vec<WriteStep>,
    pub apply: Vec<WriteStep>,
    pub cleanup: Vec<WriteStep>,
    /// Leave the staging table for inspection when stage or apply fails
    pub keep_staging_on_failure: bool,
}

impl WritePlan {
    fn direct(disposition: WriteDisposition, target: &TableRef, apply: Vec<WriteStep>) -> Self {
        Self {
            disposition,
            target: target.clone(),
            staging: None,
            stage: Vec::new(),
            apply,
            cleanup: Vec::new(),
            keep_staging_on_failure: false,
        }
    }

    fn staged(
        disposition: WriteDisposition,
        target: &TableRef,
        apply: Vec<WriteStep>,
        keep_staging_on_failure: bool,
    ) -> Self {
        let staging = target.staging_for();
        Self {
            disposition,
            target: target.clone(),
            stage: vec![
                WriteStep::CreateStaging(staging.clone()),
                WriteStep::Insert(staging.clone()),
            ],
            apply,
            cleanup: vec![WriteStep::DropTable(staging.clone())],
            staging: Some(staging),
            keep_staging_on_failure,
        }
    }

    /// Whether the plan writes nothing
    pub fn is_noop(&self) -> bool {
        self.stage.is_empty() && self.apply.is_empty()
    }

    pub fn uses_staging(&self) -> bool {
        self.staging.is_some()
    }
}

/// Plan the write of one collection
pub fn plan(profile: Profile, disposition: WriteDisposition, target: &TableRef) -> WritePlan {
    let ensure = WriteStep::EnsureTable(target.clone());
    let insert = WriteStep::Insert(target.clone());

    match (disposition, profile) {
        (WriteDisposition::Skip, _) => WritePlan::direct(disposition, target, Vec::new()),

        (WriteDisposition::Append, _)
        | (WriteDisposition::Replace, Profile::StagedLake(ReplaceStrategy::TruncateAndInsert)) => {
            let apply = if disposition == WriteDisposition::Replace {
                vec![ensure, WriteStep::Truncate(target.clone()), insert]
            } else {
                vec![ensure, insert]
            };
            WritePlan::direct(disposition, target, apply)
        }

        (WriteDisposition::Replace, Profile::Plain) => WritePlan::direct(
            disposition,
            target,
            vec![ensure, WriteStep::Truncate(target.clone()), insert],
        ),

        (WriteDisposition::Merge, Profile::Plain) => WritePlan::direct(
            disposition,
            target,
            vec![ensure, WriteStep::DeleteKeys(target.clone()), insert],
        ),

        (WriteDisposition::Replace, Profile::StagedLake(ReplaceStrategy::InsertFromStaging)) => {
            let staging = target.staging_for();
            WritePlan::staged(
                disposition,
                target,
                vec![
                    ensure,
                    WriteStep::Truncate(target.clone()),
                    WriteStep::InsertFromStaging {
                        staging,
                        target: target.clone(),
                    },
                ],
                false,
            )
        }

        (WriteDisposition::Replace, Profile::StagedLake(ReplaceStrategy::StagingOptimized)) => {
            let staging = target.staging_for();
            WritePlan::staged(
                disposition,
                target,
                vec![WriteStep::SwapFromStaging {
                    staging,
                    target: target.clone(),
                }],
                false,
            )
        }

        (WriteDisposition::Merge, Profile::StagedLake(_)) => {
            let staging = target.staging_for();
            WritePlan::staged(
                disposition,
                target,
                vec![
                    ensure,
                    WriteStep::DeleteMatching {
                        staging: staging.clone(),
                        target: target.clone(),
                    },
                    WriteStep::InsertFromStaging {
                        staging,
                        target: target.clone(),
                    },
                ],
                true,
            )
        }
    }
}
