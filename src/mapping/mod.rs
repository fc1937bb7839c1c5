//! Mapping document handling
//!
//! Loading, validation, environment overrides and atomic persistence of the
//! self-updating mapping document, plus the helpers that operate on whole
//! documents: the new-mapping template, v1 to v2 migration, the per-source
//! mapping checksum and the advisory lock held for the duration of a run.

pub mod checksum;
pub mod loader;
pub mod lock;
pub mod migrate;
pub mod template;

pub use checksum::mapping_checksum;
pub use loader::{
    ENV_DATASET, ENV_DUCKDB_FILE, ENV_WORKERS, ENV_WRITE_DISPOSITION, default_dataset_for,
};
pub use lock::MappingLock;
pub use migrate::{MigrationOutcome, migrate_v1_to_v2};
pub use template::{render_template, write_new_mapping};
