//! CLI command implementations

pub mod mapping;
pub mod run;

pub use mapping::{handle_migrate, handle_new_mapping};
pub use run::{MappingOverrides, RunArgs, handle_run};
