//! Mapping document commands (`--newmapping`, `--migrate`)

use std::path::Path;

use crate::cli::error::CliError;
use crate::mapping::{MigrationOutcome, migrate_v1_to_v2, write_new_mapping};

/// Write a commented template mapping
pub fn handle_new_mapping(path: &Path) -> Result<(), CliError> {
    write_new_mapping(path)?;
    println!("Created new mapping template: {}", path.display());
    println!("Edit the sources section, then run with --mapping {}", path.display());
    Ok(())
}

/// Convert a v1 single-source mapping to the multi-source layout
pub fn handle_migrate(path: &Path, dry_run: bool) -> Result<(), CliError> {
    if !path.exists() {
        return Err(CliError::FileNotFound(path.to_path_buf()));
    }

    match migrate_v1_to_v2(path, dry_run)? {
        MigrationOutcome::AlreadyCurrent => {
            println!("{} already uses the multi-source layout", path.display());
        }
        MigrationOutcome::NotV1 => {
            return Err(CliError::InvalidArgument(format!(
                "{} has neither 'sources' nor 'run.source'",
                path.display()
            )));
        }
        MigrationOutcome::Migrated {
            source_name,
            collections,
            document,
        } => {
            if dry_run {
                println!("{}", document.to_yaml()?);
            } else {
                println!(
                    "Migrated {}: source '{}', {} collections",
                    path.display(),
                    source_name,
                    collections
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_mapping_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feeds.yaml");
        handle_new_mapping(&path).unwrap();
        assert!(path.exists());
        assert!(handle_new_mapping(&path).is_err());
    }

    #[test]
    fn test_migrate_missing_file() {
        let err = handle_migrate(Path::new("/nonexistent/v1.yaml"), true).unwrap_err();
        assert!(matches!(err, CliError::FileNotFound(_)));
    }
}
