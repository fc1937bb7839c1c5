//! End-to-end runs through the command handlers against local files

#![cfg(feature = "cli")]

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use ingest2duck::cli::CliError;
use ingest2duck::cli::commands::{
    MappingOverrides, RunArgs, handle_migrate, handle_new_mapping, handle_run,
};
use ingest2duck::models::{MappingDocument, SourceFingerprint, WriteDisposition};
use ingest2duck::run::SourceStatus;

const SALES: &str = "invoice_id,amount\nINV-1,10.50\nINV-2,20.00\n";

fn write_mapping(dir: &Path) -> PathBuf {
    let csv = dir.join("sales.csv");
    std::fs::write(&csv, SALES).unwrap();
    let mapping = dir.join("shop.yaml");
    std::fs::write(
        &mapping,
        format!(
            r#"sources:
  - name: sales
    file: {}
destination:
  type: duckdb
  duckdb_file: {}
options:
  infer_if_missing: true
"#,
            csv.display(),
            dir.join("shop.duckdb").display(),
        ),
    )
    .unwrap();
    mapping
}

fn args(mapping: &Path) -> RunArgs {
    RunArgs {
        mapping: mapping.to_path_buf(),
        force: false,
        overrides: MappingOverrides::default(),
    }
}

fn count(db: &Path, table: &str) -> i64 {
    let conn = duckdb::Connection::open(db).unwrap();
    conn.query_row(&format!(r#"SELECT COUNT(*) FROM "shop"."{}""#, table), [], |row| {
        row.get(0)
    })
    .unwrap()
}

fn fingerprints(db: &Path) -> Vec<(String, String, i64)> {
    let conn = duckdb::Connection::open(db).unwrap();
    let mut stmt = conn
        .prepare(
            r#"SELECT last_source_checksum, last_mapping_checksum, last_source_size_bytes
               FROM "shop"."sourcesmetadata" ORDER BY last_ingest_timestamp"#,
        )
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
}

fn bump_mtime(path: &Path) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(120))
        .unwrap();
}

#[test]
fn test_first_run_infers_and_persists_mapping() {
    let dir = TempDir::new().unwrap();
    let mapping = write_mapping(dir.path());

    let report = handle_run(&args(&mapping)).unwrap();
    assert_eq!(report.dataset, "shop");
    assert_eq!(report.source("sales").unwrap().status, SourceStatus::Loaded);

    let saved = MappingDocument::load(&mapping).unwrap();
    assert!(saved.collections.contains_key("sales_data"));
    assert_eq!(saved.outputs.normalized.tables, vec!["sales_data".to_string()]);
    // the derived dataset is not written back
    assert!(saved.destination.dataset.is_none());

    let db = dir.path().join("shop.duckdb");
    assert_eq!(count(&db, "sales_data"), 2);
    assert_eq!(count(&db, "raw_ingest"), 2);
}

#[test]
fn test_unchanged_file_is_not_reloaded() {
    let dir = TempDir::new().unwrap();
    let mapping = write_mapping(dir.path());
    let db = dir.path().join("shop.duckdb");

    handle_run(&args(&mapping)).unwrap();
    let saved = std::fs::read_to_string(&mapping).unwrap();

    let second = handle_run(&args(&mapping)).unwrap();
    assert_eq!(second.source("sales").unwrap().status, SourceStatus::Skipped);
    assert_eq!(std::fs::read_to_string(&mapping).unwrap(), saved);
    assert_eq!(fingerprints(&db).len(), 1);

    bump_mtime(&dir.path().join("sales.csv"));
    let third = handle_run(&args(&mapping)).unwrap();
    assert_eq!(third.source("sales").unwrap().status, SourceStatus::Unchanged);

    let rows = fingerprints(&db);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], rows[1]);
    assert_eq!(rows[1].2, SALES.len() as i64);
    assert_eq!(count(&db, "sales_data"), 2);
    assert_eq!(count(&db, "raw_ingest"), 2);
}

#[test]
fn test_overrides_are_not_persisted() {
    let dir = TempDir::new().unwrap();
    let mapping = write_mapping(dir.path());

    let mut run = args(&mapping);
    run.overrides.write_disposition = Some(WriteDisposition::Replace);
    run.overrides.raw_table = Some("raw_all".to_string());
    handle_run(&run).unwrap();

    let saved = MappingDocument::load(&mapping).unwrap();
    assert_eq!(saved.options.write_disposition, WriteDisposition::Append);
    assert_eq!(saved.outputs.raw.table, "raw_ingest");
    assert!(saved.collections.contains_key("sales_data"));
    assert_eq!(count(&dir.path().join("shop.duckdb"), "raw_all"), 2);
}

#[test]
fn test_failed_source_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let mapping = write_mapping(dir.path());
    let content = std::fs::read_to_string(&mapping).unwrap().replace(
        "sources:\n",
        "sources:\n  - name: missing\n    file: /nonexistent/missing.csv\n",
    );
    std::fs::write(&mapping, content).unwrap();

    let err = handle_run(&args(&mapping)).unwrap_err();
    assert!(matches!(err, CliError::SourcesFailed { failed: 1, total: 2 }));
    assert_eq!(count(&dir.path().join("shop.duckdb"), "sales_data"), 2);
}

#[test]
fn test_fingerprint_survives_destination_reopen() {
    let dir = TempDir::new().unwrap();
    let mapping = write_mapping(dir.path());
    handle_run(&args(&mapping)).unwrap();

    let dest = ingest2duck::destination::DuckDbDestination::new(dir.path().join("shop.duckdb"))
        .unwrap();
    let fingerprint: SourceFingerprint =
        ingest2duck::destination::Destination::load_fingerprint(&dest, "shop", "sales")
            .unwrap()
            .unwrap();
    assert_eq!(fingerprint.size_bytes, Some(SALES.len() as u64));
    assert!(fingerprint.cheap_fingerprint.is_some());
    assert_eq!(fingerprint.first_seen_at, fingerprint.last_seen_at);
}

#[test]
fn test_new_mapping_then_migrate_reports_current() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("new.yaml");
    handle_new_mapping(&path).unwrap();
    assert!(matches!(handle_new_mapping(&path), Err(CliError::Ingest(_))));
    handle_migrate(&path, true).unwrap();
}
