//! Write dispositions across runs, on plain and staged destinations

use std::sync::Arc;

use ingest2duck::destination::{Destination, DuckDbDestination, Profile, TableRef};
use ingest2duck::models::{MappingDocument, ReplaceStrategy, RunContext, WriteDisposition};
use ingest2duck::run::{RunCoordinator, SourceStatus};
use ingest2duck::transport::MemoryTransport;

const URL: &str = "https://example.com/sales.csv";
const FIRST: &str = "invoice_id,amount\nA-1,10\nA-2,20\n";
const SECOND: &str = "invoice_id,amount\nA-2,25\nA-3,30\n";

fn mapping(disposition: WriteDisposition, prefer: &str) -> MappingDocument {
    MappingDocument::parse(&format!(
        r#"
sources:
  - name: sales
    url: https://example.com/sales.csv
destination: {{ dataset: shop }}
options: {{ write_disposition: {} }}
collections:
  sales_data:
    pk: {{ prefer: [{}] }}
"#,
        disposition, prefer
    ))
    .unwrap()
}

fn setup(profile: Profile) -> (Arc<MemoryTransport>, RunCoordinator) {
    let transport = Arc::new(MemoryTransport::new());
    let destination = DuckDbDestination::in_memory().unwrap().with_profile(profile);
    let coordinator = RunCoordinator::new(transport.clone(), Box::new(destination));
    (transport, coordinator)
}

fn run_twice(
    transport: &MemoryTransport,
    coordinator: &RunCoordinator,
    doc: &mut MappingDocument,
) {
    transport.insert_with_etag(URL, FIRST, "\"1\"");
    let first = coordinator.run(doc, &RunContext::new("shop", false)).unwrap();
    assert!(first.is_success(), "{:?}", first.sources);

    transport.insert_with_etag(URL, SECOND, "\"2\"");
    let second = coordinator.run(doc, &RunContext::new("shop", false)).unwrap();
    assert_eq!(second.source("sales").unwrap().status, SourceStatus::Loaded);
}

fn count(coordinator: &RunCoordinator, table: &str) -> u64 {
    coordinator
        .with_destination(|dest| dest.count_rows(&TableRef::new("shop", table)))
        .unwrap()
}

fn staging_exists(coordinator: &RunCoordinator) -> bool {
    coordinator
        .with_destination(|dest| dest.table_exists(&TableRef::new("shop", "sales_data").staging_for()))
        .unwrap()
}

#[test]
fn test_append_accumulates() {
    let (transport, coordinator) = setup(Profile::Plain);
    let mut doc = mapping(WriteDisposition::Append, "invoice_id");
    run_twice(&transport, &coordinator, &mut doc);

    assert_eq!(count(&coordinator, "sales_data"), 4);
    assert_eq!(count(&coordinator, "raw_ingest"), 4);
}

#[test]
fn test_replace_keeps_only_latest_content() {
    let (transport, coordinator) = setup(Profile::Plain);
    let mut doc = mapping(WriteDisposition::Replace, "invoice_id");
    run_twice(&transport, &coordinator, &mut doc);

    assert_eq!(count(&coordinator, "sales_data"), 2);
    assert_eq!(count(&coordinator, "raw_ingest"), 2);
}

#[test]
fn test_merge_upserts_on_key() {
    let (transport, coordinator) = setup(Profile::Plain);
    let mut doc = mapping(WriteDisposition::Merge, "invoice_id");
    run_twice(&transport, &coordinator, &mut doc);

    assert_eq!(count(&coordinator, "sales_data"), 3);
    // raw rows are appended under merge
    assert_eq!(count(&coordinator, "raw_ingest"), 4);
}

#[test]
fn test_merge_without_usable_key_fails_fast() {
    let (transport, coordinator) = setup(Profile::Plain);
    let mut doc = mapping(WriteDisposition::Merge, "");
    transport.insert_with_etag(URL, FIRST, "\"1\"");

    let report = coordinator
        .run(&mut doc, &RunContext::new("shop", false))
        .unwrap();
    let sales = report.source("sales").unwrap();
    assert_eq!(sales.status, SourceStatus::Failed);
    assert!(
        sales
            .error
            .as_deref()
            .unwrap()
            .contains("collections.sales_data.pk.prefer")
    );

    let (table, fingerprint) = coordinator
        .with_destination(|dest| {
            Ok((
                dest.table_exists(&TableRef::new("shop", "sales_data"))?,
                dest.load_fingerprint("shop", "sales")?,
            ))
        })
        .unwrap();
    assert!(!table);
    assert!(fingerprint.is_none());
}

#[test]
fn test_collection_skip_records_source_as_seen() {
    let (transport, coordinator) = setup(Profile::Plain);
    let mut doc = mapping(WriteDisposition::Append, "invoice_id");
    doc.collections.get_mut("sales_data").unwrap().write_disposition =
        Some(WriteDisposition::Skip);
    doc.options.skip_refreshes_checksum = false;

    transport.insert_with_etag(URL, FIRST, "\"1\"");
    coordinator
        .run(&mut doc, &RunContext::new("shop", false))
        .unwrap();
    let first = coordinator
        .with_destination(|dest| dest.load_fingerprint("shop", "sales"))
        .unwrap()
        .unwrap();

    transport.insert_with_etag(URL, SECOND, "\"2\"");
    let ctx = RunContext::new("shop", false);
    coordinator.run(&mut doc, &ctx).unwrap();
    let second = coordinator
        .with_destination(|dest| dest.load_fingerprint("shop", "sales"))
        .unwrap()
        .unwrap();

    assert_eq!(second.exact_checksum, first.exact_checksum);
    assert_eq!(second.last_run_id, ctx.run_id);
    let table = coordinator
        .with_destination(|dest| dest.table_exists(&TableRef::new("shop", "sales_data")))
        .unwrap();
    assert!(!table);
    let raw = coordinator
        .with_destination(|dest| {
            let raw = TableRef::new("shop", "raw_ingest");
            if dest.table_exists(&raw)? {
                dest.count_rows(&raw)
            } else {
                Ok(0)
            }
        })
        .unwrap();
    assert_eq!(raw, 0);
}

#[test]
fn test_staged_merge_on_lake_profile() {
    let (transport, coordinator) = setup(Profile::StagedLake(ReplaceStrategy::TruncateAndInsert));
    let mut doc = mapping(WriteDisposition::Merge, "invoice_id");
    run_twice(&transport, &coordinator, &mut doc);

    assert_eq!(count(&coordinator, "sales_data"), 3);
    assert!(!staging_exists(&coordinator));
}

#[test]
fn test_staged_replace_strategies() {
    for strategy in [
        ReplaceStrategy::InsertFromStaging,
        ReplaceStrategy::StagingOptimized,
        ReplaceStrategy::TruncateAndInsert,
    ] {
        let (transport, coordinator) = setup(Profile::StagedLake(strategy));
        let mut doc = mapping(WriteDisposition::Replace, "invoice_id");
        run_twice(&transport, &coordinator, &mut doc);

        assert_eq!(count(&coordinator, "sales_data"), 2, "{}", strategy);
        assert!(!staging_exists(&coordinator), "{}", strategy);
    }
}
