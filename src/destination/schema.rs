//! Fixed table layouts
//!
//! The fingerprint table and the raw table have fixed columns. The first
//! ten fingerprint columns are a stable contract; the cheap and mapping
//! checksums follow them.

use super::naming::{TableRef, quote_ident};
use crate::flatten::{PK_COLUMN, RAW_JSON_COLUMN, SOURCE_NAME_COLUMN};
use crate::models::PARENT_FK_COLUMN;

/// Per-source fingerprint table, one appended row per run that saw the source
pub const FINGERPRINT_TABLE: &str = "sourcesmetadata";

pub const FINGERPRINT_COLUMNS: [(&str, &str); 12] = [
    ("source_name", "VARCHAR NOT NULL"),
    ("source_url", "VARCHAR"),
    ("source_type", "VARCHAR"),
    ("first_ingest_timestamp", "TIMESTAMP"),
    ("last_ingest_timestamp", "TIMESTAMP"),
    ("last_source_checksum", "VARCHAR"),
    ("last_source_size_bytes", "BIGINT"),
    ("format", "VARCHAR"),
    ("last_run_id", "VARCHAR"),
    ("dataset", "VARCHAR"),
    ("last_preliminary_checksum", "VARCHAR"),
    ("last_mapping_checksum", "VARCHAR"),
];

pub const RAW_COLUMNS: [(&str, &str); 12] = [
    ("collection", "VARCHAR"),
    ("path", "VARCHAR"),
    ("raw_json", "VARCHAR"),
    ("__source_name", "VARCHAR"),
    ("__source_url", "VARCHAR"),
    ("__source_type", "VARCHAR"),
    ("__ingest_timestamp", "TIMESTAMP"),
    ("__source_checksum", "VARCHAR"),
    ("__source_size_bytes", "BIGINT"),
    ("__format", "VARCHAR"),
    ("__run_id", "VARCHAR"),
    ("__dataset", "VARCHAR"),
];

/// Column names of a fixed layout
pub fn column_names(columns: &[(&str, &str)]) -> Vec<String> {
    columns.iter().map(|(name, _)| name.to_string()).collect()
}

/// `CREATE TABLE IF NOT EXISTS` for a fixed layout
pub fn create_table_sql(table: &TableRef, columns: &[(&str, &str)]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .map(|(name, ty)| format!("{} {}", quote_ident(name), ty))
        .collect();
    format!(
        "CREATE SCHEMA IF NOT EXISTS {};\nCREATE TABLE IF NOT EXISTS {} ({});",
        quote_ident(&table.schema),
        table,
        defs.join(", ")
    )
}

/// Column order for a normalized table: fixed columns, then the rest sorted
pub fn normalized_columns<'a>(names: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let fixed = [PK_COLUMN, PARENT_FK_COLUMN, RAW_JSON_COLUMN, SOURCE_NAME_COLUMN];
    let mut rest: Vec<String> = Vec::new();
    let mut present = Vec::new();
    for name in names {
        if fixed.contains(&name.as_str()) {
            if !present.contains(name) {
                present.push(name.clone());
            }
        } else if !rest.contains(name) {
            rest.push(name.clone());
        }
    }
    rest.sort();
    let mut out: Vec<String> = fixed
        .iter()
        .filter(|f| present.iter().any(|p| p == *f))
        .map(|f| f.to_string())
        .collect();
    out.extend(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_contract_columns() {
        let names = column_names(&FINGERPRINT_COLUMNS);
        assert_eq!(
            &names[..10],
            &[
                "source_name",
                "source_url",
                "source_type",
                "first_ingest_timestamp",
                "last_ingest_timestamp",
                "last_source_checksum",
                "last_source_size_bytes",
                "format",
                "last_run_id",
                "dataset"
            ]
        );
    }

    #[test]
    fn test_normalized_column_order() {
        let names: Vec<String> = ["b", "raw_json", "a", "_pk", "__source_name", "_parent_pk"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            normalized_columns(&names),
            vec!["_pk", "_parent_pk", "raw_json", "__source_name", "a", "b"]
        );
    }

    #[test]
    fn test_create_sql_quotes() {
        let sql = create_table_sql(&TableRef::new("d", FINGERPRINT_TABLE), &FINGERPRINT_COLUMNS);
        assert!(sql.contains("CREATE SCHEMA IF NOT EXISTS \"d\""));
        assert!(sql.contains("\"d\".\"sourcesmetadata\""));
    }
}
