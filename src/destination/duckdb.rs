//! DuckDB / DuckLake destination
//!
//! One embedded DuckDB connection. A plain destination opens a database
//! file (or memory); a lake destination opens an in-memory connection and
//! attaches a DuckLake catalog, which then becomes the default database.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::naming::{TableRef, quote_ident, quote_literal};
use super::schema::{FINGERPRINT_COLUMNS, FINGERPRINT_TABLE, column_names, create_table_sql};
use super::{Capabilities, Destination, Profile};
use crate::error::{IngestError, IngestResult};
use crate::flatten::Row;
use crate::models::{DestinationKind, DuckLakeSpec, MappingDocument, SourceFingerprint};

/// Default DuckLake database alias
pub const DEFAULT_DUCKLAKE_NAME: &str = "lake";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// DuckDB-backed destination
pub struct DuckDbDestination {
    /// Path to the database file (None for in-memory and lake stores)
    db_path: Option<PathBuf>,
    /// DuckDB connection (wrapped in Mutex so the destination is Send + Sync)
    connection: Mutex<duckdb::Connection>,
    profile: Profile,
    label: String,
}

impl DuckDbDestination {
    /// Open (or create) a single-file DuckDB database
    pub fn new(db_path: impl AsRef<Path>) -> IngestResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }
        let connection = duckdb::Connection::open(&path)
            .map_err(|e| IngestError::Database(format!("Failed to open DuckDB: {}", e)))?;

        Ok(Self {
            label: path.display().to_string(),
            db_path: Some(path),
            connection: Mutex::new(connection),
            profile: Profile::Plain,
        })
    }

    /// In-memory DuckDB database
    pub fn in_memory() -> IngestResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            IngestError::Database(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            connection: Mutex::new(connection),
            profile: Profile::Plain,
            label: ":memory:".to_string(),
        })
    }

    /// Attach a DuckLake catalog and make it the default database
    pub fn ducklake(spec: &DuckLakeSpec) -> IngestResult<Self> {
        let name = spec
            .ducklake_name
            .clone()
            .unwrap_or_else(|| DEFAULT_DUCKLAKE_NAME.to_string());
        let catalog = spec.catalog.as_deref().ok_or_else(|| {
            IngestError::config(
                "destination.ducklake.catalog",
                "a ducklake destination needs a catalog",
            )
        })?;
        let storage = spec.storage.as_deref().ok_or_else(|| {
            IngestError::config(
                "destination.ducklake.storage",
                "a ducklake destination needs a storage path",
            )
        })?;

        let dest = Self::in_memory()?;
        let sql = ducklake_attach_sql(&name, catalog, storage);
        debug!("Attaching DuckLake: {}", sql);
        dest.execute_batch(&sql)?;

        info!(
            "Attached DuckLake '{}' (catalog {}, storage {})",
            name, catalog, storage
        );
        Ok(Self {
            label: format!("ducklake:{} ({})", name, catalog),
            profile: Profile::StagedLake(spec.replace_strategy),
            ..dest
        })
    }

    /// Open the destination a mapping document describes
    pub fn from_mapping(doc: &MappingDocument) -> IngestResult<Self> {
        match doc.destination.kind {
            DestinationKind::Duckdb => {
                let file = match &doc.destination.duckdb_file {
                    Some(file) => file.clone(),
                    None => format!("{}.duckdb", doc.dataset().unwrap_or("ingest")),
                };
                Self::new(file)
            }
            DestinationKind::Ducklake => Self::ducklake(&doc.destination.ducklake),
        }
    }

    /// Override the capability profile
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    /// Get the database file path (None for in-memory and lake stores)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Check if this is an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    #[cfg(test)]
    pub(crate) fn connection_for_tests(&self) -> MutexGuard<'_, duckdb::Connection> {
        self.connection.lock().unwrap()
    }

    fn lock(&self) -> IngestResult<MutexGuard<'_, duckdb::Connection>> {
        self.connection
            .lock()
            .map_err(|e| IngestError::Database(format!("Lock error: {}", e)))
    }

    /// Execute a statement that doesn't return rows
    fn execute(&self, sql: &str, params: &[&dyn duckdb::ToSql]) -> IngestResult<usize> {
        let conn = self.lock()?;
        conn.execute(sql, params)
            .map_err(|e| IngestError::Database(format!("Execute failed: {}", e)))
    }

    fn existing_columns(&self, table: &TableRef) -> IngestResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_catalog = current_database() AND table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
        )?;
        let mut rows = stmt.query(duckdb::params![table.schema, table.table])?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next()? {
            columns.push(row.get::<_, String>(0)?);
        }
        Ok(columns)
    }
}

/// `INSTALL`/`LOAD`/`ATTACH`/`USE` statements for a DuckLake catalog
///
/// SQLAlchemy-style `sqlite:///path` catalogs are rewritten to the
/// `sqlite:path` form DuckLake expects.
pub fn ducklake_attach_sql(name: &str, catalog: &str, storage: &str) -> String {
    let target = match catalog.strip_prefix("sqlite:///") {
        Some(path) => format!("sqlite:{}", path),
        None => catalog.to_string(),
    };
    format!(
        "INSTALL ducklake;\nLOAD ducklake;\nATTACH {} AS {} (DATA_PATH {});\nUSE {};",
        quote_literal(&format!("ducklake:{}", target)),
        quote_ident(name),
        quote_literal(storage),
        quote_ident(name)
    )
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn timestamp_from_micros(column: &str, micros: Option<i64>) -> IngestResult<DateTime<Utc>> {
    micros
        .and_then(DateTime::from_timestamp_micros)
        .ok_or_else(|| {
            IngestError::Database(format!("Fingerprint column {} is not a timestamp", column))
        })
}

impl Destination for DuckDbDestination {
    fn capabilities(&self) -> Capabilities {
        Capabilities::for_profile(self.profile)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn begin(&self) -> IngestResult<()> {
        self.execute_batch("BEGIN TRANSACTION")
    }

    fn commit(&self) -> IngestResult<()> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&self) -> IngestResult<()> {
        self.execute_batch("ROLLBACK")
    }

    fn execute_batch(&self, sql: &str) -> IngestResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)
            .map_err(|e| IngestError::Database(format!("Batch execute failed: {}", e)))
    }

    fn ensure_table(&self, table: &TableRef, columns: &[String]) -> IngestResult<()> {
        let existing = self.existing_columns(table)?;
        if existing.is_empty() {
            let defs: Vec<String> = columns
                .iter()
                .map(|c| format!("{} VARCHAR", quote_ident(c)))
                .collect();
            let sql = format!(
                "CREATE SCHEMA IF NOT EXISTS {};\nCREATE TABLE IF NOT EXISTS {} ({});",
                quote_ident(&table.schema),
                table,
                defs.join(", ")
            );
            debug!("{}", sql);
            return self
                .execute_batch(&sql)
                .map_err(|e| IngestError::write(table.to_string(), e.to_string()));
        }

        for column in columns {
            if existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} VARCHAR",
                table,
                quote_ident(column)
            );
            debug!("{}", sql);
            self.execute(&sql, &[])
                .map_err(|e| IngestError::write(table.to_string(), e.to_string()))?;
        }
        Ok(())
    }

    fn ensure_fixed_table(&self, table: &TableRef, columns: &[(&str, &str)]) -> IngestResult<()> {
        self.execute_batch(&create_table_sql(table, columns))
            .map_err(|e| IngestError::write(table.to_string(), e.to_string()))
    }

    fn insert_rows(&self, table: &TableRef, columns: &[String], rows: &[Row]) -> IngestResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            column_list.join(", "),
            placeholders
        );
        debug!("{} [{} rows]", sql, rows.len());

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| IngestError::write(table.to_string(), e.to_string()))?;
        let mut written = 0;
        for row in rows {
            let values: Vec<Option<String>> = columns
                .iter()
                .map(|c| row.get(c).cloned().flatten())
                .collect();
            let param_refs: Vec<&dyn duckdb::ToSql> =
                values.iter().map(|v| v as &dyn duckdb::ToSql).collect();
            written += stmt
                .execute(param_refs.as_slice())
                .map_err(|e| IngestError::write(table.to_string(), e.to_string()))?;
        }
        Ok(written)
    }

    fn delete_where(&self, table: &TableRef, column: &str, value: &str) -> IngestResult<usize> {
        let sql = format!("DELETE FROM {} WHERE {} = ?", table, quote_ident(column));
        debug!("{} [{}]", sql, value);
        self.execute(&sql, &[&value])
            .map_err(|e| IngestError::write(table.to_string(), e.to_string()))
    }

    fn table_exists(&self, table: &TableRef) -> IngestResult<bool> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_catalog = current_database() AND table_schema = ? AND table_name = ?",
        )?;
        let count: i64 =
            stmt.query_row(duckdb::params![table.schema, table.table], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn count_rows(&self, table: &TableRef) -> IngestResult<u64> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn load_fingerprint(
        &self,
        dataset: &str,
        source_name: &str,
    ) -> IngestResult<Option<SourceFingerprint>> {
        let table = TableRef::new(dataset, FINGERPRINT_TABLE);
        if !self.table_exists(&table)? {
            return Ok(None);
        }

        let sql = format!(
            "SELECT source_name, source_url, source_type, \
             epoch_us(first_ingest_timestamp), epoch_us(last_ingest_timestamp), \
             last_source_checksum, last_source_size_bytes, format, last_run_id, dataset, \
             last_preliminary_checksum, last_mapping_checksum \
             FROM {} WHERE source_name = ? AND dataset = ? \
             ORDER BY last_ingest_timestamp DESC LIMIT 1",
            table
        );
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(duckdb::params![source_name, dataset])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let kind: Option<String> = row.get(2)?;
        let location_kind = kind
            .as_deref()
            .unwrap_or("file")
            .parse()
            .map_err(IngestError::Database)?;
        let format: Option<String> = row.get(7)?;
        let size: Option<i64> = row.get(6)?;

        let fingerprint = SourceFingerprint {
            source_name: row.get(0)?,
            location: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            location_kind,
            first_seen_at: timestamp_from_micros("first_ingest_timestamp", row.get(3)?)?,
            last_seen_at: timestamp_from_micros("last_ingest_timestamp", row.get(4)?)?,
            exact_checksum: row.get(5)?,
            size_bytes: size.and_then(|s| u64::try_from(s).ok()),
            format: format.and_then(|f| f.parse().ok()),
            last_run_id: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            dataset: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            cheap_fingerprint: row.get(10)?,
            mapping_checksum: row.get(11)?,
        };
        debug!(
            "Loaded fingerprint for '{}': exact={:?} cheap={:?}",
            source_name, fingerprint.exact_checksum, fingerprint.cheap_fingerprint
        );
        Ok(Some(fingerprint))
    }

    fn append_fingerprint(&self, fingerprint: &SourceFingerprint) -> IngestResult<()> {
        let table = TableRef::new(&fingerprint.dataset, FINGERPRINT_TABLE);
        self.ensure_fixed_table(&table, &FINGERPRINT_COLUMNS)?;

        let names: Vec<String> = column_names(&FINGERPRINT_COLUMNS)
            .iter()
            .map(|c| quote_ident(c))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?)",
            table,
            names.join(", ")
        );
        let size = fingerprint.size_bytes.and_then(|s| i64::try_from(s).ok());
        let format = fingerprint.format.map(|f| f.as_str().to_string());
        debug!(
            "Appending fingerprint for '{}' (run {})",
            fingerprint.source_name, fingerprint.last_run_id
        );
        self.execute(
            &sql,
            duckdb::params![
                fingerprint.source_name,
                fingerprint.location,
                fingerprint.location_kind.as_str(),
                format_timestamp(&fingerprint.first_seen_at),
                format_timestamp(&fingerprint.last_seen_at),
                fingerprint.exact_checksum,
                size,
                format,
                fingerprint.last_run_id,
                fingerprint.dataset,
                fingerprint.cheap_fingerprint,
                fingerprint.mapping_checksum,
            ],
        )
        .map_err(|e| IngestError::write(table.to_string(), e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataFormat, LocationKind};
    use chrono::TimeZone;

    fn row(pairs: &[(&str, Option<&str>)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(|s| s.to_string())))
            .collect()
    }

    fn fingerprint(run_id: &str, seen: DateTime<Utc>) -> SourceFingerprint {
        SourceFingerprint {
            source_name: "sales".to_string(),
            location: "./sales.csv".to_string(),
            location_kind: LocationKind::File,
            first_seen_at: Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap(),
            last_seen_at: seen,
            cheap_fingerprint: Some("cheap".to_string()),
            exact_checksum: Some("exact".to_string()),
            size_bytes: Some(42),
            format: Some(DataFormat::Csv),
            last_run_id: run_id.to_string(),
            dataset: "sales".to_string(),
            mapping_checksum: Some("mapping".to_string()),
        }
    }

    #[test]
    fn test_in_memory_destination() {
        let dest = DuckDbDestination::in_memory().unwrap();
        assert!(dest.is_in_memory());
        assert!(dest.db_path().is_none());
        assert_eq!(dest.capabilities().profile, Profile::Plain);
    }

    #[test]
    fn test_ensure_table_adds_new_columns() {
        let dest = DuckDbDestination::in_memory().unwrap();
        let table = TableRef::new("sales", "sales_data");
        dest.ensure_table(&table, &["_pk".to_string(), "amount".to_string()])
            .unwrap();
        assert!(dest.table_exists(&table).unwrap());

        dest.ensure_table(&table, &["_pk".to_string(), "currency".to_string()])
            .unwrap();
        let columns = dest.existing_columns(&table).unwrap();
        assert_eq!(columns, vec!["_pk", "amount", "currency"]);
    }

    #[test]
    fn test_insert_and_delete_rows() {
        let dest = DuckDbDestination::in_memory().unwrap();
        let table = TableRef::new("sales", "sales_data");
        let columns = vec!["_pk".to_string(), "amount".to_string()];
        dest.ensure_table(&table, &columns).unwrap();

        let rows = vec![
            row(&[("_pk", Some("1")), ("amount", Some("10"))]),
            row(&[("_pk", Some("2"))]),
        ];
        assert_eq!(dest.insert_rows(&table, &columns, &rows).unwrap(), 2);
        assert_eq!(dest.count_rows(&table).unwrap(), 2);

        assert_eq!(dest.delete_where(&table, "_pk", "1").unwrap(), 1);
        assert_eq!(dest.count_rows(&table).unwrap(), 1);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let dest = DuckDbDestination::in_memory().unwrap();
        let table = TableRef::new("sales", "sales_data");
        let columns = vec!["_pk".to_string()];
        dest.ensure_table(&table, &columns).unwrap();

        dest.begin().unwrap();
        dest.insert_rows(&table, &columns, &[row(&[("_pk", Some("1"))])])
            .unwrap();
        dest.rollback().unwrap();
        assert_eq!(dest.count_rows(&table).unwrap(), 0);
    }

    #[test]
    fn test_missing_fingerprint_table() {
        let dest = DuckDbDestination::in_memory().unwrap();
        assert!(dest.load_fingerprint("sales", "sales").unwrap().is_none());
    }

    #[test]
    fn test_fingerprint_latest_row_wins() {
        let dest = DuckDbDestination::in_memory().unwrap();
        let first = fingerprint("run_1", Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap());
        let mut second = fingerprint("run_2", Utc.with_ymd_and_hms(2026, 1, 2, 8, 0, 0).unwrap());
        second.exact_checksum = Some("exact-2".to_string());
        dest.append_fingerprint(&first).unwrap();
        dest.append_fingerprint(&second).unwrap();

        let loaded = dest.load_fingerprint("sales", "sales").unwrap().unwrap();
        assert_eq!(loaded, second);
        assert_eq!(
            dest.count_rows(&TableRef::new("sales", FINGERPRINT_TABLE))
                .unwrap(),
            2
        );
        assert!(dest.load_fingerprint("sales", "other").unwrap().is_none());
    }

    #[test]
    fn test_file_destination_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sales.duckdb");
        let dest = DuckDbDestination::new(&path).unwrap();
        assert_eq!(dest.db_path(), Some(path.as_path()));
        assert!(path.parent().unwrap().exists());
    }

    #[test]
    fn test_ducklake_attach_sql() {
        let sql = ducklake_attach_sql("lake", "sqlite:///lake.sqlite", "./lake/");
        assert!(sql.contains("ATTACH 'ducklake:sqlite:lake.sqlite' AS \"lake\" (DATA_PATH './lake/')"));
        assert!(sql.ends_with("USE \"lake\";"));
    }

    #[test]
    fn test_ducklake_requires_catalog() {
        let err = DuckDbDestination::ducklake(&DuckLakeSpec::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("destination.ducklake.catalog"));
    }
}
