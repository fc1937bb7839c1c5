//! New mapping template (`--newmapping`)

use std::path::Path;

use crate::error::{IngestError, IngestResult};
use crate::mapping::default_dataset_for;

/// Render the commented template for a mapping file path
pub fn render_template(mapping_path: &Path) -> String {
    let name = default_dataset_for(mapping_path);
    let file_name = mapping_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.yaml", name));

    format!(
        r#"# ingest2duck mapping
# Generated by --newmapping
#
# Usage:
#   ingest2duck --mapping {file_name}

version: 1

# Sources: one entry per file or URL to ingest
sources: []
  # XLSX workbook, one collection per configured sheet
  # - name: catalog
  #   url: https://example.com/data.xlsx
  #   collections:
  #     codes:
  #       sheet: CN2025
  #
  # CSV file
  # - name: sales
  #   url: https://example.com/sales.csv
  #   format: csv
  #   delimiter: ";"
  #   encoding: utf-8
  #
  # JSON document with the records below a dotted path
  # - name: api
  #   url: https://api.example.com/data.json
  #   records_path: results.items
  #
  # XML document (collections are inferred from repeating elements)
  # - name: units
  #   url: https://example.com/data.xml
  #
  # Local file
  # - name: local
  #   file: ./data/myfile.xlsx
  #
  # Date placeholders: {{today}}, {{yesterday}}, {{tomorrow}}, {{now}}
  # with strftime formats, e.g. {{today:%Y%m%d}}
  # - name: daily
  #   url: https://example.com/export_{{today:%Y%m%d}}.xlsx

destination:
  # duckdb (single file) or ducklake
  type: duckdb
  # Schema name in the destination
  dataset: {name}
  duckdb_file: ./{name}.duckdb
  # ducklake:
  #   ducklake_name: ducklake
  #   catalog: sqlite:///ducklake.sqlitedb
  #   storage: ./ducklake/
  #   replace_strategy: truncate-and-insert  # insert-from-staging | staging-optimized

options:
  # Infer collections for sources without a mapping
  infer_if_missing: true
  # append | replace | merge (needs pk.prefer) | skip
  write_disposition: append
  # Record the new checksum when every collection of a source is skipped
  skip_refreshes_checksum: true

outputs:
  raw:
    enabled: true
    table: raw_ingest
  normalized:
    enabled: true
    # Maintained by ingest2duck
    tables: []

# Flat collections (CSV/XLSX/JSON), names start with the source name
# collections:
#   sales_data:
#     enabled: true
#     pk:
#       prefer: [id, ID, code, Code]
#     write_disposition: merge
#     # sheet: Sheet1
#     # use_first_sheet: false
#     # path: $.data.items

# XML collections per source
# xml_infer:
#   units:
#     root: IXF
#     collections:
#       units_Units:
#         enabled: true
#         path: /IXF/Units/Unit
#         pk:
#           prefer: ['@id', id]
#         parent: null
#         parent_fk: null
"#
    )
}

/// Write a new template; refuses to overwrite an existing file
pub fn write_new_mapping(mapping_path: &Path) -> IngestResult<()> {
    if mapping_path.exists() {
        return Err(IngestError::config(
            "--newmapping",
            format!(
                "mapping file already exists: {} (delete it first to create a new template)",
                mapping_path.display()
            ),
        ));
    }

    if let Some(parent) = mapping_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
    }

    std::fs::write(mapping_path, render_template(mapping_path))
        .map_err(|e| IngestError::io(mapping_path, e))?;

    tracing::info!(path = %mapping_path.display(), "Created new mapping template");
    Ok(())
}
