//! CSV reader

use serde_json::Value;

use super::TabularData;
use crate::error::{IngestError, IngestResult};
use crate::models::{Record, SourceSpec};

/// Text encodings accepted for CSV sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvEncoding {
    Utf8,
    Latin1,
}

impl std::str::FromStr for CsvEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" | "utf-8-sig" => Ok(CsvEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" | "cp1252" | "windows-1252" => {
                Ok(CsvEncoding::Latin1)
            }
            _ => Err(format!(
                "Unsupported encoding: {}. Use utf-8 or latin-1.",
                s
            )),
        }
    }
}

/// Reader options taken from the source spec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub encoding: CsvEncoding,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: CsvEncoding::Utf8,
        }
    }
}

impl CsvOptions {
    pub fn from_source(source: &SourceSpec) -> IngestResult<Self> {
        let delimiter = match source.delimiter.as_deref() {
            None | Some("") => b',',
            Some("\\t") | Some("tab") => b'\t',
            Some(d) if d.len() == 1 && d.is_ascii() => d.as_bytes()[0],
            Some(d) => {
                return Err(IngestError::config(
                    format!("sources.{}.delimiter", source.name),
                    format!("delimiter must be a single ASCII character, got '{}'", d),
                ));
            }
        };

        let encoding = match source.encoding.as_deref() {
            None | Some("") => CsvEncoding::Utf8,
            Some(e) => e.parse().map_err(|msg: String| {
                IngestError::config(format!("sources.{}.encoding", source.name), msg)
            })?,
        };

        Ok(Self {
            delimiter,
            encoding,
        })
    }
}

fn decode(source_name: &str, bytes: &[u8], encoding: CsvEncoding) -> IngestResult<String> {
    match encoding {
        CsvEncoding::Utf8 => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|e| {
                    IngestError::parse(
                        source_name,
                        format!("byte offset {}", e.valid_up_to()),
                        "content is not valid UTF-8; set encoding: latin-1",
                    )
                })
        }
        CsvEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// Read a CSV file into header and rows
///
/// Header names and values are trimmed. Empty values become null and
/// columns with an empty header are dropped.
pub fn read_csv(source_name: &str, bytes: &[u8], options: CsvOptions) -> IngestResult<TabularData> {
    let text = decode(source_name, bytes, options.encoding)?;

    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let raw_headers: Vec<String> = reader
        .headers()
        .map_err(|e| IngestError::parse(source_name, "header row", e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result
            .map_err(|e| IngestError::parse(source_name, format!("row {}", i + 2), e.to_string()))?;

        let mut row = Record::new();
        for (col, name) in raw_headers.iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            let value = record
                .get(col)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null);
            row.insert(name.clone(), value);
        }
        rows.push(row);
    }

    let headers = raw_headers.into_iter().filter(|h| !h.is_empty()).collect();
    tracing::debug!(source = source_name, rows = rows.len(), "Parsed CSV");
    Ok(TabularData { headers, rows })
}
