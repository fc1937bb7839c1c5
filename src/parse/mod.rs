//! Format parsers
//!
//! Every parser works on fully fetched bytes and yields records as JSON
//! objects. Tabular formats also report their header row, which feeds
//! primary key inference. XML is parsed into an element tree so that
//! collection extraction can relate child elements to their ancestors.

pub mod csv;
pub mod json;
pub mod xlsx;
pub mod xml;

use serde_json::Value;

use crate::error::IngestResult;
use crate::models::{DataFormat, Record, SourceSpec};
use crate::transport::PreparedInput;

/// Rows of a CSV file or worksheet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularData {
    /// Non-empty header names in column order
    pub headers: Vec<String>,
    pub rows: Vec<Record>,
}

pub use self::csv::{CsvOptions, read_csv};
pub use self::json::{parse_json, parse_jsonl, records_at};
pub use self::xlsx::Workbook;
pub use self::xml::{XmlElement, parse_xml, path_segments};

/// Parsed content of one source, by format
pub enum ParsedDocument {
    Xml(XmlElement),
    Json(Value),
    Jsonl(Vec<Value>),
    Csv(TabularData),
    Xlsx(Workbook),
}

impl ParsedDocument {
    pub fn format(&self) -> DataFormat {
        match self {
            ParsedDocument::Xml(_) => DataFormat::Xml,
            ParsedDocument::Json(_) => DataFormat::Json,
            ParsedDocument::Jsonl(_) => DataFormat::Jsonl,
            ParsedDocument::Csv(_) => DataFormat::Csv,
            ParsedDocument::Xlsx(_) => DataFormat::Xlsx,
        }
    }
}

/// Parse prepared input with the reader for its format
pub fn parse_document(source: &SourceSpec, input: PreparedInput) -> IngestResult<ParsedDocument> {
    let name = source.name.as_str();
    let doc = match input.format {
        DataFormat::Xml => ParsedDocument::Xml(parse_xml(name, &input.bytes)?),
        DataFormat::Json => ParsedDocument::Json(parse_json(name, &input.bytes)?),
        DataFormat::Jsonl => ParsedDocument::Jsonl(parse_jsonl(name, &input.bytes)?),
        DataFormat::Csv => {
            ParsedDocument::Csv(read_csv(name, &input.bytes, CsvOptions::from_source(source)?)?)
        }
        DataFormat::Xlsx => ParsedDocument::Xlsx(Workbook::open(name, input.bytes)?),
    };
    Ok(doc)
}
