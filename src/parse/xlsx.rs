//! XLSX workbook reader
//!
//! Reads the workbook directly from its Office Open XML parts: the sheet
//! list in `xl/workbook.xml`, sheet targets in `xl/_rels/workbook.xml.rels`,
//! shared strings, and each worksheet's `sheetData`. Cell values are
//! resolved to JSON scalars (shared and inline strings, booleans, numbers).

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{Cursor, Read};

use super::TabularData;
use crate::error::{IngestError, IngestResult};
use crate::models::Record;

/// A sheet entry from the workbook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetInfo {
    pub name: String,
    /// Part path inside the archive, e.g. `xl/worksheets/sheet1.xml`
    pub part: String,
}

/// An opened workbook
pub struct Workbook {
    source_name: String,
    archive: zip::ZipArchive<Cursor<Vec<u8>>>,
    sheets: Vec<SheetInfo>,
    shared_strings: Vec<String>,
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Zero-based column index from a cell reference like `AB12`
fn column_index(reference: &str) -> Option<usize> {
    let mut index = 0usize;
    let mut seen = false;
    for c in reference.chars() {
        if c.is_ascii_alphabetic() {
            index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
            seen = true;
        } else {
            break;
        }
    }
    seen.then(|| index - 1)
}

fn number_value(raw: &str) -> Value {
    if let Ok(f) = raw.parse::<f64>() {
        if f.fract() == 0.0 && f.abs() < 9.0e15 {
            return Value::from(f as i64);
        }
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

impl Workbook {
    /// Open a workbook from its bytes
    pub fn open(source_name: &str, bytes: Vec<u8>) -> IngestResult<Self> {
        let archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| IngestError::parse(source_name, "xlsx archive", e.to_string()))?;

        let mut workbook = Self {
            source_name: source_name.to_string(),
            archive,
            sheets: Vec::new(),
            shared_strings: Vec::new(),
        };
        workbook.sheets = workbook.read_sheet_list()?;
        workbook.shared_strings = workbook.read_shared_strings()?;
        Ok(workbook)
    }

    pub fn sheets(&self) -> &[SheetInfo] {
        &self.sheets
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn parse_err(&self, context: impl Into<String>, message: impl ToString) -> IngestError {
        IngestError::parse(&self.source_name, context, message.to_string())
    }

    fn read_part(&mut self, part: &str) -> IngestResult<Option<String>> {
        let mut entry = match self.archive.by_name(part) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(IngestError::parse(&self.source_name, part, e.to_string())),
        };
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|e| IngestError::parse(&self.source_name, part, e.to_string()))?;
        Ok(Some(text))
    }

    fn read_sheet_list(&mut self) -> IngestResult<Vec<SheetInfo>> {
        let workbook = self
            .read_part("xl/workbook.xml")?
            .ok_or_else(|| self.parse_err("xl/workbook.xml", "workbook part missing"))?;
        let rels = self
            .read_part("xl/_rels/workbook.xml.rels")?
            .unwrap_or_default();

        let mut targets = HashMap::new();
        let mut reader = Reader::from_str(&rels);
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e))
                    if e.local_name().as_ref() == b"Relationship" =>
                {
                    if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                        targets.insert(id, target);
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(self.parse_err("xl/_rels/workbook.xml.rels", e)),
            }
        }

        let mut sheets = Vec::new();
        let mut reader = Reader::from_str(&workbook);
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                    let Some(name) = attr(&e, b"name") else {
                        continue;
                    };
                    let position = sheets.len() + 1;
                    let part = attr(&e, b"id")
                        .and_then(|id| targets.get(&id).cloned())
                        .map(|target| match target.strip_prefix('/') {
                            Some(absolute) => absolute.to_string(),
                            None => format!("xl/{}", target),
                        })
                        .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", position));
                    sheets.push(SheetInfo { name, part });
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(self.parse_err("xl/workbook.xml", e)),
            }
        }
        Ok(sheets)
    }

    fn read_shared_strings(&mut self) -> IngestResult<Vec<String>> {
        let Some(xml) = self.read_part("xl/sharedStrings.xml")? else {
            return Ok(Vec::new());
        };

        let mut strings = Vec::new();
        let mut current = String::new();
        let mut in_text = false;
        let mut in_phonetic = false;
        let mut reader = Reader::from_str(&xml);
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"si" => current.clear(),
                    b"t" => in_text = true,
                    b"rPh" => in_phonetic = true,
                    _ => {}
                },
                Ok(Event::End(e)) => match e.local_name().as_ref() {
                    b"si" => strings.push(std::mem::take(&mut current)),
                    b"t" => in_text = false,
                    b"rPh" => in_phonetic = false,
                    _ => {}
                },
                Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                    strings.push(String::new());
                }
                Ok(Event::Text(t)) if in_text && !in_phonetic => {
                    let text = t
                        .unescape()
                        .map_err(|e| self.parse_err("xl/sharedStrings.xml", e))?;
                    current.push_str(&text);
                }
                Ok(Event::CData(t)) if in_text && !in_phonetic => {
                    current.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(self.parse_err("xl/sharedStrings.xml", e)),
            }
        }
        Ok(strings)
    }

    /// Resolve which sheet to read
    ///
    /// `use_first_sheet` wins, then an explicit name, then the first sheet.
    pub fn select_sheet(&self, sheet: Option<&str>, use_first_sheet: bool) -> IngestResult<SheetInfo> {
        let first = || {
            self.sheets
                .first()
                .cloned()
                .ok_or_else(|| self.parse_err("workbook", "workbook has no sheets"))
        };

        if use_first_sheet {
            return first();
        }
        match sheet {
            Some(name) => self
                .sheets
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .ok_or_else(|| {
                    self.parse_err(
                        format!("sheet '{}'", name),
                        format!("sheet not found; available: {}", self.sheet_names().join(", ")),
                    )
                }),
            None => first(),
        }
    }

    /// Raw cell rows of a sheet, each padded to its last non-empty cell
    fn read_rows(&mut self, sheet: &SheetInfo) -> IngestResult<Vec<Vec<Value>>> {
        let context = format!("sheet '{}'", sheet.name);
        let xml = self
            .read_part(&sheet.part)?
            .ok_or_else(|| self.parse_err(context.clone(), "worksheet part missing"))?;

        let mut rows = Vec::new();
        let mut row: Vec<Value> = Vec::new();
        let mut cell_col = 0usize;
        let mut cell_type = String::new();
        let mut cell_text = String::new();
        let mut in_value = false;
        let mut in_cell = false;

        let mut reader = Reader::from_str(&xml);
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"row" => row = Vec::new(),
                    b"c" => {
                        in_cell = true;
                        cell_col = attr(&e, b"r")
                            .and_then(|r| column_index(&r))
                            .unwrap_or(row.len());
                        cell_type = attr(&e, b"t").unwrap_or_default();
                        cell_text.clear();
                    }
                    b"v" | b"t" if in_cell => in_value = true,
                    _ => {}
                },
                Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => {
                    rows.push(Vec::new());
                }
                Ok(Event::Text(t)) if in_value => {
                    let text = t.unescape().map_err(|e| self.parse_err(context.clone(), e))?;
                    cell_text.push_str(&text);
                }
                Ok(Event::CData(t)) if in_value => {
                    cell_text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
                Ok(Event::End(e)) => match e.local_name().as_ref() {
                    b"v" | b"t" => in_value = false,
                    b"c" => {
                        in_cell = false;
                        let value = self.cell_value(&cell_type, &cell_text, &context)?;
                        if row.len() <= cell_col {
                            row.resize(cell_col + 1, Value::Null);
                        }
                        row[cell_col] = value;
                    }
                    b"row" => rows.push(std::mem::take(&mut row)),
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(self.parse_err(
                        format!("{} at byte {}", context, reader.buffer_position()),
                        e,
                    ));
                }
            }
        }
        Ok(rows)
    }

    fn cell_value(&self, cell_type: &str, text: &str, context: &str) -> IngestResult<Value> {
        if text.is_empty() {
            return Ok(Value::Null);
        }
        let value = match cell_type {
            "s" => {
                let index: usize = text
                    .trim()
                    .parse()
                    .map_err(|_| self.parse_err(context, format!("bad shared string index '{}'", text)))?;
                let s = self.shared_strings.get(index).ok_or_else(|| {
                    self.parse_err(context, format!("shared string {} out of range", index))
                })?;
                Value::String(s.clone())
            }
            "b" => Value::Bool(text.trim() == "1"),
            "str" | "inlineStr" | "e" => Value::String(text.to_string()),
            _ => number_value(text.trim()),
        };
        Ok(value)
    }

    /// Header and records of a sheet
    ///
    /// The header is the first row with a non-empty cell. Rows with only
    /// empty cells are skipped; string values are trimmed.
    pub fn read_sheet(&mut self, sheet: &SheetInfo) -> IngestResult<TabularData> {
        let rows = self.read_rows(sheet)?;
        let is_blank = |v: &Value| match v {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        };

        let mut header: Option<Vec<String>> = None;
        let mut records = Vec::new();
        for row in rows {
            let Some(names) = &header else {
                let names: Vec<String> = row
                    .iter()
                    .map(|v| match v {
                        Value::Null => String::new(),
                        Value::String(s) => s.trim().to_string(),
                        other => other.to_string(),
                    })
                    .collect();
                if names.iter().any(|n| !n.is_empty()) {
                    header = Some(names);
                }
                continue;
            };

            let mut record = Record::new();
            for (i, name) in names.iter().enumerate() {
                if name.is_empty() {
                    continue;
                }
                let value = match row.get(i) {
                    Some(Value::String(s)) if s.trim().is_empty() => Value::Null,
                    Some(Value::String(s)) => Value::String(s.trim().to_string()),
                    Some(v) => v.clone(),
                    None => Value::Null,
                };
                record.insert(name.clone(), value);
            }
            if record.values().any(|v| !is_blank(v)) {
                records.push(record);
            }
        }

        let headers = header
            .unwrap_or_default()
            .into_iter()
            .filter(|h| !h.is_empty())
            .collect();
        tracing::debug!(source = %self.source_name, sheet = %sheet.name, rows = records.len(), "Parsed sheet");
        Ok(TabularData {
            headers,
            rows: records,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Build a minimal workbook; each sheet is a list of rows of cell XML
    pub(crate) fn build_xlsx(sheets: &[(&str, &str)], shared: &[&str]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = SimpleFileOptions::default();

            let mut wb = String::from(
                r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
            );
            let mut rels = String::from(
                r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
            );
            for (i, (name, _)) in sheets.iter().enumerate() {
                wb.push_str(&format!(
                    r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                    name,
                    i + 1,
                    i + 1
                ));
                rels.push_str(&format!(
                    r#"<Relationship Id="rId{}" Type="worksheet" Target="worksheets/sheet{}.xml"/>"#,
                    i + 1,
                    i + 1
                ));
            }
            wb.push_str("</sheets></workbook>");
            rels.push_str("</Relationships>");

            zip.start_file("xl/workbook.xml", opts).unwrap();
            zip.write_all(wb.as_bytes()).unwrap();
            zip.start_file("xl/_rels/workbook.xml.rels", opts).unwrap();
            zip.write_all(rels.as_bytes()).unwrap();

            let mut sst = String::from(r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#);
            for s in shared {
                sst.push_str(&format!("<si><t>{}</t></si>", s));
            }
            sst.push_str("</sst>");
            zip.start_file("xl/sharedStrings.xml", opts).unwrap();
            zip.write_all(sst.as_bytes()).unwrap();

            for (i, (_, data)) in sheets.iter().enumerate() {
                zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), opts)
                    .unwrap();
                let xml = format!(
                    r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData></worksheet>"#,
                    data
                );
                zip.write_all(xml.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("Z9"), Some(25));
        assert_eq!(column_index("AB12"), Some(27));
        assert_eq!(column_index("12"), None);
    }

    #[test]
    fn test_read_sheet_with_shared_and_inline_strings() {
        let sheet = concat!(
            r#"<row r="1"/>"#,
            r#"<row r="2"><c r="A2" t="s"><v>0</v></c><c r="B2" t="s"><v>1</v></c><c r="C2" t="s"><v>2</v></c></row>"#,
            r#"<row r="3"><c r="A3"><v>1</v></c><c r="B3" t="inlineStr"><is><t>Tea &amp; Co</t></is></c><c r="C3" t="b"><v>1</v></c></row>"#,
            r#"<row r="4"><c r="A4"><v>2.5</v></c><c r="C4" t="b"><v>0</v></c></row>"#,
            r#"<row r="5"><c r="A5" t="str"><v> </v></c></row>"#,
        );
        let bytes = build_xlsx(&[("CN2025", sheet)], &["code", "name", "active"]);

        let mut wb = Workbook::open("catalog", bytes).unwrap();
        assert_eq!(wb.sheet_names(), vec!["CN2025"]);
        let info = wb.select_sheet(Some("CN2025"), false).unwrap();
        let data = wb.read_sheet(&info).unwrap();

        assert_eq!(data.headers, vec!["code", "name", "active"]);
        assert_eq!(data.rows.len(), 2);
        assert_eq!(data.rows[0]["code"], Value::from(1));
        assert_eq!(data.rows[0]["name"], Value::String("Tea & Co".to_string()));
        assert_eq!(data.rows[0]["active"], Value::Bool(true));
        assert_eq!(data.rows[1]["code"], Value::from(2.5));
        assert_eq!(data.rows[1]["name"], Value::Null);
    }

    #[test]
    fn test_select_sheet() {
        let bytes = build_xlsx(&[("First", ""), ("Second", "")], &[]);
        let wb = Workbook::open("wb", bytes).unwrap();
        assert_eq!(wb.select_sheet(None, false).unwrap().name, "First");
        assert_eq!(wb.select_sheet(Some("Second"), true).unwrap().name, "First");
        assert_eq!(
            wb.select_sheet(Some("Second"), false).unwrap().part,
            "xl/worksheets/sheet2.xml"
        );
        assert!(wb.select_sheet(Some("Third"), false).is_err());
    }
}
