//! Flat-format collection inference (CSV, XLSX, JSON, JSONL)

use serde_json::Value;
use std::collections::BTreeSet;

use super::default_prefer_for;
use crate::error::IngestResult;
use crate::flatten::sanitize_table_name;
use crate::models::{CollectionSpec, PkSpec, Record, SourceSpec};
use crate::parse::json::records_at;
use crate::parse::{ParsedDocument, Workbook};

/// Records sampled for field names
const SAMPLE_SIZE: usize = 1000;

fn spec_with(prefer: Vec<String>) -> CollectionSpec {
    CollectionSpec {
        pk: PkSpec::new(prefer),
        ..Default::default()
    }
}

/// Field names seen in the first records
fn sample_fields<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    for record in records.into_iter().take(SAMPLE_SIZE) {
        seen.extend(record.keys().cloned());
    }
    seen.into_iter().collect()
}

fn prefer_from(fields: &[String]) -> Vec<String> {
    default_prefer_for(fields.iter().map(String::as_str))
}

/// Infer collections of a flat-format source
pub fn infer_flat(
    parsed: &mut ParsedDocument,
    source: &SourceSpec,
) -> IngestResult<Vec<(String, CollectionSpec)>> {
    let out = match parsed {
        ParsedDocument::Csv(data) => {
            vec![(source.qualify("data"), spec_with(prefer_from(&data.headers)))]
        }
        ParsedDocument::Xlsx(workbook) => infer_workbook(workbook, source)?,
        ParsedDocument::Jsonl(lines) => {
            let records: Vec<_> = lines
                .iter()
                .flat_map(|line| records_at(line, "$"))
                .take(SAMPLE_SIZE)
                .collect();
            let mut spec = spec_with(prefer_from(&sample_fields(&records)));
            spec.path = Some("$".to_string());
            vec![(source.qualify("records"), spec)]
        }
        ParsedDocument::Json(root) => vec![infer_json(root, source)],
        ParsedDocument::Xml(_) => Vec::new(),
    };
    Ok(out)
}

fn infer_workbook(
    workbook: &mut Workbook,
    source: &SourceSpec,
) -> IngestResult<Vec<(String, CollectionSpec)>> {
    let mut out = Vec::new();

    if !source.collections.is_empty() {
        for (short, ov) in &source.collections {
            let mut spec = CollectionSpec::default();
            spec.overlay(ov);
            let sheet = workbook.select_sheet(
                spec.sheet.as_deref().or(source.sheet.as_deref()),
                spec.use_first_sheet || source.use_first_sheet,
            )?;
            if ov.pk.is_none() {
                let data = workbook.read_sheet(&sheet)?;
                spec.pk = PkSpec::new(prefer_from(&data.headers));
            }
            out.push((source.qualify(short), spec));
        }
        return Ok(out);
    }

    if source.use_first_sheet || source.sheet.is_some() {
        let sheet = workbook.select_sheet(source.sheet.as_deref(), source.use_first_sheet)?;
        let data = workbook.read_sheet(&sheet)?;
        let mut spec = spec_with(prefer_from(&data.headers));
        spec.use_first_sheet = source.use_first_sheet;
        if !source.use_first_sheet {
            spec.sheet = Some(sheet.name.clone());
        }
        out.push((source.qualify("data"), spec));
        return Ok(out);
    }

    for sheet in workbook.sheets().to_vec() {
        let data = workbook.read_sheet(&sheet)?;
        let mut spec = spec_with(prefer_from(&data.headers));
        spec.sheet = Some(sheet.name.clone());
        out.push((source.qualify(&sanitize_table_name(&sheet.name)), spec));
    }
    Ok(out)
}

/// Path of the first array whose items are all objects, depth first
fn find_record_array(value: &Value, path: &mut Vec<String>) -> Option<Vec<String>> {
    match value {
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            Some(path.clone())
        }
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                if let Some(found) = find_record_array(child, path) {
                    return Some(found);
                }
                path.pop();
            }
            None
        }
        _ => None,
    }
}

fn json_path(segments: &[String]) -> String {
    if segments.is_empty() {
        "$".to_string()
    } else {
        format!("$.{}", segments.join("."))
    }
}

fn infer_json(root: &Value, source: &SourceSpec) -> (String, CollectionSpec) {
    let (name, path) = if let Some(records_path) = source.records_path.as_deref() {
        let path = if records_path.starts_with('$') {
            records_path.to_string()
        } else {
            format!("$.{}", records_path)
        };
        (source.qualify("records"), path)
    } else if let Some(segments) = find_record_array(root, &mut Vec::new()) {
        let name = match segments.last() {
            None => source.qualify("records"),
            Some(last) => source.qualify(&sanitize_table_name(last)),
        };
        (name, json_path(&segments))
    } else if root.is_object() {
        (source.qualify("root"), "$".to_string())
    } else {
        (source.qualify("value"), "$".to_string())
    };

    let records = records_at(root, &path);
    let mut spec = spec_with(prefer_from(&sample_fields(&records)));
    spec.path = Some(path);
    (name, spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CollectionOverride;
    use crate::parse::TabularData;
    use crate::parse::xlsx::tests::build_xlsx;
    use serde_json::json;

    fn source(name: &str) -> SourceSpec {
        SourceSpec {
            name: name.to_string(),
            file: Some(format!("./{}.dat", name)),
            ..Default::default()
        }
    }

    #[test]
    fn test_csv_single_collection() {
        let mut parsed = ParsedDocument::Csv(TabularData {
            headers: vec!["Id".to_string(), "amount".to_string()],
            rows: Vec::new(),
        });
        let out = infer_flat(&mut parsed, &source("sales")).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "sales_data");
        assert_eq!(out[0].1.pk.prefer, vec!["Id"]);
        assert!(out[0].1.enabled);
        assert_eq!(out[0].1.write_disposition, None);
    }

    #[test]
    fn test_json_finds_nested_array() {
        let mut parsed = ParsedDocument::Json(json!({
            "meta": {"count": 2},
            "result": {"items": [{"code": "a"}, {"code": "b"}]}
        }));
        let out = infer_flat(&mut parsed, &source("api")).unwrap();
        assert_eq!(out[0].0, "api_items");
        assert_eq!(out[0].1.path.as_deref(), Some("$.result.items"));
        assert_eq!(out[0].1.pk.prefer, vec!["code"]);
    }

    #[test]
    fn test_json_root_array_and_records_path() {
        let mut parsed = ParsedDocument::Json(json!([{"id": 1}]));
        let out = infer_flat(&mut parsed, &source("api")).unwrap();
        assert_eq!(out[0].0, "api_records");
        assert_eq!(out[0].1.path.as_deref(), Some("$"));

        let mut src = source("api");
        src.records_path = Some("data.rows".to_string());
        let mut parsed = ParsedDocument::Json(json!({"data": {"rows": [{"key": "k"}]}}));
        let out = infer_flat(&mut parsed, &src).unwrap();
        assert_eq!(out[0].0, "api_records");
        assert_eq!(out[0].1.path.as_deref(), Some("$.data.rows"));
        assert_eq!(out[0].1.pk.prefer, vec!["key"]);
    }

    #[test]
    fn test_json_object_without_arrays() {
        let mut parsed = ParsedDocument::Json(json!({"a": 1}));
        assert_eq!(infer_flat(&mut parsed, &source("cfg")).unwrap()[0].0, "cfg_root");
        let mut parsed = ParsedDocument::Json(json!(3));
        assert_eq!(infer_flat(&mut parsed, &source("cfg")).unwrap()[0].0, "cfg_value");
    }

    #[test]
    fn test_jsonl_records() {
        let mut parsed = ParsedDocument::Jsonl(vec![json!({"ID": 1}), json!({"ID": 2})]);
        let out = infer_flat(&mut parsed, &source("feed")).unwrap();
        assert_eq!(out[0].0, "feed_records");
        assert_eq!(out[0].1.pk.prefer, vec!["ID"]);
    }

    fn two_sheet_workbook() -> Workbook {
        let cn = r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row><row r="2"><c r="A2"><v>1</v></c></row>"#;
        let notes = r#"<row r="1"><c r="A1" t="s"><v>1</v></c></row>"#;
        let bytes = build_xlsx(&[("CN 2025", cn), ("Notes", notes)], &["code", "text"]);
        Workbook::open("catalog", bytes).unwrap()
    }

    #[test]
    fn test_xlsx_one_collection_per_sheet() {
        let mut parsed = ParsedDocument::Xlsx(two_sheet_workbook());
        let out = infer_flat(&mut parsed, &source("catalog")).unwrap();
        let names: Vec<&str> = out.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["catalog_CN_2025", "catalog_Notes"]);
        assert_eq!(out[0].1.sheet.as_deref(), Some("CN 2025"));
        assert_eq!(out[0].1.pk.prefer, vec!["code"]);
    }

    #[test]
    fn test_xlsx_first_sheet_and_overrides() {
        let mut src = source("catalog");
        src.use_first_sheet = true;
        let mut parsed = ParsedDocument::Xlsx(two_sheet_workbook());
        let out = infer_flat(&mut parsed, &src).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "catalog_data");
        assert!(out[0].1.use_first_sheet);

        let mut src = source("catalog");
        src.collections.insert(
            "notes".to_string(),
            CollectionOverride {
                sheet: Some("Notes".to_string()),
                ..Default::default()
            },
        );
        let mut parsed = ParsedDocument::Xlsx(two_sheet_workbook());
        let out = infer_flat(&mut parsed, &src).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "catalog_notes");
        assert_eq!(out[0].1.sheet.as_deref(), Some("Notes"));
    }
}
