//! Archive unpacking and format detection
//!
//! A `.zip` archive yields one member (chosen by name or by extension
//! priority), a `.gz` file is decompressed, and the resulting file name
//! determines the format unless the source declares one.

use flate2::read::GzDecoder;
use std::io::{Cursor, Read};

use crate::error::{IngestError, IngestResult};
use crate::models::{DataFormat, SourceFormat};

/// Preferred member formats, best first
const MEMBER_PRIORITY: [DataFormat; 5] = [
    DataFormat::Xml,
    DataFormat::Jsonl,
    DataFormat::Json,
    DataFormat::Csv,
    DataFormat::Xlsx,
];

/// Fetched content ready for a parser
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub bytes: Vec<u8>,
    /// Name of the innermost file (after unpacking)
    pub file_name: String,
    pub format: DataFormat,
}

fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Pick a member from a list of archive entry names
///
/// An explicit `preferred` name matches exactly or by base name. Otherwise
/// the entry with the best format priority wins, with a bonus for shallow
/// paths.
pub fn select_zip_member<'a>(
    names: &'a [String],
    preferred: Option<&str>,
) -> Result<&'a str, String> {
    let files: Vec<&String> = names.iter().filter(|n| !n.ends_with('/')).collect();
    if files.is_empty() {
        return Err("ZIP contains no files".to_string());
    }

    if let Some(preferred) = preferred {
        if let Some(hit) = files.iter().find(|n| n.as_str() == preferred) {
            return Ok(hit.as_str());
        }
        let wanted = base_name(preferred);
        return files
            .iter()
            .find(|n| base_name(n) == wanted)
            .map(|n| n.as_str())
            .ok_or_else(|| format!("ZIP member not found: {}", preferred));
    }

    let score = |name: &str| -> i64 {
        let format_score = DataFormat::from_extension(name)
            .and_then(|f| MEMBER_PRIORITY.iter().position(|p| *p == f))
            .map(|i| 100 - i as i64)
            .unwrap_or(0);
        let depth_bonus = (10 - name.matches('/').count() as i64).max(0);
        format_score + depth_bonus
    };

    let mut best = files[0].as_str();
    let mut best_score = score(best);
    for name in files.iter().skip(1) {
        let s = score(name);
        if s > best_score {
            best = name.as_str();
            best_score = s;
        }
    }
    Ok(best)
}

fn unzip(
    source_name: &str,
    bytes: &[u8],
    member: Option<&str>,
) -> IngestResult<(String, Vec<u8>)> {
    let zip_err = |e: zip::result::ZipError| IngestError::parse(source_name, "zip", e.to_string());

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(zip_err)?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let pick = select_zip_member(&names, member)
        .map_err(|e| IngestError::parse(source_name, "zip", e))?
        .to_string();
    tracing::info!(source = source_name, member = %pick, "Selected ZIP member");

    let mut entry = archive.by_name(&pick).map_err(zip_err)?;
    let mut out = Vec::new();
    entry
        .read_to_end(&mut out)
        .map_err(|e| IngestError::parse(source_name, format!("zip member {}", pick), e.to_string()))?;
    Ok((base_name(&pick).to_string(), out))
}

fn gunzip(source_name: &str, bytes: &[u8]) -> IngestResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| IngestError::parse(source_name, "gzip", e.to_string()))?;
    Ok(out)
}

/// Unpack archives and resolve the content format
pub fn prepare_input(
    source_name: &str,
    file_name: &str,
    bytes: Vec<u8>,
    declared: SourceFormat,
    member: Option<&str>,
) -> IngestResult<PreparedInput> {
    let mut name = file_name.to_string();
    let mut bytes = bytes;

    if name.to_lowercase().ends_with(".zip") {
        let (inner, content) = unzip(source_name, &bytes, member)?;
        name = inner;
        bytes = content;
    }

    if name.to_lowercase().ends_with(".gz") {
        bytes = gunzip(source_name, &bytes)?;
        name = name[..name.len() - 3].to_string();
        if name.is_empty() {
            name = "input".to_string();
        }
    }

    let format = match declared.explicit() {
        Some(format) => format,
        None => DataFormat::from_extension(&name).ok_or_else(|| {
            IngestError::config(
                format!("sources.{}.format", source_name),
                format!(
                    "could not infer format from file name '{}'; set the format explicitly",
                    name
                ),
            )
        })?,
    };
    tracing::debug!(source = source_name, file = %name, format = %format, "Prepared input");

    Ok(PreparedInput {
        bytes,
        file_name: name,
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_member_priority() {
        let n = names(&["readme.txt", "data/items.csv", "items.xml", "docs/"]);
        assert_eq!(select_zip_member(&n, None).unwrap(), "items.xml");
    }

    #[test]
    fn test_member_depth_bonus() {
        let n = names(&["a/b/c/items.csv", "items.csv"]);
        assert_eq!(select_zip_member(&n, None).unwrap(), "items.csv");
    }

    #[test]
    fn test_member_by_basename() {
        let n = names(&["export/2026/sales.csv", "export/2026/stock.csv"]);
        assert_eq!(
            select_zip_member(&n, Some("stock.csv")).unwrap(),
            "export/2026/stock.csv"
        );
        assert!(select_zip_member(&n, Some("missing.csv")).is_err());
    }

    #[test]
    fn test_zip_then_detect() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("inner/data.jsonl", SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"{\"id\":1}\n").unwrap();
            zip.finish().unwrap();
        }

        let prepared =
            prepare_input("feed", "feed.zip", buf.into_inner(), SourceFormat::Auto, None).unwrap();
        assert_eq!(prepared.format, DataFormat::Jsonl);
        assert_eq!(prepared.file_name, "data.jsonl");
        assert_eq!(prepared.bytes, b"{\"id\":1}\n");
    }

    #[test]
    fn test_gzip_then_detect() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"id,amount\n1,2\n").unwrap();
        let gz = enc.finish().unwrap();

        let prepared = prepare_input("s", "export.csv.gz", gz, SourceFormat::Auto, None).unwrap();
        assert_eq!(prepared.format, DataFormat::Csv);
        assert_eq!(prepared.bytes, b"id,amount\n1,2\n");
    }

    #[test]
    fn test_unknown_extension_needs_explicit_format() {
        let err = prepare_input("s", "export.dat", b"x".to_vec(), SourceFormat::Auto, None)
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");

        let ok = prepare_input("s", "export.dat", b"x".to_vec(), SourceFormat::Csv, None).unwrap();
        assert_eq!(ok.format, DataFormat::Csv);
    }
}
