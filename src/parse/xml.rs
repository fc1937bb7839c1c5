//! XML element tree
//!
//! Documents are read with quick-xml into a small owned tree. Namespace
//! prefixes are stripped from element and attribute names and `xmlns`
//! declarations are dropped. Element text is trimmed.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

use crate::error::{IngestError, IngestResult};

/// One element with its attributes, children and text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

/// Name without namespace prefix (`ns:Item` -> `Item`)
pub fn strip_ns(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Segments of an absolute element path (`/Root/Container/Item`)
pub fn path_segments(path: &str) -> Vec<&str> {
    path.trim()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

fn element_from_start(
    source_name: &str,
    e: &BytesStart<'_>,
) -> IngestResult<XmlElement> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut element = XmlElement {
        name: strip_ns(&name).to_string(),
        ..Default::default()
    };

    for attr in e.attributes() {
        let attr = attr.map_err(|err| {
            IngestError::parse(source_name, format!("element <{}>", name), err.to_string())
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|err| {
                IngestError::parse(source_name, format!("element <{}>", name), err.to_string())
            })?
            .into_owned();
        element.attrs.push((strip_ns(&key).to_string(), value));
    }
    Ok(element)
}

/// Parse a document into its root element
pub fn parse_xml(source_name: &str, bytes: &[u8]) -> IngestResult<XmlElement> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = std::str::from_utf8(bytes).map_err(|e| {
        IngestError::parse(
            source_name,
            format!("byte offset {}", e.valid_up_to()),
            "XML content is not valid UTF-8",
        )
    })?;

    let mut reader = Reader::from_str(text);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    let position_err = |reader: &Reader<&[u8]>, message: String| {
        IngestError::parse(
            source_name,
            format!("byte offset {}", reader.buffer_position()),
            message,
        )
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(element_from_start(source_name, &e)?),
            Ok(Event::Empty(e)) => {
                let element = element_from_start(source_name, &e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => {}
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(current) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| position_err(&reader, e.to_string()))?;
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let Some(mut element) = stack.pop() else {
                    return Err(position_err(&reader, "unexpected closing tag".to_string()));
                };
                element.text = element.text.trim().to_string();
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(position_err(&reader, e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(position_err(
            &reader,
            format!("unclosed element <{}>", stack[stack.len() - 1].name),
        ));
    }
    root.ok_or_else(|| IngestError::parse(source_name, "document", "XML is empty"))
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Direct children whose name matches case-insensitively
    pub fn children_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a XmlElement> {
        self.children
            .iter()
            .filter(move |c| c.name.eq_ignore_ascii_case(name))
    }

    /// Descendants at a relative path below this element
    pub fn descendants_at(&self, segments: &[&str]) -> Vec<&XmlElement> {
        let mut current = vec![self];
        for segment in segments {
            current = current
                .into_iter()
                .flat_map(|e| e.children_named(segment))
                .collect();
        }
        current
    }

    /// Elements at an absolute path, starting with the root's own name
    pub fn select(&self, segments: &[&str]) -> Vec<&XmlElement> {
        match segments.split_first() {
            Some((root, rest)) if root.eq_ignore_ascii_case(&self.name) => {
                self.descendants_at(rest)
            }
            _ => Vec::new(),
        }
    }

    /// Lossless JSON form
    ///
    /// Attributes go under `"@"`, text under `"#text"`, and children are
    /// grouped by name (a single child as an object, repeats as an array).
    pub fn to_lossless(&self) -> Map<String, Value> {
        let mut obj = Map::new();
        if !self.attrs.is_empty() {
            let attrs: Map<String, Value> = self
                .attrs
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            obj.insert("@".to_string(), Value::Object(attrs));
        }

        let mut order: Vec<&str> = Vec::new();
        let mut grouped: std::collections::HashMap<&str, Vec<Value>> = Default::default();
        for child in &self.children {
            let entry = grouped.entry(child.name.as_str()).or_insert_with(|| {
                order.push(child.name.as_str());
                Vec::new()
            });
            entry.push(Value::Object(child.to_lossless()));
        }
        for name in order {
            if let Some(mut items) = grouped.remove(name) {
                let value = if items.len() == 1 {
                    items.remove(0)
                } else {
                    Value::Array(items)
                };
                obj.insert(name.to_string(), value);
            }
        }

        if !self.text.is_empty() {
            obj.insert("#text".to_string(), Value::String(self.text.clone()));
        }
        obj
    }

    /// Visit every element with its absolute path
    pub fn walk<F>(&self, f: &mut F)
    where
        F: FnMut(&[String], &XmlElement),
    {
        let mut path = Vec::new();
        self.walk_inner(&mut path, f);
    }

    fn walk_inner<F>(&self, path: &mut Vec<String>, f: &mut F)
    where
        F: FnMut(&[String], &XmlElement),
    {
        path.push(self.name.clone());
        f(path, self);
        for child in &self.children {
            child.walk_inner(path, f);
        }
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOC: &str = r#"<?xml version="1.0"?>
<ix:IXF xmlns:ix="urn:x" xmlns="urn:y">
  <Units>
    <Unit id="u1"><Name lang="nl">Kilo</Name><Parts><Part id="p1"/><Part id="p2"/></Parts></Unit>
    <Unit id="u2"><Name>Gram</Name></Unit>
  </Units>
  <Note><![CDATA[a < b]]></Note>
</ix:IXF>"#;

    #[test]
    fn test_parse_strips_namespaces() {
        let root = parse_xml("units", DOC.as_bytes()).unwrap();
        assert_eq!(root.name, "IXF");
        assert!(root.attrs.is_empty());
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[1].text, "a < b");
    }

    #[test]
    fn test_select_is_case_insensitive() {
        let root = parse_xml("units", DOC.as_bytes()).unwrap();
        let units = root.select(&path_segments("/ixf/UNITS/unit"));
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].attr("id"), Some("u1"));

        let parts = units[0].descendants_at(&["Parts", "Part"]);
        assert_eq!(parts.len(), 2);
        assert!(root.select(&["Other", "Units"]).is_empty());
    }

    #[test]
    fn test_lossless_form() {
        let root = parse_xml("units", DOC.as_bytes()).unwrap();
        let unit = &root.select(&["IXF", "Units", "Unit"])[0];
        let obj = Value::Object(unit.to_lossless());
        assert_eq!(
            obj,
            json!({
                "@": {"id": "u1"},
                "Name": {"@": {"lang": "nl"}, "#text": "Kilo"},
                "Parts": {"Part": [{"@": {"id": "p1"}}, {"@": {"id": "p2"}}]}
            })
        );
    }

    #[test]
    fn test_walk_paths() {
        let root = parse_xml("units", DOC.as_bytes()).unwrap();
        let mut paths = Vec::new();
        root.walk(&mut |path: &[String], _: &XmlElement| paths.push(path.join("/")));
        assert!(paths.contains(&"IXF/Units/Unit/Parts/Part".to_string()));
        assert_eq!(paths.iter().filter(|p| *p == "IXF/Units/Unit").count(), 2);
    }

    #[test]
    fn test_malformed_is_parse_error() {
        let err = parse_xml("bad", b"<a><b></a>").unwrap_err();
        assert_eq!(err.kind(), "parse");
        assert!(parse_xml("empty", b"   ").is_err());
    }
}
