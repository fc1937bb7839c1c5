//! XML hierarchy inference
//!
//! Element paths are counted up to five segments deep. Under every
//! `/Root/Container` the most frequent repeating item becomes a top-level
//! collection (`/Root/Container/Item`). Repeating items two levels below a
//! chosen item (`/Root/Container/Item/Sub/SubItem`) become child collections
//! keyed back to their parent through `_parent_pk`. Deeper nesting is not
//! inferred.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{CollectionSpec, PARENT_FK_COLUMN, PkSpec, XmlSourceMapping};
use crate::parse::XmlElement;

/// Longest element path considered, in segments
pub const MAX_PATH_DEPTH: usize = 5;

const TOP_LEVEL_DEPTH: usize = 3;

/// Occurrences needed before an element counts as repeating
const MIN_OCCURRENCES: usize = 2;

const ATTRIBUTE_CANDIDATES: [&str; 5] = ["@id", "@ID", "@code", "@Code", "@key"];
const ELEMENT_CANDIDATES: [&str; 5] = ["id", "ID", "code", "Code", "key"];

static EXCLUDED_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(changecode|changetype|status|type|version|flag)$").expect("Invalid regex")
});

/// Element path counts in first-seen order
#[derive(Default)]
struct PathStats {
    order: Vec<Vec<String>>,
    counts: HashMap<Vec<String>, usize>,
}

impl PathStats {
    fn collect(root: &XmlElement) -> Self {
        let mut stats = Self::default();
        root.walk(&mut |path: &[String], _: &XmlElement| {
            if path.len() > MAX_PATH_DEPTH {
                return;
            }
            let count = stats.counts.entry(path.to_vec()).or_insert(0);
            if *count == 0 {
                stats.order.push(path.to_vec());
            }
            *count += 1;
        });
        stats
    }

    fn count(&self, path: &[String]) -> usize {
        self.counts.get(path).copied().unwrap_or(0)
    }

    /// For each prefix of `depth - 1` segments, the most frequent repeating
    /// element at `depth` (ties go to the first seen)
    fn dominant_items(&self, depth: usize, within: impl Fn(&[String]) -> bool) -> Vec<Vec<String>> {
        let mut best: Vec<(Vec<String>, Vec<String>, usize)> = Vec::new();
        for path in self.order.iter().filter(|p| p.len() == depth) {
            let prefix = &path[..depth - 1];
            if !within(prefix) {
                continue;
            }
            let count = self.count(path);
            if count < MIN_OCCURRENCES {
                continue;
            }
            match best.iter_mut().find(|(p, _, _)| p.as_slice() == prefix) {
                Some(entry) if count > entry.2 => {
                    entry.1 = path.clone();
                    entry.2 = count;
                }
                Some(_) => {}
                None => best.push((prefix.to_vec(), path.clone(), count)),
            }
        }
        best.into_iter().map(|(_, path, _)| path).collect()
    }
}

fn segments_of(path: &[String]) -> Vec<&str> {
    path.iter().map(String::as_str).collect()
}

fn candidate_value<'a>(element: &'a XmlElement, candidate: &str) -> Option<&'a str> {
    let value = match candidate.strip_prefix('@') {
        Some(attr) => element.attr(attr),
        None => element
            .children
            .iter()
            .find(|c| c.name == candidate)
            .map(|c| c.text.as_str()),
    }?;
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn is_present(element: &XmlElement, candidate: &str) -> bool {
    match candidate.strip_prefix('@') {
        Some(attr) => element.attr(attr).is_some(),
        None => element.children.iter().any(|c| c.name == candidate),
    }
}

/// Key candidates for a set of elements, best first
///
/// Candidates are the conventional key names plus every observed
/// attribute, minus status-like names. Only observed candidates are kept,
/// ranked by the distinct rate among non-null values minus a quarter of
/// the null rate.
pub fn rank_pk_candidates(elements: &[&XmlElement]) -> Vec<String> {
    if elements.is_empty() {
        return Vec::new();
    }

    let mut candidates: Vec<String> = ATTRIBUTE_CANDIDATES
        .iter()
        .chain(ELEMENT_CANDIDATES.iter())
        .map(|c| c.to_string())
        .collect();
    for element in elements {
        for (name, _) in &element.attrs {
            let candidate = format!("@{}", name);
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    }

    let total = elements.len() as f64;
    let mut scored: Vec<(String, f64)> = candidates
        .into_iter()
        .filter(|c| !EXCLUDED_KEY.is_match(c.trim_start_matches('@')))
        .filter(|c| elements.iter().any(|e| is_present(e, c)))
        .map(|c| {
            let values: Vec<&str> = elements
                .iter()
                .filter_map(|e| candidate_value(e, &c))
                .collect();
            let distinct: HashSet<&str> = values.iter().copied().collect();
            let null_ratio = (total - values.len() as f64) / total;
            let distinct_rate = if values.is_empty() {
                0.0
            } else {
                distinct.len() as f64 / values.len() as f64
            };
            let score = distinct_rate - 0.25 * null_ratio;
            (c, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().map(|(c, _)| c).collect()
}

/// Infer the collections of an XML document
///
/// `existing` contributes names already in use so that new child
/// collections do not collide with them.
pub fn infer_xml(
    root: &XmlElement,
    source_name: &str,
    existing: Option<&XmlSourceMapping>,
) -> XmlSourceMapping {
    let stats = PathStats::collect(root);
    let mut collections: BTreeMap<String, CollectionSpec> = BTreeMap::new();
    let mut taken: HashSet<String> = existing
        .map(|m| m.collections.keys().cloned().collect())
        .unwrap_or_default();

    let parents = stats.dominant_items(TOP_LEVEL_DEPTH, |_| true);
    let mut parent_names: Vec<(Vec<String>, String)> = Vec::new();
    for path in &parents {
        let name = format!("{}_{}", source_name, path[1]);
        if taken.contains(&name) && existing.is_some_and(|m| m.collections.contains_key(&name)) {
            parent_names.push((path.clone(), name));
            continue;
        }
        let elements = root.select(&segments_of(path));
        let spec = CollectionSpec {
            path: Some(format!("/{}", path.join("/"))),
            pk: PkSpec::new(rank_pk_candidates(&elements)),
            ..Default::default()
        };
        taken.insert(name.clone());
        collections.insert(name.clone(), spec);
        parent_names.push((path.clone(), name));
    }

    let children = stats.dominant_items(MAX_PATH_DEPTH, |prefix| {
        parents.iter().any(|p| prefix.starts_with(p))
    });
    for path in &children {
        let Some((parent_path, parent_name)) =
            parent_names.iter().find(|(p, _)| path.starts_with(p))
        else {
            continue;
        };
        let mut name = format!("{}_{}", source_name, path[3]);
        if taken.contains(&name) {
            name = format!("{}_{}_{}", source_name, parent_path[1], path[3]);
        }
        if taken.contains(&name) {
            continue;
        }

        let mut elements = Vec::new();
        for parent in root.select(&segments_of(parent_path)) {
            elements.extend(parent.descendants_at(&segments_of(&path[TOP_LEVEL_DEPTH..])));
        }
        let spec = CollectionSpec {
            path: Some(format!("/{}", path.join("/"))),
            pk: PkSpec::new(rank_pk_candidates(&elements)),
            parent: Some(parent_name.clone()),
            parent_fk: Some(PARENT_FK_COLUMN.to_string()),
            ..Default::default()
        };
        taken.insert(name.clone());
        collections.insert(name, spec);
    }

    tracing::debug!(
        source = source_name,
        root = %root.name,
        collections = collections.len(),
        "Inferred XML hierarchy"
    );
    XmlSourceMapping {
        root: root.name.clone(),
        collections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_xml;

    const CATALOG: &str = r#"<IXF>
  <Units>
    <Unit id="u1" status="A"><Name>Kilo</Name>
      <Parts><Part code="p1"/><Part code="p2"/></Parts>
    </Unit>
    <Unit id="u2" status="A"><Name>Gram</Name>
      <Parts><Part code="p3"/><Part code="p4"/></Parts>
    </Unit>
  </Units>
  <Header><Created>2026-01-01</Created></Header>
</IXF>"#;

    #[test]
    fn test_infers_parent_and_child() {
        let root = parse_xml("catalog", CATALOG.as_bytes()).unwrap();
        let mapping = infer_xml(&root, "catalog", None);
        assert_eq!(mapping.root, "IXF");
        assert_eq!(mapping.collections.len(), 2);

        let units = &mapping.collections["catalog_Units"];
        assert_eq!(units.path.as_deref(), Some("/IXF/Units/Unit"));
        assert_eq!(units.pk.prefer[0], "@id");
        assert!(!units.pk.prefer.iter().any(|c| c == "@status"));
        assert!(units.parent.is_none());

        let parts = &mapping.collections["catalog_Parts"];
        assert_eq!(parts.path.as_deref(), Some("/IXF/Units/Unit/Parts/Part"));
        assert_eq!(parts.parent.as_deref(), Some("catalog_Units"));
        assert_eq!(parts.parent_fk.as_deref(), Some("_parent_pk"));
        assert_eq!(parts.pk.prefer, vec!["@code"]);
    }

    #[test]
    fn test_singletons_are_not_collections() {
        let root = parse_xml("catalog", CATALOG.as_bytes()).unwrap();
        let mapping = infer_xml(&root, "catalog", None);
        assert!(!mapping.collections.contains_key("catalog_Header"));
    }

    #[test]
    fn test_child_name_collision_is_qualified() {
        let root = parse_xml("catalog", CATALOG.as_bytes()).unwrap();
        let mut existing = XmlSourceMapping::default();
        existing
            .collections
            .insert("catalog_Parts".to_string(), CollectionSpec::default());
        let mapping = infer_xml(&root, "catalog", Some(&existing));
        assert!(mapping.collections.contains_key("catalog_Units_Parts"));
    }

    #[test]
    fn test_ranking_prefers_unique_over_null() {
        let root = parse_xml(
            "x",
            br#"<R><C><I id="1" key="a"/><I id="1" key="b"/><I key="c"/></C></R>"#,
        )
        .unwrap();
        let items = root.select(&["R", "C", "I"]);
        let ranked = rank_pk_candidates(&items);
        assert_eq!(ranked[0], "@key");
        assert!(ranked.contains(&"@id".to_string()));
    }

    #[test]
    fn test_sparse_unique_candidate_outranks_dense_duplicates() {
        let root = parse_xml(
            "x",
            br#"<R><C><I ref="r1" key="a"/><I ref="r2" key="a"/><I key="b"/><I key="c"/></C></R>"#,
        )
        .unwrap();
        let items = root.select(&["R", "C", "I"]);
        // @ref: 1.0 - 0.25 * 0.5, @key: 0.75 - 0.0
        assert_eq!(rank_pk_candidates(&items), vec!["@ref", "@key"]);
    }
}
