//! Snapshot to tree reconstruction.
//!
//! The in-page script hands back `{ "rootId": "...", "map": { id: record } }`.
//! Records are untrusted: a record that does not parse is skipped, only a
//! missing `map` or `rootId` aborts the build.

use super::node::{CoordinateSet, DomNode, DomTree, ElementNode, NodeId, TextNode, ViewportInfo};
use super::{DomState, SelectorMap};
use crate::result::{SanarError, SanarResult};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawElement {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    xpath: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
    #[serde(default)]
    children: Vec<Value>,
    #[serde(default)]
    is_visible: bool,
    #[serde(default)]
    is_interactive: bool,
    #[serde(default)]
    is_top_element: bool,
    #[serde(default)]
    is_in_viewport: bool,
    #[serde(default)]
    shadow_root: bool,
    #[serde(default)]
    highlight_index: Option<u32>,
    #[serde(default)]
    viewport_coordinates: Option<CoordinateSet>,
    #[serde(default)]
    page_coordinates: Option<CoordinateSet>,
    #[serde(default)]
    viewport: Option<ViewportInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawText {
    #[serde(default)]
    text: String,
    #[serde(default)]
    is_visible: bool,
}

enum Parsed {
    Element(RawElement),
    Text(RawText),
}

fn parse_record(record: &Value) -> Option<Parsed> {
    let obj = record.as_object()?;
    if obj.get("type").and_then(Value::as_str) == Some("TEXT_NODE") {
        return RawText::deserialize(record).ok().map(Parsed::Text);
    }
    let raw = RawElement::deserialize(record).ok()?;
    if raw.tag_name.as_deref().map_or(true, str::is_empty) {
        return None;
    }
    Some(Parsed::Element(raw))
}

fn attribute_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Child references may be strings or bare numbers
fn child_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Rebuild a [`DomState`] from a raw snapshot.
///
/// # Errors
///
/// [`SanarError::DomBuild`] when `map` is not an object or `rootId` is absent.
/// A `rootId` that names no element yields an empty `<body>` tree instead.
pub fn build(raw: &Value) -> SanarResult<DomState> {
    let map = raw
        .get("map")
        .and_then(Value::as_object)
        .ok_or_else(|| SanarError::dom_build("snapshot has no 'map' object"))?;
    let root_key = raw
        .get("rootId")
        .and_then(child_key)
        .ok_or_else(|| SanarError::dom_build("snapshot has no 'rootId'"))?;

    // Pass 1: instantiate nodes
    let mut nodes = Vec::with_capacity(map.len());
    let mut ids: HashMap<&str, NodeId> = HashMap::with_capacity(map.len());
    let mut pending_children: Vec<(NodeId, Vec<Value>)> = Vec::new();
    let mut skipped = 0usize;

    for (key, record) in map {
        let Some(parsed) = parse_record(record) else {
            skipped += 1;
            debug!(node = %key, "skipping malformed snapshot record");
            continue;
        };
        let id = NodeId(nodes.len());
        let node = match parsed {
            Parsed::Text(raw) => DomNode::Text(TextNode {
                text: raw.text,
                is_visible: raw.is_visible,
                parent: None,
            }),
            Parsed::Element(raw) => {
                let mut el = ElementNode::new(raw.tag_name.unwrap_or_default().to_ascii_lowercase());
                el.xpath = raw.xpath.unwrap_or_default();
                el.attributes = raw
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), attribute_string(v)))
                    .collect();
                el.is_visible = raw.is_visible;
                el.is_interactive = raw.is_interactive;
                el.is_top_element = raw.is_top_element;
                el.is_in_viewport = raw.is_in_viewport;
                el.shadow_root = raw.shadow_root;
                el.highlight_index = raw.highlight_index;
                el.viewport_coordinates = raw.viewport_coordinates;
                el.page_coordinates = raw.page_coordinates;
                el.viewport_info = raw.viewport;
                pending_children.push((id, raw.children));
                DomNode::Element(el)
            }
        };
        nodes.push(node);
        ids.insert(key.as_str(), id);
    }

    let root = match ids.get(root_key.as_str()) {
        Some(&root) if matches!(nodes.get(root.0), Some(DomNode::Element(_))) => root,
        _ => {
            warn!(root_id = %root_key, "snapshot root does not resolve to an element, using empty body");
            return Ok(DomState::new(DomTree::empty_body(), SelectorMap::new()));
        }
    };

    // Pass 2: link children in source order
    let mut tree = DomTree::from_parts(nodes, root);
    for (parent, children) in pending_children {
        for child in &children {
            let Some(child_id) = child_key(child).and_then(|k| ids.get(k.as_str()).copied()) else {
                continue;
            };
            if !tree.append_child(parent, child_id) {
                debug!(?parent, child = ?child_id, "ignoring duplicate or cyclic child link");
            }
        }
    }

    let mut selector_map = SelectorMap::new();
    for (id, el) in tree.elements() {
        if let Some(index) = el.highlight_index {
            selector_map.insert(index, id);
        }
    }

    if skipped > 0 {
        debug!(skipped, "malformed snapshot records skipped");
    }
    debug!(nodes = tree.len(), interactive = selector_map.len(), "DOM tree built");
    Ok(DomState::new(tree, selector_map))
}
