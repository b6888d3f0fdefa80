//! Oracle-facing outline of a DOM tree.
//!
//! Interactive elements always appear as `[index]<tag attrs>text</tag>`.
//! Static elements get a temporary `s<N>` id, valid only for the call that
//! produced it, and are capped per [`ContextPurpose`].

use super::node::{collapse_whitespace, DomNode, DomTree, ElementNode, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attributes rendered in the outline, in display order
pub const DISPLAY_ATTRIBUTES: [&str; 13] = [
    "id",
    "name",
    "class",
    "aria-label",
    "placeholder",
    "role",
    "type",
    "value",
    "title",
    "alt",
    "href",
    "data-testid",
    "data-value",
];

const MAX_ATTRIBUTE_CHARS: usize = 50;
const MAX_CLASS_CHARS_ACTION: usize = 100;
const MAX_INTERACTIVE_TEXT_CHARS: usize = 150;
const MAX_HINT_CHARS: usize = 20;

/// What the outline is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPurpose {
    /// Choosing an element to act on
    #[default]
    Action,
    /// Judging whether a condition holds
    Verification,
}

impl ContextPurpose {
    /// Maximum static elements in the outline
    #[must_use]
    pub const fn static_cap(&self) -> usize {
        match self {
            Self::Action => 50,
            Self::Verification => 150,
        }
    }
}

impl std::str::FromStr for ContextPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "action" => Ok(Self::Action),
            "verification" => Ok(Self::Verification),
            other => Err(format!("unknown context purpose '{other}'")),
        }
    }
}

/// Temporary static id to element
pub type StaticIdMap = BTreeMap<String, NodeId>;

/// Outline text plus the static ids it introduced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedContext {
    /// Outline, one element per line
    pub text: String,
    /// `s<N>` ids assigned in this call
    pub static_ids: StaticIdMap,
    /// Static elements were dropped because of the cap
    pub truncated: bool,
}

struct Serializer<'a> {
    tree: &'a DomTree,
    purpose: ContextPurpose,
    cap: usize,
    lines: Vec<String>,
    static_ids: StaticIdMap,
    truncated: bool,
    has_interactive: Vec<bool>,
}

/// Render `tree` in document order.
#[must_use]
pub fn serialize(tree: &DomTree, purpose: ContextPurpose) -> SerializedContext {
    let mut serializer = Serializer {
        tree,
        purpose,
        cap: purpose.static_cap(),
        lines: Vec::new(),
        static_ids: StaticIdMap::new(),
        truncated: false,
        has_interactive: interactive_subtrees(tree),
    };
    serializer.walk();

    let mut text = serializer.lines.join("\n");
    if serializer.truncated {
        text.push_str(&format!(
            "\n... (Static element list truncated after {} entries)",
            serializer.cap
        ));
    }
    SerializedContext {
        text,
        static_ids: serializer.static_ids,
        truncated: serializer.truncated,
    }
}

/// For each arena slot, whether the subtree holds an indexed element
fn interactive_subtrees(tree: &DomTree) -> Vec<bool> {
    let mut flags = vec![false; tree.len()];
    let order = tree.document_order();
    for &id in order.iter().rev() {
        let Some(el) = tree.element(id) else { continue };
        let below = el.children.iter().any(|c| flags[c.index()]);
        flags[id.index()] = el.highlight_index.is_some() || below;
    }
    flags
}

impl Serializer<'_> {
    /// Depth-first walk in document order with an explicit stack.
    ///
    /// Children carry `gated`: once the static cap is hit, a child subtree
    /// without indexed elements is dropped when it comes up for rendering.
    fn walk(&mut self) {
        let tree = self.tree;
        let mut stack = vec![(tree.root(), 0usize, false)];
        while let Some((id, depth, gated)) = stack.pop() {
            let Some(el) = tree.element(id) else {
                continue;
            };
            if gated && self.static_ids.len() >= self.cap && !self.has_interactive[id.index()] {
                self.truncated = true;
                continue;
            }
            self.render(id, el, depth);
            stack.extend(
                el.children
                    .iter()
                    .rev()
                    .filter(|&&child| matches!(tree.node(child), Some(DomNode::Element(_))))
                    .map(|&child| (child, depth + 1, true)),
            );
        }
    }

    fn render(&mut self, id: NodeId, el: &ElementNode, depth: usize) {
        if let Some(index) = el.highlight_index {
            let line = self.interactive_line(id, el, index, depth);
            self.lines.push(line);
        } else if el.is_visible {
            let text = self.tree.direct_text(id);
            let attrs = self.attributes(el);
            if text.is_empty() && attrs.is_empty() {
                return;
            }
            if self.static_ids.len() >= self.cap {
                self.truncated = true;
            } else {
                let line = self.static_line(id, el, &attrs, &text, depth);
                self.lines.push(line);
            }
        }
    }

    fn interactive_line(&self, id: NodeId, el: &ElementNode, index: u32, depth: usize) -> String {
        let indent = "  ".repeat(depth);
        let attrs = self.attributes(el);
        let text = truncate(
            &collapse_whitespace(&self.tree.text_until_next_interactive(id)),
            MAX_INTERACTIVE_TEXT_CHARS,
        );
        let mut line = format!("{indent}[{index}]<{}", el.tag_name);
        if !attrs.is_empty() {
            line.push(' ');
            line.push_str(&attrs);
        }
        if text.is_empty() {
            line.push_str(" />");
        } else {
            line.push_str(&format!(">{text}</{}>", el.tag_name));
        }
        if !el.is_visible {
            line.push_str(" (Not Visible)");
        }
        line
    }

    fn static_line(&mut self, id: NodeId, el: &ElementNode, attrs: &str, text: &str, depth: usize) -> String {
        let static_id = format!("s{}", self.static_ids.len() + 1);
        self.static_ids.insert(static_id.clone(), id);

        let indent = "  ".repeat(depth);
        let mut line = format!("{indent}<{}", el.tag_name);
        if !attrs.is_empty() {
            line.push(' ');
            line.push_str(attrs);
        }
        line.push_str(&format!(" data-static-id=\"{static_id}\" (Static)"));

        let identified = ["id", "data-testid", "name"]
            .iter()
            .any(|a| el.non_empty_attr(a).is_some());
        if !identified {
            if let Some(hint) = self.parent_hint(id) {
                line.push(' ');
                line.push_str(&hint);
            }
        }

        if text.is_empty() {
            line.push_str(" />");
        } else {
            line.push_str(&format!(">{text}</{}>", el.tag_name));
        }
        line
    }

    fn parent_hint(&self, id: NodeId) -> Option<String> {
        let parent = self.tree.element(self.tree.parent(id)?)?;
        let parts: Vec<String> = ["id", "data-testid"]
            .iter()
            .filter_map(|&name| {
                parent.non_empty_attr(name).map(|v| {
                    let short: String = v.chars().take(MAX_HINT_CHARS).collect();
                    format!("{name}=\"{}\"", escape_html(&short))
                })
            })
            .collect();
        (!parts.is_empty()).then(|| format!("(inside: <{} {}>)", parent.tag_name, parts.join(" ")))
    }

    fn attributes(&self, el: &ElementNode) -> String {
        let mut parts = Vec::new();
        for name in DISPLAY_ATTRIBUTES {
            let Some(raw) = el.attr(name) else { continue };
            let value = if name == "class"
                && self.purpose == ContextPurpose::Action
                && raw.chars().count() > MAX_CLASS_CHARS_ACTION
            {
                truncate(raw, MAX_CLASS_CHARS_ACTION)
            } else {
                raw.to_string()
            };
            let shown = if value.chars().count() < MAX_ATTRIBUTE_CHARS {
                value
            } else {
                let head: String = value.chars().take(MAX_ATTRIBUTE_CHARS - 3).collect();
                format!("{head}...")
            };
            parts.push(format!("{name}=\"{}\"", escape_html(&shown)));
        }
        parts.join(" ")
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
