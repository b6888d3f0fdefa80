//! Arena-backed DOM tree.
//!
//! Nodes live in one `Vec` and refer to each other by [`NodeId`]. The parent
//! link is a plain index, so the tree has no ownership cycles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Index of a node inside its [`DomTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Raw arena index
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Axis-aligned point
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    /// X position
    pub x: f64,
    /// Y position
    pub y: f64,
}

/// Corner and center points of an element's box
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinateSet {
    /// Top-left corner
    pub top_left: Coordinates,
    /// Top-right corner
    pub top_right: Coordinates,
    /// Bottom-left corner
    pub bottom_left: Coordinates,
    /// Bottom-right corner
    pub bottom_right: Coordinates,
    /// Box center
    pub center: Coordinates,
    /// Box width
    pub width: f64,
    /// Box height
    pub height: f64,
}

/// Viewport and scroll state at snapshot time
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportInfo {
    /// Horizontal scroll offset
    #[serde(default)]
    pub scroll_x: f64,
    /// Vertical scroll offset
    #[serde(default)]
    pub scroll_y: f64,
    /// Viewport width
    #[serde(default)]
    pub width: f64,
    /// Viewport height
    #[serde(default)]
    pub height: f64,
}

/// Element node
#[derive(Debug)]
pub struct ElementNode {
    /// Lower-case tag name
    pub tag_name: String,
    /// Structural path from the document root
    pub xpath: String,
    /// Attribute map
    pub attributes: BTreeMap<String, String>,
    /// Children in document order
    pub children: Vec<NodeId>,
    /// Parent, `None` for the root
    pub parent: Option<NodeId>,
    /// Rendered and not hidden
    pub is_visible: bool,
    /// Can receive user interaction
    pub is_interactive: bool,
    /// Topmost at its own center point
    pub is_top_element: bool,
    /// Intersects the viewport
    pub is_in_viewport: bool,
    /// Hosts a shadow root
    pub shadow_root: bool,
    /// Per-snapshot address for interactive elements
    pub highlight_index: Option<u32>,
    /// Box in viewport coordinates
    pub viewport_coordinates: Option<CoordinateSet>,
    /// Box in page coordinates
    pub page_coordinates: Option<CoordinateSet>,
    /// Viewport state
    pub viewport_info: Option<ViewportInfo>,
    pub(crate) selector: OnceLock<String>,
}

impl ElementNode {
    /// Create a bare element with the given tag
    #[must_use]
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            xpath: String::new(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
            parent: None,
            is_visible: false,
            is_interactive: false,
            is_top_element: false,
            is_in_viewport: false,
            shadow_root: false,
            highlight_index: None,
            viewport_coordinates: None,
            page_coordinates: None,
            viewport_info: None,
            selector: OnceLock::new(),
        }
    }

    /// Attribute value, if present
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute value if present and non-blank
    #[must_use]
    pub fn non_empty_attr(&self, name: &str) -> Option<&str> {
        self.attr(name).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Whitespace-separated class list
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    /// Selector already synthesized for this node, if any
    #[must_use]
    pub fn cached_selector(&self) -> Option<&str> {
        self.selector.get().map(String::as_str)
    }
}

/// Text node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNode {
    /// Text content
    pub text: String,
    /// Rendered and not hidden
    pub is_visible: bool,
    /// Owning element
    pub parent: Option<NodeId>,
}

/// A node in the arena
#[derive(Debug)]
pub enum DomNode {
    /// Element
    Element(ElementNode),
    /// Text
    Text(TextNode),
}

impl DomNode {
    /// Parent of either kind of node
    #[must_use]
    pub const fn parent(&self) -> Option<NodeId> {
        match self {
            Self::Element(el) => el.parent,
            Self::Text(t) => t.parent,
        }
    }

    fn set_parent(&mut self, parent: NodeId) {
        match self {
            Self::Element(el) => el.parent = Some(parent),
            Self::Text(t) => t.parent = Some(parent),
        }
    }

    /// Element payload, if this is an element
    #[must_use]
    pub const fn as_element(&self) -> Option<&ElementNode> {
        match self {
            Self::Element(el) => Some(el),
            Self::Text(_) => None,
        }
    }

    /// Text payload, if this is a text node
    #[must_use]
    pub const fn as_text(&self) -> Option<&TextNode> {
        match self {
            Self::Element(_) => None,
            Self::Text(t) => Some(t),
        }
    }
}

/// Element/text tree with a designated root element
#[derive(Debug)]
pub struct DomTree {
    nodes: Vec<DomNode>,
    root: NodeId,
}

impl DomTree {
    /// Tree holding a single empty `<body>` element
    #[must_use]
    pub fn empty_body() -> Self {
        let mut body = ElementNode::new("body");
        body.xpath = String::from("/body");
        body.is_visible = true;
        Self {
            nodes: vec![DomNode::Element(body)],
            root: NodeId(0),
        }
    }

    pub(crate) fn from_parts(nodes: Vec<DomNode>, root: NodeId) -> Self {
        Self { nodes, root }
    }

    /// Append a node and return its id
    pub fn push(&mut self, node: DomNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Attach `child` to the end of `parent`'s children.
    ///
    /// Returns `false` when `parent` is not an element, `child` already has a
    /// parent, or `child` is the root.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if child == self.root || child == parent || child.0 >= self.nodes.len() {
            return false;
        }
        if self.nodes[child.0].parent().is_some() {
            return false;
        }
        let Some(DomNode::Element(el)) = self.nodes.get_mut(parent.0) else {
            return false;
        };
        el.children.push(child);
        self.nodes[child.0].set_parent(parent);
        true
    }

    /// Root element id
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes in the arena, reachable or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the arena is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by id
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&DomNode> {
        self.nodes.get(id.0)
    }

    /// Element by id
    #[must_use]
    pub fn element(&self, id: NodeId) -> Option<&ElementNode> {
        self.node(id).and_then(DomNode::as_element)
    }

    /// Parent of a node
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(DomNode::parent)
    }

    /// Children of an element, empty for text nodes
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.element(id).map_or(&[], |el| el.children.as_slice())
    }

    /// Ancestors from nearest to the root
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    /// Every element in the arena, in arena order
    pub fn elements(&self) -> impl Iterator<Item = (NodeId, &ElementNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_element().map(|el| (NodeId(i), el)))
    }

    /// Ids reachable from the root in document (pre-)order
    #[must_use]
    pub fn document_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Elements reachable from `from` (inclusive) in document order
    pub fn descendant_elements(&self, from: NodeId) -> impl Iterator<Item = (NodeId, &ElementNode)> {
        let mut stack = vec![from];
        std::iter::from_fn(move || {
            while let Some(id) = stack.pop() {
                stack.extend(self.children(id).iter().rev().copied());
                if let Some(el) = self.element(id) {
                    return Some((id, el));
                }
            }
            None
        })
    }

    /// Text of the element's direct visible text children, space-joined.
    #[must_use]
    pub fn direct_text(&self, id: NodeId) -> String {
        let parts: Vec<&str> = self
            .children(id)
            .iter()
            .filter_map(|&c| self.node(c).and_then(DomNode::as_text))
            .filter(|t| t.is_visible)
            .map(|t| t.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        parts.join(" ")
    }

    /// Visible text below `id`, stopping at nested indexed elements.
    ///
    /// Whitespace is collapsed to single spaces.
    #[must_use]
    pub fn text_until_next_interactive(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(cur) = stack.pop() {
            match self.node(cur) {
                Some(DomNode::Text(t)) if t.is_visible => parts.push(t.text.as_str()),
                Some(DomNode::Element(el)) if el.highlight_index.is_none() => {
                    stack.extend(el.children.iter().rev().copied());
                }
                _ => {}
            }
        }
        collapse_whitespace(&parts.join(" "))
    }

    /// Nearest file input: self, descendants, then siblings of self and ancestors
    #[must_use]
    pub fn file_upload_element(&self, id: NodeId) -> Option<NodeId> {
        let is_file_input = |el: &ElementNode| {
            el.tag_name == "input" && el.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("file"))
        };
        if let Some((found, _)) = self.descendant_elements(id).find(|(_, el)| is_file_input(*el)) {
            return Some(found);
        }
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            for &sibling in self.children(parent) {
                if sibling == current {
                    continue;
                }
                if let Some((found, _)) = self
                    .descendant_elements(sibling)
                    .find(|(_, el)| is_file_input(*el))
                {
                    return Some(found);
                }
            }
            current = parent;
        }
        None
    }
}

/// Collapse runs of whitespace to one space and trim
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn text(t: &str) -> DomNode {
        DomNode::Text(TextNode {
            text: t.to_string(),
            is_visible: true,
            parent: None,
        })
    }

    fn sample() -> (DomTree, NodeId, NodeId, NodeId) {
        let mut tree = DomTree::empty_body();
        let root = tree.root();
        let mut button = ElementNode::new("button");
        button.highlight_index = Some(0);
        let button = tree.push(DomNode::Element(button));
        let label = tree.push(text("  Save   changes "));
        let div = tree.push(DomNode::Element(ElementNode::new("div")));
        let inner = tree.push(text("after"));
        assert!(tree.append_child(root, button));
        assert!(tree.append_child(button, label));
        assert!(tree.append_child(root, div));
        assert!(tree.append_child(div, inner));
        (tree, root, button, div)
    }

    #[test]
    fn test_parent_links() {
        let (tree, root, button, div) = sample();
        assert_eq!(tree.parent(button), Some(root));
        assert_eq!(tree.parent(div), Some(root));
        assert_eq!(tree.parent(root), None);
        assert_eq!(tree.ancestors(tree.children(div)[0]).collect::<Vec<_>>(), vec![div, root]);
    }

    #[test]
    fn test_append_child_rejects_second_parent_and_root() {
        let (mut tree, root, button, div) = sample();
        assert!(!tree.append_child(div, button));
        assert!(!tree.append_child(div, root));
        assert!(!tree.append_child(div, div));
        assert_eq!(tree.children(div).len(), 1);
    }

    #[test]
    fn test_document_order() {
        let (tree, root, button, div) = sample();
        let order = tree.document_order();
        assert_eq!(order[0], root);
        assert_eq!(order[1], button);
        assert_eq!(order[3], div);
        assert_eq!(order.len(), 5);
    }

    #[test]
    fn test_direct_and_interactive_text() {
        let (tree, root, button, _) = sample();
        assert_eq!(tree.direct_text(button), "Save   changes");
        assert_eq!(tree.text_until_next_interactive(button), "Save changes");
        // Stops at the indexed button
        assert_eq!(tree.text_until_next_interactive(root), "after");
    }

    #[test]
    fn test_file_upload_lookup_in_sibling() {
        let mut tree = DomTree::empty_body();
        let root = tree.root();
        let button = tree.push(DomNode::Element(ElementNode::new("button")));
        let mut input = ElementNode::new("input");
        input.attributes.insert("type".into(), "file".into());
        let input = tree.push(DomNode::Element(input));
        tree.append_child(root, button);
        tree.append_child(root, input);
        assert_eq!(tree.file_upload_element(button), Some(input));
        assert_eq!(tree.file_upload_element(input), Some(input));
    }

    #[test]
    fn test_classes_and_attrs() {
        let mut el = ElementNode::new("div");
        el.attributes.insert("class".into(), " a  b ".into());
        el.attributes.insert("title".into(), "   ".into());
        assert_eq!(el.classes().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(el.non_empty_attr("title"), None);
        assert_eq!(el.attr("title"), Some("   "));
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b  "), "a b");
        assert_eq!(collapse_whitespace(""), "");
    }
}
