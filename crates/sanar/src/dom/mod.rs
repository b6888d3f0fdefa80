//! DOM snapshot processing.
//!
//! A capture runs [`SNAPSHOT_SCRIPT`] in the page, [`build`] turns the raw
//! records into a [`DomTree`], and the result is wrapped in an immutable
//! [`DomState`]. A new capture replaces the previous state wholesale.
//!
//! - [`selector`] derives robust selectors for elements
//! - [`context`] renders the tree as a bounded outline for the oracle

mod builder;
pub mod context;
mod node;
pub mod selector;
mod snapshot;

pub use builder::build;
pub use context::{serialize, ContextPurpose, SerializedContext, StaticIdMap};
pub use node::{
    collapse_whitespace, CoordinateSet, Coordinates, DomNode, DomTree, ElementNode, NodeId,
    TextNode, ViewportInfo,
};
pub use selector::{normalize_selector, synthesize, SelectorKind};
pub use snapshot::{is_blank_page, SNAPSHOT_SCRIPT};

use std::collections::BTreeMap;

/// `highlightIndex` to element lookup for one snapshot
pub type SelectorMap = BTreeMap<u32, NodeId>;

/// Tree plus selector map for one capture
#[derive(Debug)]
pub struct DomState {
    tree: DomTree,
    selector_map: SelectorMap,
}

impl DomState {
    /// Wrap a built tree
    #[must_use]
    pub fn new(tree: DomTree, selector_map: SelectorMap) -> Self {
        Self { tree, selector_map }
    }

    /// State for a page with nothing to snapshot
    #[must_use]
    pub fn empty() -> Self {
        Self::new(DomTree::empty_body(), SelectorMap::new())
    }

    /// The element tree
    #[must_use]
    pub const fn tree(&self) -> &DomTree {
        &self.tree
    }

    /// Interactive element lookup
    #[must_use]
    pub const fn selector_map(&self) -> &SelectorMap {
        &self.selector_map
    }

    /// Element registered under a highlight index
    #[must_use]
    pub fn element_by_index(&self, index: u32) -> Option<(NodeId, &ElementNode)> {
        let id = *self.selector_map.get(&index)?;
        self.tree.element(id).map(|el| (id, el))
    }

    /// Synthesized selector for every indexed element, by index
    #[must_use]
    pub fn selector_map_entries(&self) -> BTreeMap<u32, String> {
        self.selector_map
            .iter()
            .map(|(&index, &id)| (index, synthesize(&self.tree, id).to_string()))
            .collect()
    }
}
