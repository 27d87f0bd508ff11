//! Per-field browsing trees.
//!
//! A field selects part of a [`Hierarchy`] with a list of selector rules. The
//! resulting [`FieldTree`] is a single-parent tree: every node has at most one
//! parent, children are sorted by label, and the whole tree is available as a
//! depth-first flattened sequence for list rendering.

pub mod cache;
pub mod selector;
pub mod tree;

pub use cache::FieldTreeCache;
pub use selector::{FieldDef, FieldKey, SelectorMode, SelectorRule};
pub use tree::{FieldTree, FlatNode, Node, NodeProto, PendingNode, RestoredNode};

use facetree_ontology::Hierarchy;
use rayon::prelude::*;

/// Build the trees of many fields in parallel.
///
/// The hierarchy is shared read-only; output order follows `fields`.
pub fn build_all(hierarchy: &Hierarchy, fields: &[FieldDef]) -> Vec<FieldTree> {
    let trees: Vec<FieldTree> = fields
        .par_iter()
        .map(|field| FieldTree::for_field(hierarchy, field))
        .collect();
    tracing::info!(
        fields = trees.len(),
        nodes = trees.iter().map(FieldTree::len).sum::<usize>(),
        "field trees built"
    );
    trees
}
