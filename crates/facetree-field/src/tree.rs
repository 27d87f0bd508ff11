//! FieldTree: the pruned, single-parent presentation tree of one field.
//!
//! Construction never fails. Selector uris that no longer resolve in the
//! hierarchy are skipped and reported through [`FieldTree::unresolved`]; the
//! tree simply gets smaller.
//!
//! All passes work on integer indices with explicit stacks; the shared
//! [`Hierarchy`] is only read.

use ahash::AHashMap;
use facetree_ontology::{label_sort_key, BranchId, Hierarchy};
use std::collections::{BTreeMap, BTreeSet};

use crate::selector::{FieldDef, FieldKey, SelectorMode, SelectorRule};

/// A node owned by its [`FieldTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub uri: String,
    pub label: String,
    pub description: Option<String>,
    pub alt_labels: Vec<String>,
    pub urls: Vec<String>,
    /// Depth in the flattened tree (roots are 0).
    pub depth: u32,
    /// Position of the parent in [`FieldTree::flattened`], `-1` for roots.
    pub parent_index: i32,
    /// Number of descendants.
    pub child_count: u32,
    /// Number of in-schema descendants.
    pub schema_count: u32,
    pub in_schema: bool,
    pub explicit: bool,
    parent: Option<usize>,
    children: Vec<usize>,
}

impl Node {
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    fn from_proto(proto: NodeProto) -> Self {
        Self {
            uri: proto.uri,
            label: proto.label,
            description: proto.description,
            alt_labels: proto.alt_labels,
            urls: proto.urls,
            depth: 0,
            parent_index: -1,
            child_count: 0,
            schema_count: 0,
            in_schema: proto.in_schema,
            explicit: proto.explicit,
            parent: None,
            children: Vec::new(),
        }
    }
}

/// The data needed to create a node outside of [`FieldTree::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProto {
    pub uri: String,
    pub label: String,
    pub description: Option<String>,
    pub alt_labels: Vec<String>,
    pub urls: Vec<String>,
    pub in_schema: bool,
    pub explicit: bool,
}

impl NodeProto {
    pub fn new(uri: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            label: label.into(),
            description: None,
            alt_labels: Vec::new(),
            urls: Vec::new(),
            in_schema: false,
            explicit: false,
        }
    }
}

/// A node waiting for its parent to be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNode {
    pub parent_uri: String,
    pub node: NodeProto,
}

/// One stored row of a flattened tree, as kept in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredNode {
    pub node: NodeProto,
    pub depth: u32,
    pub parent_index: i32,
    pub child_count: u32,
    pub schema_count: u32,
}

/// A preorder position: node index, depth and the parent's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatNode {
    pub node: usize,
    pub depth: u32,
    pub parent_index: i32,
}

#[derive(Debug, Clone)]
pub struct FieldTree {
    key: Option<FieldKey>,
    field: Option<FieldDef>,
    nodes: Vec<Node>,
    index: AHashMap<String, usize>,
    roots: Vec<usize>,
    flat: Vec<FlatNode>,
    schema_sorted: Vec<usize>,
    unresolved: Vec<String>,
}

/// Selector classification over hierarchy ids.
#[derive(Default)]
struct Selection {
    include_uri: BTreeSet<BranchId>,
    items: BTreeSet<BranchId>,
    include_branch: BTreeSet<BranchId>,
    exclude_uri: BTreeSet<BranchId>,
    exclude_branch: BTreeSet<BranchId>,
}

impl Selection {
    fn is_excluded(&self, id: BranchId) -> bool {
        self.exclude_uri.contains(&id) || self.exclude_branch.contains(&id)
    }
}

/// Closure of `starts` over children; a node for which `stop` holds is
/// neither added nor descended into.
fn closure(h: &Hierarchy, starts: &[BranchId], stop: impl Fn(BranchId) -> bool) -> BTreeSet<BranchId> {
    let mut out = BTreeSet::new();
    let mut stack: Vec<BranchId> = starts.to_vec();
    while let Some(id) = stack.pop() {
        if stop(id) || !out.insert(id) {
            continue;
        }
        stack.extend(h.get(id).children().iter().copied());
    }
    out
}

/// One parent per branch for the duration of a build.
struct ParentMemo<'h> {
    hierarchy: &'h Hierarchy,
    chosen: BTreeMap<BranchId, Option<BranchId>>,
}

impl<'h> ParentMemo<'h> {
    fn new(hierarchy: &'h Hierarchy) -> Self {
        Self {
            hierarchy,
            chosen: BTreeMap::new(),
        }
    }

    /// Lowest-uri parent outside `excluded`; the first answer sticks.
    fn parent_of(&mut self, id: BranchId, excluded: &BTreeSet<BranchId>) -> Option<BranchId> {
        let hierarchy = self.hierarchy;
        *self.chosen.entry(id).or_insert_with(|| {
            hierarchy
                .get(id)
                .parents()
                .iter()
                .copied()
                .find(|p| !excluded.contains(p))
        })
    }
}

impl FieldTree {
    /// Build an unbound tree from raw selector rules.
    pub fn build(hierarchy: &Hierarchy, rules: &[SelectorRule]) -> Self {
        let mut unresolved = Vec::new();
        let selection = classify(hierarchy, rules, &mut unresolved);

        let mut in_schema: BTreeSet<BranchId> = selection.include_uri.clone();
        in_schema.extend(selection.include_branch.iter().copied());

        let mut memo = ParentMemo::new(hierarchy);
        let mut everything = in_schema.clone();

        // Items bring their siblings and descendants along for browsing.
        for &item in &selection.items {
            let mut stack: Vec<BranchId> = hierarchy.get(item).children().to_vec();
            while let Some(id) = stack.pop() {
                if selection.is_excluded(id) || !everything.insert(id) {
                    continue;
                }
                stack.extend(hierarchy.get(id).children().iter().copied());
            }
            if let Some(parent) = memo.parent_of(item, &selection.exclude_branch) {
                for &sibling in hierarchy.get(parent).children() {
                    if !selection.is_excluded(sibling) {
                        everything.insert(sibling);
                    }
                }
            }
        }

        // Ancestor completion.
        let mut walked: BTreeSet<BranchId> = BTreeSet::new();
        for &start in &in_schema {
            let mut current = start;
            while walked.insert(current) {
                let Some(parent) = memo.parent_of(current, &selection.exclude_branch) else {
                    break;
                };
                everything.insert(parent);
                current = parent;
            }
        }

        // Materialize.
        let catalog = hierarchy.catalog();
        let mut nodes: Vec<Node> = Vec::with_capacity(everything.len());
        let mut slot: BTreeMap<BranchId, usize> = BTreeMap::new();
        for &id in &everything {
            let branch = hierarchy.get(id);
            let term = catalog.term(&branch.uri);
            slot.insert(id, nodes.len());
            nodes.push(Node::from_proto(NodeProto {
                uri: branch.uri.clone(),
                label: branch.label.clone(),
                description: term.and_then(|t| t.description.clone()),
                alt_labels: term
                    .map(|t| t.alt_labels.iter().cloned().collect())
                    .unwrap_or_default(),
                urls: term
                    .map(|t| t.urls.iter().cloned().collect())
                    .unwrap_or_default(),
                in_schema: in_schema.contains(&id),
                explicit: selection.include_uri.contains(&id),
            }));
        }
        for &id in &everything {
            let memo_parent = memo
                .parent_of(id, &selection.exclude_branch)
                .filter(|p| everything.contains(p));
            let parent = memo_parent.or_else(|| {
                hierarchy
                    .get(id)
                    .parents()
                    .iter()
                    .copied()
                    .find(|p| everything.contains(p) && !selection.exclude_branch.contains(p))
            });
            if let Some(parent) = parent {
                let child_slot = slot[&id];
                let parent_slot = slot[&parent];
                nodes[child_slot].parent = Some(parent_slot);
                nodes[parent_slot].children.push(child_slot);
            }
        }

        let mut tree = Self {
            key: None,
            field: None,
            nodes,
            index: AHashMap::new(),
            roots: Vec::new(),
            flat: Vec::new(),
            schema_sorted: Vec::new(),
            unresolved,
        };
        tree.propagate_counts();
        tree.collapse_singleton_roots();
        tree.reindex();
        tree.flatten();

        tracing::debug!(
            nodes = tree.nodes.len(),
            in_schema = tree.schema_sorted.len(),
            unresolved = tree.unresolved.len(),
            "field tree built"
        );
        tree
    }

    /// Build the tree for `field` and bind it to that definition.
    pub fn for_field(hierarchy: &Hierarchy, field: &FieldDef) -> Self {
        let mut tree = Self::build(hierarchy, &field.rules);
        if !tree.unresolved.is_empty() {
            tracing::debug!(
                field = %field.key,
                missing = tree.unresolved.len(),
                "field selectors reference terms absent from the hierarchy"
            );
        }
        tree.key = Some(field.key.clone());
        tree.field = Some(field.clone());
        tree
    }

    /// Rebuild a tree from stored preorder rows, keeping their order.
    ///
    /// Rows whose parent index does not point at an earlier row become roots.
    pub fn from_flattened(key: FieldKey, field: Option<FieldDef>, rows: Vec<RestoredNode>) -> Self {
        let mut nodes: Vec<Node> = Vec::with_capacity(rows.len());
        let mut flat: Vec<FlatNode> = Vec::with_capacity(rows.len());
        let mut roots = Vec::new();
        for (i, row) in rows.into_iter().enumerate() {
            let mut node = Node::from_proto(row.node);
            node.depth = row.depth;
            node.child_count = row.child_count;
            node.schema_count = row.schema_count;
            let parent = usize::try_from(row.parent_index).ok().filter(|p| *p < i);
            match parent {
                Some(p) => {
                    node.parent = Some(p);
                    node.parent_index = row.parent_index;
                    nodes[p].children.push(i);
                }
                None => {
                    node.parent_index = -1;
                    roots.push(i);
                }
            }
            flat.push(FlatNode {
                node: i,
                depth: node.depth,
                parent_index: node.parent_index,
            });
            nodes.push(node);
        }

        let mut tree = Self {
            key: Some(key),
            field,
            nodes,
            index: AHashMap::new(),
            roots,
            flat,
            schema_sorted: Vec::new(),
            unresolved: Vec::new(),
        };
        tree.index = tree
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.uri.clone(), i))
            .collect();
        tree.sort_schema();
        tree
    }

    pub fn key(&self) -> Option<&FieldKey> {
        self.key.as_ref()
    }

    /// The live field definition, when the tree is bound to one.
    pub fn field(&self) -> Option<&FieldDef> {
        self.field.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.field.is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn find(&self, uri: &str) -> Option<&Node> {
        self.index.get(uri).map(|i| &self.nodes[*i])
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Depth-first preorder of the whole tree.
    pub fn flattened(&self) -> &[FlatNode] {
        &self.flat
    }

    /// Preorder nodes (same order as [`FieldTree::flattened`]).
    pub fn flattened_nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.flat.iter().map(|f| &self.nodes[f.node])
    }

    /// In-schema nodes in label order.
    pub fn schema_sorted(&self) -> impl Iterator<Item = &Node> + '_ {
        self.schema_sorted.iter().map(|i| &self.nodes[*i])
    }

    /// Selector uris that did not resolve when the tree was built.
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    /// Attach nodes whose parent is present, repeating until no candidate can
    /// be placed. Returns the uris that were added; candidates whose uri is
    /// already in the tree are ignored, so replaying a merge adds nothing.
    pub fn add_nodes(&mut self, candidates: Vec<PendingNode>) -> Vec<String> {
        let mut added = Vec::new();
        let mut pending = candidates;
        loop {
            let mut progressed = false;
            let mut waiting = Vec::new();
            for candidate in pending {
                if self.index.contains_key(&candidate.node.uri) {
                    continue;
                }
                let Some(&parent) = self.index.get(&candidate.parent_uri) else {
                    waiting.push(candidate);
                    continue;
                };
                let idx = self.nodes.len();
                let mut node = Node::from_proto(candidate.node);
                node.parent = Some(parent);
                self.index.insert(node.uri.clone(), idx);
                added.push(node.uri.clone());
                self.nodes.push(node);
                self.nodes[parent].children.push(idx);
                progressed = true;
            }
            pending = waiting;
            if !progressed || pending.is_empty() {
                break;
            }
        }
        if !pending.is_empty() {
            tracing::debug!(
                unplaced = pending.len(),
                "add_nodes left candidates without a present parent"
            );
        }
        if !added.is_empty() {
            self.propagate_counts();
            self.flatten();
        }
        added
    }

    /// Indented outline, one node per line, for diagnostics.
    pub fn render_outline(&self) -> String {
        let mut out = String::new();
        for flat in &self.flat {
            let node = &self.nodes[flat.node];
            for _ in 0..flat.depth {
                out.push_str("  ");
            }
            out.push_str(&node.label);
            out.push_str(" <");
            out.push_str(&node.uri);
            out.push('>');
            if node.explicit {
                out.push_str(" [explicit]");
            } else if node.in_schema {
                out.push_str(" [schema]");
            }
            if node.child_count > 0 {
                out.push_str(&format!(" ({}/{})", node.schema_count, node.child_count));
            }
            out.push('\n');
        }
        out
    }

    // ------------------------------------------------------------------------
    // passes
    // ------------------------------------------------------------------------

    fn propagate_counts(&mut self) {
        for node in &mut self.nodes {
            node.child_count = 0;
            node.schema_count = 0;
        }
        for i in 0..self.nodes.len() {
            let in_schema = self.nodes[i].in_schema;
            let mut current = self.nodes[i].parent;
            while let Some(p) = current {
                self.nodes[p].child_count += 1;
                if in_schema {
                    self.nodes[p].schema_count += 1;
                }
                current = self.nodes[p].parent;
            }
        }
    }

    /// Remove unselected roots with at most one child, promoting that child,
    /// until no root qualifies.
    fn collapse_singleton_roots(&mut self) {
        let mut alive = vec![true; self.nodes.len()];
        let mut roots: Vec<usize> = (0..self.nodes.len())
            .filter(|i| self.nodes[*i].parent.is_none())
            .collect();
        loop {
            let mut next_roots = Vec::with_capacity(roots.len());
            let mut changed = false;
            for root in roots {
                let node = &self.nodes[root];
                if node.in_schema || node.children.len() > 1 {
                    next_roots.push(root);
                    continue;
                }
                let only_child = node.children.first().copied();
                alive[root] = false;
                changed = true;
                if let Some(child) = only_child {
                    self.nodes[child].parent = None;
                    next_roots.push(child);
                }
            }
            roots = next_roots;
            if !changed {
                break;
            }
        }

        // Compact, remapping indices.
        let mut remap: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut kept: Vec<Node> = Vec::with_capacity(self.nodes.len());
        for (i, node) in std::mem::take(&mut self.nodes).into_iter().enumerate() {
            if alive[i] {
                remap[i] = Some(kept.len());
                kept.push(node);
            }
        }
        for node in &mut kept {
            node.parent = node.parent.and_then(|p| remap[p]);
            node.children = node.children.iter().filter_map(|c| remap[*c]).collect();
        }
        self.nodes = kept;
    }

    fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.uri.clone(), i))
            .collect();
    }

    /// Sort children and roots by label, then lay the tree out in preorder.
    fn flatten(&mut self) {
        let keys: Vec<(String, String)> = self
            .nodes
            .iter()
            .map(|n| label_sort_key(&n.label, &n.uri))
            .collect();
        for node in &mut self.nodes {
            node.children.sort_by(|a, b| keys[*a].cmp(&keys[*b]));
        }
        let mut roots: Vec<usize> = (0..self.nodes.len())
            .filter(|i| self.nodes[*i].parent.is_none())
            .collect();
        roots.sort_by(|a, b| keys[*a].cmp(&keys[*b]));

        let mut flat = Vec::with_capacity(self.nodes.len());
        // (node, depth, parent position)
        let mut stack: Vec<(usize, u32, i32)> = roots.iter().rev().map(|r| (*r, 0, -1)).collect();
        while let Some((idx, depth, parent_index)) = stack.pop() {
            let position = flat.len() as i32;
            flat.push(FlatNode {
                node: idx,
                depth,
                parent_index,
            });
            let node = &mut self.nodes[idx];
            node.depth = depth;
            node.parent_index = parent_index;
            for &child in node.children.iter().rev() {
                stack.push((child, depth + 1, position));
            }
        }

        self.roots = roots;
        self.flat = flat;
        self.sort_schema();
    }

    fn sort_schema(&mut self) {
        let mut schema: Vec<usize> = (0..self.nodes.len())
            .filter(|i| self.nodes[*i].in_schema)
            .collect();
        schema.sort_by_cached_key(|i| label_sort_key(&self.nodes[*i].label, &self.nodes[*i].uri));
        self.schema_sorted = schema;
    }
}

fn classify(hierarchy: &Hierarchy, rules: &[SelectorRule], unresolved: &mut Vec<String>) -> Selection {
    let mut selection = Selection::default();
    let mut branch_starts = Vec::new();
    let mut exclude_starts = Vec::new();

    for rule in rules {
        let Some(id) = hierarchy.resolve(&rule.uri) else {
            tracing::debug!(uri = %rule.uri, mode = ?rule.mode, "selector target not in hierarchy");
            unresolved.push(rule.uri.clone());
            continue;
        };
        match rule.mode {
            SelectorMode::Item => {
                selection.include_uri.insert(id);
                selection.items.insert(id);
            }
            SelectorMode::WholeBranch | SelectorMode::Container => {
                selection.include_uri.insert(id);
                branch_starts.push(id);
            }
            SelectorMode::Exclude => {
                selection.exclude_uri.insert(id);
            }
            SelectorMode::ExcludeBranch => exclude_starts.push(id),
        }
    }

    selection.include_branch = closure(hierarchy, &branch_starts, |id| {
        selection.exclude_uri.contains(&id)
    });
    selection.exclude_branch = closure(hierarchy, &exclude_starts, |id| {
        selection.include_uri.contains(&id)
    });

    // Explicit exclusion beats any inclusion.
    let exclude_uri = selection.exclude_uri.clone();
    let exclude_branch = selection.exclude_branch.clone();
    let excluded = |id: &BranchId| exclude_uri.contains(id) || exclude_branch.contains(id);
    selection.include_uri.retain(|id| !excluded(id));
    selection.items.retain(|id| !excluded(id));
    selection.include_branch.retain(|id| !excluded(id));
    selection
}
