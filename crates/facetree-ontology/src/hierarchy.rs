//! HierarchyBuilder: from is-a edges to a multi-parent DAG of Branches.
//!
//! Passes, in order:
//!
//! 1. edges whose parent is authoritative,
//! 2. remaining edges, only for children still unparented after pass 1,
//! 3. reparenting fixpoint (preferred members absorb their equivalents),
//! 4. cycle breaking,
//! 5. multi-parent cleanup (preferred parents win when mixed).
//!
//! Construction works on uri-keyed drafts; the finished [`Hierarchy`] is an
//! arena addressed by [`BranchId`] with explicit parent/child index lists.

use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::catalog::TermCatalog;
use crate::{label_sort_key, local_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BranchId(u32);

impl BranchId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub uri: String,
    pub label: String,
    parents: Vec<BranchId>,
    children: Vec<BranchId>,
}

impl Branch {
    /// Parents in uri order.
    pub fn parents(&self) -> &[BranchId] {
        &self.parents
    }

    /// Children in label order (case-insensitive, uri tie-break).
    pub fn children(&self) -> &[BranchId] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

#[derive(Debug)]
pub struct Hierarchy {
    catalog: Arc<TermCatalog>,
    branches: Vec<Branch>,
    index: AHashMap<String, BranchId>,
    roots: Vec<BranchId>,
    merged: BTreeMap<String, String>,
}

impl Hierarchy {
    /// Class hierarchy from the catalog's own subclass-of edges.
    pub fn values(catalog: Arc<TermCatalog>) -> Self {
        let edges = catalog.subclass_edges().to_vec();
        let breaks = catalog.override_breaks().clone();
        HierarchyBuilder::build(catalog, &edges, &breaks)
    }

    /// Property hierarchy from the catalog's subproperty-of edges.
    pub fn properties(catalog: Arc<TermCatalog>) -> Self {
        let edges = catalog.subproperty_edges().to_vec();
        let breaks = catalog.override_breaks().clone();
        HierarchyBuilder::build(catalog, &edges, &breaks)
    }

    pub fn catalog(&self) -> &Arc<TermCatalog> {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn get(&self, id: BranchId) -> &Branch {
        &self.branches[id.index()]
    }

    pub fn id_of(&self, uri: &str) -> Option<BranchId> {
        self.index.get(uri).copied()
    }

    pub fn branch(&self, uri: &str) -> Option<&Branch> {
        self.id_of(uri).map(|id| self.get(id))
    }

    /// Branch ids in uri order.
    pub fn ids(&self) -> impl Iterator<Item = BranchId> + '_ {
        (0..self.branches.len() as u32).map(BranchId)
    }

    pub fn roots(&self) -> &[BranchId] {
        &self.roots
    }

    /// Uris deleted by reparenting, mapped to the uri that absorbed them.
    pub fn merged(&self) -> &BTreeMap<String, String> {
        &self.merged
    }

    /// Locate `uri`, following catalog remaps and reparenting merges.
    pub fn resolve(&self, uri: &str) -> Option<BranchId> {
        let mut current = self.catalog.remap_if_any(uri);
        for _ in 0..=self.merged.len() {
            if let Some(id) = self.id_of(current) {
                return Some(id);
            }
            current = self.merged.get(current)?.as_str();
        }
        None
    }

    /// Every ancestor of `id`, nearest first, without repeats.
    pub fn ancestors(&self, id: BranchId) -> Vec<BranchId> {
        let mut out = Vec::new();
        let mut seen: BTreeSet<BranchId> = BTreeSet::new();
        let mut queue: std::collections::VecDeque<BranchId> =
            self.get(id).parents.iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            out.push(next);
            queue.extend(self.get(next).parents.iter().copied());
        }
        out
    }

    /// Every descendant of `id` in preorder, without repeats.
    pub fn descendants(&self, id: BranchId) -> Vec<BranchId> {
        let mut out = Vec::new();
        let mut seen: BTreeSet<BranchId> = BTreeSet::from([id]);
        let mut stack: Vec<BranchId> = self.get(id).children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            out.push(next);
            stack.extend(self.get(next).children.iter().rev().copied());
        }
        out
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Uri-keyed working graph used while passes run.
#[derive(Default)]
struct Draft {
    nodes: BTreeSet<String>,
    parents: BTreeMap<String, Vec<String>>,
    children: BTreeMap<String, Vec<String>>,
}

impl Draft {
    fn add_node(&mut self, uri: &str) {
        if !self.nodes.contains(uri) {
            self.nodes.insert(uri.to_string());
        }
    }

    fn add_edge(&mut self, child: &str, parent: &str) {
        self.add_node(child);
        self.add_node(parent);
        let parents = self.parents.entry(child.to_string()).or_default();
        if !parents.iter().any(|p| p == parent) {
            parents.push(parent.to_string());
        }
        let children = self.children.entry(parent.to_string()).or_default();
        if !children.iter().any(|c| c == child) {
            children.push(child.to_string());
        }
    }

    fn remove_edge(&mut self, child: &str, parent: &str) {
        if let Some(parents) = self.parents.get_mut(child) {
            parents.retain(|p| p != parent);
        }
        if let Some(children) = self.children.get_mut(parent) {
            children.retain(|c| c != child);
        }
    }

    fn parents_of(&self, uri: &str) -> &[String] {
        self.parents.get(uri).map(Vec::as_slice).unwrap_or(&[])
    }

    fn children_of(&self, uri: &str) -> &[String] {
        self.children.get(uri).map(Vec::as_slice).unwrap_or(&[])
    }

    fn has_parent(&self, uri: &str) -> bool {
        !self.parents_of(uri).is_empty()
    }

    /// Move `from`'s children under `into`, then delete `from`.
    fn merge_into(&mut self, from: &str, into: &str) {
        for child in self.children_of(from).to_vec() {
            self.remove_edge(&child, from);
            if child != into {
                self.add_edge(&child, into);
            }
        }
        for parent in self.parents_of(from).to_vec() {
            self.remove_edge(from, &parent);
        }
        self.parents.remove(from);
        self.children.remove(from);
        self.nodes.remove(from);
    }
}

pub struct HierarchyBuilder;

impl HierarchyBuilder {
    /// Build a hierarchy from `(child, parent)` is-a edges.
    ///
    /// Edges in `override_breaks`, self-loops, and edges touching a uri the
    /// catalog does not know are skipped. The known end of a skipped edge is
    /// kept as a node.
    pub fn build(
        catalog: Arc<TermCatalog>,
        is_a: &[(String, String)],
        override_breaks: &BTreeSet<(String, String)>,
    ) -> Hierarchy {
        let mut draft = Draft::default();
        let mut secondary: Vec<(String, String)> = Vec::new();
        let mut misses = 0usize;

        for (child, parent) in is_a {
            let child = catalog.remap_if_any(child);
            let parent = catalog.remap_if_any(parent);
            if !catalog.contains(child) || !catalog.contains(parent) {
                // The known end still belongs to the taxonomy, as a root if need be.
                for end in [child, parent] {
                    if catalog.contains(end) {
                        draft.add_node(end);
                    }
                }
                misses += 1;
                tracing::debug!(child, parent, "is-a edge references an unknown term; skipped");
                continue;
            }
            draft.add_node(child);
            draft.add_node(parent);
            if child == parent || override_breaks.contains(&(child.to_string(), parent.to_string()))
            {
                continue;
            }
            if catalog.is_authoritative(parent) {
                draft.add_edge(child, parent);
            } else {
                secondary.push((child.to_string(), parent.to_string()));
            }
        }

        let parented_by_primary: BTreeSet<String> = draft
            .parents
            .iter()
            .filter(|(_, parents)| !parents.is_empty())
            .map(|(child, _)| child.clone())
            .collect();
        for (child, parent) in &secondary {
            if !parented_by_primary.contains(child) {
                draft.add_edge(child, parent);
            }
        }

        let merged = reparent(&catalog, &mut draft);
        break_cycles(&mut draft);
        prune_mixed_parents(&catalog, &mut draft);

        let hierarchy = freeze(catalog, draft, merged);
        tracing::info!(
            branches = hierarchy.len(),
            roots = hierarchy.roots.len(),
            merged = hierarchy.merged.len(),
            skipped_edges = misses,
            "hierarchy built"
        );
        hierarchy
    }
}

/// Preferred members absorb equivalents that share a parent with them.
fn reparent(catalog: &TermCatalog, draft: &mut Draft) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    loop {
        let mut changed = false;
        for preferred in catalog.preferred_parents() {
            if !draft.nodes.contains(preferred) {
                continue;
            }
            for other in catalog.equivalents(preferred) {
                if catalog.is_preferred_parent(other) || !draft.nodes.contains(other) {
                    continue;
                }
                let shares_parent = draft
                    .parents_of(other)
                    .iter()
                    .any(|p| draft.parents_of(preferred).contains(p));
                if !shares_parent {
                    continue;
                }
                tracing::debug!(from = %other, into = %preferred, "merging equivalent branch");
                draft.merge_into(other, preferred);
                merged.insert(other.clone(), preferred.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    merged
}

/// Drop back edges found by a depth-first walk so the result is acyclic.
fn break_cycles(draft: &mut Draft) {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Active,
        Done,
    }

    let mut marks: BTreeMap<String, Mark> = BTreeMap::new();
    let mut back_edges: Vec<(String, String)> = Vec::new();

    let roots: Vec<String> = draft
        .nodes
        .iter()
        .filter(|n| !draft.has_parent(n))
        .cloned()
        .collect();
    let rest: Vec<String> = draft.nodes.iter().cloned().collect();

    for start in roots.into_iter().chain(rest) {
        if marks.contains_key(&start) {
            continue;
        }
        // (node, next child position)
        let mut stack: Vec<(String, usize)> = vec![(start.clone(), 0)];
        marks.insert(start, Mark::Active);
        while let Some((node, pos)) = stack.pop() {
            let children = draft.children_of(&node);
            if pos >= children.len() {
                marks.insert(node, Mark::Done);
                continue;
            }
            let child = children[pos].clone();
            stack.push((node.clone(), pos + 1));
            match marks.get(&child) {
                Some(Mark::Active) => back_edges.push((child, node)),
                Some(Mark::Done) => {}
                None => {
                    marks.insert(child.clone(), Mark::Active);
                    stack.push((child, 0));
                }
            }
        }
    }

    for (child, parent) in back_edges {
        tracing::warn!(%child, %parent, "is-a cycle detected; dropping edge");
        draft.remove_edge(&child, &parent);
    }
}

/// When some but not all parents are preferred, keep only the preferred ones.
fn prune_mixed_parents(catalog: &TermCatalog, draft: &mut Draft) {
    let mut drops: Vec<(String, String)> = Vec::new();
    for (child, parents) in &draft.parents {
        if parents.len() < 2 {
            continue;
        }
        let preferred = parents
            .iter()
            .filter(|p| catalog.is_preferred_parent(p))
            .count();
        if preferred == 0 || preferred == parents.len() {
            continue;
        }
        for parent in parents {
            if !catalog.is_preferred_parent(parent) {
                drops.push((child.clone(), parent.clone()));
            }
        }
    }
    for (child, parent) in drops {
        draft.remove_edge(&child, &parent);
    }
}

fn freeze(catalog: Arc<TermCatalog>, draft: Draft, merged: BTreeMap<String, String>) -> Hierarchy {
    let mut index: AHashMap<String, BranchId> = AHashMap::with_capacity(draft.nodes.len());
    let mut branches: Vec<Branch> = Vec::with_capacity(draft.nodes.len());
    for (i, uri) in draft.nodes.iter().enumerate() {
        index.insert(uri.clone(), BranchId(i as u32));
        let label = catalog
            .label(uri)
            .map(str::to_string)
            .unwrap_or_else(|| local_name(uri).to_string());
        branches.push(Branch {
            uri: uri.clone(),
            label,
            parents: Vec::new(),
            children: Vec::new(),
        });
    }

    let sort_keys: Vec<(String, String)> = branches
        .iter()
        .map(|b| label_sort_key(&b.label, &b.uri))
        .collect();

    for (i, uri) in draft.nodes.iter().enumerate() {
        let mut parents: Vec<BranchId> = draft
            .parents_of(uri)
            .iter()
            .filter_map(|p| index.get(p).copied())
            .collect();
        parents.sort();
        let mut children: Vec<BranchId> = draft
            .children_of(uri)
            .iter()
            .filter_map(|c| index.get(c).copied())
            .collect();
        children.sort_by(|a, b| sort_keys[a.index()].cmp(&sort_keys[b.index()]));
        branches[i].parents = parents;
        branches[i].children = children;
    }

    let mut roots: Vec<BranchId> = branches
        .iter()
        .enumerate()
        .filter(|(_, b)| b.parents.is_empty())
        .map(|(i, _)| BranchId(i as u32))
        .collect();
    roots.sort_by(|a, b| sort_keys[a.index()].cmp(&sort_keys[b.index()]));

    Hierarchy {
        catalog,
        branches,
        index,
        roots,
        merged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_into_rewrites_back_references() {
        let mut draft = Draft::default();
        draft.add_edge("p", "g");
        draft.add_edge("q", "g");
        draft.add_edge("c", "p");
        draft.add_edge("c", "q");
        draft.add_edge("d", "q");

        draft.merge_into("q", "p");

        assert!(!draft.nodes.contains("q"));
        assert_eq!(draft.parents_of("c"), ["p".to_string()]);
        assert_eq!(draft.parents_of("d"), ["p".to_string()]);
        assert_eq!(draft.children_of("g"), ["p".to_string()]);
        let mut kids = draft.children_of("p").to_vec();
        kids.sort();
        assert_eq!(kids, vec!["c".to_string(), "d".to_string()]);
    }

    #[test]
    fn break_cycles_leaves_a_dag() {
        let mut draft = Draft::default();
        draft.add_edge("b", "a");
        draft.add_edge("c", "b");
        draft.add_edge("a", "c");
        draft.add_edge("d", "c");

        break_cycles(&mut draft);

        let edges: usize = draft.parents.values().map(Vec::len).sum();
        assert_eq!(edges, 3);
        // some node must now be a root
        assert!(draft.nodes.iter().any(|n| !draft.has_parent(n)));
    }
}
