use ahash::AHashMap;
use facetree_field::{FieldDef, FieldKey, FieldTree, Node, NodeProto, PendingNode, RestoredNode};
use facetree_ontology::{local_name, Term, TermCatalog};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::sync::Arc;

use crate::format::{read_header, read_section, write_header, write_section};
use crate::table::{TermId, TermTable};
use crate::{FormatError, SnapshotError};

/// One flattened row of a stored tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub term: TermId,
    pub depth: u32,
    pub parent_index: i32,
    pub child_count: u32,
    pub schema_count: u32,
    pub in_schema: bool,
    pub explicit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTree {
    pub template_id: String,
    pub property: TermId,
    pub group_path: Vec<String>,
    pub nodes: Vec<NodeRecord>,
    #[serde(skip)]
    field: Option<FieldDef>,
}

impl StoredTree {
    /// The live field definition this tree was bound to on load.
    pub fn field(&self) -> Option<&FieldDef> {
        self.field.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.field.is_some()
    }
}

/// Term table, stored trees and remap table.
///
/// The term table sits behind an `Arc` so slices share it; the first edit
/// through a shared table copies it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    terms: Arc<TermTable>,
    trees: Vec<StoredTree>,
    remaps: BTreeMap<TermId, TermId>,
}

impl Snapshot {
    /// Snapshot of `trees`, storing only the terms they reference.
    ///
    /// Trees without a field key cannot be addressed after loading and are
    /// skipped.
    pub fn build(trees: &[FieldTree]) -> Self {
        Self::build_inner(trees, None)
    }

    /// Like [`Snapshot::build`], but also stores every catalog term and the
    /// catalog's remap directives.
    pub fn build_with_catalog(trees: &[FieldTree], catalog: &TermCatalog) -> Self {
        Self::build_inner(trees, Some(catalog))
    }

    fn build_inner(trees: &[FieldTree], catalog: Option<&TermCatalog>) -> Self {
        let mut terms: BTreeMap<String, Term> = BTreeMap::new();
        if let Some(catalog) = catalog {
            for term in catalog.terms() {
                terms.insert(term.uri.clone(), term.clone());
            }
            for (from, to) in catalog.remaps() {
                for uri in [from, to] {
                    terms
                        .entry(uri.clone())
                        .or_insert_with(|| bare_term(uri));
                }
            }
        }

        let keyed: Vec<(&FieldKey, &FieldTree)> = trees
            .iter()
            .filter_map(|tree| match tree.key() {
                Some(key) => Some((key, tree)),
                None => {
                    tracing::warn!(nodes = tree.len(), "skipping field tree without a field key");
                    None
                }
            })
            .collect();
        for (key, tree) in &keyed {
            let property = catalog
                .and_then(|c| c.term(&key.property))
                .cloned()
                .unwrap_or_else(|| bare_term(&key.property));
            terms.entry(key.property.clone()).or_insert(property);
            for node in tree.nodes() {
                terms
                    .entry(node.uri.clone())
                    .or_insert_with(|| term_of(node));
            }
        }

        let mut table = TermTable::from_terms(terms.into_values());
        let stored: Vec<StoredTree> = keyed
            .iter()
            .map(|(key, tree)| store_tree(&mut table, key, tree))
            .collect();

        let mut remaps = BTreeMap::new();
        if let Some(catalog) = catalog {
            for (from, to) in catalog.remaps() {
                let from = table.intern(bare_term(from));
                let to = table.intern(bare_term(to));
                remaps.insert(from, to);
            }
        }

        tracing::info!(
            terms = table.len(),
            prefixes = table.prefixes().len(),
            trees = stored.len(),
            remaps = remaps.len(),
            "snapshot built"
        );
        Self {
            terms: Arc::new(table),
            trees: stored,
            remaps,
        }
    }

    pub fn serialize(&self, w: &mut impl Write) -> Result<(), SnapshotError> {
        write_header(w)?;
        write_section(w, &*self.terms)?;
        write_section(w, &self.trees)?;
        write_section(w, &self.remaps)?;
        w.flush()?;
        tracing::debug!(terms = self.terms.len(), trees = self.trees.len(), "snapshot written");
        Ok(())
    }

    /// Decode a snapshot and bind its trees to `templates`.
    ///
    /// Trees with no matching definition stay readable but unbound.
    pub fn deserialize(r: &mut impl Read, templates: &[FieldDef]) -> Result<Self, SnapshotError> {
        read_header(r)?;
        let mut table: TermTable = read_section(r, "term table")?;
        table.reindex()?;
        let trees: Vec<StoredTree> = read_section(r, "tree table")?;
        let remaps: BTreeMap<TermId, TermId> = read_section(r, "remap table")?;

        let mut snapshot = Self {
            terms: Arc::new(table),
            trees,
            remaps,
        };
        snapshot.validate()?;
        snapshot.bind(templates);
        Ok(snapshot)
    }

    /// Attach live field definitions to stored trees by field key.
    pub fn bind(&mut self, templates: &[FieldDef]) {
        let by_key: AHashMap<&FieldKey, &FieldDef> =
            templates.iter().map(|f| (&f.key, f)).collect();
        let keys: Vec<Option<FieldKey>> = self.trees.iter().map(|t| self.key_of(t)).collect();
        for (tree, key) in self.trees.iter_mut().zip(keys) {
            tree.field = key.as_ref().and_then(|k| by_key.get(k)).map(|f| (*f).clone());
            if tree.field.is_none() {
                tracing::warn!(
                    template = %tree.template_id,
                    property = ?key.map(|k| k.property),
                    "stored tree has no live field definition; left unbound"
                );
            }
        }
    }

    fn validate(&self) -> Result<(), FormatError> {
        let len = self.terms.len();
        let check = |id: TermId, what: &str| -> Result<(), FormatError> {
            if id.index() < len {
                Ok(())
            } else {
                Err(FormatError::Corrupt(format!(
                    "{what} references term {} of {len}",
                    id.0
                )))
            }
        };

        for tree in &self.trees {
            check(tree.property, "tree property")?;
            for (pos, row) in tree.nodes.iter().enumerate() {
                check(row.term, "tree node")?;
                let expected_depth = match row.parent_index {
                    -1 => 0,
                    p if p >= 0 && (p as usize) < pos => tree.nodes[p as usize].depth + 1,
                    p => {
                        return Err(FormatError::Corrupt(format!(
                            "tree `{}` row {pos} has parent index {p}",
                            tree.template_id
                        )))
                    }
                };
                if row.depth != expected_depth {
                    return Err(FormatError::Corrupt(format!(
                        "tree `{}` row {pos} has depth {} under a parent at depth {}",
                        tree.template_id,
                        row.depth,
                        expected_depth.saturating_sub(1)
                    )));
                }
            }
        }

        for (from, to) in &self.remaps {
            check(*from, "remap source")?;
            check(*to, "remap target")?;
        }
        if let Some(chain) = find_cycle(&self.remaps) {
            let chain: Vec<String> = chain
                .into_iter()
                .map(|id| self.terms.uri(id).unwrap_or_default())
                .collect();
            return Err(FormatError::Corrupt(format!(
                "remap cycle {}",
                chain.join(" -> ")
            )));
        }
        Ok(())
    }

    pub fn terms(&self) -> &Arc<TermTable> {
        &self.terms
    }

    pub fn trees(&self) -> &[StoredTree] {
        &self.trees
    }

    pub fn term_uri(&self, id: TermId) -> Option<String> {
        self.terms.uri(id)
    }

    pub fn term_id(&self, uri: &str) -> Option<TermId> {
        self.terms.id_of(uri)
    }

    fn key_of(&self, tree: &StoredTree) -> Option<FieldKey> {
        let property = self.terms.uri(tree.property)?;
        Some(FieldKey::new(tree.template_id.clone(), property).with_group_path(tree.group_path.clone()))
    }

    fn position(&self, key: &FieldKey) -> Option<usize> {
        self.trees
            .iter()
            .position(|t| self.key_of(t).as_ref() == Some(key))
    }

    /// Reconstruct every stored tree, in storage order.
    pub fn field_trees(&self) -> Vec<FieldTree> {
        self.trees.iter().filter_map(|t| self.restore(t)).collect()
    }

    pub fn tree(&self, key: &FieldKey) -> Option<FieldTree> {
        self.position(key).and_then(|i| self.restore(&self.trees[i]))
    }

    fn restore(&self, tree: &StoredTree) -> Option<FieldTree> {
        let key = self.key_of(tree)?;
        let rows = tree
            .nodes
            .iter()
            .map(|row| {
                let mut node = self.node_proto(row.term);
                node.in_schema = row.in_schema;
                node.explicit = row.explicit;
                RestoredNode {
                    node,
                    depth: row.depth,
                    parent_index: row.parent_index,
                    child_count: row.child_count,
                    schema_count: row.schema_count,
                }
            })
            .collect();
        Some(FieldTree::from_flattened(key, tree.field.clone(), rows))
    }

    fn node_proto(&self, id: TermId) -> NodeProto {
        let uri = self.terms.uri(id).unwrap_or_default();
        match self.terms.record(id) {
            Some(record) => NodeProto {
                uri,
                label: record.label.clone(),
                description: record.description.clone(),
                alt_labels: record.alt_labels.clone(),
                urls: record.urls.clone(),
                in_schema: false,
                explicit: false,
            },
            None => NodeProto::new(uri, String::new()),
        }
    }

    /// The trees of one template, sharing this snapshot's term table.
    pub fn slice(&self, template_id: &str) -> Snapshot {
        Snapshot {
            terms: Arc::clone(&self.terms),
            trees: self
                .trees
                .iter()
                .filter(|t| t.template_id == template_id)
                .cloned()
                .collect(),
            remaps: self.remaps.clone(),
        }
    }

    /// `(from, to)` remap directives as uris.
    pub fn remaps(&self) -> Vec<(String, String)> {
        self.remaps
            .iter()
            .filter_map(|(from, to)| Some((self.terms.uri(*from)?, self.terms.uri(*to)?)))
            .collect()
    }

    /// Terminal uri of `uri`'s remap chain.
    pub fn resolve_remap(&self, uri: &str) -> String {
        let Some(mut current) = self.terms.id_of(uri) else {
            return uri.to_string();
        };
        let mut seen = BTreeSet::new();
        while let Some(next) = self.remaps.get(&current) {
            if !seen.insert(current) {
                break;
            }
            current = *next;
        }
        self.terms.uri(current).unwrap_or_else(|| uri.to_string())
    }

    /// Append terms and remap directives.
    ///
    /// Existing ids are untouched, so stored trees and their bindings stay
    /// valid. Terms already present and remaps already recorded are ignored;
    /// the return value counts what was actually added. A directive that would
    /// close a remap cycle rejects the whole batch.
    pub fn add_terms(&mut self, terms: Vec<Term>, remaps: &[(String, String)]) -> Result<usize, SnapshotError> {
        let mut forwarding: BTreeMap<String, String> = self.remaps().into_iter().collect();
        for (from, to) in remaps {
            forwarding.insert(from.clone(), to.clone());
        }
        for (from, _) in remaps {
            let mut chain = vec![from.clone()];
            let mut current = from;
            while let Some(next) = forwarding.get(current) {
                if chain.contains(next) {
                    chain.push(next.clone());
                    return Err(SnapshotError::RemapCycle { chain });
                }
                chain.push(next.clone());
                current = next;
            }
        }

        let table = Arc::make_mut(&mut self.terms);
        let before = table.len();
        for term in terms {
            table.intern(term);
        }
        let mut added_remaps = 0;
        for (from, to) in remaps {
            let from = table.intern(bare_term(from));
            let to = table.intern(bare_term(to));
            if self.remaps.insert(from, to) != Some(to) {
                added_remaps += 1;
            }
        }
        let added = table.len() - before + added_remaps;
        if added > 0 {
            tracing::info!(added, terms = table.len(), "terms appended to snapshot");
        }
        Ok(added)
    }

    /// Attach nodes to a stored tree. Requires the tree to be bound.
    pub fn add_nodes(&mut self, key: &FieldKey, pending: Vec<PendingNode>) -> Result<Vec<String>, SnapshotError> {
        let index = self.position(key).ok_or_else(|| SnapshotError::UnknownTree {
            key: key.to_string(),
        })?;
        if !self.trees[index].is_bound() {
            return Err(SnapshotError::Unbound {
                key: key.to_string(),
            });
        }
        let Some(mut tree) = self.restore(&self.trees[index]) else {
            return Err(SnapshotError::UnknownTree {
                key: key.to_string(),
            });
        };
        let added = tree.add_nodes(pending);
        if added.is_empty() {
            return Ok(added);
        }

        let table = Arc::make_mut(&mut self.terms);
        let rows = tree
            .flattened_nodes()
            .zip(tree.flattened())
            .map(|(node, flat)| NodeRecord {
                term: table.intern(term_of(node)),
                depth: flat.depth,
                parent_index: flat.parent_index,
                child_count: node.child_count,
                schema_count: node.schema_count,
                in_schema: node.in_schema,
                explicit: node.explicit,
            })
            .collect();
        self.trees[index].nodes = rows;
        Ok(added)
    }
}

fn store_tree(table: &mut TermTable, key: &FieldKey, tree: &FieldTree) -> StoredTree {
    let property = table.intern(bare_term(&key.property));
    let nodes = tree
        .flattened()
        .iter()
        .map(|flat| {
            let node = tree.node(flat.node);
            NodeRecord {
                term: table.intern(term_of(node)),
                depth: flat.depth,
                parent_index: flat.parent_index,
                child_count: node.child_count,
                schema_count: node.schema_count,
                in_schema: node.in_schema,
                explicit: node.explicit,
            }
        })
        .collect();
    StoredTree {
        template_id: key.template_id.clone(),
        property,
        group_path: key.group_path.clone(),
        nodes,
        field: tree.field().cloned(),
    }
}

fn bare_term(uri: &str) -> Term {
    Term::new(uri, local_name(uri))
}

fn term_of(node: &Node) -> Term {
    let mut term = Term::new(node.uri.clone(), node.label.clone());
    term.description = node.description.clone();
    term.alt_labels = node.alt_labels.iter().cloned().collect();
    term.urls = node.urls.iter().cloned().collect();
    term
}

fn find_cycle(remaps: &BTreeMap<TermId, TermId>) -> Option<Vec<TermId>> {
    for start in remaps.keys() {
        let mut chain = vec![*start];
        let mut current = *start;
        while let Some(next) = remaps.get(&current) {
            if chain.contains(next) {
                chain.push(*next);
                return Some(chain);
            }
            chain.push(*next);
            current = *next;
        }
    }
    None
}
