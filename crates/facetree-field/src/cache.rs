//! Memoized field trees.
//!
//! A tree depends only on the hierarchy and the selector rules, so entries are
//! keyed by field identity plus a digest of the rules. Editing a field's rules
//! therefore misses the cache instead of returning a stale tree.

use ahash::AHashMap;
use facetree_ontology::Hierarchy;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::selector::{FieldDef, FieldKey};
use crate::tree::FieldTree;

type CacheKey = (FieldKey, String);

#[derive(Debug, Default)]
pub struct FieldTreeCache {
    entries: RwLock<AHashMap<CacheKey, Arc<FieldTree>>>,
}

impl FieldTreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached tree for `field`, building it on a miss.
    pub fn get_or_build(&self, hierarchy: &Hierarchy, field: &FieldDef) -> Arc<FieldTree> {
        let key = (field.key.clone(), field.rules_digest());
        if let Some(tree) = self.entries.read().get(&key) {
            return Arc::clone(tree);
        }

        // Built outside the lock; a racing builder produces an identical tree.
        let built = Arc::new(FieldTree::for_field(hierarchy, field));
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(key).or_insert(built))
    }

    pub fn get(&self, field: &FieldDef) -> Option<Arc<FieldTree>> {
        let key = (field.key.clone(), field.rules_digest());
        self.entries.read().get(&key).cloned()
    }

    /// Drop every entry for `key`, whatever rules it was built with.
    pub fn invalidate(&self, key: &FieldKey) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(k, _), _| k != key);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{SelectorMode, SelectorRule};
    use facetree_ontology::vocab::{RDFS_LABEL_IRI, RDFS_SUBCLASS_OF_IRI};
    use facetree_ontology::{MemorySource, TermCatalog, Triple, TripleObject, Vocabulary};
    use std::collections::BTreeSet;

    fn hierarchy() -> Hierarchy {
        let triples = vec![
            Triple::new("urn:a", RDFS_LABEL_IRI, TripleObject::literal("A")),
            Triple::new("urn:b", RDFS_LABEL_IRI, TripleObject::literal("B")),
            Triple::new("urn:b", RDFS_SUBCLASS_OF_IRI, TripleObject::uri("urn:a")),
        ];
        let catalog = TermCatalog::load(
            vec![MemorySource::with_triples("t", triples)],
            &BTreeSet::new(),
            Vocabulary::default(),
        )
        .expect("catalog");
        Hierarchy::values(Arc::new(catalog))
    }

    #[test]
    fn hit_returns_same_tree_and_rule_edit_misses() {
        let h = hierarchy();
        let cache = FieldTreeCache::new();
        let key = FieldKey::new("t", "p");
        let field = FieldDef::new(key.clone(), vec![SelectorRule::new("urn:a", SelectorMode::WholeBranch)]);

        let first = cache.get_or_build(&h, &field);
        let second = cache.get_or_build(&h, &field);
        assert!(Arc::ptr_eq(&first, &second));

        let edited = FieldDef::new(key.clone(), vec![SelectorRule::new("urn:b", SelectorMode::Item)]);
        assert!(cache.get(&edited).is_none());
        let third = cache.get_or_build(&h, &edited);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.invalidate(&key), 2);
        assert!(cache.is_empty());
    }
}
