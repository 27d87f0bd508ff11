//! HierarchyBuilder passes.

use facetree_ontology::vocab::{
    FACETREE_NS, OWL_EQUIVALENT_CLASS_IRI, RDFS_LABEL_IRI, RDFS_SUBCLASS_OF_IRI,
};
use facetree_ontology::{
    Hierarchy, HierarchyBuilder, MemorySource, TermCatalog, Triple, TripleObject, Vocabulary,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

const EX: &str = "http://example.org/";
const OTHER: &str = "http://other.org/";

fn ex(local: &str) -> String {
    format!("{EX}{local}")
}

fn other(local: &str) -> String {
    format!("{OTHER}{local}")
}

fn label(uri: &str, text: &str) -> Triple {
    Triple::new(uri, RDFS_LABEL_IRI, TripleObject::literal(text))
}

fn is_a(child: &str, parent: &str) -> Triple {
    Triple::new(child, RDFS_SUBCLASS_OF_IRI, TripleObject::uri(parent))
}

fn catalog(triples: Vec<Triple>) -> Arc<TermCatalog> {
    Arc::new(
        TermCatalog::load(
            vec![MemorySource::with_triples("core", triples)],
            &BTreeSet::new(),
            Vocabulary::default().with_authoritative_namespace(EX),
        )
        .expect("catalog"),
    )
}

fn child_uris(h: &Hierarchy, uri: &str) -> Vec<String> {
    let branch = h.branch(uri).expect("branch");
    branch.children().iter().map(|id| h.get(*id).uri.clone()).collect()
}

fn parent_uris(h: &Hierarchy, uri: &str) -> Vec<String> {
    let branch = h.branch(uri).expect("branch");
    branch.parents().iter().map(|id| h.get(*id).uri.clone()).collect()
}

#[test]
fn test_primary_lineage_wins_over_secondary_source() {
    let root = ex("root");
    let node = ex("node");
    let foreign = other("bucket");
    let orphan = ex("orphan");
    let h = Hierarchy::values(catalog(vec![
        label(&root, "Root"),
        label(&node, "Node"),
        label(&foreign, "Bucket"),
        label(&orphan, "Orphan"),
        is_a(&node, &foreign),
        is_a(&node, &root),
        is_a(&orphan, &foreign),
    ]));

    assert_eq!(parent_uris(&h, &node), vec![root.clone()]);
    assert_eq!(parent_uris(&h, &orphan), vec![foreign.clone()]);
    assert_eq!(child_uris(&h, &foreign), vec![orphan.clone()]);
}

#[test]
fn test_self_loops_and_override_breaks_are_dropped() {
    let a = ex("a");
    let b = ex("b");
    let h = Hierarchy::values(catalog(vec![
        label(&a, "A"),
        label(&b, "B"),
        is_a(&a, &a),
        is_a(&a, &b),
        Triple::new(
            a.as_str(),
            format!("{FACETREE_NS}notSubClassOf"),
            TripleObject::uri(b.as_str()),
        ),
    ]));

    assert!(h.branch(&a).unwrap().parents().is_empty());
    assert!(h.branch(&b).unwrap().children().is_empty());
    assert_eq!(h.roots().len(), 2);
}

#[test]
fn test_unknown_endpoints_are_skipped() {
    let a = ex("a");
    let cat = catalog(vec![label(&a, "A")]);
    let edges = vec![(a.clone(), ex("ghost"))];
    let h = HierarchyBuilder::build(cat, &edges, &BTreeSet::new());
    assert_eq!(h.len(), 1);
    assert!(h.branch(&a).unwrap().parents().is_empty());
    assert!(h.resolve(&ex("ghost")).is_none());
}

#[test]
fn test_value_under_unlabelled_parent_becomes_root() {
    let leaf = ex("Leaf");
    let h = Hierarchy::values(catalog(vec![
        label(&leaf, "Leaf"),
        is_a(&leaf, "http://www.w3.org/2002/07/owl#Thing"),
    ]));

    let branch = h.branch(&leaf).expect("leaf kept");
    assert!(branch.parents().is_empty());
    assert_eq!(h.roots().len(), 1);
    assert_eq!(h.resolve(&leaf), h.id_of(&leaf));
    assert!(h.branch("http://www.w3.org/2002/07/owl#Thing").is_none());
}

#[test]
fn test_preferred_equivalent_absorbs_sibling() {
    // G -> {P, Q}; C under both; D only under Q. P is preferred and P == Q.
    let g = ex("g");
    let p = ex("p");
    let q = other("q");
    let c = ex("c");
    let d = ex("d");
    let h = Hierarchy::values(catalog(vec![
        label(&g, "G"),
        label(&p, "P"),
        label(&q, "Q"),
        label(&c, "C"),
        label(&d, "D"),
        is_a(&p, &g),
        is_a(&q, &g),
        is_a(&c, &p),
        is_a(&c, &q),
        is_a(&d, &q),
        Triple::new(p.as_str(), OWL_EQUIVALENT_CLASS_IRI, TripleObject::uri(q.as_str())),
        Triple::new(
            p.as_str(),
            format!("{FACETREE_NS}preferredParent"),
            TripleObject::literal("true"),
        ),
    ]));

    assert!(h.branch(&q).is_none());
    assert_eq!(parent_uris(&h, &c), vec![p.clone()]);
    assert_eq!(parent_uris(&h, &d), vec![p.clone()]);
    assert_eq!(child_uris(&h, &g), vec![p.clone()]);
    assert_eq!(child_uris(&h, &p), vec![c.clone(), d.clone()]);
    assert_eq!(h.merged().get(&q), Some(&p));
    assert_eq!(h.resolve(&q), h.id_of(&p));
}

#[test]
fn test_mixed_parents_keep_only_preferred() {
    let a = ex("a");
    let b = ex("b");
    let c = ex("c");
    let x = ex("x");
    let preferred = format!("{FACETREE_NS}preferredParent");
    let h = Hierarchy::values(catalog(vec![
        label(&a, "A"),
        label(&b, "B"),
        label(&c, "C"),
        label(&x, "X"),
        is_a(&x, &a),
        is_a(&x, &b),
        is_a(&x, &c),
        Triple::new(b.as_str(), preferred.as_str(), TripleObject::literal("true")),
    ]));

    assert_eq!(parent_uris(&h, &x), vec![b.clone()]);
}

#[test]
fn test_unpreferred_multi_parent_is_kept() {
    let a = ex("a");
    let b = ex("b");
    let x = ex("x");
    let h = Hierarchy::values(catalog(vec![
        label(&a, "A"),
        label(&b, "B"),
        label(&x, "X"),
        is_a(&x, &b),
        is_a(&x, &a),
    ]));

    assert_eq!(parent_uris(&h, &x), vec![a.clone(), b.clone()]);
}

#[test]
fn test_children_sorted_case_insensitively_with_uri_tie_break() {
    let root = ex("root");
    let h = Hierarchy::values(catalog(vec![
        label(&root, "Root"),
        label(&ex("c2"), "beta"),
        label(&ex("c1"), "Beta"),
        label(&ex("c3"), "alpha"),
        label(&ex("c4"), "Gamma"),
        is_a(&ex("c4"), &root),
        is_a(&ex("c2"), &root),
        is_a(&ex("c1"), &root),
        is_a(&ex("c3"), &root),
    ]));

    assert_eq!(
        child_uris(&h, &root),
        vec![ex("c3"), ex("c1"), ex("c2"), ex("c4")]
    );
}

#[test]
fn test_ancestors_and_descendants() {
    let h = Hierarchy::values(catalog(vec![
        label(&ex("r"), "R"),
        label(&ex("m"), "M"),
        label(&ex("l"), "L"),
        is_a(&ex("m"), &ex("r")),
        is_a(&ex("l"), &ex("m")),
    ]));
    let r = h.id_of(&ex("r")).unwrap();
    let m = h.id_of(&ex("m")).unwrap();
    let l = h.id_of(&ex("l")).unwrap();
    assert_eq!(h.ancestors(l), vec![m, r]);
    assert_eq!(h.descendants(r), vec![m, l]);
    assert_eq!(h.roots(), [r]);
}

fn edge_strategy() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0usize..12, 0usize..12), 0..40)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn hierarchy_is_deterministic_and_acyclic(edges in edge_strategy()) {
        let mut triples: Vec<Triple> = (0..12)
            .map(|i| label(&ex(&format!("n{i}")), &format!("Node {}", i % 5)))
            .collect();
        for (c, p) in &edges {
            triples.push(is_a(&ex(&format!("n{c}")), &ex(&format!("n{p}"))));
        }
        let first = Hierarchy::values(catalog(triples.clone()));
        let second = Hierarchy::values(catalog(triples));

        prop_assert_eq!(first.len(), second.len());
        for id in first.ids() {
            let a = first.get(id);
            let b = second.get(id);
            prop_assert_eq!(&a.uri, &b.uri);
            prop_assert_eq!(a.children(), b.children());
            prop_assert!(!a.parents().contains(&id));
            prop_assert!(!first.ancestors(id).contains(&id));
        }
    }
}
