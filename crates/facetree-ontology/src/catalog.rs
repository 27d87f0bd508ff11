//! TermCatalog: labelled terms, membership sets, equivalences and remaps.
//!
//! Loading runs in three phases:
//!
//! 1. read every source into memory (progress 0.0 .. 0.5),
//! 2. collect `remapTo` directives and reject cycles before anything else is
//!    looked at,
//! 3. interpret the remaining triples against the [`Vocabulary`]
//!    (progress 0.5 .. 1.0).
//!
//! The result is immutable. Uris that are eliminated, excluded by the caller,
//! or the source of a remap never show up in any map.

use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet};

use crate::source::{Triple, TripleObject, TripleSource};
use crate::vocab::{PredicateRole, Vocabulary};
use crate::CatalogError;

/// Progress is reported at most this often while interpreting triples.
const PROGRESS_STRIDE: usize = 4096;

/// A labelled, uri-identified concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub uri: String,
    pub label: String,
    pub description: Option<String>,
    pub alt_labels: BTreeSet<String>,
    pub urls: BTreeSet<String>,
    /// Name of the triple source that first mentioned this uri.
    pub source: String,
    /// The uri lies in the configured authoritative namespace.
    pub authoritative: bool,
}

impl Term {
    pub fn new(uri: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            label: label.into(),
            description: None,
            alt_labels: BTreeSet::new(),
            urls: BTreeSet::new(),
            source: String::new(),
            authoritative: false,
        }
    }
}

#[derive(Debug)]
pub struct TermCatalog {
    vocabulary: Vocabulary,
    terms: BTreeMap<String, Term>,
    properties: BTreeSet<String>,
    values: BTreeSet<String>,
    equivalents: AHashMap<String, Vec<String>>,
    label_index: AHashMap<String, String>,
    preferred: BTreeSet<String>,
    subclass_edges: Vec<(String, String)>,
    subproperty_edges: Vec<(String, String)>,
    override_breaks: BTreeSet<(String, String)>,
    remaps: BTreeMap<String, String>,
    eliminated: BTreeSet<String>,
}

/// Text candidate with a language preference flag.
struct Ranked {
    text: String,
    preferred_lang: bool,
}

fn is_preferred_language(language: Option<&str>) -> bool {
    match language {
        None => true,
        Some(lang) => {
            let lang = lang.to_ascii_lowercase();
            lang == "en" || lang.starts_with("en-")
        }
    }
}

fn offer(slot: &mut Option<Ranked>, text: &str, language: Option<&str>) {
    let preferred_lang = is_preferred_language(language);
    match slot {
        Some(existing) if existing.preferred_lang || !preferred_lang => {}
        _ => {
            *slot = Some(Ranked {
                text: text.to_string(),
                preferred_lang,
            })
        }
    }
}

/// Reject remap chains that loop back on themselves.
fn validate_remaps(remaps: &BTreeMap<String, String>) -> Result<(), CatalogError> {
    let mut cleared: BTreeSet<&str> = BTreeSet::new();
    for start in remaps.keys() {
        if cleared.contains(start.as_str()) {
            continue;
        }
        let mut chain: Vec<&str> = vec![start.as_str()];
        let mut on_chain: BTreeSet<&str> = BTreeSet::from([start.as_str()]);
        let mut current = start.as_str();
        while let Some(next) = remaps.get(current) {
            let next = next.as_str();
            if on_chain.contains(next) {
                chain.push(next);
                return Err(CatalogError::RemapCycle {
                    chain: chain.into_iter().map(str::to_string).collect(),
                });
            }
            if cleared.contains(next) {
                break;
            }
            chain.push(next);
            on_chain.insert(next);
            current = next;
        }
        cleared.extend(chain);
    }
    Ok(())
}

fn follow_remaps<'a>(remaps: &'a BTreeMap<String, String>, uri: &'a str) -> &'a str {
    let mut current = uri;
    // Bounded by the acyclicity check performed at load.
    for _ in 0..=remaps.len() {
        match remaps.get(current) {
            Some(next) => current = next.as_str(),
            None => break,
        }
    }
    current
}

fn push_unique(
    edges: &mut Vec<(String, String)>,
    seen: &mut BTreeSet<(String, String)>,
    edge: (String, String),
) {
    if seen.insert(edge.clone()) {
        edges.push(edge);
    }
}

impl TermCatalog {
    /// Load a catalog from `sources`, dropping every uri in `exclude`.
    pub fn load<S: TripleSource>(
        sources: Vec<S>,
        exclude: &BTreeSet<String>,
        vocabulary: Vocabulary,
    ) -> Result<Self, CatalogError> {
        Self::load_with_progress(sources, exclude, vocabulary, &mut |_| {})
    }

    /// Same as [`TermCatalog::load`], reporting progress fractions in `0..=1`.
    pub fn load_with_progress<S: TripleSource>(
        mut sources: Vec<S>,
        exclude: &BTreeSet<String>,
        vocabulary: Vocabulary,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Self, CatalogError> {
        // Phase 1: read.
        let source_count = sources.len().max(1);
        let mut source_names: Vec<String> = Vec::with_capacity(sources.len());
        let mut triples: Vec<(usize, Triple)> = Vec::new();
        for (idx, source) in sources.iter_mut().enumerate() {
            source_names.push(source.name().to_string());
            source.read_triples(&mut |t| triples.push((idx, t)))?;
            tracing::debug!(source = source.name(), total = triples.len(), "read triple source");
            progress(0.5 * (idx + 1) as f32 / source_count as f32);
        }

        // Phase 2: remaps, validated before any other triple is interpreted.
        let mut remaps: BTreeMap<String, String> = BTreeMap::new();
        for (_, t) in &triples {
            if vocabulary.role_of(&t.predicate) != Some(PredicateRole::RemapTo) {
                continue;
            }
            let Some(target) = t.object.as_uri() else {
                continue;
            };
            match remaps.get(&t.subject) {
                Some(existing) if existing != target => {
                    tracing::warn!(
                        uri = %t.subject,
                        kept = %existing,
                        ignored = %target,
                        "conflicting remap directives; keeping the first"
                    );
                }
                Some(_) => {}
                None => {
                    remaps.insert(t.subject.clone(), target.to_string());
                }
            }
        }
        validate_remaps(&remaps)?;

        let mut eliminated: BTreeSet<String> = exclude.clone();
        eliminated.extend(remaps.keys().cloned());
        for (_, t) in &triples {
            if vocabulary.role_of(&t.predicate) == Some(PredicateRole::Eliminated) {
                eliminated.insert(t.subject.clone());
            }
        }

        // Phase 3: interpret.
        let mut labels: AHashMap<String, Option<Ranked>> = AHashMap::new();
        let mut descriptions: AHashMap<String, Option<Ranked>> = AHashMap::new();
        let mut alt_labels: AHashMap<String, BTreeSet<String>> = AHashMap::new();
        let mut urls: AHashMap<String, BTreeSet<String>> = AHashMap::new();
        let mut first_source: AHashMap<String, usize> = AHashMap::new();
        let mut properties: BTreeSet<String> = BTreeSet::new();
        let mut values: BTreeSet<String> = BTreeSet::new();
        let mut equivalence_links: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut preferred: BTreeSet<String> = BTreeSet::new();
        let mut subclass_edges: Vec<(String, String)> = Vec::new();
        let mut subproperty_edges: Vec<(String, String)> = Vec::new();
        let mut seen_subclass: BTreeSet<(String, String)> = BTreeSet::new();
        let mut seen_subproperty: BTreeSet<(String, String)> = BTreeSet::new();
        let mut override_breaks: BTreeSet<(String, String)> = BTreeSet::new();

        let total = triples.len().max(1);
        for (n, (source_idx, t)) in triples.iter().enumerate() {
            if n % PROGRESS_STRIDE == 0 {
                progress(0.5 + 0.5 * n as f32 / total as f32);
            }
            if eliminated.contains(&t.subject) {
                continue;
            }
            let Some(role) = vocabulary.role_of(&t.predicate) else {
                continue;
            };
            let object_uri = match &t.object {
                TripleObject::Uri(uri) => {
                    let forwarded = follow_remaps(&remaps, uri);
                    if eliminated.contains(forwarded) {
                        continue;
                    }
                    Some(forwarded.to_string())
                }
                TripleObject::Literal { .. } => None,
            };
            let subject = t.subject.clone();
            first_source.entry(subject.clone()).or_insert(*source_idx);

            match role {
                PredicateRole::Label => {
                    if let TripleObject::Literal { value, language } = &t.object {
                        offer(labels.entry(subject).or_default(), value, language.as_deref());
                    }
                }
                PredicateRole::Description => {
                    if let TripleObject::Literal { value, language } = &t.object {
                        offer(
                            descriptions.entry(subject).or_default(),
                            value,
                            language.as_deref(),
                        );
                    }
                }
                PredicateRole::AltLabel => {
                    alt_labels
                        .entry(subject)
                        .or_default()
                        .insert(t.object.text().to_string());
                }
                PredicateRole::ExternalUrl => {
                    let url = object_uri.unwrap_or_else(|| t.object.text().to_string());
                    urls.entry(subject).or_default().insert(url);
                }
                PredicateRole::SubclassOf => {
                    if let Some(parent) = object_uri {
                        values.insert(subject.clone());
                        values.insert(parent.clone());
                        push_unique(&mut subclass_edges, &mut seen_subclass, (subject, parent));
                    }
                }
                PredicateRole::SubpropertyOf => {
                    if let Some(parent) = object_uri {
                        properties.insert(subject.clone());
                        properties.insert(parent.clone());
                        push_unique(
                            &mut subproperty_edges,
                            &mut seen_subproperty,
                            (subject, parent),
                        );
                    }
                }
                PredicateRole::EquivalentClass => {
                    if let Some(other) = object_uri {
                        if other != subject {
                            equivalence_links
                                .entry(subject.clone())
                                .or_default()
                                .insert(other.clone());
                            equivalence_links.entry(other).or_default().insert(subject);
                        }
                    }
                }
                PredicateRole::Type => {
                    if let Some(class) = object_uri {
                        if vocabulary.property_types.iter().any(|p| *p == class) {
                            properties.insert(subject);
                        }
                    }
                }
                PredicateRole::NotSubclassOf => {
                    if let Some(parent) = object_uri {
                        override_breaks.insert((subject, parent));
                    }
                }
                PredicateRole::PreferredParent => {
                    if t.object.text().trim() != "false" {
                        preferred.insert(subject);
                    }
                }
                PredicateRole::Eliminated | PredicateRole::RemapTo => {}
            }
        }

        let mut terms: BTreeMap<String, Term> = BTreeMap::new();
        for (uri, label) in labels {
            let Some(label) = label else {
                continue;
            };
            let source = first_source
                .get(&uri)
                .and_then(|idx| source_names.get(*idx))
                .cloned()
                .unwrap_or_default();
            let term = Term {
                description: descriptions
                    .remove(&uri)
                    .flatten()
                    .map(|ranked| ranked.text),
                alt_labels: alt_labels.remove(&uri).unwrap_or_default(),
                urls: urls.remove(&uri).unwrap_or_default(),
                authoritative: vocabulary.is_authoritative(&uri),
                source,
                label: label.text,
                uri: uri.clone(),
            };
            terms.insert(uri, term);
        }

        properties.retain(|uri| terms.contains_key(uri));
        values.retain(|uri| terms.contains_key(uri));

        let equivalents = equivalence_classes(&equivalence_links);
        let label_index = build_label_index(&terms);

        progress(1.0);
        tracing::info!(
            terms = terms.len(),
            properties = properties.len(),
            values = values.len(),
            remaps = remaps.len(),
            eliminated = eliminated.len(),
            "term catalog loaded"
        );

        Ok(Self {
            vocabulary,
            terms,
            properties,
            values,
            equivalents,
            label_index,
            preferred,
            subclass_edges,
            subproperty_edges,
            override_breaks,
            remaps,
            eliminated,
        })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn term(&self, uri: &str) -> Option<&Term> {
        self.terms.get(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.terms.contains_key(uri)
    }

    /// All terms in uri order.
    pub fn terms(&self) -> impl Iterator<Item = &Term> {
        self.terms.values()
    }

    pub fn label(&self, uri: &str) -> Option<&str> {
        self.terms.get(uri).map(|t| t.label.as_str())
    }

    pub fn description(&self, uri: &str) -> Option<&str> {
        self.terms.get(uri).and_then(|t| t.description.as_deref())
    }

    pub fn alt_labels(&self, uri: &str) -> Option<&BTreeSet<String>> {
        self.terms.get(uri).map(|t| &t.alt_labels)
    }

    pub fn urls(&self, uri: &str) -> Option<&BTreeSet<String>> {
        self.terms.get(uri).map(|t| &t.urls)
    }

    pub fn is_property(&self, uri: &str) -> bool {
        self.properties.contains(uri)
    }

    pub fn is_value(&self, uri: &str) -> bool {
        self.values.contains(uri)
    }

    pub fn properties(&self) -> &BTreeSet<String> {
        &self.properties
    }

    pub fn values(&self) -> &BTreeSet<String> {
        &self.values
    }

    /// Other members of `uri`'s equivalence class, sorted.
    pub fn equivalents(&self, uri: &str) -> &[String] {
        self.equivalents
            .get(uri)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_preferred_parent(&self, uri: &str) -> bool {
        self.preferred.contains(uri)
    }

    pub fn preferred_parents(&self) -> &BTreeSet<String> {
        &self.preferred
    }

    pub fn is_eliminated(&self, uri: &str) -> bool {
        self.eliminated.contains(uri)
    }

    /// The uri carrying `label`, after collision resolution.
    pub fn uri_for_label(&self, label: &str) -> Option<&str> {
        self.label_index.get(label).map(String::as_str)
    }

    /// Terminal uri of `uri`'s forwarding chain (or `uri` itself).
    pub fn remap_if_any<'a>(&'a self, uri: &'a str) -> &'a str {
        follow_remaps(&self.remaps, uri)
    }

    /// Raw `remapTo` directives, source → direct target.
    pub fn remaps(&self) -> &BTreeMap<String, String> {
        &self.remaps
    }

    /// `(child, parent)` subclass-of edges after remapping, in source order.
    pub fn subclass_edges(&self) -> &[(String, String)] {
        &self.subclass_edges
    }

    /// `(child, parent)` subproperty-of edges after remapping, in source order.
    pub fn subproperty_edges(&self) -> &[(String, String)] {
        &self.subproperty_edges
    }

    /// Explicit `notSubClassOf` corrections.
    pub fn override_breaks(&self) -> &BTreeSet<(String, String)> {
        &self.override_breaks
    }

    pub fn is_authoritative(&self, uri: &str) -> bool {
        self.vocabulary.is_authoritative(uri)
    }
}

/// Connected components of the equivalence links; each member maps to the
/// other members in uri order.
fn equivalence_classes(links: &BTreeMap<String, BTreeSet<String>>) -> AHashMap<String, Vec<String>> {
    let mut out: AHashMap<String, Vec<String>> = AHashMap::new();
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    for start in links.keys() {
        if !visited.insert(start.as_str()) {
            continue;
        }
        let mut members: BTreeSet<&str> = BTreeSet::new();
        let mut stack: Vec<&str> = vec![start.as_str()];
        while let Some(uri) = stack.pop() {
            members.insert(uri);
            if let Some(next) = links.get(uri) {
                for other in next {
                    if visited.insert(other.as_str()) {
                        stack.push(other.as_str());
                    }
                }
            }
        }
        for member in &members {
            let others: Vec<String> = members
                .iter()
                .filter(|m| *m != member)
                .map(|m| m.to_string())
                .collect();
            out.insert(member.to_string(), others);
        }
    }
    out
}

/// Label → uri. Authoritative uris win collisions; ties go to the lowest uri.
fn build_label_index(terms: &BTreeMap<String, Term>) -> AHashMap<String, String> {
    let mut by_label: BTreeMap<&str, Vec<&Term>> = BTreeMap::new();
    for term in terms.values() {
        by_label.entry(term.label.as_str()).or_default().push(term);
    }
    by_label
        .into_iter()
        .filter_map(|(label, candidates)| {
            // `terms` iterates in uri order, so the first match is the lowest uri.
            let winner = candidates
                .iter()
                .find(|t| t.authoritative)
                .or_else(|| candidates.first())?;
            Some((label.to_string(), winner.uri.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::vocab::{FACETREE_NS, RDFS_LABEL_IRI};

    fn label(uri: &str, text: &str) -> Triple {
        Triple::new(uri, RDFS_LABEL_IRI, TripleObject::literal(text))
    }

    #[test]
    fn validate_remaps_accepts_chains_and_rejects_loops() {
        let mut remaps = BTreeMap::new();
        remaps.insert("a".to_string(), "b".to_string());
        remaps.insert("b".to_string(), "c".to_string());
        assert!(validate_remaps(&remaps).is_ok());

        remaps.insert("c".to_string(), "a".to_string());
        let err = validate_remaps(&remaps).unwrap_err();
        match err {
            CatalogError::RemapCycle { chain } => {
                assert_eq!(chain.first(), chain.last());
                assert!(chain.len() >= 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn english_label_beats_earlier_foreign_label() {
        let source = MemorySource::with_triples(
            "test",
            vec![
                Triple::new("http://x/a", RDFS_LABEL_IRI, TripleObject::literal_lang("Chose", "fr")),
                Triple::new("http://x/a", RDFS_LABEL_IRI, TripleObject::literal_lang("Thing", "en")),
                label("http://x/a", "Later"),
            ],
        );
        let catalog =
            TermCatalog::load(vec![source], &BTreeSet::new(), Vocabulary::default()).unwrap();
        assert_eq!(catalog.label("http://x/a"), Some("Thing"));
    }

    #[test]
    fn preferred_marker_false_is_ignored() {
        let marker = format!("{FACETREE_NS}preferredParent");
        let source = MemorySource::with_triples(
            "test",
            vec![
                label("http://x/a", "A"),
                label("http://x/b", "B"),
                Triple::new("http://x/a", marker.as_str(), TripleObject::literal("true")),
                Triple::new("http://x/b", marker.as_str(), TripleObject::literal("false")),
            ],
        );
        let catalog =
            TermCatalog::load(vec![source], &BTreeSet::new(), Vocabulary::default()).unwrap();
        assert!(catalog.is_preferred_parent("http://x/a"));
        assert!(!catalog.is_preferred_parent("http://x/b"));
    }
}
