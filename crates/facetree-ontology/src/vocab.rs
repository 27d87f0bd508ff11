//! Well-known predicate identifiers.
//!
//! The catalog never hard-codes IRIs: every predicate it reacts to is looked
//! up in a [`Vocabulary`]. The defaults cover RDFS/OWL/SKOS plus the
//! `facetree` curation markers; deployments override them from a JSON file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::CatalogError;

pub const RDF_TYPE_IRI: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const RDFS_LABEL_IRI: &str = "http://www.w3.org/2000/01/rdf-schema#label";
pub const RDFS_COMMENT_IRI: &str = "http://www.w3.org/2000/01/rdf-schema#comment";
pub const RDFS_SEE_ALSO_IRI: &str = "http://www.w3.org/2000/01/rdf-schema#seeAlso";
pub const RDFS_SUBCLASS_OF_IRI: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";
pub const RDFS_SUBPROPERTY_OF_IRI: &str = "http://www.w3.org/2000/01/rdf-schema#subPropertyOf";
pub const OWL_EQUIVALENT_CLASS_IRI: &str = "http://www.w3.org/2002/07/owl#equivalentClass";
pub const OWL_DATATYPE_PROPERTY_IRI: &str = "http://www.w3.org/2002/07/owl#DatatypeProperty";
pub const OWL_OBJECT_PROPERTY_IRI: &str = "http://www.w3.org/2002/07/owl#ObjectProperty";
pub const SKOS_PREF_LABEL_IRI: &str = "http://www.w3.org/2004/02/skos/core#prefLabel";
pub const SKOS_ALT_LABEL_IRI: &str = "http://www.w3.org/2004/02/skos/core#altLabel";
pub const SKOS_DEFINITION_IRI: &str = "http://www.w3.org/2004/02/skos/core#definition";

/// Namespace of the curation markers (`notSubClassOf`, `preferredParent`, ...).
pub const FACETREE_NS: &str = "http://purl.org/facetree/vocab#";

/// Predicate identifiers grouped by the role they play during catalog load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub label: Vec<String>,
    pub description: Vec<String>,
    pub alt_label: Vec<String>,
    pub external_url: Vec<String>,
    pub subclass_of: Vec<String>,
    pub subproperty_of: Vec<String>,
    pub equivalent_class: Vec<String>,
    pub rdf_type: String,
    /// Classes whose instances (via `rdf_type`) count as properties.
    pub property_types: Vec<String>,
    /// `child notSubClassOf parent` removes that edge from the hierarchy.
    pub not_subclass_of: Vec<String>,
    /// Marks the subject as the preferred member of its equivalence set.
    pub preferred_parent: Vec<String>,
    /// Marks the subject as eliminated; it disappears from every map.
    pub eliminated: Vec<String>,
    /// `old remapTo new` forwards every reference to `old` onto `new`.
    pub remap_to: Vec<String>,
    /// Namespace whose lineage wins over secondary sources.
    pub authoritative_namespace: Option<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let marker = |local: &str| vec![format!("{FACETREE_NS}{local}")];
        Self {
            label: vec![RDFS_LABEL_IRI.to_string(), SKOS_PREF_LABEL_IRI.to_string()],
            description: vec![
                RDFS_COMMENT_IRI.to_string(),
                SKOS_DEFINITION_IRI.to_string(),
            ],
            alt_label: vec![SKOS_ALT_LABEL_IRI.to_string()],
            external_url: vec![RDFS_SEE_ALSO_IRI.to_string()],
            subclass_of: vec![RDFS_SUBCLASS_OF_IRI.to_string()],
            subproperty_of: vec![RDFS_SUBPROPERTY_OF_IRI.to_string()],
            equivalent_class: vec![OWL_EQUIVALENT_CLASS_IRI.to_string()],
            rdf_type: RDF_TYPE_IRI.to_string(),
            property_types: vec![
                OWL_DATATYPE_PROPERTY_IRI.to_string(),
                OWL_OBJECT_PROPERTY_IRI.to_string(),
            ],
            not_subclass_of: marker("notSubClassOf"),
            preferred_parent: marker("preferredParent"),
            eliminated: marker("eliminated"),
            remap_to: marker("remapTo"),
            authoritative_namespace: None,
        }
    }
}

/// The role a predicate plays, resolved once per triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PredicateRole {
    Label,
    Description,
    AltLabel,
    ExternalUrl,
    SubclassOf,
    SubpropertyOf,
    EquivalentClass,
    Type,
    NotSubclassOf,
    PreferredParent,
    Eliminated,
    RemapTo,
}

impl Vocabulary {
    /// Read a vocabulary override from JSON. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| CatalogError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn with_authoritative_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.authoritative_namespace = Some(namespace.into());
        self
    }

    pub fn is_authoritative(&self, uri: &str) -> bool {
        match &self.authoritative_namespace {
            Some(ns) => !ns.is_empty() && uri.starts_with(ns.as_str()),
            None => false,
        }
    }

    pub(crate) fn role_of(&self, predicate: &str) -> Option<PredicateRole> {
        let has = |list: &[String]| list.iter().any(|p| p == predicate);
        if has(&self.label) {
            Some(PredicateRole::Label)
        } else if has(&self.description) {
            Some(PredicateRole::Description)
        } else if has(&self.alt_label) {
            Some(PredicateRole::AltLabel)
        } else if has(&self.external_url) {
            Some(PredicateRole::ExternalUrl)
        } else if has(&self.subclass_of) {
            Some(PredicateRole::SubclassOf)
        } else if has(&self.subproperty_of) {
            Some(PredicateRole::SubpropertyOf)
        } else if has(&self.equivalent_class) {
            Some(PredicateRole::EquivalentClass)
        } else if predicate == self.rdf_type {
            Some(PredicateRole::Type)
        } else if has(&self.not_subclass_of) {
            Some(PredicateRole::NotSubclassOf)
        } else if has(&self.preferred_parent) {
            Some(PredicateRole::PreferredParent)
        } else if has(&self.eliminated) {
            Some(PredicateRole::Eliminated)
        } else if has(&self.remap_to) {
            Some(PredicateRole::RemapTo)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let vocab: Vocabulary = serde_json::from_str(
            r#"{ "label": ["http://example.org/name"], "authoritative_namespace": "http://example.org/" }"#,
        )
        .expect("vocabulary json");
        assert_eq!(vocab.label, vec!["http://example.org/name".to_string()]);
        assert_eq!(vocab.subclass_of, vec![RDFS_SUBCLASS_OF_IRI.to_string()]);
        assert!(vocab.is_authoritative("http://example.org/Thing"));
        assert!(!vocab.is_authoritative("http://other.org/Thing"));
    }

    #[test]
    fn roles_resolve_from_defaults() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.role_of(RDFS_LABEL_IRI), Some(PredicateRole::Label));
        assert_eq!(vocab.role_of(RDF_TYPE_IRI), Some(PredicateRole::Type));
        assert_eq!(
            vocab.role_of(&format!("{FACETREE_NS}remapTo")),
            Some(PredicateRole::RemapTo)
        );
        assert_eq!(vocab.role_of("http://example.org/unrelated"), None);
    }
}
