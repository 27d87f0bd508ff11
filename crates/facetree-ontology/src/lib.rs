//! Taxonomy side of facetree.
//!
//! ```text
//!   triples ──► TermCatalog ──► HierarchyBuilder ──► Hierarchy (multi-parent DAG)
//!                 │                                      │
//!                 └── labels, descriptions, remaps,      └── consumed read-only by
//!                     equivalence sets                       facetree-field
//! ```
//!
//! - [`catalog`]: ingest triples, validate remap chains, expose term lookups.
//! - [`loader`]: run a catalog load on a background thread with progress.
//! - [`hierarchy`]: two-pass edge insertion, reparenting, multi-parent cleanup.
//! - [`source`]: triple sources (in-memory, RDF files).
//! - [`vocab`]: the well-known predicate identifiers.
//!
//! A loaded catalog and the hierarchies built from it are immutable and meant
//! to be shared behind an `Arc`.

pub mod catalog;
pub mod hierarchy;
pub mod loader;
pub mod source;
pub mod vocab;

pub use catalog::{Term, TermCatalog};
pub use hierarchy::{Branch, BranchId, Hierarchy, HierarchyBuilder};
pub use loader::{CatalogLoader, LoadState};
pub use source::{MemorySource, RdfFileSource, RdfFormat, Triple, TripleObject, TripleSource};
pub use vocab::Vocabulary;

/// Failures that abort a catalog load. No partial catalog is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed triple source `{source_name}`: {message}")]
    Source {
        source_name: String,
        message: String,
    },
    #[error("remap cycle: {}", chain.join(" -> "))]
    RemapCycle { chain: Vec<String> },
    #[error("invalid configuration `{path}`: {message}")]
    Config { path: String, message: String },
    #[error("catalog load was never started")]
    NotStarted,
    #[error("catalog loader thread panicked")]
    LoaderPanicked,
}

/// Case-insensitive label order with the uri as tie-break.
///
/// Shared by the hierarchy (child order) and the field trees (flatten order)
/// so both produce the same sequence for the same input.
pub fn label_order(a_label: &str, a_uri: &str, b_label: &str, b_uri: &str) -> std::cmp::Ordering {
    a_label
        .to_lowercase()
        .cmp(&b_label.to_lowercase())
        .then_with(|| a_uri.cmp(b_uri))
}

/// Owned sort key equivalent to [`label_order`], for `sort_by_cached_key`.
pub fn label_sort_key(label: &str, uri: &str) -> (String, String) {
    (label.to_lowercase(), uri.to_string())
}

/// Local part of a uri: the text after the final `/` or `#`.
pub fn local_name(uri: &str) -> &str {
    uri.rsplit(['#', '/']).next().unwrap_or(uri)
}
