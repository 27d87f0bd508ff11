//! Triple sources (boundary adapters).
//!
//! The catalog consumes plain `(subject, predicate, object)` triples. Where
//! they come from is the caller's business; this module ships two adapters:
//!
//! - [`MemorySource`]: triples already in memory (tests, editors, SPARQL glue).
//! - [`RdfFileSource`]: N-Triples / Turtle / RDF/XML files parsed with Sophia.
//!
//! Blank-node subjects and objects are skipped: the catalog is keyed by IRI.

use sophia::api::prelude::*;
// Local `Triple`/`TripleSource` shadow the prelude names; the traits still need scope.
use sophia::api::source::TripleSource as _;
use sophia::api::triple::Triple as _;
use std::path::{Path, PathBuf};

use crate::CatalogError;

/// Object position of a triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TripleObject {
    Uri(String),
    Literal {
        value: String,
        language: Option<String>,
    },
}

impl TripleObject {
    pub fn uri(uri: impl Into<String>) -> Self {
        Self::Uri(uri.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            language: None,
        }
    }

    pub fn literal_lang(value: impl Into<String>, language: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            language: Some(language.into()),
        }
    }

    /// Lexical text of the object, whatever its kind.
    pub fn text(&self) -> &str {
        match self {
            Self::Uri(uri) => uri,
            Self::Literal { value, .. } => value,
        }
    }

    pub fn as_uri(&self) -> Option<&str> {
        match self {
            Self::Uri(uri) => Some(uri),
            Self::Literal { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: TripleObject,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: TripleObject,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }
}

/// Anything that can stream triples into the catalog.
pub trait TripleSource {
    /// Short provenance tag recorded on every term this source introduces.
    fn name(&self) -> &str;

    /// Push every triple into `sink`, in source order.
    fn read_triples(&mut self, sink: &mut dyn FnMut(Triple)) -> Result<(), CatalogError>;
}

impl<T: TripleSource + ?Sized> TripleSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read_triples(&mut self, sink: &mut dyn FnMut(Triple)) -> Result<(), CatalogError> {
        (**self).read_triples(sink)
    }
}

/// Triples held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    triples: Vec<Triple>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            triples: Vec::new(),
        }
    }

    pub fn with_triples(name: impl Into<String>, triples: Vec<Triple>) -> Self {
        Self {
            name: name.into(),
            triples,
        }
    }

    pub fn push(&mut self, triple: Triple) -> &mut Self {
        self.triples.push(triple);
        self
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

impl TripleSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_triples(&mut self, sink: &mut dyn FnMut(Triple)) -> Result<(), CatalogError> {
        for triple in &self.triples {
            sink(triple.clone());
        }
        Ok(())
    }
}

// ============================================================================
// RDF files (Sophia)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfFormat {
    NTriples,
    Turtle,
    RdfXml,
}

impl RdfFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();
        match ext.as_str() {
            "nt" | "ntriples" => Some(Self::NTriples),
            "ttl" | "turtle" => Some(Self::Turtle),
            "rdf" | "owl" | "xml" => Some(Self::RdfXml),
            _ => None,
        }
    }
}

/// An RDF document on disk.
#[derive(Debug, Clone)]
pub struct RdfFileSource {
    name: String,
    path: PathBuf,
    format: RdfFormat,
}

impl RdfFileSource {
    /// Open a file whose format is inferred from its extension.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let format = RdfFormat::from_path(&path).ok_or_else(|| CatalogError::Source {
            source_name: path.display().to_string(),
            message: "unsupported RDF file extension (expected .nt, .ttl, .rdf, .owl)".into(),
        })?;
        Ok(Self::with_format(path, format))
    }

    pub fn with_format(path: impl Into<PathBuf>, format: RdfFormat) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("rdf")
            .to_string();
        Self { name, path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TripleSource for RdfFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_triples(&mut self, sink: &mut dyn FnMut(Triple)) -> Result<(), CatalogError> {
        let bytes = std::fs::read(&self.path)?;
        parse_rdf_bytes(&bytes, self.format, sink).map_err(|message| CatalogError::Source {
            source_name: self.path.display().to_string(),
            message,
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct RdfSinkError {
    message: String,
}

/// Parse an RDF document, pushing IRI-subject triples into `sink`.
pub fn parse_rdf_bytes(
    bytes: &[u8],
    format: RdfFormat,
    sink: &mut dyn FnMut(Triple),
) -> Result<(), String> {
    let reader = std::io::BufReader::new(std::io::Cursor::new(bytes));

    let mut on_triple = |s: String, p: String, o: String| -> Result<(), RdfSinkError> {
        let Some(subject) = parse_iri_display(&s) else {
            return Ok(());
        };
        let Some(predicate) = parse_iri_display(&p) else {
            return Ok(());
        };
        if let Some(object) = parse_object_display(&o)? {
            sink(Triple {
                subject,
                predicate,
                object,
            });
        }
        Ok(())
    };

    match format {
        RdfFormat::NTriples => sophia::turtle::parser::nt::parse_bufread(reader)
            .try_for_each_triple(|t| {
                on_triple(t.s().to_string(), t.p().to_string(), t.o().to_string())
            })
            .map_err(|e| format!("failed to parse N-Triples: {e}")),
        RdfFormat::Turtle => sophia::turtle::parser::turtle::parse_bufread(reader)
            .try_for_each_triple(|t| {
                on_triple(t.s().to_string(), t.p().to_string(), t.o().to_string())
            })
            .map_err(|e| format!("failed to parse Turtle: {e}")),
        RdfFormat::RdfXml => sophia::xml::parser::parse_bufread(reader)
            .try_for_each_triple(|t| {
                on_triple(t.s().to_string(), t.p().to_string(), t.o().to_string())
            })
            .map_err(|e| format!("failed to parse RDF/XML: {e}")),
    }
}

fn parse_iri_display(term: &str) -> Option<String> {
    let s = term.trim();
    s.strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .map(str::to_string)
}

/// `Ok(None)` for blank nodes, which the catalog ignores.
fn parse_object_display(term: &str) -> Result<Option<TripleObject>, RdfSinkError> {
    let s = term.trim();

    if let Some(iri) = parse_iri_display(s) {
        return Ok(Some(TripleObject::Uri(iri)));
    }
    if s.starts_with("_:") {
        return Ok(None);
    }
    if !s.starts_with('"') {
        return Err(RdfSinkError {
            message: format!("unsupported RDF term form: {s}"),
        });
    }

    let mut end_quote = None;
    let mut escaped = false;
    for (i, ch) in s.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => {
                end_quote = Some(i);
                break;
            }
            _ => {}
        }
    }
    let Some(end) = end_quote else {
        return Err(RdfSinkError {
            message: format!("invalid literal term (missing closing quote): {s}"),
        });
    };

    let value = unescape_literal(&s[1..end]);
    let rest = s[end + 1..].trim();
    let language = rest
        .strip_prefix('@')
        .filter(|lang| !lang.is_empty())
        .map(str::to_string);

    Ok(Some(TripleObject::Literal { value, language }))
}

fn unescape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(bytes: &[u8], format: RdfFormat) -> Vec<Triple> {
        let mut out = Vec::new();
        parse_rdf_bytes(bytes, format, &mut |t| out.push(t)).expect("parse");
        out
    }

    #[test]
    fn reads_ntriples_literals_and_iris() {
        let nt = br#"<http://example.org/a> <http://www.w3.org/2000/01/rdf-schema#label> "Alpha"@en .
<http://example.org/a> <http://www.w3.org/2000/01/rdf-schema#subClassOf> <http://example.org/root> .
_:b0 <http://www.w3.org/2000/01/rdf-schema#label> "ignored" .
"#;
        let triples = collect(nt, RdfFormat::NTriples);
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0].object, TripleObject::literal_lang("Alpha", "en"));
        assert_eq!(
            triples[1].object,
            TripleObject::uri("http://example.org/root")
        );
    }

    #[test]
    fn reads_turtle_with_prefixes() {
        let ttl = br#"
@prefix ex: <http://example.org/> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
ex:child rdfs:subClassOf ex:parent ; rdfs:label "Child \"one\"" .
"#;
        let triples = collect(ttl, RdfFormat::Turtle);
        assert_eq!(triples.len(), 2);
        assert!(triples
            .iter()
            .any(|t| t.object == TripleObject::literal("Child \"one\"")));
    }

    #[test]
    fn reads_rdf_xml() {
        let xml = br#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns:rdfs="http://www.w3.org/2000/01/rdf-schema#"
         xmlns:owl="http://www.w3.org/2002/07/owl#">
  <owl:Class rdf:about="http://example.org/child">
    <rdfs:label xml:lang="en">Child</rdfs:label>
    <rdfs:subClassOf rdf:resource="http://example.org/parent"/>
  </owl:Class>
</rdf:RDF>
"#;
        let triples = collect(xml, RdfFormat::RdfXml);
        assert_eq!(triples.len(), 3);
        assert!(triples.iter().all(|t| t.subject == "http://example.org/child"));
        assert!(triples
            .iter()
            .any(|t| t.object == TripleObject::literal_lang("Child", "en")));
        assert!(triples.iter().any(|t| {
            t.predicate == crate::vocab::RDFS_SUBCLASS_OF_IRI
                && t.object == TripleObject::uri("http://example.org/parent")
        }));
    }

    #[test]
    fn infers_format_from_extension() {
        assert_eq!(
            RdfFormat::from_path(Path::new("a/b/onto.TTL")),
            Some(RdfFormat::Turtle)
        );
        assert_eq!(
            RdfFormat::from_path(Path::new("onto.owl")),
            Some(RdfFormat::RdfXml)
        );
        assert_eq!(RdfFormat::from_path(Path::new("onto.json")), None);
    }

    #[test]
    fn file_source_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.nt");
        std::fs::write(&path, "<http://example.org/a> <http://example.org/p> \n").expect("write");
        let mut source = RdfFileSource::open(&path).expect("open");
        let err = source.read_triples(&mut |_| {}).unwrap_err();
        assert!(matches!(err, CatalogError::Source { .. }));
    }
}
