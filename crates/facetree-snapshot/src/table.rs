//! Prefix-compressed term table.

use ahash::AHashMap;
use facetree_ontology::Term;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::FormatError;

/// Dense index into a [`TermTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermId(pub u32);

impl TermId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    /// Index into the prefix table; `None` when the uri has no `/` or `#`.
    pub prefix: Option<u32>,
    /// The rest of the uri after the prefix (the full uri without one).
    pub suffix: String,
    pub label: String,
    pub description: Option<String>,
    pub alt_labels: Vec<String>,
    pub urls: Vec<String>,
    pub source: String,
    pub authoritative: bool,
}

/// Split a uri after its final `/` or `#`.
pub(crate) fn split_uri(uri: &str) -> (Option<&str>, &str) {
    match uri.rfind(['/', '#']) {
        Some(pos) => (Some(&uri[..=pos]), &uri[pos + 1..]),
        None => (None, uri),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermTable {
    prefixes: Vec<String>,
    records: Vec<TermRecord>,
    #[serde(skip)]
    prefix_index: AHashMap<String, u32>,
    #[serde(skip)]
    index: AHashMap<String, TermId>,
}

impl PartialEq for TermTable {
    fn eq(&self, other: &Self) -> bool {
        self.prefixes == other.prefixes && self.records == other.records
    }
}

impl Eq for TermTable {}

impl TermTable {
    /// Build a table from terms, assigning ids in uri order.
    pub fn from_terms(terms: impl IntoIterator<Item = Term>) -> Self {
        let mut sorted: Vec<Term> = terms.into_iter().collect();
        sorted.sort_by(|a, b| a.uri.cmp(&b.uri));
        sorted.dedup_by(|a, b| a.uri == b.uri);

        let stems: BTreeSet<&str> = sorted.iter().filter_map(|t| split_uri(&t.uri).0).collect();
        let mut table = Self {
            prefixes: stems.into_iter().map(str::to_string).collect(),
            ..Self::default()
        };
        table.prefix_index = table
            .prefixes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i as u32))
            .collect();
        for term in sorted {
            table.push(term);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn id_of(&self, uri: &str) -> Option<TermId> {
        self.index.get(uri).copied()
    }

    pub fn record(&self, id: TermId) -> Option<&TermRecord> {
        self.records.get(id.index())
    }

    pub fn records(&self) -> &[TermRecord] {
        &self.records
    }

    /// The full uri of `id`.
    pub fn uri(&self, id: TermId) -> Option<String> {
        self.record(id).map(|r| self.uri_of(r))
    }

    fn uri_of(&self, record: &TermRecord) -> String {
        match record.prefix.and_then(|p| self.prefixes.get(p as usize)) {
            Some(prefix) => format!("{prefix}{}", record.suffix),
            None => record.suffix.clone(),
        }
    }

    /// Id of `term`, appending it when absent. Existing records are never
    /// rewritten, so ids handed out earlier stay valid.
    pub fn intern(&mut self, term: Term) -> TermId {
        if let Some(id) = self.index.get(&term.uri) {
            return *id;
        }
        self.push(term)
    }

    fn push(&mut self, term: Term) -> TermId {
        let (stem, suffix) = split_uri(&term.uri);
        let prefix = stem.map(|stem| match self.prefix_index.get(stem) {
            Some(id) => *id,
            None => {
                let id = self.prefixes.len() as u32;
                self.prefixes.push(stem.to_string());
                self.prefix_index.insert(stem.to_string(), id);
                id
            }
        });
        let id = TermId(self.records.len() as u32);
        self.records.push(TermRecord {
            prefix,
            suffix: suffix.to_string(),
            label: term.label,
            description: term.description,
            alt_labels: term.alt_labels.into_iter().collect(),
            urls: term.urls.into_iter().collect(),
            source: term.source,
            authoritative: term.authoritative,
        });
        self.index.insert(term.uri, id);
        id
    }

    /// Rebuild the lookup maps after decoding and check the table's shape.
    pub(crate) fn reindex(&mut self) -> Result<(), FormatError> {
        self.prefix_index.clear();
        for (i, prefix) in self.prefixes.iter().enumerate() {
            if self.prefix_index.insert(prefix.clone(), i as u32).is_some() {
                return Err(FormatError::Corrupt(format!("duplicate prefix `{prefix}`")));
            }
        }
        self.index.clear();
        for (i, record) in self.records.iter().enumerate() {
            if let Some(p) = record.prefix {
                if p as usize >= self.prefixes.len() {
                    return Err(FormatError::Corrupt(format!(
                        "term {i} references prefix {p} of {}",
                        self.prefixes.len()
                    )));
                }
            }
            let uri = self.uri_of(record);
            if self.index.insert(uri.clone(), TermId(i as u32)).is_some() {
                return Err(FormatError::Corrupt(format!("duplicate term `{uri}`")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_last_slash_or_hash() {
        assert_eq!(
            split_uri("http://example.org/ns#Red"),
            (Some("http://example.org/ns#"), "Red")
        );
        assert_eq!(
            split_uri("http://example.org/a/b"),
            (Some("http://example.org/a/"), "b")
        );
        assert_eq!(split_uri("urn:isbn:0451450523"), (None, "urn:isbn:0451450523"));
    }

    #[test]
    fn ids_follow_uri_order_and_prefixes_are_shared() {
        let table = TermTable::from_terms(vec![
            Term::new("http://example.org/b", "B"),
            Term::new("http://example.org/a", "A"),
            Term::new("http://other.org/z", "Z"),
            Term::new("http://example.org/a", "A again"),
        ]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.prefixes(), ["http://example.org/", "http://other.org/"]);
        assert_eq!(table.id_of("http://example.org/a"), Some(TermId(0)));
        assert_eq!(table.record(TermId(0)).unwrap().label, "A");
        assert_eq!(table.uri(TermId(2)).as_deref(), Some("http://other.org/z"));
    }

    #[test]
    fn intern_appends_without_moving_ids() {
        let mut table = TermTable::from_terms(vec![Term::new("http://example.org/m", "M")]);
        let fresh = table.intern(Term::new("http://example.org/a", "A"));
        assert_eq!(fresh, TermId(1));
        assert_eq!(table.intern(Term::new("http://example.org/a", "other")), TermId(1));
        assert_eq!(table.id_of("http://example.org/m"), Some(TermId(0)));
        assert_eq!(table.prefixes().len(), 1);
    }

    #[test]
    fn reindex_rejects_dangling_prefix() {
        let mut table = TermTable::from_terms(vec![Term::new("http://example.org/a", "A")]);
        table.records[0].prefix = Some(9);
        assert!(table.reindex().is_err());
    }
}
