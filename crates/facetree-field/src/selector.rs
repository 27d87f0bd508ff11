//! Field definitions as supplied by the schema editor.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SelectorMode {
    /// Just this term (siblings and descendants are offered for browsing).
    Item,
    /// Never this term, whatever else selects it.
    Exclude,
    /// This term and everything beneath it.
    WholeBranch,
    /// Nothing beneath this term, unless individually included.
    ExcludeBranch,
    /// Like `WholeBranch`; the term groups values rather than being one.
    Container,
}

impl SelectorMode {
    pub fn includes(self) -> bool {
        matches!(self, Self::Item | Self::WholeBranch | Self::Container)
    }

    pub fn covers_branch(self) -> bool {
        matches!(self, Self::WholeBranch | Self::Container)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectorRule {
    pub uri: String,
    pub mode: SelectorMode,
}

impl SelectorRule {
    pub fn new(uri: impl Into<String>, mode: SelectorMode) -> Self {
        Self {
            uri: uri.into(),
            mode,
        }
    }
}

/// Identity of a field across templates.
///
/// The same property can appear in several branches of one template; the
/// group path tells those apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub template_id: String,
    pub property: String,
    #[serde(default)]
    pub group_path: Vec<String>,
}

impl FieldKey {
    pub fn new(template_id: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            property: property.into(),
            group_path: Vec::new(),
        }
    }

    pub fn with_group_path(mut self, path: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.group_path = path.into_iter().map(Into::into).collect();
        self
    }
}

impl std::fmt::Display for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.template_id, self.property)?;
        if !self.group_path.is_empty() {
            write!(f, "@{}", self.group_path.join("/"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(flatten)]
    pub key: FieldKey,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub rules: Vec<SelectorRule>,
}

impl FieldDef {
    pub fn new(key: FieldKey, rules: Vec<SelectorRule>) -> Self {
        Self {
            key,
            label: None,
            rules,
        }
    }

    /// Parse a JSON array of field definitions.
    pub fn list_from_json(text: &str) -> serde_json::Result<Vec<FieldDef>> {
        serde_json::from_str(text)
    }

    /// Stable digest of the selector rules (FNV-1a 64-bit, hex).
    ///
    /// Two definitions with the same key and digest produce the same tree
    /// from the same hierarchy.
    pub fn rules_digest(&self) -> String {
        const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x00000100000001b3;

        let mut hash = FNV_OFFSET_BASIS;
        let mut feed = |bytes: &[u8]| {
            for b in bytes {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        };
        for rule in &self.rules {
            feed(rule.uri.as_bytes());
            feed(&[0, rule.mode as u8, 0]);
        }
        format!("{hash:016x}")
    }
}
