//! Compact snapshots of field trees.
//!
//! A [`Snapshot`] stores every term referenced by a set of field trees once,
//! in a shared [`TermTable`] with prefix-compressed uris, and each tree as
//! flattened rows of term ids. The binary form is a fixed header followed by
//! length-prefixed bincode sections:
//!
//! ```text
//!   "FTSN" | version: u32 LE
//!   u64 LE len | term table   (prefixes, term records)
//!   u64 LE len | tree table   (key, property id, node rows)
//!   u64 LE len | remap table  (from id, to id)
//! ```

pub mod format;
pub mod snapshot;
pub mod table;

pub use format::{FORMAT_VERSION, MAGIC};
pub use snapshot::{NodeRecord, Snapshot, StoredTree};
pub use table::{TermId, TermRecord, TermTable};

/// Why a byte stream could not be decoded as a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("bad magic {0:?}, expected \"FTSN\"")]
    BadMagic([u8; 4]),
    #[error("unsupported snapshot version {found} (this build reads {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("snapshot truncated while reading {0}")]
    Truncated(&'static str),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("encoding failed: {0}")]
    Encode(#[from] bincode::Error),
    #[error("remap cycle: {}", chain.join(" -> "))]
    RemapCycle { chain: Vec<String> },
    /// The stored tree has no live field definition to edit against.
    #[error("tree `{key}` is not bound to a live field definition")]
    Unbound { key: String },
    #[error("no stored tree for field `{key}`")]
    UnknownTree { key: String },
}
