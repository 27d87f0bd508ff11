//! Header and section framing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read, Write};

use crate::{FormatError, SnapshotError};

pub const MAGIC: [u8; 4] = *b"FTSN";

/// Bumped whenever the section layout changes; older readers refuse newer
/// files instead of misreading them.
pub const FORMAT_VERSION: u32 = 1;

pub(crate) fn write_header(w: &mut impl Write) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&FORMAT_VERSION.to_le_bytes())
}

pub(crate) fn read_header(r: &mut impl Read) -> Result<(), SnapshotError> {
    let mut magic = [0u8; 4];
    read_exact(r, &mut magic, "header")?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic(magic).into());
    }
    let mut version = [0u8; 4];
    read_exact(r, &mut version, "header")?;
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        }
        .into());
    }
    Ok(())
}

pub(crate) fn write_section<T: Serialize>(w: &mut impl Write, value: &T) -> Result<(), SnapshotError> {
    let bytes = bincode::serialize(value)?;
    w.write_all(&(bytes.len() as u64).to_le_bytes())?;
    w.write_all(&bytes)?;
    Ok(())
}

pub(crate) fn read_section<T: DeserializeOwned>(
    r: &mut impl Read,
    section: &'static str,
) -> Result<T, SnapshotError> {
    let mut len = [0u8; 8];
    read_exact(r, &mut len, section)?;
    let len = u64::from_le_bytes(len);

    // Read through `take` so a corrupt length cannot force a huge allocation.
    let mut bytes = Vec::new();
    r.take(len).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < len {
        return Err(FormatError::Truncated(section).into());
    }
    bincode::deserialize(&bytes)
        .map_err(|e| FormatError::Corrupt(format!("{section}: {e}")).into())
}

fn read_exact(r: &mut impl Read, buf: &mut [u8], section: &'static str) -> Result<(), SnapshotError> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => SnapshotError::Format(FormatError::Truncated(section)),
        _ => SnapshotError::Io(e),
    })
}
