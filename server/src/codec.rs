//! Versioned binary index files.
//!
//! Layout: a 4-byte little-endian unsigned version header followed by the
//! bincode payload of the [`Index`] enum. The format is opaque but
//! deterministic: the file map is a `BTreeMap`, so re-serializing the same
//! in-memory index yields byte-identical output.
//!
//! There is no upgrade path. Any version other than [`INDEX_VERSION`] —
//! older or newer — deletes the file and reports a mismatch; the caller
//! rebuilds from scratch.

use crate::error::{Error, Result};
use crate::types::Index;
use std::path::Path;

/// Current on-disk format version.
pub const INDEX_VERSION: u32 = 8;

/// Serialize an index to its on-disk file: version header, then payload.
pub fn write_index(path: &Path, index: &Index) -> Result<()> {
    let payload = bincode::serialize(index)
        .map_err(|e| Error::CorruptIndex { path: path.to_path_buf(), reason: format!("serialize: {e}") })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let mut bytes = Vec::with_capacity(4 + payload.len());
    bytes.extend_from_slice(&INDEX_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    std::fs::write(path, bytes).map_err(|e| Error::io(path, e))
}

/// Read an index file, enforcing the version header.
///
/// A file with any other version is deleted (best effort; deletion errors are
/// ignored) and reported as [`Error::VersionMismatch`], so the caller can
/// treat the situation exactly like a missing index. A truncated header or a
/// payload that fails to decode is [`Error::CorruptIndex`].
pub fn read_index(path: &Path) -> Result<Index> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;

    if bytes.len() < 4 {
        return Err(Error::CorruptIndex {
            path: path.to_path_buf(),
            reason: format!("{} bytes, shorter than the version header", bytes.len()),
        });
    }

    let mut header = [0u8; 4];
    header.copy_from_slice(&bytes[..4]);
    let version = u32::from_le_bytes(header);

    if version != INDEX_VERSION {
        let _ = std::fs::remove_file(path);
        return Err(Error::VersionMismatch {
            path: path.to_path_buf(),
            found: version,
            expected: INDEX_VERSION,
        });
    }

    bincode::deserialize(&bytes[4..])
        .map_err(|e| Error::CorruptIndex { path: path.to_path_buf(), reason: e.to_string() })
}
