//! Error taxonomy shared across the indexing and query engine.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration is missing a required value or references a path that
    /// does not exist.
    #[error("config error: {0}")]
    Config(String),

    /// Filesystem read/write failure. Aborts the current file or the current
    /// write; the updater continues with the next file.
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Index payload is truncated or fails to deserialize after a valid
    /// version header. The affected index is rebuilt from scratch.
    #[error("corrupt index {}: {reason}", .path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    /// The index file carried a version other than the current one. The file
    /// has already been deleted (best effort) when this error is returned, so
    /// callers treat it exactly like a missing index.
    #[error("index {} has version {found}, expected {expected}", .path.display())]
    VersionMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    /// Embedding backend transport or protocol failure.
    #[error("embedding backend: {0}")]
    Backend(String),

    /// The embedding backend rejected the input as too long. The caller is
    /// expected to split the fragment and retry the halves.
    #[error("embedding input too long: {0}")]
    InputTooLong(String),

    /// Programmer error: mismatched vector lengths, unsplittable fragment.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `git` or `rg` interaction failed.
    #[error("subprocess: {0}")]
    Subprocess(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn io_constructor_captures_the_path() {
        let err = Error::io(
            Path::new("/tmp/x.flat"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        match &err {
            Error::Io { path, source } => {
                assert_eq!(path, Path::new("/tmp/x.flat"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            other => panic!("expected Io, got {other:?}"),
        }
        assert!(err.to_string().contains("/tmp/x.flat"));
    }

    #[test]
    fn version_mismatch_names_both_versions() {
        let err = Error::VersionMismatch {
            path: PathBuf::from("/tmp/old.flat"),
            found: 7,
            expected: 8,
        };
        let text = err.to_string();
        assert!(text.contains("version 7"), "got: {text}");
        assert!(text.contains("expected 8"), "got: {text}");
    }
}
