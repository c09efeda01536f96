//! Registry error taxonomy

use std::io;
use std::path::Path;

use tally_codec::CodecError;
use thiserror::Error;

/// Broad class of a [`RegistryError`], for callers that only need to decide
/// between "rebuild", "report corruption" and "fix the caller".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryErrorKind {
    /// Not a registry, or a registry from an incompatible release
    Format,
    /// Damaged content
    Corruption,
    /// A structural tag with no registered reader
    UnknownTag,
    /// Filesystem failure
    Io,
    /// Caller misuse
    Usage,
}

/// Errors reading or writing a registry file.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Magic number mismatch
    #[error("{path} is not a coverage registry (magic {actual:#x}, expected {expected:#x})")]
    NotARegistry {
        /// File name
        path: String,
        /// Expected magic
        expected: u64,
        /// Magic found
        actual: u64,
    },

    /// Format version mismatch
    #[error("{path} has registry format {actual}, this build reads format {expected}")]
    IncompatibleFormat {
        /// File name
        path: String,
        /// Format understood by this build
        expected: u32,
        /// Format found
        actual: u32,
    },

    /// Checksum, truncation or marker failure
    #[error("{path} is corrupted: {reason}")]
    Corrupted {
        /// File name
        path: String,
        /// What failed
        reason: String,
    },

    /// Structural tag with no reader
    #[error("{path} contains unknown record tag {tag}")]
    UnknownTag {
        /// File name
        path: String,
        /// Tag found
        tag: u8,
    },

    /// Registry file does not exist
    #[error("registry {path} does not exist")]
    NoSuchRegistry {
        /// File name
        path: String,
    },

    /// Registry exists but is not a readable regular file
    #[error("registry {path} is not accessible: {reason}")]
    Inaccessible {
        /// File name
        path: String,
        /// Why
        reason: String,
    },

    /// Append attempted on a read-only registry
    #[error("registry {path} is read-only")]
    ReadOnly {
        /// File name
        path: String,
    },

    /// Another writer updated the registry since it was loaded
    #[error("registry {path} was modified concurrently (on disk version {on_disk}, loaded version {loaded})")]
    ConcurrentModification {
        /// File name
        path: String,
        /// Version in the file now
        on_disk: i64,
        /// Version when it was loaded
        loaded: i64,
    },

    /// Append called with no updates
    #[error("nothing to save to {path}")]
    EmptyUpdate {
        /// File name
        path: String,
    },

    /// Codec failure other than corruption or unknown tag
    #[error("{path}: {source}")]
    Codec {
        /// File name
        path: String,
        /// Underlying codec error
        #[source]
        source: CodecError,
    },

    /// I/O error
    #[error("{path}: {source}")]
    Io {
        /// File name
        path: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl RegistryError {
    /// Wrap an I/O error for `path`.
    pub fn io(path: &Path, source: io::Error) -> Self {
        RegistryError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Classify a codec error raised while decoding `path`.
    pub fn codec(path: &Path, source: CodecError) -> Self {
        let path = path.display().to_string();
        match source {
            CodecError::UnknownTag { tag } => RegistryError::UnknownTag { path, tag },
            CodecError::Io(source) => RegistryError::Io { path, source },
            e if e.is_data_error() => RegistryError::Corrupted {
                path,
                reason: e.to_string(),
            },
            source => RegistryError::Codec { path, source },
        }
    }

    /// Build a corruption error for `path`.
    pub fn corrupted(path: &Path, reason: impl Into<String>) -> Self {
        RegistryError::Corrupted {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    /// Broad class of this error.
    pub fn kind(&self) -> RegistryErrorKind {
        match self {
            RegistryError::NotARegistry { .. } | RegistryError::IncompatibleFormat { .. } => {
                RegistryErrorKind::Format
            }
            RegistryError::Corrupted { .. } => RegistryErrorKind::Corruption,
            RegistryError::UnknownTag { .. } => RegistryErrorKind::UnknownTag,
            RegistryError::NoSuchRegistry { .. }
            | RegistryError::Inaccessible { .. }
            | RegistryError::Io { .. } => RegistryErrorKind::Io,
            RegistryError::ReadOnly { .. }
            | RegistryError::ConcurrentModification { .. }
            | RegistryError::EmptyUpdate { .. }
            | RegistryError::Codec { .. } => RegistryErrorKind::Usage,
        }
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_errors_are_classified() {
        let p = Path::new("reg.db");
        assert_eq!(
            RegistryError::codec(p, CodecError::UnknownTag { tag: 99 }).kind(),
            RegistryErrorKind::UnknownTag
        );
        assert_eq!(
            RegistryError::codec(p, CodecError::Truncated { what: "int" }).kind(),
            RegistryErrorKind::Corruption
        );
        assert_eq!(
            RegistryError::codec(
                p,
                CodecError::UnregisteredType {
                    type_name: "Thing"
                }
            )
            .kind(),
            RegistryErrorKind::Usage
        );
    }

    #[test]
    fn messages_name_the_file() {
        let err = RegistryError::IncompatibleFormat {
            path: "reg.db".into(),
            expected: 2,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("reg.db"));
        assert!(msg.contains('1') && msg.contains('2'));
    }
}
