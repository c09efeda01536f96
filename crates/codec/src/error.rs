//! Codec error types
//!
//! Errors fall in two groups: data errors (the bytes are not what this build
//! expects) and programmer errors (the tag table is misconfigured). Callers can
//! tell them apart with [`CodecError::is_data_error`].

use std::io;
use thiserror::Error;

/// Result type alias for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Errors raised while writing or reading tagged data
#[derive(Debug, Error)]
pub enum CodecError {
    /// A tag other than the expected one was read.
    #[error("wrong tag: expected {expected}, found {actual}")]
    WrongTag {
        /// Tag the reader asked for
        expected: u8,
        /// Tag found in the stream
        actual: u8,
    },

    /// A tag with no registered reader was read (data from a newer or different build).
    #[error("unknown tag {tag}: no reader registered")]
    UnknownTag {
        /// Tag found in the stream
        tag: u8,
    },

    /// A structural type was written or requested without being registered.
    #[error("unknown tag for type {type_name}: type was never registered")]
    UnregisteredType {
        /// Name of the unregistered type
        type_name: &'static str,
    },

    /// Registration attempted with a tag outside `[9, 127]`.
    #[error("tag {tag} for type {type_name} is outside the structural range [9, 127]")]
    TagOutOfRange {
        /// Type being registered
        type_name: &'static str,
        /// Offending tag
        tag: i32,
    },

    /// Registration attempted with a tag already owned by another type.
    #[error("tag {tag} requested by {requested} is already registered to {existing}")]
    DuplicateTag {
        /// Tag in conflict
        tag: u8,
        /// Type already holding the tag
        existing: &'static str,
        /// Type asking for the tag
        requested: &'static str,
    },

    /// Registration attempted twice for the same type.
    #[error("type {type_name} is already registered")]
    DuplicateType {
        /// Type registered twice
        type_name: &'static str,
    },

    /// A non-nullable reference was null on the wire.
    #[error("unexpected null for {type_name}")]
    UnexpectedNull {
        /// Type that was required
        type_name: &'static str,
    },

    /// A length or count prefix is negative or implausibly large.
    #[error("invalid {what} length {length}")]
    InvalidLength {
        /// What the length described
        what: &'static str,
        /// Length read from the stream
        length: i64,
    },

    /// A value decoded but is not valid for its kind.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The stream ended in the middle of a value.
    #[error("truncated data while reading {what}")]
    Truncated {
        /// Value being read when the stream ended
        what: &'static str,
    },

    /// Underlying I/O failure.
    #[error("codec I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Map an I/O error, turning an early EOF into [`CodecError::Truncated`].
    pub fn from_io(err: io::Error, what: &'static str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::Truncated { what }
        } else {
            CodecError::Io(err)
        }
    }

    /// Returns `true` if the error describes bad input data.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            CodecError::WrongTag { .. }
                | CodecError::UnknownTag { .. }
                | CodecError::UnexpectedNull { .. }
                | CodecError::InvalidLength { .. }
                | CodecError::InvalidValue(_)
                | CodecError::Truncated { .. }
        )
    }

    /// Returns `true` if the error comes from a misconfigured tag table.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            CodecError::UnregisteredType { .. }
                | CodecError::TagOutOfRange { .. }
                | CodecError::DuplicateTag { .. }
                | CodecError::DuplicateType { .. }
        )
    }
}
