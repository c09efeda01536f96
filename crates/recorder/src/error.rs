//! Recorder error types

use std::io;

use tally_codec::CodecError;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for recorder operations
pub type RecorderResult<T> = std::result::Result<T, RecorderError>;

/// Errors raised by the recording transport
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Frame does not start with the protocol magic
    #[error("bad frame magic {0:?}")]
    BadMagic([u8; 4]),

    /// Frame from an unsupported protocol version
    #[error("unsupported protocol version {actual}, expected {expected}")]
    UnsupportedVersion {
        /// Version this build speaks
        expected: u16,
        /// Version received
        actual: u16,
    },

    /// Frame length above the limit
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(u32),

    /// Frame payload checksum mismatch
    #[error("frame checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum carried by the frame
        expected: u32,
        /// Checksum of the payload received
        computed: u32,
    },

    /// Decoded record is not the kind expected at this point of the exchange
    #[error("unexpected {0} record")]
    UnexpectedRecord(&'static str),

    /// Operation needs `init` first
    #[error("not initialized")]
    NotInitialized,

    /// `start` or `connect` called twice
    #[error("already running")]
    AlreadyRunning,

    /// Payload encode or decode failure
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Socket or thread failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
