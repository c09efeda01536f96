//! Context model errors

use thiserror::Error;

/// Result type alias for context operations
pub type ContextResult<T> = std::result::Result<T, ContextError>;

/// Errors raised while defining or registering contexts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    /// A user context tried to take a built-in name.
    #[error("the name \"{name}\" is already in use by one of the built-in contexts")]
    ReservedName {
        /// Rejected name
        name: String,
    },

    /// A context pattern failed to compile.
    #[error("invalid context pattern \"{pattern}\": {reason}")]
    InvalidPattern {
        /// Pattern text
        pattern: String,
        /// Compiler message
        reason: String,
    },

    /// A context definition is incomplete or inconsistent.
    #[error("invalid context definition \"{name}\": {reason}")]
    InvalidDefinition {
        /// Definition name (may be empty)
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// No more bit indices are available.
    #[error("context index space exhausted at {next_index}")]
    IndexExhausted {
        /// Index that could not be assigned
        next_index: u32,
    },
}
