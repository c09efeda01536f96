//! Durability layer for Tally
//!
//! This crate handles everything that touches disk:
//!
//! - [`RegistryHeader`]: fixed 308-byte header with a checksum over its fields
//! - [`SessionSegment`]: one instrumentation session, chained backwards
//! - [`CoverageData`]: hit counts and per-test coverage
//! - [`RegistryFile`]: create, append, read back and rewrite a registry
//! - [`RegistryError`]: format, corruption, unknown tag, I/O and usage errors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coverage;
pub mod error;
pub mod header;
pub mod registry_file;
pub mod session;

pub use coverage::{CoverageData, TestCoverage, TestExit, COVERAGE_MARKER};
pub use error::{RegistryError, RegistryErrorKind, RegistryResult};
pub use header::{
    next_version, AccessMode, RegistryHeader, HEADER_SIZE, NO_COVERAGE, REGISTRY_FORMAT_VERSION,
    REGISTRY_MAGIC,
};
pub use registry_file::{RegistryContents, RegistryFile, RegistryUpdate};
pub use session::{SessionSegment, SESSION_MARKER};
