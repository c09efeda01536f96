//! Tally - code coverage registries and distributed recording
//!
//! Tally stores the structure of an instrumented program and the coverage
//! collected from it:
//!
//! - [`codec`]: tagged binary codec shared by every on-disk and wire format
//! - [`model`]: structural model, context sets and the context store
//! - [`durability`]: registry files, sessions and coverage segments
//! - [`recorder`]: streaming coverage from remote processes to a collector
//!
//! # Quick Start
//!
//! ```ignore
//! use tally::durability::{AccessMode, RegistryFile, RegistryUpdate};
//!
//! let mut registry = RegistryFile::create(path, "demo", AccessMode::ReadWrite)?;
//! registry.append(&[RegistryUpdate { files, ..Default::default() }])?;
//! let project = registry.read_contents()?.project();
//! ```

pub mod logging;

pub use tally_codec as codec;
pub use tally_core as model;
pub use tally_durability as durability;
pub use tally_recorder as recorder;
