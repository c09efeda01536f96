//! Tagged binary codec for Tally
//!
//! Every value on the wire is preceded by a one-byte tag, which makes the
//! stream self-describing: a reader that meets something it did not expect
//! fails with a precise [`CodecError::WrongTag`] instead of misreading bytes.
//!
//! - Primitive tags `0..=8` (see [`tags`])
//! - Structural record tags `9..=127`, registered in a [`TagRegistry`]
//! - [`TaggedWriter`] / [`TaggedReader`] mirror each other one-for-one
//! - [`TaggedRecord`] is implemented by every structural type
//!
//! All multi-byte values are big-endian.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod reader;
pub mod record;
pub mod registry;
pub mod tags;
pub mod writer;

pub use error::{CodecError, CodecResult};
pub use reader::TaggedReader;
pub use record::{read_as, TaggedRecord};
pub use registry::{ReaderFn, TagRegistry};
pub use writer::TaggedWriter;
