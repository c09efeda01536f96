//! Core types for Tally
//!
//! - [`Bitmap`]: word-packed bitmap for hit sets
//! - [`ContextSet`]: immutable bitset of contexts applying to one element
//! - [`ContextStore`]: named contexts, reserved and user defined
//! - Structural entities: [`FileInfo`], [`ClassInfo`], [`MethodInfo`], ...
//! - [`Record`]: closed set of structural kinds and [`STRUCTURE_TAGS`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bitmap;
pub mod context;
pub mod context_set;
pub mod entities;
pub mod error;
pub mod record;
pub mod store;

pub use bitmap::Bitmap;
pub use context::{
    BlockContext, ContextPattern, MethodMarker, MethodRegexpContext, NamedContext,
    StatementRegexpContext, UNBOUNDED,
};
pub use context_set::{ContextMapping, ContextSet};
pub use entities::{
    BranchInfo, ClassInfo, FileInfo, MethodInfo, MethodSignature, Modifiers, PackageInfo,
    Parameter, ProjectInfo, SourceRegion, StatementInfo,
};
pub use error::{ContextError, ContextResult};
pub use record::{structure_tags, Record, STRUCTURE_TAGS};
pub use store::{ContextDefinition, ContextKind, ContextStore, NEXT_INDEX};
