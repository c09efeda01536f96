//! Structural entities
//!
//! Everything the instrumenter registers: files, classes, methods,
//! statements and branches. Each element carries the [`ContextSet`] computed
//! for it at registration time and a slot index into the coverage counters.
//!
//! [`ContextSet`]: crate::ContextSet

pub mod class;
pub mod file;
pub mod method;
pub mod project;
pub mod region;
pub mod signature;
pub mod statement;

pub use class::ClassInfo;
pub use file::FileInfo;
pub use method::MethodInfo;
pub use project::{PackageInfo, ProjectInfo};
pub use region::SourceRegion;
pub use signature::{MethodSignature, Modifiers, Parameter};
pub use statement::{BranchInfo, StatementInfo};
