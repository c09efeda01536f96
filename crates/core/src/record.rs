//! Structural record kinds and their tag table
//!
//! Tags are part of the on-disk format. A tag, once assigned, is never reused
//! for a different kind; `NEXT_TAG + 10..=12` stay reserved for annotation
//! records.

use once_cell::sync::Lazy;
use tally_codec::tags::NEXT_TAG;
use tally_codec::{CodecResult, TagRegistry};

use crate::context::{MethodRegexpContext, StatementRegexpContext};
use crate::context_set::ContextSet;
use crate::entities::{
    BranchInfo, ClassInfo, FileInfo, MethodInfo, MethodSignature, Modifiers, Parameter,
    SourceRegion, StatementInfo,
};
use crate::store::ContextStore;

/// Tag of [`FileInfo`]
pub const FILE_INFO_TAG: i32 = NEXT_TAG;
/// Tag of [`ClassInfo`]
pub const CLASS_INFO_TAG: i32 = NEXT_TAG + 1;
/// Tag of [`MethodInfo`]
pub const METHOD_INFO_TAG: i32 = NEXT_TAG + 2;
/// Tag of [`StatementInfo`]
pub const STATEMENT_INFO_TAG: i32 = NEXT_TAG + 3;
/// Tag of [`BranchInfo`]
pub const BRANCH_INFO_TAG: i32 = NEXT_TAG + 4;
/// Tag of [`ContextSet`]
pub const CONTEXT_SET_TAG: i32 = NEXT_TAG + 5;
/// Tag of [`SourceRegion`]
pub const SOURCE_REGION_TAG: i32 = NEXT_TAG + 6;
/// Tag of [`MethodSignature`]
pub const METHOD_SIGNATURE_TAG: i32 = NEXT_TAG + 7;
/// Tag of [`Modifiers`]
pub const MODIFIERS_TAG: i32 = NEXT_TAG + 8;
/// Tag of [`Parameter`]
pub const PARAMETER_TAG: i32 = NEXT_TAG + 9;
/// Tag of [`ContextStore`]
pub const CONTEXT_STORE_TAG: i32 = NEXT_TAG + 13;
/// Tag of [`StatementRegexpContext`]
pub const STATEMENT_CONTEXT_TAG: i32 = NEXT_TAG + 14;
/// Tag of [`MethodRegexpContext`]
pub const METHOD_CONTEXT_TAG: i32 = NEXT_TAG + 15;

/// Every structural kind that can appear in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Record {
    /// Source file
    File(FileInfo),
    /// Class
    Class(ClassInfo),
    /// Method
    Method(MethodInfo),
    /// Statement
    Statement(StatementInfo),
    /// Branch
    Branch(BranchInfo),
    /// Context bitset
    ContextSet(ContextSet),
    /// Source region
    SourceRegion(SourceRegion),
    /// Method signature
    MethodSignature(MethodSignature),
    /// Modifiers
    Modifiers(Modifiers),
    /// Parameter
    Parameter(Parameter),
    /// Context store
    ContextStore(ContextStore),
    /// Statement context
    StatementContext(StatementRegexpContext),
    /// Method context
    MethodContext(MethodRegexpContext),
}

/// Build the structural tag table.
pub fn structure_tags() -> CodecResult<TagRegistry<Record>> {
    TagRegistry::new()
        .register::<FileInfo>(FILE_INFO_TAG)?
        .register::<ClassInfo>(CLASS_INFO_TAG)?
        .register::<MethodInfo>(METHOD_INFO_TAG)?
        .register::<StatementInfo>(STATEMENT_INFO_TAG)?
        .register::<BranchInfo>(BRANCH_INFO_TAG)?
        .register::<ContextSet>(CONTEXT_SET_TAG)?
        .register::<SourceRegion>(SOURCE_REGION_TAG)?
        .register::<MethodSignature>(METHOD_SIGNATURE_TAG)?
        .register::<Modifiers>(MODIFIERS_TAG)?
        .register::<Parameter>(PARAMETER_TAG)?
        .register::<ContextStore>(CONTEXT_STORE_TAG)?
        .register::<StatementRegexpContext>(STATEMENT_CONTEXT_TAG)?
        .register::<MethodRegexpContext>(METHOD_CONTEXT_TAG)
}

/// Process-wide structural tag table, built on first use.
pub static STRUCTURE_TAGS: Lazy<TagRegistry<Record>> =
    Lazy::new(|| structure_tags().expect("structural tag table is consistent"));
