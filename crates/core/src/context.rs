//! Named contexts
//!
//! A context is a named filter with a persistent bit index. Block contexts
//! are built in and identified by their syntactic construct; regexp contexts
//! match normalized statement text or method signatures.

use std::fmt;

use regex::Regex;
use tally_codec::{CodecError, CodecResult, TaggedReader, TaggedRecord, TaggedWriter};

use crate::error::{ContextError, ContextResult};
use crate::record::Record;

/// Bound value meaning "no limit".
pub const UNBOUNDED: u32 = u32::MAX;

/// Compiled pattern that keeps its source text.
///
/// Matching is against the whole input, never a substring.
#[derive(Clone)]
pub struct ContextPattern {
    source: String,
    regex: Regex,
}

impl ContextPattern {
    /// Compile `source`.
    pub fn new(source: &str) -> ContextResult<Self> {
        let regex = Regex::new(&format!("^(?:{})$", source)).map_err(|e| {
            ContextError::InvalidPattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(ContextPattern {
            source: source.to_string(),
            regex,
        })
    }

    /// Pattern text as given.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` if the entire `text` matches.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for ContextPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for ContextPattern {}

impl fmt::Debug for ContextPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)
    }
}

/// Built-in context tied to a syntactic construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    /// Bit index
    pub index: u32,
    /// Context name
    pub name: &'static str,
}

/// The shape of a method as seen by method contexts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodMarker {
    /// Normalized signature text, e.g. `public static int size()`
    pub normalized_signature: String,
    /// Cyclomatic complexity of the method body
    pub complexity: u32,
    /// Number of statements in the method body
    pub statements: u32,
    /// Complexity including nested classes and lambdas
    pub aggregated_complexity: u32,
    /// Statements including nested classes and lambdas
    pub aggregated_statements: u32,
}

/// Context matching statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementRegexpContext {
    index: Option<u32>,
    name: String,
    pattern: ContextPattern,
}

impl StatementRegexpContext {
    /// New unindexed context.
    pub fn new(name: impl Into<String>, pattern: ContextPattern) -> Self {
        StatementRegexpContext {
            index: None,
            name: name.into(),
            pattern,
        }
    }

    /// Context name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assigned bit index, `None` until added to a store.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub(crate) fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Match pattern.
    pub fn pattern(&self) -> &ContextPattern {
        &self.pattern
    }

    /// Returns `true` if the normalized statement text matches.
    pub fn matches(&self, normalized_statement: &str) -> bool {
        self.pattern.is_match(normalized_statement)
    }

    /// Same pattern, ignoring name and index.
    pub fn is_equivalent(&self, other: &StatementRegexpContext) -> bool {
        self.pattern == other.pattern
    }
}

/// Context matching method signatures, optionally bounded by size metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRegexpContext {
    index: Option<u32>,
    name: String,
    pattern: ContextPattern,
    max_complexity: u32,
    max_statements: u32,
    max_aggregated_complexity: u32,
    max_aggregated_statements: u32,
}

impl MethodRegexpContext {
    /// New unindexed, unbounded context.
    pub fn new(name: impl Into<String>, pattern: ContextPattern) -> Self {
        MethodRegexpContext {
            index: None,
            name: name.into(),
            pattern,
            max_complexity: UNBOUNDED,
            max_statements: UNBOUNDED,
            max_aggregated_complexity: UNBOUNDED,
            max_aggregated_statements: UNBOUNDED,
        }
    }

    /// Set the complexity and statement bounds.
    pub fn with_bounds(mut self, max_complexity: u32, max_statements: u32) -> Self {
        self.max_complexity = max_complexity;
        self.max_statements = max_statements;
        self
    }

    /// Set the aggregated complexity and statement bounds.
    pub fn with_aggregated_bounds(
        mut self,
        max_aggregated_complexity: u32,
        max_aggregated_statements: u32,
    ) -> Self {
        self.max_aggregated_complexity = max_aggregated_complexity;
        self.max_aggregated_statements = max_aggregated_statements;
        self
    }

    pub(crate) fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Context name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assigned bit index, `None` until added to a store.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// Match pattern.
    pub fn pattern(&self) -> &ContextPattern {
        &self.pattern
    }

    /// Maximum cyclomatic complexity.
    pub fn max_complexity(&self) -> u32 {
        self.max_complexity
    }

    /// Maximum statement count.
    pub fn max_statements(&self) -> u32 {
        self.max_statements
    }

    /// Maximum aggregated complexity.
    pub fn max_aggregated_complexity(&self) -> u32 {
        self.max_aggregated_complexity
    }

    /// Maximum aggregated statement count.
    pub fn max_aggregated_statements(&self) -> u32 {
        self.max_aggregated_statements
    }

    /// Signature matches and every metric is within its bound.
    pub fn matches(&self, marker: &MethodMarker) -> bool {
        self.pattern.is_match(&marker.normalized_signature)
            && marker.complexity <= self.max_complexity
            && marker.statements <= self.max_statements
            && marker.aggregated_complexity <= self.max_aggregated_complexity
            && marker.aggregated_statements <= self.max_aggregated_statements
    }

    /// Same pattern and bounds, ignoring name and index.
    pub fn is_equivalent(&self, other: &MethodRegexpContext) -> bool {
        self.max_complexity == other.max_complexity
            && self.max_statements == other.max_statements
            && self.max_aggregated_complexity == other.max_aggregated_complexity
            && self.max_aggregated_statements == other.max_aggregated_statements
            && self.pattern == other.pattern
    }
}

/// Any context known to a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamedContext {
    /// Built-in block context
    Block(BlockContext),
    /// Method regexp context (built-in or user defined)
    Method(MethodRegexpContext),
    /// Statement regexp context
    Statement(StatementRegexpContext),
}

impl NamedContext {
    /// Context name.
    pub fn name(&self) -> &str {
        match self {
            NamedContext::Block(c) => c.name,
            NamedContext::Method(c) => c.name(),
            NamedContext::Statement(c) => c.name(),
        }
    }

    /// Bit index, `None` for a context not yet added to a store.
    pub fn index(&self) -> Option<u32> {
        match self {
            NamedContext::Block(c) => Some(c.index),
            NamedContext::Method(c) => c.index(),
            NamedContext::Statement(c) => c.index(),
        }
    }
}

fn write_index(out: &mut TaggedWriter<'_, Record>, index: Option<u32>) -> CodecResult<()> {
    out.write_int(index.map_or(-1, |i| i as i32))
}

fn read_index(input: &mut TaggedReader<'_, Record>) -> CodecResult<Option<u32>> {
    match input.read_int()? {
        -1 => Ok(None),
        i if i >= 0 => Ok(Some(i as u32)),
        other => Err(CodecError::InvalidValue(format!(
            "context index {} is negative",
            other
        ))),
    }
}

fn read_pattern(input: &mut TaggedReader<'_, Record>) -> CodecResult<ContextPattern> {
    let source = input.read_str()?;
    ContextPattern::new(&source).map_err(|e| CodecError::InvalidValue(e.to_string()))
}

impl TaggedRecord<Record> for MethodRegexpContext {
    const TYPE_NAME: &'static str = "MethodRegexpContext";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_str(&self.name)?;
        write_index(out, self.index)?;
        out.write_str(self.pattern.as_str())?;
        out.write_u32(self.max_complexity)?;
        out.write_u32(self.max_statements)?;
        out.write_u32(self.max_aggregated_complexity)?;
        out.write_u32(self.max_aggregated_statements)
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        Ok(MethodRegexpContext {
            name: input.read_str()?,
            index: read_index(input)?,
            pattern: read_pattern(input)?,
            max_complexity: input.read_u32()?,
            max_statements: input.read_u32()?,
            max_aggregated_complexity: input.read_u32()?,
            max_aggregated_statements: input.read_u32()?,
        })
    }

    fn into_record(self) -> Record {
        Record::MethodContext(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::MethodContext(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl TaggedRecord<Record> for StatementRegexpContext {
    const TYPE_NAME: &'static str = "StatementRegexpContext";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_str(&self.name)?;
        write_index(out, self.index)?;
        out.write_str(self.pattern.as_str())
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        Ok(StatementRegexpContext {
            name: input.read_str()?,
            index: read_index(input)?,
            pattern: read_pattern(input)?,
        })
    }

    fn into_record(self) -> Record {
        Record::StatementContext(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::StatementContext(v) => Ok(v),
            other => Err(other),
        }
    }
}
