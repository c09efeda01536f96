use tally_codec::{CodecResult, TaggedReader, TaggedRecord, TaggedWriter};

use super::region::SourceRegion;
use crate::context_set::{ContextMapping, ContextSet};
use crate::record::Record;

/// Instrumented statement. Owns one coverage slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementInfo {
    /// Contexts applying to the statement
    pub context: ContextSet,
    /// Slot offset relative to the owning file's data index
    pub relative_index: u32,
    /// Complexity contributed by the statement
    pub complexity: u32,
    /// Language construct identifier, e.g. `stmt`, `expr`
    pub construct: String,
    /// Source position
    pub region: SourceRegion,
}

impl StatementInfo {
    /// Rewrite the context set through a merge mapping.
    pub fn remap_contexts(&mut self, mapping: &ContextMapping) {
        self.context = self.context.remap(mapping);
    }
}

impl TaggedRecord<Record> for StatementInfo {
    const TYPE_NAME: &'static str = "StatementInfo";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_record(&self.context)?;
        out.write_u32(self.relative_index)?;
        out.write_u32(self.complexity)?;
        out.write_str(&self.construct)?;
        self.region.write_raw(out)
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        Ok(StatementInfo {
            context: input.read_required()?,
            relative_index: input.read_u32()?,
            complexity: input.read_u32()?,
            construct: input.read_str()?,
            region: SourceRegion::read_raw(input)?,
        })
    }

    fn into_record(self) -> Record {
        Record::Statement(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::Statement(v) => Ok(v),
            other => Err(other),
        }
    }
}

/// Instrumented branch. Owns two coverage slots (true and false outcome).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchInfo {
    /// Contexts applying to the branch
    pub context: ContextSet,
    /// Slot offset of the true outcome; the false outcome follows it
    pub relative_index: u32,
    /// Complexity contributed by the branch
    pub complexity: u32,
    /// Language construct identifier
    pub construct: String,
    /// `false` for branches that were recorded but not instrumented
    pub instrumented: bool,
    /// Source position
    pub region: SourceRegion,
}

impl BranchInfo {
    /// Rewrite the context set through a merge mapping.
    pub fn remap_contexts(&mut self, mapping: &ContextMapping) {
        self.context = self.context.remap(mapping);
    }
}

impl TaggedRecord<Record> for BranchInfo {
    const TYPE_NAME: &'static str = "BranchInfo";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_record(&self.context)?;
        out.write_u32(self.relative_index)?;
        out.write_u32(self.complexity)?;
        out.write_str(&self.construct)?;
        out.write_bool(self.instrumented)?;
        self.region.write_raw(out)
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        Ok(BranchInfo {
            context: input.read_required()?,
            relative_index: input.read_u32()?,
            complexity: input.read_u32()?,
            construct: input.read_str()?,
            instrumented: input.read_bool()?,
            region: SourceRegion::read_raw(input)?,
        })
    }

    fn into_record(self) -> Record {
        Record::Branch(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::Branch(v) => Ok(v),
            other => Err(other),
        }
    }
}
