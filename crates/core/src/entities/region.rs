use tally_codec::{CodecResult, TaggedReader, TaggedRecord, TaggedWriter};

use crate::record::Record;

/// Start and end position of an element in its source file (1-based).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SourceRegion {
    /// First line
    pub start_line: u32,
    /// First column
    pub start_column: u32,
    /// Last line
    pub end_line: u32,
    /// Last column
    pub end_column: u32,
}

impl SourceRegion {
    /// Region from explicit coordinates.
    pub fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        SourceRegion {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Number of lines covered.
    pub fn line_span(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Write the four coordinates without tag or nullity, as elements embed them.
    pub fn write_raw(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_u32(self.start_line)?;
        out.write_u32(self.start_column)?;
        out.write_u32(self.end_line)?;
        out.write_u32(self.end_column)
    }

    /// Inverse of [`SourceRegion::write_raw`].
    pub fn read_raw(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        Ok(SourceRegion {
            start_line: input.read_u32()?,
            start_column: input.read_u32()?,
            end_line: input.read_u32()?,
            end_column: input.read_u32()?,
        })
    }
}

impl TaggedRecord<Record> for SourceRegion {
    const TYPE_NAME: &'static str = "SourceRegion";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        self.write_raw(out)
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        Self::read_raw(input)
    }

    fn into_record(self) -> Record {
        Record::SourceRegion(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::SourceRegion(v) => Ok(v),
            other => Err(other),
        }
    }
}
