use tally_codec::{CodecResult, TaggedReader, TaggedRecord, TaggedWriter};

use super::class::ClassInfo;
use super::method::MethodInfo;
use super::statement::StatementInfo;
use crate::context_set::ContextMapping;
use crate::record::Record;

/// Instrumented source file and everything declared in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Path relative to the source root
    pub path: String,
    /// Package the file belongs to, empty for the default package
    pub package: String,
    /// Source encoding, `None` for the platform default
    pub encoding: Option<String>,
    /// Last modification time (ms since epoch)
    pub timestamp: i64,
    /// Size in bytes at instrumentation time
    pub file_size: i64,
    /// Checksum of the source text at instrumentation time
    pub checksum: i64,
    /// First coverage slot of the file
    pub data_index: u32,
    /// Number of slots owned by the file
    pub data_length: u32,
    /// Oldest registry version this file's layout is valid for
    pub min_version: i64,
    /// Newest registry version this file's layout is valid for
    pub max_version: i64,
    /// Physical lines
    pub line_count: u32,
    /// Non-comment lines
    pub nc_line_count: u32,
    /// Top level classes
    pub classes: Vec<ClassInfo>,
    /// Top level functions
    pub methods: Vec<MethodInfo>,
    /// Top level statements
    pub statements: Vec<StatementInfo>,
}

impl FileInfo {
    /// One past the last slot owned by the file.
    pub fn slot_end(&self) -> u32 {
        self.data_index.saturating_add(self.data_length)
    }

    /// Returns `true` if `version` falls in this file's validity window.
    pub fn is_valid_for(&self, version: i64) -> bool {
        (self.min_version..=self.max_version).contains(&version)
    }

    /// Rewrite the contexts of every element in the file.
    pub fn remap_contexts(&mut self, mapping: &ContextMapping) {
        self.classes.iter_mut().for_each(|c| c.remap_contexts(mapping));
        self.methods.iter_mut().for_each(|m| m.remap_contexts(mapping));
        self.statements.iter_mut().for_each(|s| s.remap_contexts(mapping));
    }

    /// Statements anywhere in the file.
    pub fn statement_count(&self) -> usize {
        self.statements.len()
            + self.classes.iter().map(ClassInfo::statement_count).sum::<usize>()
            + self.methods.iter().map(MethodInfo::statement_count).sum::<usize>()
    }
}

impl TaggedRecord<Record> for FileInfo {
    const TYPE_NAME: &'static str = "FileInfo";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_str(&self.path)?;
        out.write_str(&self.package)?;
        out.write_utf(self.encoding.as_deref())?;
        out.write_long(self.timestamp)?;
        out.write_long(self.file_size)?;
        out.write_long(self.checksum)?;
        out.write_u32(self.data_index)?;
        out.write_u32(self.data_length)?;
        out.write_long(self.min_version)?;
        out.write_long(self.max_version)?;
        out.write_u32(self.line_count)?;
        out.write_u32(self.nc_line_count)?;
        out.write_list(&self.classes)?;
        out.write_list(&self.methods)?;
        out.write_list(&self.statements)
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        Ok(FileInfo {
            path: input.read_str()?,
            package: input.read_str()?,
            encoding: input.read_utf()?,
            timestamp: input.read_long()?,
            file_size: input.read_long()?,
            checksum: input.read_long()?,
            data_index: input.read_u32()?,
            data_length: input.read_u32()?,
            min_version: input.read_long()?,
            max_version: input.read_long()?,
            line_count: input.read_u32()?,
            nc_line_count: input.read_u32()?,
            classes: input.read_list()?,
            methods: input.read_list()?,
            statements: input.read_list()?,
        })
    }

    fn into_record(self) -> Record {
        Record::File(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::File(v) => Ok(v),
            other => Err(other),
        }
    }
}
