use tally_codec::{CodecResult, TaggedReader, TaggedRecord, TaggedWriter};

use super::method::MethodInfo;
use super::region::SourceRegion;
use super::signature::Modifiers;
use super::statement::StatementInfo;
use crate::context_set::ContextMapping;
use crate::record::Record;

/// Class, interface, enum or annotation type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassInfo {
    /// Simple name
    pub name: String,
    /// Fully qualified name
    pub qualified_name: String,
    /// Slot offset of the first slot owned by the class
    pub relative_index: u32,
    /// Slots owned by the class and everything nested in it
    pub data_length: u32,
    /// Complexity including nested elements
    pub aggregated_complexity: u32,
    /// Statements including nested elements
    pub aggregated_statements: u32,
    /// Annotation type
    pub is_annotation: bool,
    /// Enum
    pub is_enum: bool,
    /// Interface
    pub is_interface: bool,
    /// Test class
    pub is_test: bool,
    /// Source position
    pub region: SourceRegion,
    /// Modifiers and annotations
    pub modifiers: Modifiers,
    /// Nested classes
    pub classes: Vec<ClassInfo>,
    /// Methods
    pub methods: Vec<MethodInfo>,
    /// Statements outside any method (field initializers)
    pub statements: Vec<StatementInfo>,
}

impl ClassInfo {
    /// Rewrite the contexts of every nested element.
    pub fn remap_contexts(&mut self, mapping: &ContextMapping) {
        self.classes.iter_mut().for_each(|c| c.remap_contexts(mapping));
        self.methods.iter_mut().for_each(|m| m.remap_contexts(mapping));
        self.statements.iter_mut().for_each(|s| s.remap_contexts(mapping));
    }

    /// Statements in the class and everything nested in it.
    pub fn statement_count(&self) -> usize {
        self.statements.len()
            + self.classes.iter().map(ClassInfo::statement_count).sum::<usize>()
            + self.methods.iter().map(MethodInfo::statement_count).sum::<usize>()
    }
}

impl TaggedRecord<Record> for ClassInfo {
    const TYPE_NAME: &'static str = "ClassInfo";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_str(&self.name)?;
        out.write_str(&self.qualified_name)?;
        out.write_u32(self.relative_index)?;
        out.write_u32(self.data_length)?;
        out.write_u32(self.aggregated_complexity)?;
        out.write_u32(self.aggregated_statements)?;
        out.write_bool(self.is_annotation)?;
        out.write_bool(self.is_enum)?;
        out.write_bool(self.is_interface)?;
        out.write_bool(self.is_test)?;
        self.region.write_raw(out)?;
        out.write_record(&self.modifiers)?;
        out.write_list(&self.classes)?;
        out.write_list(&self.methods)?;
        out.write_list(&self.statements)
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        Ok(ClassInfo {
            name: input.read_str()?,
            qualified_name: input.read_str()?,
            relative_index: input.read_u32()?,
            data_length: input.read_u32()?,
            aggregated_complexity: input.read_u32()?,
            aggregated_statements: input.read_u32()?,
            is_annotation: input.read_bool()?,
            is_enum: input.read_bool()?,
            is_interface: input.read_bool()?,
            is_test: input.read_bool()?,
            region: SourceRegion::read_raw(input)?,
            modifiers: input.read_required()?,
            classes: input.read_list()?,
            methods: input.read_list()?,
            statements: input.read_list()?,
        })
    }

    fn into_record(self) -> Record {
        Record::Class(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::Class(v) => Ok(v),
            other => Err(other),
        }
    }
}
