use tally_codec::{CodecResult, TaggedReader, TaggedRecord, TaggedWriter};

use super::class::ClassInfo;
use super::region::SourceRegion;
use super::signature::MethodSignature;
use super::statement::{BranchInfo, StatementInfo};
use crate::context::MethodMarker;
use crate::context_set::{ContextMapping, ContextSet};
use crate::record::Record;

/// Instrumented method, lambda or test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodInfo {
    /// Declared signature
    pub signature: MethodSignature,
    /// Test name fixed at instrumentation time, if known
    pub static_test_name: Option<String>,
    /// Method is a test
    pub is_test: bool,
    /// Method is a lambda expression
    pub is_lambda: bool,
    /// Contexts applying to the method
    pub context: ContextSet,
    /// Slot offset of the method entry counter
    pub relative_index: u32,
    /// Slots owned by the method and everything nested in it
    pub data_length: u32,
    /// Cyclomatic complexity of the body
    pub complexity: u32,
    /// Complexity including nested classes and lambdas
    pub aggregated_complexity: u32,
    /// Statements including nested classes and lambdas
    pub aggregated_statements: u32,
    /// Language construct identifier
    pub construct: String,
    /// Source position
    pub region: SourceRegion,
    /// Statements directly in the body
    pub statements: Vec<StatementInfo>,
    /// Branches directly in the body
    pub branches: Vec<BranchInfo>,
    /// Local and anonymous classes
    pub classes: Vec<ClassInfo>,
    /// Lambdas and inner functions
    pub methods: Vec<MethodInfo>,
}

impl MethodInfo {
    /// Shape seen by method contexts.
    pub fn marker(&self) -> MethodMarker {
        MethodMarker {
            normalized_signature: self.signature.normalized(),
            complexity: self.complexity,
            statements: self.statements.len() as u32,
            aggregated_complexity: self.aggregated_complexity,
            aggregated_statements: self.aggregated_statements,
        }
    }

    /// Rewrite this method's contexts and everything nested in it.
    pub fn remap_contexts(&mut self, mapping: &ContextMapping) {
        self.context = self.context.remap(mapping);
        self.statements.iter_mut().for_each(|s| s.remap_contexts(mapping));
        self.branches.iter_mut().for_each(|b| b.remap_contexts(mapping));
        self.classes.iter_mut().for_each(|c| c.remap_contexts(mapping));
        self.methods.iter_mut().for_each(|m| m.remap_contexts(mapping));
    }

    /// Statements in this method and everything nested in it.
    pub fn statement_count(&self) -> usize {
        self.statements.len()
            + self.classes.iter().map(ClassInfo::statement_count).sum::<usize>()
            + self.methods.iter().map(MethodInfo::statement_count).sum::<usize>()
    }
}

impl TaggedRecord<Record> for MethodInfo {
    const TYPE_NAME: &'static str = "MethodInfo";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_record(&self.signature)?;
        out.write_utf(self.static_test_name.as_deref())?;
        out.write_bool(self.is_test)?;
        out.write_bool(self.is_lambda)?;
        out.write_record(&self.context)?;
        out.write_u32(self.relative_index)?;
        out.write_u32(self.data_length)?;
        out.write_u32(self.complexity)?;
        out.write_u32(self.aggregated_complexity)?;
        out.write_u32(self.aggregated_statements)?;
        out.write_str(&self.construct)?;
        self.region.write_raw(out)?;
        out.write_list(&self.statements)?;
        out.write_list(&self.branches)?;
        out.write_list(&self.classes)?;
        out.write_list(&self.methods)
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        Ok(MethodInfo {
            signature: input.read_required()?,
            static_test_name: input.read_utf()?,
            is_test: input.read_bool()?,
            is_lambda: input.read_bool()?,
            context: input.read_required()?,
            relative_index: input.read_u32()?,
            data_length: input.read_u32()?,
            complexity: input.read_u32()?,
            aggregated_complexity: input.read_u32()?,
            aggregated_statements: input.read_u32()?,
            construct: input.read_str()?,
            region: SourceRegion::read_raw(input)?,
            statements: input.read_list()?,
            branches: input.read_list()?,
            classes: input.read_list()?,
            methods: input.read_list()?,
        })
    }

    fn into_record(self) -> Record {
        Record::Method(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::Method(v) => Ok(v),
            other => Err(other),
        }
    }
}
