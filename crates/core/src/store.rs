//! Context store
//!
//! Maps context names to bit indices and match rules. Indices `0..=18` are
//! built in; user contexts are numbered from [`NEXT_INDEX`] in registration
//! order and keep their index for the life of the registry.

use std::fmt;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Deserialize;
use tally_codec::{CodecError, CodecResult, TaggedReader, TaggedRecord, TaggedWriter};
use tracing::{debug, warn};

use crate::context::{
    BlockContext, ContextPattern, MethodMarker, MethodRegexpContext, NamedContext,
    StatementRegexpContext, UNBOUNDED,
};
use crate::context_set::{ContextMapping, ContextSet};
use crate::error::{ContextError, ContextResult};
use crate::record::Record;

/// Source directive (`//TALLY:OFF` style) context. Always filtered.
pub const CONTEXT_SOURCE_DIRECTIVE: u32 = 0;
/// Static initializer block
pub const CONTEXT_STATIC: u32 = 1;
/// Instance initializer block (indexed but not named)
pub const CONTEXT_INSTANCE: u32 = 2;
/// Constructor body
pub const CONTEXT_CONSTRUCTOR: u32 = 3;
/// Method body
pub const CONTEXT_METHOD: u32 = 4;
/// `switch`
pub const CONTEXT_SWITCH: u32 = 5;
/// `while`
pub const CONTEXT_WHILE: u32 = 6;
/// `do`
pub const CONTEXT_DO: u32 = 7;
/// `for`
pub const CONTEXT_FOR: u32 = 8;
/// `if`
pub const CONTEXT_IF: u32 = 9;
/// `else`
pub const CONTEXT_ELSE: u32 = 10;
/// `try`
pub const CONTEXT_TRY: u32 = 11;
/// `catch`
pub const CONTEXT_CATCH: u32 = 12;
/// `finally`
pub const CONTEXT_FINALLY: u32 = 13;
/// `synchronized`
pub const CONTEXT_SYNC: u32 = 14;
/// `assert`
pub const CONTEXT_ASSERT: u32 = 15;
/// Deprecated element
pub const CONTEXT_DEPRECATED: u32 = 16;
/// Private methods
pub const CONTEXT_PRIVATE_METHOD: u32 = 17;
/// Trivial getters and setters
pub const CONTEXT_PROPERTY_ACCESSOR: u32 = 18;

/// First index available to user contexts.
pub const NEXT_INDEX: u32 = 19;

/// Largest number of contexts a store may hold.
pub const MAX_CONTEXTS: u32 = 1024 * 64;

/// Signature pattern of the built-in `private` context.
pub const PRIVATE_METHOD_PATTERN: &str = "(.* )?private .*";

/// Signature pattern of the built-in `property` context.
pub const PROPERTY_ACCESSOR_PATTERN: &str = r"(.* )?public (.* )?(\S+ get[A-Z]\w*\(\)|boolean is[A-Z]\w*\(\)|void set[A-Z]\w*\(\S+ \w+\))";

/// Built-in block contexts, by index.
pub const BLOCK_CONTEXTS: [BlockContext; 16] = [
    BlockContext { index: CONTEXT_SOURCE_DIRECTIVE, name: "SourceDirective" },
    BlockContext { index: CONTEXT_STATIC, name: "static" },
    BlockContext { index: CONTEXT_CONSTRUCTOR, name: "constructor" },
    BlockContext { index: CONTEXT_METHOD, name: "method" },
    BlockContext { index: CONTEXT_SWITCH, name: "switch" },
    BlockContext { index: CONTEXT_WHILE, name: "while" },
    BlockContext { index: CONTEXT_DO, name: "do" },
    BlockContext { index: CONTEXT_FOR, name: "for" },
    BlockContext { index: CONTEXT_IF, name: "if" },
    BlockContext { index: CONTEXT_ELSE, name: "else" },
    BlockContext { index: CONTEXT_TRY, name: "try" },
    BlockContext { index: CONTEXT_CATCH, name: "catch" },
    BlockContext { index: CONTEXT_FINALLY, name: "finally" },
    BlockContext { index: CONTEXT_SYNC, name: "sync" },
    BlockContext { index: CONTEXT_ASSERT, name: "assert" },
    BlockContext { index: CONTEXT_DEPRECATED, name: "@deprecated" },
];

static RESERVED_METHOD_CONTEXTS: Lazy<Vec<MethodRegexpContext>> = Lazy::new(|| {
    let private = ContextPattern::new(PRIVATE_METHOD_PATTERN).expect("built-in pattern compiles");
    let property =
        ContextPattern::new(PROPERTY_ACCESSOR_PATTERN).expect("built-in pattern compiles");
    vec![
        MethodRegexpContext::new("private", private).with_index(CONTEXT_PRIVATE_METHOD),
        MethodRegexpContext::new("property", property)
            .with_bounds(1, 1)
            .with_index(CONTEXT_PROPERTY_ACCESSOR),
    ]
});

/// Built-in method contexts (`private`, `property`).
pub fn reserved_method_contexts() -> &'static [MethodRegexpContext] {
    &RESERVED_METHOD_CONTEXTS
}

/// Returns `true` if `name` belongs to a built-in context.
pub fn is_reserved_name(name: &str) -> bool {
    BLOCK_CONTEXTS.iter().any(|c| c.name == name)
        || RESERVED_METHOD_CONTEXTS.iter().any(|c| c.name() == name)
}

/// Kind of a user context definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    /// Matches method signatures
    Method,
    /// Matches statement text
    Statement,
}

/// User context definition, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContextDefinition {
    /// Context name
    pub name: String,
    /// Method or statement
    pub kind: ContextKind,
    /// Pattern text
    pub regexp: String,
    /// Method only: maximum complexity
    #[serde(default)]
    pub max_complexity: Option<u32>,
    /// Method only: maximum statement count
    #[serde(default)]
    pub max_statements: Option<u32>,
    /// Method only: maximum aggregated complexity
    #[serde(default)]
    pub max_aggregated_complexity: Option<u32>,
    /// Method only: maximum aggregated statement count
    #[serde(default)]
    pub max_aggregated_statements: Option<u32>,
}

impl ContextDefinition {
    fn invalid(&self, reason: &str) -> ContextError {
        ContextError::InvalidDefinition {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn has_bounds(&self) -> bool {
        self.max_complexity.is_some()
            || self.max_statements.is_some()
            || self.max_aggregated_complexity.is_some()
            || self.max_aggregated_statements.is_some()
    }

    /// Check required fields and bound applicability.
    pub fn validate(&self) -> ContextResult<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name is required"));
        }
        if self.name.contains([',', ' ']) {
            return Err(self.invalid("name must not contain commas or spaces"));
        }
        if self.regexp.is_empty() {
            return Err(self.invalid("regexp is required"));
        }
        if self.kind == ContextKind::Statement && self.has_bounds() {
            return Err(self.invalid("statement contexts take no bounds"));
        }
        Ok(())
    }
}

/// Named contexts of one registry.
pub struct ContextStore {
    next_index: u32,
    method_contexts: Vec<MethodRegexpContext>,
    statement_contexts: Vec<StatementRegexpContext>,
    // Filtered lines ask for the same descriptions over and over.
    descriptions: DashMap<ContextSet, String>,
}

impl ContextStore {
    /// Store holding only the built-in contexts.
    pub fn new() -> Self {
        ContextStore {
            next_index: NEXT_INDEX,
            method_contexts: Vec::new(),
            statement_contexts: Vec::new(),
            descriptions: DashMap::new(),
        }
    }

    /// Build a store from user definitions, in order.
    pub fn from_definitions(definitions: &[ContextDefinition]) -> ContextResult<Self> {
        let mut store = ContextStore::new();
        for def in definitions {
            def.validate()?;
            let pattern = ContextPattern::new(&def.regexp)?;
            match def.kind {
                ContextKind::Method => {
                    let ctx = MethodRegexpContext::new(def.name.clone(), pattern)
                        .with_bounds(
                            def.max_complexity.unwrap_or(UNBOUNDED),
                            def.max_statements.unwrap_or(UNBOUNDED),
                        )
                        .with_aggregated_bounds(
                            def.max_aggregated_complexity.unwrap_or(UNBOUNDED),
                            def.max_aggregated_statements.unwrap_or(UNBOUNDED),
                        );
                    store.add_method_context(ctx)?;
                }
                ContextKind::Statement => {
                    store.add_statement_context(StatementRegexpContext::new(def.name.clone(), pattern))?;
                }
            }
        }
        Ok(store)
    }

    /// Next index that a new context would receive.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    /// Total number of named contexts, built-in included.
    pub fn size(&self) -> usize {
        BLOCK_CONTEXTS.len()
            + RESERVED_METHOD_CONTEXTS.len()
            + self.method_contexts.len()
            + self.statement_contexts.len()
    }

    /// User method contexts in registration order.
    pub fn method_contexts(&self) -> &[MethodRegexpContext] {
        &self.method_contexts
    }

    /// User statement contexts in registration order.
    pub fn statement_contexts(&self) -> &[StatementRegexpContext] {
        &self.statement_contexts
    }

    /// All user contexts, methods first.
    pub fn user_contexts(&self) -> Vec<NamedContext> {
        self.method_contexts
            .iter()
            .cloned()
            .map(NamedContext::Method)
            .chain(self.statement_contexts.iter().cloned().map(NamedContext::Statement))
            .collect()
    }

    fn take_existing(&mut self, name: &str) -> Option<u32> {
        let mut index = None;
        if let Some(pos) = self.statement_contexts.iter().position(|c| c.name() == name) {
            index = self.statement_contexts.remove(pos).index();
        }
        if let Some(pos) = self.method_contexts.iter().position(|c| c.name() == name) {
            index = self.method_contexts.remove(pos).index();
        }
        if index.is_some() {
            self.descriptions.clear();
        }
        index
    }

    fn claim_index(&mut self, name: &str) -> ContextResult<u32> {
        if is_reserved_name(name) {
            return Err(ContextError::ReservedName {
                name: name.to_string(),
            });
        }
        if let Some(index) = self.take_existing(name) {
            return Ok(index);
        }
        if self.next_index >= MAX_CONTEXTS {
            return Err(ContextError::IndexExhausted {
                next_index: self.next_index,
            });
        }
        let index = self.next_index;
        self.next_index += 1;
        Ok(index)
    }

    /// Register a method context, reusing the index of an existing context
    /// with the same name.
    pub fn add_method_context(&mut self, ctx: MethodRegexpContext) -> ContextResult<u32> {
        let index = self.claim_index(ctx.name())?;
        debug!(index, name = ctx.name(), pattern = ctx.pattern().as_str(), "adding method context");
        self.method_contexts.push(ctx.with_index(index));
        Ok(index)
    }

    /// Register a statement context, reusing the index of an existing context
    /// with the same name.
    pub fn add_statement_context(&mut self, ctx: StatementRegexpContext) -> ContextResult<u32> {
        let index = self.claim_index(ctx.name())?;
        debug!(index, name = ctx.name(), pattern = ctx.pattern().as_str(), "adding statement context");
        self.statement_contexts.push(ctx.with_index(index));
        Ok(index)
    }

    /// Look up a context by name, built-ins first.
    pub fn get(&self, name: &str) -> Option<NamedContext> {
        if let Some(block) = BLOCK_CONTEXTS.iter().find(|c| c.name == name) {
            return Some(NamedContext::Block(*block));
        }
        RESERVED_METHOD_CONTEXTS
            .iter()
            .chain(&self.method_contexts)
            .find(|c| c.name() == name)
            .cloned()
            .map(NamedContext::Method)
            .or_else(|| {
                self.statement_contexts
                    .iter()
                    .find(|c| c.name() == name)
                    .cloned()
                    .map(NamedContext::Statement)
            })
    }

    /// Filter set for a comma or space separated list of context names.
    ///
    /// Unknown names are logged and ignored. With `invert`, every known index
    /// is flipped. The source directive context is always set.
    pub fn create_filter(&self, spec: &str, invert: bool) -> ContextSet {
        let mut result = ContextSet::with_capacity(self.next_index as usize);
        for name in spec.split([',', ' ']).filter(|s| !s.is_empty()) {
            match self.get(name).and_then(|c| c.index()) {
                Some(index) => result = result.set(index),
                None => warn!(filter = name, "ignoring unknown context filter"),
            }
        }
        if invert {
            result = result.flip(0, self.next_index);
        }
        result.set(CONTEXT_SOURCE_DIRECTIVE)
    }

    /// Named contexts whose index is set in `set`, in index order.
    pub fn contexts_in(&self, set: &ContextSet) -> Vec<NamedContext> {
        set.indices()
            .filter_map(|i| self.context_at(i))
            .collect()
    }

    fn context_at(&self, index: u32) -> Option<NamedContext> {
        if let Some(block) = BLOCK_CONTEXTS.iter().find(|c| c.index == index) {
            return Some(NamedContext::Block(*block));
        }
        RESERVED_METHOD_CONTEXTS
            .iter()
            .chain(&self.method_contexts)
            .find(|c| c.index() == Some(index))
            .cloned()
            .map(NamedContext::Method)
            .or_else(|| {
                self.statement_contexts
                    .iter()
                    .find(|c| c.index() == Some(index))
                    .cloned()
                    .map(NamedContext::Statement)
            })
    }

    /// Comma separated names of the contexts in `set`.
    pub fn describe(&self, set: &ContextSet) -> String {
        if let Some(hit) = self.descriptions.get(set) {
            return hit.value().clone();
        }
        let text = self
            .contexts_in(set)
            .iter()
            .map(|c| c.name().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.descriptions
            .entry(set.clone())
            .or_insert(text)
            .value()
            .clone()
    }

    /// Method contexts (built-in and user) that match `marker`.
    pub fn contexts_for_method(&self, marker: &MethodMarker) -> ContextSet {
        RESERVED_METHOD_CONTEXTS
            .iter()
            .chain(&self.method_contexts)
            .filter(|c| c.matches(marker))
            .filter_map(|c| c.index())
            .fold(ContextSet::new(), |set, i| set.set(i))
    }

    /// Statement contexts that match the normalized statement text.
    pub fn contexts_for_statement(&self, normalized_statement: &str) -> ContextSet {
        self.statement_contexts
            .iter()
            .filter(|c| c.matches(normalized_statement))
            .filter_map(|c| c.index())
            .fold(ContextSet::new(), |set, i| set.set(i))
    }

    fn equivalent_index(&self, ctx: &NamedContext) -> Option<u32> {
        match ctx {
            NamedContext::Method(m) => self
                .method_contexts
                .iter()
                .find(|c| c.is_equivalent(m))
                .and_then(|c| c.index()),
            NamedContext::Statement(s) => self
                .statement_contexts
                .iter()
                .find(|c| c.is_equivalent(s))
                .and_then(|c| c.index()),
            NamedContext::Block(_) => None,
        }
    }

    /// Merge several stores into one holding only the user contexts that
    /// every store defines equivalently.
    ///
    /// Returns the merged store and one mapping per input store, in input
    /// order, translating that store's indices into merged indices. Built-in
    /// indices map to themselves; user indices with no universal counterpart
    /// are absent from the mapping.
    pub fn merge(stores: &[&ContextStore]) -> (ContextStore, Vec<ContextMapping>) {
        let mut merged = ContextStore::new();
        let mut mappings = vec![ContextMapping::new(); stores.len()];

        if let Some(smallest) = stores.iter().min_by_key(|s| s.size()) {
            for ctx in smallest.user_contexts() {
                let equivalents: Option<Vec<u32>> =
                    stores.iter().map(|s| s.equivalent_index(&ctx)).collect();
                let Some(equivalents) = equivalents else {
                    continue;
                };
                let added = match ctx.clone() {
                    NamedContext::Method(m) => merged.add_method_context(m),
                    NamedContext::Statement(s) => merged.add_statement_context(s),
                    NamedContext::Block(_) => continue,
                };
                match added {
                    Ok(merged_index) => {
                        debug!(name = ctx.name(), merged_index, "merging context");
                        for (mapping, from) in mappings.iter_mut().zip(equivalents) {
                            mapping.insert(from, merged_index);
                        }
                    }
                    Err(e) => warn!(name = ctx.name(), error = %e, "skipping context during merge"),
                }
            }
        }

        for mapping in &mut mappings {
            for block in &BLOCK_CONTEXTS {
                mapping.insert(block.index, block.index);
            }
            mapping.insert(CONTEXT_INSTANCE, CONTEXT_INSTANCE);
            for ctx in RESERVED_METHOD_CONTEXTS.iter() {
                if let Some(i) = ctx.index() {
                    mapping.insert(i, i);
                }
            }
        }
        (merged, mappings)
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ContextStore {
    fn clone(&self) -> Self {
        ContextStore {
            next_index: self.next_index,
            method_contexts: self.method_contexts.clone(),
            statement_contexts: self.statement_contexts.clone(),
            descriptions: DashMap::new(),
        }
    }
}

impl PartialEq for ContextStore {
    fn eq(&self, other: &Self) -> bool {
        self.next_index == other.next_index
            && self.method_contexts == other.method_contexts
            && self.statement_contexts == other.statement_contexts
    }
}

impl Eq for ContextStore {}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("next_index", &self.next_index)
            .field("method_contexts", &self.method_contexts)
            .field("statement_contexts", &self.statement_contexts)
            .finish()
    }
}

fn read_count(input: &mut TaggedReader<'_, Record>, what: &'static str) -> CodecResult<usize> {
    let count = input.read_int()?;
    if !(0..=MAX_CONTEXTS as i32).contains(&count) {
        return Err(CodecError::InvalidLength {
            what,
            length: count as i64,
        });
    }
    Ok(count as usize)
}

impl TaggedRecord<Record> for ContextStore {
    const TYPE_NAME: &'static str = "ContextStore";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_u32(self.next_index)?;
        out.write_int(self.method_contexts.len() as i32)?;
        for ctx in &self.method_contexts {
            out.write_record(ctx)?;
        }
        out.write_int(self.statement_contexts.len() as i32)?;
        for ctx in &self.statement_contexts {
            out.write_record(ctx)?;
        }
        Ok(())
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        let next_index = input.read_u32()?;
        let mut store = ContextStore::new();
        store.next_index = next_index;

        let methods = read_count(input, "method contexts")?;
        for _ in 0..methods {
            let ctx = input.read_required::<MethodRegexpContext>()?;
            if is_reserved_name(ctx.name()) {
                continue;
            }
            store.method_contexts.push(ctx);
        }
        let statements = read_count(input, "statement contexts")?;
        for _ in 0..statements {
            store
                .statement_contexts
                .push(input.read_required::<StatementRegexpContext>()?);
        }
        Ok(store)
    }

    fn into_record(self) -> Record {
        Record::ContextStore(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::ContextStore(v) => Ok(v),
            other => Err(other),
        }
    }
}
