//! Immutable context bitset
//!
//! Every operation returns a new set; a `ContextSet` attached to shared
//! structural metadata is never mutated in place.

use std::collections::HashMap;
use std::fmt;

use tally_codec::{CodecError, CodecResult, TaggedReader, TaggedRecord, TaggedWriter};

use crate::bitmap::Bitmap;
use crate::record::Record;

/// Upper bound on serialized words (65536 contexts).
const MAX_WORDS: i32 = 1024;

/// Set of context indices applying to one code element.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ContextSet {
    bits: Bitmap,
}

/// Old index to new index translation produced by a context store merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextMapping {
    map: HashMap<u32, u32>,
}

impl ContextMapping {
    /// Empty mapping (every bit is dropped by `remap`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `from` to `to`.
    pub fn insert(&mut self, from: u32, to: u32) {
        self.map.insert(from, to);
    }

    /// Target of `from`, if mapped.
    pub fn get(&self, from: u32) -> Option<u32> {
        self.map.get(&from).copied()
    }

    /// Number of mapped indices.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl ContextSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty set sized for `nbits` contexts.
    pub fn with_capacity(nbits: usize) -> Self {
        ContextSet {
            bits: Bitmap::with_capacity(nbits),
        }
    }

    /// Set containing exactly `indices`.
    pub fn of(indices: &[u32]) -> Self {
        ContextSet {
            bits: indices.iter().map(|i| *i as usize).collect(),
        }
    }

    /// Set built from raw words.
    pub fn from_words(words: Vec<u64>) -> Self {
        ContextSet {
            bits: Bitmap::from_words(words),
        }
    }

    /// Raw words.
    pub fn words(&self) -> &[u64] {
        self.bits.words()
    }

    /// Returns `true` if `index` is set.
    pub fn get(&self, index: u32) -> bool {
        self.bits.contains(index as usize)
    }

    /// Copy of this set with `index` set.
    #[must_use]
    pub fn set(&self, index: u32) -> Self {
        let mut bits = self.bits.clone();
        bits.insert(index as usize);
        ContextSet { bits }
    }

    /// Copy of this set with `index` cleared.
    #[must_use]
    pub fn clear(&self, index: u32) -> Self {
        let mut bits = self.bits.clone();
        bits.remove(index as usize);
        ContextSet { bits }
    }

    /// Intersection.
    #[must_use]
    pub fn and(&self, other: &ContextSet) -> Self {
        let mut bits = self.bits.clone();
        bits.intersect_with(&other.bits);
        ContextSet { bits }
    }

    /// Union.
    #[must_use]
    pub fn or(&self, other: &ContextSet) -> Self {
        let mut bits = self.bits.clone();
        bits.union_with(&other.bits);
        ContextSet { bits }
    }

    /// Copy of this set with every bit in `[start, end)` toggled.
    #[must_use]
    pub fn flip(&self, start: u32, end: u32) -> Self {
        let mut bits = self.bits.clone();
        bits.toggle_range(start as usize, end as usize);
        ContextSet { bits }
    }

    /// Returns `true` if the sets share any index.
    pub fn intersects(&self, other: &ContextSet) -> bool {
        self.bits.intersects(&other.bits)
    }

    /// First set index at or after `from`.
    pub fn next_set_bit(&self, from: u32) -> Option<u32> {
        self.bits.next_set_bit(from as usize).map(|i| i as u32)
    }

    /// Set indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits.iter().map(|i| i as u32)
    }

    /// Returns `true` if no index is set.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Translate every set index through `mapping`. Unmapped indices are dropped.
    #[must_use]
    pub fn remap(&self, mapping: &ContextMapping) -> Self {
        ContextSet {
            bits: self
                .indices()
                .filter_map(|i| mapping.get(i))
                .map(|i| i as usize)
                .collect(),
        }
    }
}

impl fmt::Debug for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextSet")?;
        f.debug_set().entries(self.indices()).finish()
    }
}

impl TaggedRecord<Record> for ContextSet {
    const TYPE_NAME: &'static str = "ContextSet";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        let words = self.bits.words();
        out.write_int(words.len() as i32)?;
        for w in words {
            out.write_u64(*w)?;
        }
        Ok(())
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        let count = input.read_int()?;
        if !(0..=MAX_WORDS).contains(&count) {
            return Err(CodecError::InvalidLength {
                what: "context set",
                length: count as i64,
            });
        }
        let mut words = Vec::with_capacity(count as usize);
        for _ in 0..count {
            words.push(input.read_u64()?);
        }
        Ok(ContextSet::from_words(words))
    }

    fn into_record(self) -> Record {
        Record::ContextSet(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::ContextSet(v) => Ok(v),
            other => Err(other),
        }
    }
}
