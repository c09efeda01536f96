//! Tag registry
//!
//! Maps structural type names to wire tags and tags to reader functions.
//! Registries are built once (usually in a `Lazy` static) and are read-only
//! afterwards, so lookups need no locking.

use std::collections::HashMap;
use std::fmt;

use crate::error::{CodecError, CodecResult};
use crate::reader::TaggedReader;
use crate::record::{read_as, TaggedRecord};
use crate::tags;

/// Deserializer for one registered tag.
pub type ReaderFn<R> = fn(&mut TaggedReader<'_, R>) -> CodecResult<R>;

struct Entry<R> {
    type_name: &'static str,
    reader: ReaderFn<R>,
}

/// Bidirectional table of structural types and their tags.
pub struct TagRegistry<R> {
    tags_by_type: HashMap<&'static str, u8>,
    entries: HashMap<u8, Entry<R>>,
}

impl<R> TagRegistry<R> {
    /// Create an empty registry.
    pub fn new() -> Self {
        TagRegistry {
            tags_by_type: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    /// Register `type_name` under `tag`.
    ///
    /// # Errors
    ///
    /// - [`CodecError::TagOutOfRange`] if `tag` is outside `[9, 127]`
    /// - [`CodecError::DuplicateTag`] if another type already owns `tag`
    /// - [`CodecError::DuplicateType`] if `type_name` is already registered
    pub fn register_tag(
        mut self,
        type_name: &'static str,
        tag: i32,
        reader: ReaderFn<R>,
    ) -> CodecResult<Self> {
        if !tags::is_structural(tag) {
            return Err(CodecError::TagOutOfRange { type_name, tag });
        }
        let tag = tag as u8;
        if let Some(existing) = self.entries.get(&tag) {
            return Err(CodecError::DuplicateTag {
                tag,
                existing: existing.type_name,
                requested: type_name,
            });
        }
        if self.tags_by_type.contains_key(type_name) {
            return Err(CodecError::DuplicateType { type_name });
        }
        self.tags_by_type.insert(type_name, tag);
        self.entries.insert(tag, Entry { type_name, reader });
        Ok(self)
    }

    /// Register `T` under `tag` using its [`TaggedRecord`] implementation.
    pub fn register<T: TaggedRecord<R>>(self, tag: i32) -> CodecResult<Self> {
        self.register_tag(T::TYPE_NAME, tag, read_as::<R, T>)
    }

    /// Tag registered for `type_name`.
    ///
    /// # Errors
    ///
    /// [`CodecError::UnregisteredType`] if the type was never registered.
    pub fn tag_for(&self, type_name: &'static str) -> CodecResult<u8> {
        self.tags_by_type
            .get(type_name)
            .copied()
            .ok_or(CodecError::UnregisteredType { type_name })
    }

    /// Type name registered for `tag`, if any.
    pub fn type_name_for(&self, tag: u8) -> Option<&'static str> {
        self.entries.get(&tag).map(|e| e.type_name)
    }

    /// Returns `true` if a reader is registered for `tag`.
    pub fn has_reader(&self, tag: u8) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Run the reader registered for `tag`.
    ///
    /// # Errors
    ///
    /// [`CodecError::UnknownTag`] if no reader is registered, or whatever the
    /// reader itself returns.
    pub fn invoke_reader_for(&self, tag: u8, input: &mut TaggedReader<'_, R>) -> CodecResult<R> {
        let entry = self
            .entries
            .get(&tag)
            .ok_or(CodecError::UnknownTag { tag })?;
        (entry.reader)(input)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<R> Default for TagRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for TagRegistry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self
            .entries
            .iter()
            .map(|(tag, e)| (*tag, e.type_name))
            .collect();
        tags.sort_unstable();
        f.debug_struct("TagRegistry").field("tags", &tags).finish()
    }
}
