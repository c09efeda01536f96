//! Tagged reader

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};
use tracing::trace;

use crate::error::{CodecError, CodecResult};
use crate::record::TaggedRecord;
use crate::registry::TagRegistry;
use crate::tags::{self, TAG_DEBUG};

/// Longest string accepted on read (16 MiB).
pub const MAX_STRING_LEN: u32 = 16 * 1024 * 1024;

/// Reads tagged values written by a [`TaggedWriter`](crate::TaggedWriter).
///
/// Every read checks the tag first. A tag that differs from the expected one
/// fails with [`CodecError::WrongTag`]; a tag that no reader is registered for
/// fails with [`CodecError::UnknownTag`]. No recovery is attempted.
pub struct TaggedReader<'a, R> {
    input: &'a mut dyn Read,
    tags: &'a TagRegistry<R>,
}

impl<'a, R> TaggedReader<'a, R> {
    /// Wrap `input`, resolving structural tags through `tags`.
    pub fn new(input: &'a mut dyn Read, tags: &'a TagRegistry<R>) -> Self {
        TaggedReader { input, tags }
    }

    /// Registry used for structural tags.
    pub fn registry(&self) -> &'a TagRegistry<R> {
        self.tags
    }

    fn raw_tag(&mut self) -> CodecResult<u8> {
        let tag = self
            .input
            .read_u8()
            .map_err(|e| CodecError::from_io(e, "tag"))?;
        if *TAG_DEBUG {
            let kind = tags::primitive_name(tag)
                .or_else(|| self.tags.type_name_for(tag))
                .unwrap_or("?");
            trace!(target: "tally::codec", tag, kind, "read tag");
        }
        Ok(tag)
    }

    fn expect_tag(&mut self, expected: u8) -> CodecResult<()> {
        let actual = self.raw_tag()?;
        if actual != expected {
            return Err(CodecError::WrongTag { expected, actual });
        }
        Ok(())
    }

    fn nullity(&mut self) -> CodecResult<bool> {
        match self
            .input
            .read_u8()
            .map_err(|e| CodecError::from_io(e, "nullity marker"))?
        {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidValue(format!(
                "nullity marker must be 0 or 1, found {}",
                other
            ))),
        }
    }

    /// Read a boolean.
    pub fn read_bool(&mut self) -> CodecResult<bool> {
        self.expect_tag(tags::BOOLEAN)?;
        match self
            .input
            .read_u8()
            .map_err(|e| CodecError::from_io(e, "boolean"))?
        {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidValue(format!(
                "boolean must be 0 or 1, found {}",
                other
            ))),
        }
    }

    /// Read a signed byte.
    pub fn read_byte(&mut self) -> CodecResult<i8> {
        self.expect_tag(tags::BYTE)?;
        self.input
            .read_i8()
            .map_err(|e| CodecError::from_io(e, "byte"))
    }

    /// Read a 16-bit integer.
    pub fn read_short(&mut self) -> CodecResult<i16> {
        self.expect_tag(tags::SHORT)?;
        self.input
            .read_i16::<BigEndian>()
            .map_err(|e| CodecError::from_io(e, "short"))
    }

    /// Read a character.
    pub fn read_char(&mut self) -> CodecResult<char> {
        self.expect_tag(tags::CHAR)?;
        let v = self
            .input
            .read_u32::<BigEndian>()
            .map_err(|e| CodecError::from_io(e, "char"))?;
        char::from_u32(v)
            .ok_or_else(|| CodecError::InvalidValue(format!("invalid char scalar {:#x}", v)))
    }

    /// Read a 32-bit integer.
    pub fn read_int(&mut self) -> CodecResult<i32> {
        self.expect_tag(tags::INT)?;
        self.input
            .read_i32::<BigEndian>()
            .map_err(|e| CodecError::from_io(e, "int"))
    }

    /// Read an unsigned 32-bit value written with `write_u32`.
    pub fn read_u32(&mut self) -> CodecResult<u32> {
        self.read_int().map(|v| v as u32)
    }

    /// Read a 64-bit integer.
    pub fn read_long(&mut self) -> CodecResult<i64> {
        self.expect_tag(tags::LONG)?;
        self.input
            .read_i64::<BigEndian>()
            .map_err(|e| CodecError::from_io(e, "long"))
    }

    /// Read an unsigned 64-bit value written with `write_u64`.
    pub fn read_u64(&mut self) -> CodecResult<u64> {
        self.read_long().map(|v| v as u64)
    }

    /// Read a single precision float.
    pub fn read_float(&mut self) -> CodecResult<f32> {
        self.expect_tag(tags::FLOAT)?;
        self.input
            .read_f32::<BigEndian>()
            .map_err(|e| CodecError::from_io(e, "float"))
    }

    /// Read a double precision float.
    pub fn read_double(&mut self) -> CodecResult<f64> {
        self.expect_tag(tags::DOUBLE)?;
        self.input
            .read_f64::<BigEndian>()
            .map_err(|e| CodecError::from_io(e, "double"))
    }

    /// Read a nullable string.
    pub fn read_utf(&mut self) -> CodecResult<Option<String>> {
        self.expect_tag(tags::STRING)?;
        if self.nullity()? {
            return Ok(None);
        }
        let len = self
            .input
            .read_u32::<BigEndian>()
            .map_err(|e| CodecError::from_io(e, "string length"))?;
        if len > MAX_STRING_LEN {
            return Err(CodecError::InvalidLength {
                what: "string",
                length: len as i64,
            });
        }
        let mut buf = vec![0u8; len as usize];
        self.input
            .read_exact(&mut buf)
            .map_err(|e| CodecError::from_io(e, "string"))?;
        String::from_utf8(buf)
            .map(Some)
            .map_err(|e| CodecError::InvalidValue(format!("string is not UTF-8: {}", e)))
    }

    /// Read a string that must not be null.
    pub fn read_str(&mut self) -> CodecResult<String> {
        self.read_utf()?
            .ok_or(CodecError::UnexpectedNull { type_name: "string" })
    }

    /// Read a nullable structural value of type `T`.
    pub fn read<T: TaggedRecord<R>>(&mut self) -> CodecResult<Option<T>> {
        let expected = self.tags.tag_for(T::TYPE_NAME)?;
        let actual = self.raw_tag()?;
        if actual != expected {
            if tags::primitive_name(actual).is_none() && !self.tags.has_reader(actual) {
                return Err(CodecError::UnknownTag { tag: actual });
            }
            return Err(CodecError::WrongTag { expected, actual });
        }
        if self.nullity()? {
            return Ok(None);
        }
        let tags = self.tags;
        let record = tags.invoke_reader_for(actual, self)?;
        T::from_record(record).map(Some).map_err(|_| {
            CodecError::InvalidValue(format!(
                "reader for tag {} did not produce {}",
                actual,
                T::TYPE_NAME
            ))
        })
    }

    /// Read a structural value that must not be null.
    pub fn read_required<T: TaggedRecord<R>>(&mut self) -> CodecResult<T> {
        self.read::<T>()?.ok_or(CodecError::UnexpectedNull {
            type_name: T::TYPE_NAME,
        })
    }

    /// Read whichever structural value comes next, dispatching on its tag.
    pub fn read_any(&mut self) -> CodecResult<Option<R>> {
        let tag = self.raw_tag()?;
        if !self.tags.has_reader(tag) {
            return Err(CodecError::UnknownTag { tag });
        }
        if self.nullity()? {
            return Ok(None);
        }
        let tags = self.tags;
        tags.invoke_reader_for(tag, self).map(Some)
    }

    /// Read a count-prefixed list of non-null structural values.
    pub fn read_list<T: TaggedRecord<R>>(&mut self) -> CodecResult<Vec<T>> {
        let count = self.read_int()?;
        if count < 0 {
            return Err(CodecError::InvalidLength {
                what: "list",
                length: count as i64,
            });
        }
        let mut items = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            items.push(self.read_required::<T>()?);
        }
        Ok(items)
    }
}
