//! Tagged writer

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use tracing::trace;

use crate::error::{CodecError, CodecResult};
use crate::reader::MAX_STRING_LEN;
use crate::record::TaggedRecord;
use crate::registry::TagRegistry;
use crate::tags::{self, TAG_DEBUG};

/// Writes tagged values to an underlying byte sink.
///
/// Every value is preceded by its tag. Structural values are looked up in the
/// registry given at construction; writing an unregistered type fails with
/// [`CodecError::UnregisteredType`] before any byte of it is emitted.
pub struct TaggedWriter<'a, R> {
    out: &'a mut dyn Write,
    tags: &'a TagRegistry<R>,
    written: u64,
}

impl<'a, R> TaggedWriter<'a, R> {
    /// Wrap `out`, resolving structural tags through `tags`.
    pub fn new(out: &'a mut dyn Write, tags: &'a TagRegistry<R>) -> Self {
        TaggedWriter {
            out,
            tags,
            written: 0,
        }
    }

    /// Registry used for structural tags.
    pub fn registry(&self) -> &'a TagRegistry<R> {
        self.tags
    }

    /// Number of bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    fn tag(&mut self, tag: u8) -> CodecResult<()> {
        if *TAG_DEBUG {
            match tags::primitive_name(tag) {
                Some(name) => trace!(target: "tally::codec", tag, kind = name, "write tag"),
                None => trace!(
                    target: "tally::codec",
                    tag,
                    kind = self.tags.type_name_for(tag).unwrap_or("?"),
                    "write tag"
                ),
            }
        }
        self.out.write_u8(tag)?;
        self.written += 1;
        Ok(())
    }

    fn nullity(&mut self, is_null: bool) -> CodecResult<()> {
        self.out.write_u8(is_null as u8)?;
        self.written += 1;
        Ok(())
    }

    /// Write a boolean.
    pub fn write_bool(&mut self, v: bool) -> CodecResult<()> {
        self.tag(tags::BOOLEAN)?;
        self.out.write_u8(v as u8)?;
        self.written += 1;
        Ok(())
    }

    /// Write a signed byte.
    pub fn write_byte(&mut self, v: i8) -> CodecResult<()> {
        self.tag(tags::BYTE)?;
        self.out.write_i8(v)?;
        self.written += 1;
        Ok(())
    }

    /// Write a 16-bit integer.
    pub fn write_short(&mut self, v: i16) -> CodecResult<()> {
        self.tag(tags::SHORT)?;
        self.out.write_i16::<BigEndian>(v)?;
        self.written += 2;
        Ok(())
    }

    /// Write a character as its 32-bit scalar value.
    pub fn write_char(&mut self, v: char) -> CodecResult<()> {
        self.tag(tags::CHAR)?;
        self.out.write_u32::<BigEndian>(v as u32)?;
        self.written += 4;
        Ok(())
    }

    /// Write a 32-bit integer.
    pub fn write_int(&mut self, v: i32) -> CodecResult<()> {
        self.tag(tags::INT)?;
        self.out.write_i32::<BigEndian>(v)?;
        self.written += 4;
        Ok(())
    }

    /// Write an unsigned 32-bit value under the int tag.
    pub fn write_u32(&mut self, v: u32) -> CodecResult<()> {
        self.write_int(v as i32)
    }

    /// Write a 64-bit integer.
    pub fn write_long(&mut self, v: i64) -> CodecResult<()> {
        self.tag(tags::LONG)?;
        self.out.write_i64::<BigEndian>(v)?;
        self.written += 8;
        Ok(())
    }

    /// Write an unsigned 64-bit value under the long tag.
    pub fn write_u64(&mut self, v: u64) -> CodecResult<()> {
        self.write_long(v as i64)
    }

    /// Write a single precision float.
    pub fn write_float(&mut self, v: f32) -> CodecResult<()> {
        self.tag(tags::FLOAT)?;
        self.out.write_f32::<BigEndian>(v)?;
        self.written += 4;
        Ok(())
    }

    /// Write a double precision float.
    pub fn write_double(&mut self, v: f64) -> CodecResult<()> {
        self.tag(tags::DOUBLE)?;
        self.out.write_f64::<BigEndian>(v)?;
        self.written += 8;
        Ok(())
    }

    /// Write a nullable string: tag, nullity, then u32 byte length and UTF-8.
    ///
    /// Strings longer than [`MAX_STRING_LEN`] bytes are refused before any
    /// byte is written, since no reader would accept them.
    pub fn write_utf(&mut self, v: Option<&str>) -> CodecResult<()> {
        let len = match v {
            Some(s) => Some(
                u32::try_from(s.len())
                    .ok()
                    .filter(|len| *len <= MAX_STRING_LEN)
                    .ok_or(CodecError::InvalidLength {
                        what: "string",
                        length: s.len() as i64,
                    })?,
            ),
            None => None,
        };
        self.tag(tags::STRING)?;
        self.nullity(v.is_none())?;
        if let (Some(s), Some(len)) = (v, len) {
            self.out.write_u32::<BigEndian>(len)?;
            self.out.write_all(s.as_bytes())?;
            self.written += 4 + s.len() as u64;
        }
        Ok(())
    }

    /// Write a non-null string.
    pub fn write_str(&mut self, v: &str) -> CodecResult<()> {
        self.write_utf(Some(v))
    }

    /// Write a nullable structural value.
    pub fn write<T: TaggedRecord<R>>(&mut self, v: Option<&T>) -> CodecResult<()> {
        let tag = self.tags.tag_for(T::TYPE_NAME)?;
        self.tag(tag)?;
        self.nullity(v.is_none())?;
        match v {
            Some(v) => v.write_body(self),
            None => Ok(()),
        }
    }

    /// Write a non-null structural value.
    pub fn write_record<T: TaggedRecord<R>>(&mut self, v: &T) -> CodecResult<()> {
        self.write(Some(v))
    }

    /// Write a count-prefixed list of structural values.
    pub fn write_list<T: TaggedRecord<R>>(&mut self, items: &[T]) -> CodecResult<()> {
        // Fail on an unregistered type even for an empty list.
        self.tags.tag_for(T::TYPE_NAME)?;
        let count = i32::try_from(items.len()).map_err(|_| CodecError::InvalidLength {
            what: "list",
            length: items.len() as i64,
        })?;
        self.write_int(count)?;
        for item in items {
            self.write(Some(item))?;
        }
        Ok(())
    }
}
