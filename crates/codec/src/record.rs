//! Structural record trait
//!
//! A structural type `T` lives inside a closed sum type `R` (one variant per
//! record kind). The tag registry stores one [`ReaderFn`](crate::ReaderFn) per
//! tag that builds the right variant of `R`; [`TaggedRecord::from_record`]
//! narrows it back to `T`.

use crate::error::CodecResult;
use crate::reader::TaggedReader;
use crate::writer::TaggedWriter;

/// A value that writes itself through a [`TaggedWriter`] and is rebuilt from a
/// [`TaggedReader`] once its tag has been resolved.
pub trait TaggedRecord<R>: Sized {
    /// Stable name used as the registry key.
    const TYPE_NAME: &'static str;

    /// Write the body (without tag and nullity marker).
    fn write_body(&self, out: &mut TaggedWriter<'_, R>) -> CodecResult<()>;

    /// Read the body (tag and nullity marker already consumed).
    fn read_body(input: &mut TaggedReader<'_, R>) -> CodecResult<Self>;

    /// Wrap into the record sum type.
    fn into_record(self) -> R;

    /// Narrow the record sum type, returning it unchanged if it is another kind.
    fn from_record(record: R) -> Result<Self, R>;
}

/// Reader function for `T`, suitable for [`TagRegistry::register_tag`](crate::TagRegistry::register_tag).
pub fn read_as<R, T: TaggedRecord<R>>(input: &mut TaggedReader<'_, R>) -> CodecResult<R> {
    T::read_body(input).map(T::into_record)
}
