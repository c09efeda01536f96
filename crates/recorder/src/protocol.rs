//! Recording protocol messages and framing
//!
//! Messages are tagged records with their own tag table, so a collector can
//! dispatch on the tag and reject kinds it does not know.
//!
//! # Frame Format
//!
//! ```text
//! magic("TLRP", 4) + version(2) + length(4) + payload(length) + crc32(4)
//! ```
//!
//! A listener sends one [`Envelope`] per frame; the service answers each with
//! an [`Ack`] frame carrying the envelope's sequence number.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use once_cell::sync::Lazy;
use tally_codec::tags::NEXT_TAG;
use tally_codec::{
    CodecError, CodecResult, TagRegistry, TaggedReader, TaggedRecord, TaggedWriter,
};

use crate::error::{RecorderError, RecorderResult};

/// Frame magic
pub const FRAME_MAGIC: &[u8; 4] = b"TLRP";
/// Protocol version
pub const PROTOCOL_VERSION: u16 = 2;
/// Largest accepted frame payload
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Tag of [`MethodStart`]
pub const METHOD_START_TAG: i32 = NEXT_TAG;
/// Tag of [`MethodEnd`]
pub const METHOD_END_TAG: i32 = NEXT_TAG + 1;
/// Tag of [`Flush`]
pub const FLUSH_TAG: i32 = NEXT_TAG + 2;
/// Tag of [`ErrorInfo`]
pub const ERROR_INFO_TAG: i32 = NEXT_TAG + 3;
/// Tag of [`Envelope`]
pub const ENVELOPE_TAG: i32 = NEXT_TAG + 4;
/// Tag of [`Ack`]
pub const ACK_TAG: i32 = NEXT_TAG + 5;

/// Every record kind that can travel on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolRecord {
    /// Slice start
    MethodStart(MethodStart),
    /// Slice end
    MethodEnd(MethodEnd),
    /// Hit deltas
    Flush(Flush),
    /// Failure details
    ErrorInfo(ErrorInfo),
    /// Sequenced message from a recorder
    Envelope(Envelope),
    /// Receipt for an envelope
    Ack(Ack),
}

impl ProtocolRecord {
    /// Registered type name of the record.
    pub fn type_name(&self) -> &'static str {
        match self {
            ProtocolRecord::MethodStart(_) => "MethodStart",
            ProtocolRecord::MethodEnd(_) => "MethodEnd",
            ProtocolRecord::Flush(_) => "Flush",
            ProtocolRecord::ErrorInfo(_) => "ErrorInfo",
            ProtocolRecord::Envelope(_) => "Envelope",
            ProtocolRecord::Ack(_) => "Ack",
        }
    }
}

/// Build the protocol tag table.
pub fn protocol_tags() -> CodecResult<TagRegistry<ProtocolRecord>> {
    TagRegistry::new()
        .register::<MethodStart>(METHOD_START_TAG)?
        .register::<MethodEnd>(METHOD_END_TAG)?
        .register::<Flush>(FLUSH_TAG)?
        .register::<ErrorInfo>(ERROR_INFO_TAG)?
        .register::<Envelope>(ENVELOPE_TAG)?
        .register::<Ack>(ACK_TAG)
}

/// Process-wide protocol tag table.
pub static PROTOCOL_TAGS: Lazy<TagRegistry<ProtocolRecord>> =
    Lazy::new(|| protocol_tags().expect("protocol tag table is consistent"));

type Writer<'a> = TaggedWriter<'a, ProtocolRecord>;
type Reader<'a> = TaggedReader<'a, ProtocolRecord>;

macro_rules! protocol_record {
    ($ty:ident, $name:literal) => {
        impl TaggedRecord<ProtocolRecord> for $ty {
            const TYPE_NAME: &'static str = $name;

            fn write_body(&self, out: &mut Writer<'_>) -> CodecResult<()> {
                self.write_fields(out)
            }

            fn read_body(input: &mut Reader<'_>) -> CodecResult<Self> {
                Self::read_fields(input)
            }

            fn into_record(self) -> ProtocolRecord {
                ProtocolRecord::$ty(self)
            }

            fn from_record(record: ProtocolRecord) -> Result<Self, ProtocolRecord> {
                match record {
                    ProtocolRecord::$ty(v) => Ok(v),
                    other => Err(other),
                }
            }
        }
    };
}

/// `METHOD_START`: opens a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodStart {
    /// Recorder type tag
    pub type_name: String,
    /// Slice number
    pub slice: u32,
    /// Slice start (ms since epoch)
    pub start_ts: i64,
}

impl MethodStart {
    fn write_fields(&self, out: &mut Writer<'_>) -> CodecResult<()> {
        out.write_str(&self.type_name)?;
        out.write_u32(self.slice)?;
        out.write_long(self.start_ts)
    }

    fn read_fields(input: &mut Reader<'_>) -> CodecResult<Self> {
        Ok(MethodStart {
            type_name: input.read_str()?,
            slice: input.read_u32()?,
            start_ts: input.read_long()?,
        })
    }
}

protocol_record!(MethodStart, "MethodStart");

/// Why a slice ended abnormally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Failure message
    pub message: Option<String>,
    /// Captured stack trace
    pub stack_trace: Option<String>,
}

impl ErrorInfo {
    fn write_fields(&self, out: &mut Writer<'_>) -> CodecResult<()> {
        out.write_utf(self.message.as_deref())?;
        out.write_utf(self.stack_trace.as_deref())
    }

    fn read_fields(input: &mut Reader<'_>) -> CodecResult<Self> {
        Ok(ErrorInfo {
            message: input.read_utf()?,
            stack_trace: input.read_utf()?,
        })
    }
}

protocol_record!(ErrorInfo, "ErrorInfo");

/// `METHOD_END`: closes a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodEnd {
    /// Recorder type tag
    pub type_name: String,
    /// Method the slice covered
    pub method: String,
    /// Runtime test name, if the method was a test
    pub test_name: Option<String>,
    /// Slice number
    pub slice: u32,
    /// Slice end (ms since epoch)
    pub end_ts: i64,
    /// Events recorded during the slice
    pub event_count: u32,
    /// Failure details
    pub error: Option<ErrorInfo>,
}

impl MethodEnd {
    fn write_fields(&self, out: &mut Writer<'_>) -> CodecResult<()> {
        out.write_str(&self.type_name)?;
        out.write_str(&self.method)?;
        out.write_utf(self.test_name.as_deref())?;
        out.write_u32(self.slice)?;
        out.write_long(self.end_ts)?;
        out.write_u32(self.event_count)?;
        out.write(self.error.as_ref())
    }

    fn read_fields(input: &mut Reader<'_>) -> CodecResult<Self> {
        Ok(MethodEnd {
            type_name: input.read_str()?,
            method: input.read_str()?,
            test_name: input.read_utf()?,
            slice: input.read_u32()?,
            end_ts: input.read_long()?,
            event_count: input.read_u32()?,
            error: input.read::<ErrorInfo>()?,
        })
    }
}

protocol_record!(MethodEnd, "MethodEnd");

/// `FLUSH`: per-slot hit deltas since the previous flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flush {
    /// `(slot, delta)` pairs, zero deltas omitted
    pub hits: Vec<(u32, u32)>,
}

impl Flush {
    /// Sparse flush from dense counts.
    pub fn from_counts(counts: &[u32]) -> Self {
        Flush {
            hits: counts
                .iter()
                .enumerate()
                .filter(|(_, n)| **n > 0)
                .map(|(slot, n)| (slot as u32, *n))
                .collect(),
        }
    }

    /// Sum of all deltas.
    pub fn total(&self) -> u64 {
        self.hits.iter().map(|(_, n)| *n as u64).sum()
    }

    fn write_fields(&self, out: &mut Writer<'_>) -> CodecResult<()> {
        out.write_u32(self.hits.len() as u32)?;
        for (slot, n) in &self.hits {
            out.write_u32(*slot)?;
            out.write_u32(*n)?;
        }
        Ok(())
    }

    fn read_fields(input: &mut Reader<'_>) -> CodecResult<Self> {
        let count = input.read_u32()?;
        let mut hits = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            hits.push((input.read_u32()?, input.read_u32()?));
        }
        Ok(Flush { hits })
    }
}

protocol_record!(Flush, "Flush");

/// Message a recorder sends to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderMessage {
    /// Slice start
    MethodStart(MethodStart),
    /// Slice end
    MethodEnd(MethodEnd),
    /// Hit deltas
    Flush(Flush),
}

impl RecorderMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RecorderMessage::MethodStart(_) => "METHOD_START",
            RecorderMessage::MethodEnd(_) => "METHOD_END",
            RecorderMessage::Flush(_) => "FLUSH",
        }
    }
}

/// A message with the identity and sequence number of its recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Recorder identity
    pub recorder_id: String,
    /// Listener incarnation. A recorder restarted under the same id sends a
    /// new epoch and numbers its messages from 1 again.
    pub epoch: u64,
    /// Sequence number within the epoch, starting at 1
    pub sequence: u64,
    /// Payload
    pub message: RecorderMessage,
}

impl Envelope {
    fn write_fields(&self, out: &mut Writer<'_>) -> CodecResult<()> {
        out.write_str(&self.recorder_id)?;
        out.write_u64(self.epoch)?;
        out.write_u64(self.sequence)?;
        match &self.message {
            RecorderMessage::MethodStart(m) => out.write_record(m),
            RecorderMessage::MethodEnd(m) => out.write_record(m),
            RecorderMessage::Flush(m) => out.write_record(m),
        }
    }

    fn read_fields(input: &mut Reader<'_>) -> CodecResult<Self> {
        let recorder_id = input.read_str()?;
        let epoch = input.read_u64()?;
        let sequence = input.read_u64()?;
        let message = match input.read_any()? {
            Some(ProtocolRecord::MethodStart(m)) => RecorderMessage::MethodStart(m),
            Some(ProtocolRecord::MethodEnd(m)) => RecorderMessage::MethodEnd(m),
            Some(ProtocolRecord::Flush(m)) => RecorderMessage::Flush(m),
            Some(other) => {
                return Err(CodecError::InvalidValue(format!(
                    "envelope cannot carry {}",
                    other.type_name()
                )))
            }
            None => {
                return Err(CodecError::UnexpectedNull {
                    type_name: "RecorderMessage",
                })
            }
        };
        Ok(Envelope {
            recorder_id,
            epoch,
            sequence,
            message,
        })
    }
}

protocol_record!(Envelope, "Envelope");

/// Receipt for the envelope with `sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Sequence number acknowledged
    pub sequence: u64,
}

impl Ack {
    fn write_fields(&self, out: &mut Writer<'_>) -> CodecResult<()> {
        out.write_u64(self.sequence)
    }

    fn read_fields(input: &mut Reader<'_>) -> CodecResult<Self> {
        Ok(Ack {
            sequence: input.read_u64()?,
        })
    }
}

protocol_record!(Ack, "Ack");

/// Encode a record as a frame payload.
pub fn encode_payload<T: TaggedRecord<ProtocolRecord>>(record: &T) -> RecorderResult<Vec<u8>> {
    let mut buf = Vec::new();
    TaggedWriter::new(&mut buf, &PROTOCOL_TAGS).write_record(record)?;
    Ok(buf)
}

/// Decode a frame payload as a `T`.
pub fn decode_payload<T: TaggedRecord<ProtocolRecord>>(payload: &[u8]) -> RecorderResult<T> {
    let mut input = payload;
    let record = TaggedReader::new(&mut input, &PROTOCOL_TAGS).read_required::<T>()?;
    if !input.is_empty() {
        return Err(RecorderError::Codec(CodecError::InvalidValue(format!(
            "{} trailing bytes after {}",
            input.len(),
            T::TYPE_NAME
        ))));
    }
    Ok(record)
}

/// Write one frame around `payload`.
pub fn write_frame<W: Write + ?Sized>(out: &mut W, payload: &[u8]) -> RecorderResult<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|l| *l <= MAX_FRAME_LEN)
        .ok_or(RecorderError::FrameTooLarge(u32::MAX))?;
    let mut frame = Vec::with_capacity(payload.len() + 14);
    frame.extend_from_slice(FRAME_MAGIC);
    frame.write_u16::<BigEndian>(PROTOCOL_VERSION)?;
    frame.write_u32::<BigEndian>(len)?;
    frame.extend_from_slice(payload);
    frame.write_u32::<BigEndian>(crc32fast::hash(payload))?;
    out.write_all(&frame)?;
    out.flush()?;
    Ok(())
}

/// Read one frame and return its verified payload.
pub fn read_frame<R: Read + ?Sized>(input: &mut R) -> RecorderResult<Vec<u8>> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic)?;
    if &magic != FRAME_MAGIC {
        return Err(RecorderError::BadMagic(magic));
    }
    let version = input.read_u16::<BigEndian>()?;
    if version != PROTOCOL_VERSION {
        return Err(RecorderError::UnsupportedVersion {
            expected: PROTOCOL_VERSION,
            actual: version,
        });
    }
    let len = input.read_u32::<BigEndian>()?;
    if len > MAX_FRAME_LEN {
        return Err(RecorderError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    input.read_exact(&mut payload)?;
    let expected = input.read_u32::<BigEndian>()?;
    let computed = crc32fast::hash(&payload);
    if expected != computed {
        return Err(RecorderError::ChecksumMismatch { expected, computed });
    }
    Ok(payload)
}
