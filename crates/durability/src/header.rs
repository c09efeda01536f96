//! Registry file header.
//!
//! # Binary Format (308 bytes, big-endian)
//!
//! ```text
//! magic(8) + format_version(4)
//! + access_mode(4) + version(8) + slot_count(4)
//! + coverage_location(8) + last_session_location(8) + name(64 x 4)
//! + checksum(8)
//! ```
//!
//! The checksum is the CRC32 of every byte from `access_mode` through `name`,
//! widened to 8 bytes. Magic and format version are checked first and on
//! their own so that a foreign file, an incompatible file and a damaged file
//! are reported differently.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{RegistryError, RegistryResult};

/// Identifies a registry file.
pub const REGISTRY_MAGIC: u64 = 0xCAFE_FEED;

/// Layout version understood by this build.
pub const REGISTRY_FORMAT_VERSION: u32 = 40502;

/// Fixed width of the name field, in characters.
pub const NAME_LENGTH: usize = 64;

/// Total serialized size.
pub const HEADER_SIZE: usize = 8 + 4 + 4 + 8 + 4 + 8 + 8 + NAME_LENGTH * 4 + 8;

/// Offset of the first checksum-covered byte.
pub const CHECKSUM_START: usize = 12;

/// Offset of the checksum field.
pub const CHECKSUM_OFFSET: usize = HEADER_SIZE - 8;

/// `coverage_location` value when no coverage segment exists.
pub const NO_COVERAGE: i64 = -1;

/// Lifecycle of a registry file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Sessions may be appended
    ReadWrite,
    /// Appending is refused
    ReadOnly,
}

impl AccessMode {
    fn to_wire(self) -> u32 {
        match self {
            AccessMode::ReadWrite => 0,
            AccessMode::ReadOnly => 1,
        }
    }

    fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(AccessMode::ReadWrite),
            1 => Some(AccessMode::ReadOnly),
            _ => None,
        }
    }
}

/// Next version stamp: wall-clock milliseconds, but always greater than
/// `previous` even if the clock went backwards.
pub fn next_version(previous: i64) -> i64 {
    chrono::Utc::now()
        .timestamp_millis()
        .max(previous.saturating_add(1))
}

/// Fixed-size header at offset 0 of every registry file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryHeader {
    /// Read-write or read-only
    pub access_mode: AccessMode,
    /// Version stamp of the last structural write (ms since epoch)
    pub version: i64,
    /// Coverage slots required by the structure
    pub slot_count: u32,
    /// Offset of the last byte of the coverage segment, or [`NO_COVERAGE`]
    pub coverage_location: i64,
    /// Offset of the last byte of the newest session segment
    pub last_session_location: i64,
    name: String,
}

impl RegistryHeader {
    /// Header for a new registry with no coverage and no sessions.
    pub fn new(name: &str, access_mode: AccessMode, version: i64) -> Self {
        RegistryHeader {
            access_mode,
            version,
            slot_count: 0,
            coverage_location: NO_COVERAGE,
            last_session_location: HEADER_SIZE as i64 - 1,
            name: Self::fit_name(name),
        }
    }

    fn fit_name(name: &str) -> String {
        name.chars().take(NAME_LENGTH).collect::<String>().trim().to_string()
    }

    /// Registry name (at most 64 characters).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the name, truncating to 64 characters.
    pub fn set_name(&mut self, name: &str) {
        self.name = Self::fit_name(name);
    }

    /// First offset a session segment may start at.
    pub fn min_session_position(&self) -> i64 {
        if self.coverage_location == NO_COVERAGE {
            HEADER_SIZE as i64
        } else {
            self.coverage_location + 1
        }
    }

    /// Returns `true` if a coverage segment is recorded.
    pub fn has_coverage(&self) -> bool {
        self.coverage_location != NO_COVERAGE
    }

    /// Serialize to exactly [`HEADER_SIZE`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        // Writes into a Vec cannot fail.
        let _ = self.write_fields(&mut buf);
        let crc = crc32fast::hash(&buf[CHECKSUM_START..]);
        let _ = buf.write_u64::<BigEndian>(crc as u64);
        buf
    }

    fn write_fields(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.write_u64::<BigEndian>(REGISTRY_MAGIC)?;
        buf.write_u32::<BigEndian>(REGISTRY_FORMAT_VERSION)?;
        buf.write_u32::<BigEndian>(self.access_mode.to_wire())?;
        buf.write_i64::<BigEndian>(self.version)?;
        buf.write_u32::<BigEndian>(self.slot_count)?;
        buf.write_i64::<BigEndian>(self.coverage_location)?;
        buf.write_i64::<BigEndian>(self.last_session_location)?;
        let mut chars = self.name.chars();
        for _ in 0..NAME_LENGTH {
            buf.write_u32::<BigEndian>(chars.next().unwrap_or(' ') as u32)?;
        }
        Ok(())
    }

    /// Parse a header from the start of `data`, naming `file` in errors.
    pub fn from_bytes(file: &str, data: &[u8]) -> RegistryResult<Self> {
        let truncated = || RegistryError::Corrupted {
            path: file.to_string(),
            reason: format!(
                "header truncated: expected {} bytes, found {}",
                HEADER_SIZE,
                data.len()
            ),
        };

        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u64::<BigEndian>().map_err(|_| truncated())?;
        if magic != REGISTRY_MAGIC {
            return Err(RegistryError::NotARegistry {
                path: file.to_string(),
                expected: REGISTRY_MAGIC,
                actual: magic,
            });
        }
        let format_version = cursor.read_u32::<BigEndian>().map_err(|_| truncated())?;
        if format_version != REGISTRY_FORMAT_VERSION {
            return Err(RegistryError::IncompatibleFormat {
                path: file.to_string(),
                expected: REGISTRY_FORMAT_VERSION,
                actual: format_version,
            });
        }
        if data.len() < HEADER_SIZE {
            return Err(truncated());
        }

        let stored = u64::from_be_bytes(
            data[CHECKSUM_OFFSET..HEADER_SIZE]
                .try_into()
                .map_err(|_| truncated())?,
        );
        let computed = crc32fast::hash(&data[CHECKSUM_START..CHECKSUM_OFFSET]) as u64;
        if stored != computed {
            return Err(RegistryError::Corrupted {
                path: file.to_string(),
                reason: format!(
                    "header checksum mismatch: stored {:#018x}, computed {:#018x}",
                    stored, computed
                ),
            });
        }

        let corrupt = |reason: String| RegistryError::Corrupted {
            path: file.to_string(),
            reason,
        };
        let io = |_| truncated();
        let mode = cursor.read_u32::<BigEndian>().map_err(io)?;
        let access_mode =
            AccessMode::from_wire(mode).ok_or_else(|| corrupt(format!("invalid access mode {}", mode)))?;
        let version = cursor.read_i64::<BigEndian>().map_err(io)?;
        let slot_count = cursor.read_u32::<BigEndian>().map_err(io)?;
        let coverage_location = cursor.read_i64::<BigEndian>().map_err(io)?;
        let last_session_location = cursor.read_i64::<BigEndian>().map_err(io)?;
        let mut name = String::with_capacity(NAME_LENGTH);
        for _ in 0..NAME_LENGTH {
            let scalar = cursor.read_u32::<BigEndian>().map_err(io)?;
            let c = char::from_u32(scalar)
                .ok_or_else(|| corrupt(format!("invalid name character {:#x}", scalar)))?;
            name.push(c);
        }

        Ok(RegistryHeader {
            access_mode,
            version,
            slot_count,
            coverage_location,
            last_session_location,
            name: name.trim().to_string(),
        })
    }

    /// Read the header of the registry at `path`.
    pub fn read(path: &Path) -> RegistryResult<Self> {
        let mut file = File::open(path).map_err(|e| RegistryError::io(path, e))?;
        Self::read_from(path, &mut file)
    }

    /// Read the header from the start of an open registry file.
    pub fn read_from(path: &Path, file: &mut File) -> RegistryResult<Self> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| RegistryError::io(path, e))?;
        let mut data = Vec::with_capacity(HEADER_SIZE);
        file.take(HEADER_SIZE as u64)
            .read_to_end(&mut data)
            .map_err(|e| RegistryError::io(path, e))?;
        Self::from_bytes(&path.display().to_string(), &data)
    }

    /// Write the header at offset 0 of `file`.
    pub fn write_to(&self, path: &Path, file: &mut File) -> RegistryResult<()> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| RegistryError::io(path, e))?;
        file.write_all(&self.to_bytes())
            .map_err(|e| RegistryError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryErrorKind;

    fn sample() -> RegistryHeader {
        let mut h = RegistryHeader::new("demo project", AccessMode::ReadWrite, 1_700_000_000_123);
        h.slot_count = 4096;
        h.coverage_location = 999;
        h.last_session_location = 5000;
        h
    }

    #[test]
    fn size_is_fixed() {
        assert_eq!(HEADER_SIZE, 308);
        assert_eq!(sample().to_bytes().len(), HEADER_SIZE);
    }

    #[test]
    fn round_trip() {
        let h = sample();
        assert_eq!(RegistryHeader::from_bytes("t", &h.to_bytes()).unwrap(), h);
    }

    #[test]
    fn name_is_padded_truncated_and_trimmed() {
        let long: String = "x".repeat(100);
        let h = RegistryHeader::new(&long, AccessMode::ReadOnly, 1);
        assert_eq!(h.name().chars().count(), NAME_LENGTH);

        let short = RegistryHeader::new("  ab", AccessMode::ReadOnly, 1);
        let bytes = short.to_bytes();
        // last name char is a padding space
        assert_eq!(&bytes[CHECKSUM_OFFSET - 4..CHECKSUM_OFFSET], &[0, 0, 0, b' ']);
        assert_eq!(RegistryHeader::from_bytes("t", &bytes).unwrap().name(), "ab");
    }

    #[test]
    fn non_ascii_name_survives() {
        let h = RegistryHeader::new("Überprüfung ✓", AccessMode::ReadWrite, 7);
        let back = RegistryHeader::from_bytes("t", &h.to_bytes()).unwrap();
        assert_eq!(back.name(), "Überprüfung ✓");
    }

    #[test]
    fn every_single_bit_flip_in_covered_region_is_corruption() {
        let bytes = sample().to_bytes();
        for byte in CHECKSUM_START..HEADER_SIZE {
            for bit in 0..8 {
                let mut damaged = bytes.clone();
                damaged[byte] ^= 1 << bit;
                let err = RegistryHeader::from_bytes("t", &damaged).unwrap_err();
                assert_eq!(
                    err.kind(),
                    RegistryErrorKind::Corruption,
                    "flip of bit {} in byte {} gave {:?}",
                    bit,
                    byte,
                    err
                );
            }
        }
    }

    #[test]
    fn wrong_magic_is_not_a_registry() {
        let mut bytes = sample().to_bytes();
        bytes[0] ^= 0x80;
        let err = RegistryHeader::from_bytes("t", &bytes).unwrap_err();
        assert!(matches!(err, RegistryError::NotARegistry { .. }));
        assert_eq!(err.kind(), RegistryErrorKind::Format);
    }

    #[test]
    fn wrong_format_version_is_incompatible_even_with_garbage() {
        let mut bytes = sample().to_bytes();
        bytes[8..12].copy_from_slice(&(REGISTRY_FORMAT_VERSION + 1).to_be_bytes());
        for b in bytes.iter_mut().skip(12) {
            *b = 0xA5;
        }
        let err = RegistryHeader::from_bytes("t", &bytes).unwrap_err();
        match err {
            RegistryError::IncompatibleFormat {
                expected, actual, ..
            } => {
                assert_eq!(expected, REGISTRY_FORMAT_VERSION);
                assert_eq!(actual, REGISTRY_FORMAT_VERSION + 1);
            }
            other => panic!("expected IncompatibleFormat, got {:?}", other),
        }

        // and with nothing after the version at all
        let err = RegistryHeader::from_bytes("t", &bytes[..12]).unwrap_err();
        assert_eq!(err.kind(), RegistryErrorKind::Format);
    }

    #[test]
    fn short_header_is_corruption() {
        let bytes = sample().to_bytes();
        for len in [0, 5, 12, 100, HEADER_SIZE - 1] {
            let err = RegistryHeader::from_bytes("t", &bytes[..len]).unwrap_err();
            assert_eq!(err.kind(), RegistryErrorKind::Corruption, "len {}", len);
        }
    }

    #[test]
    fn next_version_is_strictly_increasing() {
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        assert_eq!(next_version(future), future + 1);
        let a = next_version(0);
        assert!(next_version(a) > a);
    }

    #[test]
    fn min_session_position_follows_coverage() {
        let mut h = RegistryHeader::new("n", AccessMode::ReadWrite, 1);
        assert_eq!(h.min_session_position(), HEADER_SIZE as i64);
        h.coverage_location = 400;
        assert_eq!(h.min_session_position(), 401);
    }
}
