//! Instrumentation session segments.
//!
//! One segment holds everything registered by one instrumentation run. Its
//! footer comes last so segments can be walked backwards from the header's
//! `last_session_location`.
//!
//! # Binary Format
//!
//! ```text
//! files(file_bytes) + context_store(store_bytes)
//! + file_bytes(4) + store_bytes(4) + record_count(4)
//! + end_ts(8) + start_ts(8) + version(8) + body_crc32(4) + marker(4)
//! ```

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use tally_codec::{CodecResult, TaggedReader, TaggedWriter};
use tally_core::{ContextStore, FileInfo, STRUCTURE_TAGS};

use crate::error::{RegistryError, RegistryResult};

/// Marks the end of a session segment.
pub const SESSION_MARKER: u32 = 0xdada;

/// Size of the session footer.
pub const SESSION_FOOTER_SIZE: usize = 4 + 4 + 4 + 8 + 8 + 8 + 4 + 4;

/// One instrumentation session as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSegment {
    /// Version stamp assigned when the session was saved
    pub version: i64,
    /// Instrumentation start (ms since epoch)
    pub start_ts: i64,
    /// Instrumentation end (ms since epoch)
    pub end_ts: i64,
    /// Files registered by the session
    pub files: Vec<FileInfo>,
    /// Contexts in force for the session
    pub context_store: ContextStore,
}

impl SessionSegment {
    /// Encode body and footer.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        {
            let mut out = TaggedWriter::new(&mut buf, &STRUCTURE_TAGS);
            for file in &self.files {
                out.write_record(file)?;
            }
        }
        let file_bytes = buf.len();
        TaggedWriter::new(&mut buf, &STRUCTURE_TAGS).write_record(&self.context_store)?;
        let store_bytes = buf.len() - file_bytes;
        let crc = crc32fast::hash(&buf);

        buf.write_u32::<BigEndian>(file_bytes as u32)?;
        buf.write_u32::<BigEndian>(store_bytes as u32)?;
        buf.write_u32::<BigEndian>(self.files.len() as u32)?;
        buf.write_i64::<BigEndian>(self.end_ts)?;
        buf.write_i64::<BigEndian>(self.start_ts)?;
        buf.write_i64::<BigEndian>(self.version)?;
        buf.write_u32::<BigEndian>(crc)?;
        buf.write_u32::<BigEndian>(SESSION_MARKER)?;
        Ok(buf)
    }

    /// Read the segment ending just before `end`, which may start no
    /// earlier than `min_start`. Returns the segment and its start offset.
    pub fn read_ending_at(
        path: &Path,
        file: &mut File,
        end: u64,
        min_start: u64,
    ) -> RegistryResult<(SessionSegment, u64)> {
        if end < min_start + SESSION_FOOTER_SIZE as u64 {
            return Err(RegistryError::corrupted(
                path,
                format!("session segment ending at {} overlaps offset {}", end, min_start),
            ));
        }
        let footer_start = end - SESSION_FOOTER_SIZE as u64;
        let footer = read_at(path, file, footer_start, SESSION_FOOTER_SIZE)?;

        let marker = BigEndian::read_u32(&footer[40..44]);
        if marker != SESSION_MARKER {
            return Err(RegistryError::corrupted(
                path,
                format!(
                    "session marker at {} is {:#x}, expected {:#x}",
                    footer_start, marker, SESSION_MARKER
                ),
            ));
        }
        let file_bytes = BigEndian::read_u32(&footer[0..4]) as u64;
        let store_bytes = BigEndian::read_u32(&footer[4..8]) as u64;
        let record_count = BigEndian::read_u32(&footer[8..12]);
        let end_ts = BigEndian::read_i64(&footer[12..20]);
        let start_ts = BigEndian::read_i64(&footer[20..28]);
        let version = BigEndian::read_i64(&footer[28..36]);
        let stored_crc = BigEndian::read_u32(&footer[36..40]);

        let body_len = file_bytes + store_bytes;
        if footer_start < min_start + body_len {
            return Err(RegistryError::corrupted(
                path,
                format!(
                    "session body of {} bytes does not fit before offset {}",
                    body_len, footer_start
                ),
            ));
        }
        let start = footer_start - body_len;
        let body = read_at(path, file, start, body_len as usize)?;
        let crc = crc32fast::hash(&body);
        if crc != stored_crc {
            return Err(RegistryError::corrupted(
                path,
                format!(
                    "session at {} checksum mismatch: stored {:#010x}, computed {:#010x}",
                    start, stored_crc, crc
                ),
            ));
        }

        let (file_part, store_part) = body.split_at(file_bytes as usize);
        let mut input = file_part;
        let mut reader = TaggedReader::new(&mut input, &STRUCTURE_TAGS);
        let mut files = Vec::with_capacity(record_count.min(4096) as usize);
        for _ in 0..record_count {
            files.push(
                reader
                    .read_required::<FileInfo>()
                    .map_err(|e| RegistryError::codec(path, e))?,
            );
        }
        let mut input = store_part;
        let context_store = TaggedReader::new(&mut input, &STRUCTURE_TAGS)
            .read_required::<ContextStore>()
            .map_err(|e| RegistryError::codec(path, e))?;

        Ok((
            SessionSegment {
                version,
                start_ts,
                end_ts,
                files,
                context_store,
            },
            start,
        ))
    }
}

/// Read exactly `len` bytes at `offset`, reporting a short read as corruption.
pub(crate) fn read_at(path: &Path, file: &mut File, offset: u64, len: usize) -> RegistryResult<Vec<u8>> {
    let file_len = file
        .metadata()
        .map_err(|e| RegistryError::io(path, e))?
        .len();
    if offset.saturating_add(len as u64) > file_len {
        return Err(RegistryError::corrupted(
            path,
            format!(
                "{} bytes at offset {} extend past end of file ({} bytes)",
                len, offset, file_len
            ),
        ));
    }
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| RegistryError::io(path, e))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)
        .map_err(|e| RegistryError::io(path, e))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryErrorKind;
    use std::io::Write;
    use tally_core::{ContextPattern, StatementRegexpContext};
    use tempfile::TempDir;

    fn sample() -> SessionSegment {
        let mut store = ContextStore::new();
        store
            .add_statement_context(StatementRegexpContext::new(
                "log",
                ContextPattern::new("LOG\\..*").unwrap(),
            ))
            .unwrap();
        SessionSegment {
            version: 42,
            start_ts: 1000,
            end_ts: 2000,
            files: vec![
                FileInfo {
                    path: "a/A.java".into(),
                    data_length: 3,
                    ..Default::default()
                },
                FileInfo {
                    path: "a/B.java".into(),
                    data_index: 3,
                    data_length: 5,
                    ..Default::default()
                },
            ],
            context_store: store,
        }
    }

    fn write_file(dir: &TempDir, prefix: &[u8], bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("seg");
        let mut f = File::create(&path).unwrap();
        f.write_all(prefix).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn reads_back_from_its_end() {
        let dir = TempDir::new().unwrap();
        let seg = sample();
        let bytes = seg.encode().unwrap();
        let path = write_file(&dir, &[7u8; 10], &bytes);
        let mut f = File::open(&path).unwrap();
        let end = 10 + bytes.len() as u64;
        let (back, start) = SessionSegment::read_ending_at(&path, &mut f, end, 10).unwrap();
        assert_eq!(back, seg);
        assert_eq!(start, 10);
    }

    #[test]
    fn damaged_body_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut bytes = sample().encode().unwrap();
        bytes[3] ^= 0x01;
        let path = write_file(&dir, &[], &bytes);
        let mut f = File::open(&path).unwrap();
        let err =
            SessionSegment::read_ending_at(&path, &mut f, bytes.len() as u64, 0).unwrap_err();
        assert_eq!(err.kind(), RegistryErrorKind::Corruption);
    }

    #[test]
    fn bad_marker_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut bytes = sample().encode().unwrap();
        let n = bytes.len();
        bytes[n - 1] ^= 0xff;
        let path = write_file(&dir, &[], &bytes);
        let mut f = File::open(&path).unwrap();
        let err = SessionSegment::read_ending_at(&path, &mut f, n as u64, 0).unwrap_err();
        assert!(err.to_string().contains("marker"));
    }

    #[test]
    fn body_before_min_start_is_corruption() {
        let dir = TempDir::new().unwrap();
        let bytes = sample().encode().unwrap();
        let path = write_file(&dir, &[0u8; 4], &bytes);
        let mut f = File::open(&path).unwrap();
        let end = 4 + bytes.len() as u64;
        let err = SessionSegment::read_ending_at(&path, &mut f, end, 8).unwrap_err();
        assert_eq!(err.kind(), RegistryErrorKind::Corruption);
    }
}
