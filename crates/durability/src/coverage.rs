//! Coverage segment: accumulated hit counts plus per-test coverage.
//!
//! # Binary Format
//!
//! ```text
//! hits(slot_count x 4) + per_test(per_test_bytes)
//! + hit_bytes(8) + per_test_bytes(8) + body_crc32(4) + marker(4)
//! ```
//!
//! A per-test record is
//! `test_name + method + slice(4) + start_ts(8) + end_ts(8) + exit(1) + words(4) + word(8)*`
//! with strings as a 4-byte length followed by UTF-8.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use tally_core::Bitmap;

use crate::error::{RegistryError, RegistryResult};
use crate::header::HEADER_SIZE;
use crate::session::read_at;

/// Marks the end of a coverage segment.
pub const COVERAGE_MARKER: u32 = 0xb4b00;

/// Size of the coverage footer.
pub const COVERAGE_FOOTER_SIZE: usize = 8 + 8 + 4 + 4;

const MAX_NAME_LEN: u32 = 64 * 1024;

/// How a test finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestExit {
    /// Passed
    Passed,
    /// Assertion failure
    Failed,
    /// Unexpected error
    Errored,
}

impl TestExit {
    fn to_wire(self) -> u8 {
        match self {
            TestExit::Passed => 0,
            TestExit::Failed => 1,
            TestExit::Errored => 2,
        }
    }

    fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(TestExit::Passed),
            1 => Some(TestExit::Failed),
            2 => Some(TestExit::Errored),
            _ => None,
        }
    }
}

/// Slots hit while one test ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCoverage {
    /// Test name as reported by the runner
    pub test_name: String,
    /// Qualified test method
    pub method: String,
    /// Recording slice the hits were taken in
    pub slice: u32,
    /// Start (ms since epoch)
    pub start_ts: i64,
    /// End (ms since epoch)
    pub end_ts: i64,
    /// Outcome
    pub exit: TestExit,
    /// Hit slots
    pub hits: Bitmap,
}

/// Persisted coverage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageData {
    /// Hit count per slot
    pub hits: Vec<u32>,
    /// Per-test coverage, interpreted by the optimizer
    pub per_test: Vec<TestCoverage>,
}

impl CoverageData {
    /// Coverage with `slot_count` zeroed slots.
    pub fn with_slots(slot_count: u32) -> Self {
        CoverageData {
            hits: vec![0; slot_count as usize],
            per_test: Vec::new(),
        }
    }

    /// Add `deltas` to the hit counts, growing the slot table if needed.
    pub fn add_hits(&mut self, deltas: &[u32]) {
        if deltas.len() > self.hits.len() {
            self.hits.resize(deltas.len(), 0);
        }
        for (slot, d) in self.hits.iter_mut().zip(deltas) {
            *slot = slot.saturating_add(*d);
        }
    }

    /// Number of slots with a non-zero count.
    pub fn covered_slots(&self) -> usize {
        self.hits.iter().filter(|h| **h > 0).count()
    }

    /// Encode body and footer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.hits.len() * 4 + COVERAGE_FOOTER_SIZE);
        // Writes into a Vec cannot fail.
        let _ = self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        for h in &self.hits {
            buf.write_u32::<BigEndian>(*h)?;
        }
        let hit_bytes = buf.len();
        for t in &self.per_test {
            write_string(buf, &t.test_name)?;
            write_string(buf, &t.method)?;
            buf.write_u32::<BigEndian>(t.slice)?;
            buf.write_i64::<BigEndian>(t.start_ts)?;
            buf.write_i64::<BigEndian>(t.end_ts)?;
            buf.write_u8(t.exit.to_wire())?;
            let words = t.hits.significant_words();
            buf.write_u32::<BigEndian>(words.len() as u32)?;
            for w in words {
                buf.write_u64::<BigEndian>(*w)?;
            }
        }
        let per_test_bytes = buf.len() - hit_bytes;
        let crc = crc32fast::hash(&buf[..]);
        buf.write_u64::<BigEndian>(hit_bytes as u64)?;
        buf.write_u64::<BigEndian>(per_test_bytes as u64)?;
        buf.write_u32::<BigEndian>(crc)?;
        buf.write_u32::<BigEndian>(COVERAGE_MARKER)?;
        Ok(())
    }

    /// Read the coverage segment whose last byte is at `location`.
    pub fn read_at_location(path: &Path, file: &mut File, location: i64) -> RegistryResult<Self> {
        let end = location + 1;
        if end < (HEADER_SIZE + COVERAGE_FOOTER_SIZE) as i64 {
            return Err(RegistryError::corrupted(
                path,
                format!("coverage location {} lies inside the header", location),
            ));
        }
        let footer_start = end as u64 - COVERAGE_FOOTER_SIZE as u64;
        let footer = read_at(path, file, footer_start, COVERAGE_FOOTER_SIZE)?;
        let marker = BigEndian::read_u32(&footer[20..24]);
        if marker != COVERAGE_MARKER {
            return Err(RegistryError::corrupted(
                path,
                format!(
                    "coverage marker at {} is {:#x}, expected {:#x}",
                    footer_start, marker, COVERAGE_MARKER
                ),
            ));
        }
        let hit_bytes = BigEndian::read_u64(&footer[0..8]);
        let per_test_bytes = BigEndian::read_u64(&footer[8..16]);
        let stored_crc = BigEndian::read_u32(&footer[16..20]);
        if hit_bytes % 4 != 0 {
            return Err(RegistryError::corrupted(
                path,
                format!("coverage hit section of {} bytes is not a whole number of slots", hit_bytes),
            ));
        }
        let body_len = hit_bytes.checked_add(per_test_bytes).ok_or_else(|| {
            RegistryError::corrupted(
                path,
                format!(
                    "coverage section lengths {} + {} overflow",
                    hit_bytes, per_test_bytes
                ),
            )
        })?;
        let overlaps = (HEADER_SIZE as u64)
            .checked_add(body_len)
            .map_or(true, |body_start| footer_start < body_start);
        if overlaps {
            return Err(RegistryError::corrupted(
                path,
                format!("coverage body of {} bytes overlaps the header", body_len),
            ));
        }
        let start = footer_start - body_len;
        let body = read_at(path, file, start, body_len as usize)?;
        let crc = crc32fast::hash(&body);
        if crc != stored_crc {
            return Err(RegistryError::corrupted(
                path,
                format!(
                    "coverage checksum mismatch: stored {:#010x}, computed {:#010x}",
                    stored_crc, crc
                ),
            ));
        }

        let (hit_part, test_part) = body.split_at(hit_bytes as usize);
        let hits = hit_part.chunks_exact(4).map(BigEndian::read_u32).collect();
        let per_test = decode_per_test(test_part)
            .map_err(|reason| RegistryError::corrupted(path, reason))?;
        Ok(CoverageData { hits, per_test })
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> io::Result<()> {
    buf.write_u32::<BigEndian>(s.len() as u32)?;
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn read_string(input: &mut Cursor<&[u8]>) -> Result<String, String> {
    let len = input.read_u32::<BigEndian>().map_err(|e| e.to_string())?;
    if len > MAX_NAME_LEN {
        return Err(format!("per-test name length {} too large", len));
    }
    let mut bytes = vec![0u8; len as usize];
    input.read_exact(&mut bytes).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| format!("per-test name is not UTF-8: {}", e))
}

fn decode_per_test(data: &[u8]) -> Result<Vec<TestCoverage>, String> {
    let eof = |e: io::Error| format!("per-test record truncated: {}", e);
    let mut input = Cursor::new(data);
    let mut out = Vec::new();
    while (input.position() as usize) < data.len() {
        let test_name = read_string(&mut input)?;
        let method = read_string(&mut input)?;
        let slice = input.read_u32::<BigEndian>().map_err(eof)?;
        let start_ts = input.read_i64::<BigEndian>().map_err(eof)?;
        let end_ts = input.read_i64::<BigEndian>().map_err(eof)?;
        let code = input.read_u8().map_err(eof)?;
        let exit = TestExit::from_wire(code).ok_or_else(|| format!("invalid test exit code {}", code))?;
        let nwords = input.read_u32::<BigEndian>().map_err(eof)?;
        let remaining = data.len() as u64 - input.position();
        if nwords as u64 * 8 > remaining {
            return Err(format!("per-test bitmap of {} words exceeds section", nwords));
        }
        let mut words = Vec::with_capacity(nwords as usize);
        for _ in 0..nwords {
            words.push(input.read_u64::<BigEndian>().map_err(eof)?);
        }
        out.push(TestCoverage {
            test_name,
            method,
            slice,
            start_ts,
            end_ts,
            exit,
            hits: Bitmap::from_words(words),
        });
    }
    Ok(out)
}
