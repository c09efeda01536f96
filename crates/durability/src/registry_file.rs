//! Appendable registry file.
//!
//! ```text
//! header | coverage segment (optional) | session 1 | session 2 | ... | session N
//! ```
//!
//! Appending writes new session segments after the last one, syncs them, then
//! rewrites the header. The header offsets are the commit point: a crash
//! before the header rewrite leaves the old header describing the old,
//! intact chain of sessions.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tally_core::{ContextStore, FileInfo, ProjectInfo};
use tracing::{debug, info, warn};

use crate::coverage::CoverageData;
use crate::error::{RegistryError, RegistryResult};
use crate::header::{next_version, AccessMode, RegistryHeader, HEADER_SIZE, NO_COVERAGE};
use crate::session::SessionSegment;

/// Structure registered by one instrumentation run.
#[derive(Debug, Clone, Default)]
pub struct RegistryUpdate {
    /// Files registered
    pub files: Vec<FileInfo>,
    /// Contexts in force
    pub context_store: ContextStore,
    /// Slot count the structure requires
    pub slot_count: u32,
    /// Instrumentation start (ms since epoch)
    pub start_ts: i64,
    /// Instrumentation end (ms since epoch)
    pub end_ts: i64,
}

/// Everything read back from a registry.
#[derive(Debug, Clone)]
pub struct RegistryContents {
    /// Header as found on disk
    pub header: RegistryHeader,
    /// Coverage segment, if one was written
    pub coverage: Option<CoverageData>,
    /// Sessions, newest first
    pub sessions: Vec<SessionSegment>,
}

impl RegistryContents {
    /// Project model: files from all sessions, later sessions replacing
    /// earlier registrations of the same path.
    pub fn project(&self) -> ProjectInfo {
        let mut project = ProjectInfo::new(self.header.name());
        for session in self.sessions.iter().rev() {
            project.add_files(session.files.iter().cloned());
        }
        project
    }

    /// Context store of the newest session.
    pub fn context_store(&self) -> Option<&ContextStore> {
        self.sessions.first().map(|s| &s.context_store)
    }
}

/// Handle on a registry file, holding the header as last read or written.
#[derive(Debug)]
pub struct RegistryFile {
    path: PathBuf,
    header: RegistryHeader,
}

impl RegistryFile {
    /// Create a registry with no coverage and no sessions, replacing any
    /// existing file at `path`.
    pub fn create(path: &Path, name: &str, access_mode: AccessMode) -> RegistryResult<Self> {
        let header = RegistryHeader::new(name, access_mode, next_version(0));
        Self::rewrite(path, header, None, &[])
    }

    /// Open an existing registry and read its header.
    pub fn open(path: &Path) -> RegistryResult<Self> {
        check_readable(path)?;
        let header = RegistryHeader::read(path)?;
        debug!(
            target: "tally::registry",
            path = %path.display(),
            version = header.version,
            "opened registry"
        );
        Ok(RegistryFile {
            path: path.to_path_buf(),
            header,
        })
    }

    /// Path of the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header as last read or written by this handle.
    pub fn header(&self) -> &RegistryHeader {
        &self.header
    }

    /// Returns `true` if nobody else has written the registry since this
    /// handle last read or wrote it, and it accepts new sessions.
    pub fn is_appendable(&self) -> RegistryResult<bool> {
        let on_disk = RegistryHeader::read(&self.path)?;
        Ok(on_disk.version == self.header.version && on_disk.access_mode == AccessMode::ReadWrite)
    }

    /// Append one session per update.
    ///
    /// Fails without touching the file if the registry is read-only or its
    /// on-disk version differs from the version this handle loaded.
    pub fn append(&mut self, updates: &[RegistryUpdate]) -> RegistryResult<()> {
        if updates.is_empty() {
            return Err(RegistryError::EmptyUpdate {
                path: self.path.display().to_string(),
            });
        }
        check_readable(&self.path)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| RegistryError::io(&self.path, e))?;

        let on_disk = RegistryHeader::read_from(&self.path, &mut file)?;
        if on_disk.access_mode == AccessMode::ReadOnly || self.header.access_mode == AccessMode::ReadOnly {
            return Err(RegistryError::ReadOnly {
                path: self.path.display().to_string(),
            });
        }
        if on_disk.version != self.header.version {
            return Err(RegistryError::ConcurrentModification {
                path: self.path.display().to_string(),
                on_disk: on_disk.version,
                loaded: self.header.version,
            });
        }

        let mut header = on_disk;
        let mut bytes = Vec::new();
        for update in updates {
            let version = next_version(header.version);
            let segment = SessionSegment {
                version,
                start_ts: update.start_ts,
                end_ts: update.end_ts,
                files: update.files.clone(),
                context_store: update.context_store.clone(),
            };
            bytes.extend(
                segment
                    .encode()
                    .map_err(|e| RegistryError::codec(&self.path, e))?,
            );
            header.version = version;
            header.slot_count = header.slot_count.max(update.slot_count);
        }

        let position = (header.last_session_location + 1) as u64;
        file.seek(SeekFrom::Start(position))
            .map_err(|e| RegistryError::io(&self.path, e))?;
        file.write_all(&bytes)
            .map_err(|e| RegistryError::io(&self.path, e))?;
        let end = position + bytes.len() as u64;
        file.set_len(end)
            .map_err(|e| RegistryError::io(&self.path, e))?;
        file.sync_all()
            .map_err(|e| RegistryError::io(&self.path, e))?;

        header.last_session_location = end as i64 - 1;
        header.write_to(&self.path, &mut file)?;
        file.sync_all()
            .map_err(|e| RegistryError::io(&self.path, e))?;

        info!(
            target: "tally::registry",
            path = %self.path.display(),
            sessions = updates.len(),
            version = header.version,
            slots = header.slot_count,
            "appended sessions"
        );
        self.header = header;
        Ok(())
    }

    /// Read header, coverage and every session.
    pub fn read_contents(&self) -> RegistryResult<RegistryContents> {
        check_readable(&self.path)?;
        let mut file = File::open(&self.path).map_err(|e| RegistryError::io(&self.path, e))?;
        let header = RegistryHeader::read_from(&self.path, &mut file)?;

        let coverage = if header.has_coverage() {
            Some(CoverageData::read_at_location(
                &self.path,
                &mut file,
                header.coverage_location,
            )?)
        } else {
            None
        };

        let min_start = header.min_session_position();
        if header.last_session_location + 1 < min_start {
            return Err(RegistryError::corrupted(
                &self.path,
                format!(
                    "last session location {} precedes first session offset {}",
                    header.last_session_location, min_start
                ),
            ));
        }
        let mut sessions = Vec::new();
        let mut end = (header.last_session_location + 1) as u64;
        while end > min_start as u64 {
            let (segment, start) =
                SessionSegment::read_ending_at(&self.path, &mut file, end, min_start as u64)?;
            sessions.push(segment);
            end = start;
        }

        debug!(
            target: "tally::registry",
            path = %self.path.display(),
            sessions = sessions.len(),
            has_coverage = coverage.is_some(),
            "read registry"
        );
        Ok(RegistryContents {
            header,
            coverage,
            sessions,
        })
    }

    /// Replace the coverage segment, keeping every session.
    ///
    /// The file is rewritten in full and swapped in atomically. The version
    /// stamp is unchanged, since the structure is unchanged.
    pub fn write_coverage(&mut self, coverage: &CoverageData) -> RegistryResult<()> {
        let contents = self.read_contents()?;
        if contents.header.version != self.header.version {
            return Err(RegistryError::ConcurrentModification {
                path: self.path.display().to_string(),
                on_disk: contents.header.version,
                loaded: self.header.version,
            });
        }
        if (coverage.hits.len() as u64) < contents.header.slot_count as u64 {
            warn!(
                target: "tally::registry",
                path = %self.path.display(),
                hits = coverage.hits.len(),
                slots = contents.header.slot_count,
                "coverage has fewer slots than the structure"
            );
        }
        let sessions: Vec<SessionSegment> = contents.sessions.into_iter().rev().collect();
        let rewritten = Self::rewrite(&self.path, contents.header, Some(coverage), &sessions)?;
        self.header = rewritten.header;
        Ok(())
    }

    fn rewrite(
        path: &Path,
        mut header: RegistryHeader,
        coverage: Option<&CoverageData>,
        sessions_oldest_first: &[SessionSegment],
    ) -> RegistryResult<Self> {
        let mut body = Vec::new();
        header.coverage_location = match coverage {
            Some(cov) => {
                body.extend(cov.encode());
                (HEADER_SIZE + body.len()) as i64 - 1
            }
            None => NO_COVERAGE,
        };
        for session in sessions_oldest_first {
            body.extend(session.encode().map_err(|e| RegistryError::codec(path, e))?);
        }
        header.last_session_location = (HEADER_SIZE + body.len()) as i64 - 1;

        let temp_path = temp_path_for(path);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| RegistryError::io(&temp_path, e))?;
        file.write_all(&header.to_bytes())
            .map_err(|e| RegistryError::io(&temp_path, e))?;
        file.write_all(&body)
            .map_err(|e| RegistryError::io(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| RegistryError::io(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, path).map_err(|e| RegistryError::io(path, e))?;

        // Sync parent directory
        if let Some(parent) = path.parent() {
            if parent.exists() && !parent.as_os_str().is_empty() {
                let dir_fd = File::open(parent).map_err(|e| RegistryError::io(parent, e))?;
                dir_fd
                    .sync_all()
                    .map_err(|e| RegistryError::io(parent, e))?;
            }
        }

        info!(
            target: "tally::registry",
            path = %path.display(),
            sessions = sessions_oldest_first.len(),
            has_coverage = coverage.is_some(),
            "wrote registry"
        );
        Ok(RegistryFile {
            path: path.to_path_buf(),
            header,
        })
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn check_readable(path: &Path) -> RegistryResult<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(RegistryError::Inaccessible {
            path: path.display().to_string(),
            reason: "not a regular file".into(),
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(RegistryError::NoSuchRegistry {
            path: path.display().to_string(),
        }),
        Err(e) => Err(RegistryError::Inaccessible {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryErrorKind;
    use tempfile::TempDir;

    fn update(path: &str, slots: u32) -> RegistryUpdate {
        RegistryUpdate {
            files: vec![FileInfo {
                path: path.into(),
                package: "p".into(),
                data_length: slots,
                ..Default::default()
            }],
            context_store: ContextStore::new(),
            slot_count: slots,
            start_ts: 1,
            end_ts: 2,
        }
    }

    #[test]
    fn fresh_registry_has_no_sessions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reg.db");
        let reg = RegistryFile::create(&path, "demo", AccessMode::ReadWrite).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_SIZE as u64);
        let contents = reg.read_contents().unwrap();
        assert!(contents.sessions.is_empty());
        assert!(contents.coverage.is_none());
        assert_eq!(contents.header.name(), "demo");
    }

    #[test]
    fn append_chains_sessions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reg.db");
        let mut reg = RegistryFile::create(&path, "demo", AccessMode::ReadWrite).unwrap();
        let v0 = reg.header().version;
        reg.append(&[update("A.java", 4)]).unwrap();
        reg.append(&[update("B.java", 9), update("A.java", 2)]).unwrap();
        assert!(reg.header().version > v0);
        assert_eq!(reg.header().slot_count, 9);

        let contents = RegistryFile::open(&path).unwrap().read_contents().unwrap();
        assert_eq!(contents.sessions.len(), 3);
        assert_eq!(contents.sessions[0].files[0].path, "A.java");
        assert!(contents.sessions[0].version > contents.sessions[1].version);
        assert_eq!(contents.sessions[0].version, contents.header.version);
        let project = contents.project();
        assert_eq!(project.file("A.java").unwrap().data_length, 2);
        assert!(project.file("B.java").is_some());
    }

    #[test]
    fn empty_append_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reg.db");
        let mut reg = RegistryFile::create(&path, "demo", AccessMode::ReadWrite).unwrap();
        let err = reg.append(&[]).unwrap_err();
        assert_eq!(err.kind(), RegistryErrorKind::Usage);
    }

    #[test]
    fn read_only_registry_refuses_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reg.db");
        let mut reg = RegistryFile::create(&path, "demo", AccessMode::ReadOnly).unwrap();
        assert!(matches!(
            reg.append(&[update("A.java", 1)]),
            Err(RegistryError::ReadOnly { .. })
        ));
        assert!(!reg.is_appendable().unwrap());
    }

    #[test]
    fn stale_handle_detects_concurrent_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reg.db");
        RegistryFile::create(&path, "demo", AccessMode::ReadWrite).unwrap();
        let mut first = RegistryFile::open(&path).unwrap();
        let mut second = RegistryFile::open(&path).unwrap();
        first.append(&[update("A.java", 1)]).unwrap();
        assert!(first.is_appendable().unwrap());
        assert!(!second.is_appendable().unwrap());
        let err = second.append(&[update("B.java", 1)]).unwrap_err();
        assert!(matches!(err, RegistryError::ConcurrentModification { .. }));
    }

    #[test]
    fn coverage_rewrite_keeps_sessions_and_allows_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reg.db");
        let mut reg = RegistryFile::create(&path, "demo", AccessMode::ReadWrite).unwrap();
        reg.append(&[update("A.java", 3)]).unwrap();
        let version = reg.header().version;

        let mut cov = CoverageData::with_slots(3);
        cov.add_hits(&[1, 0, 5]);
        reg.write_coverage(&cov).unwrap();
        assert_eq!(reg.header().version, version);
        assert!(reg.header().has_coverage());

        reg.append(&[update("B.java", 3)]).unwrap();
        let contents = reg.read_contents().unwrap();
        assert_eq!(contents.coverage.unwrap(), cov);
        assert_eq!(contents.sessions.len(), 2);
        assert_eq!(contents.sessions[1].files[0].path, "A.java");
    }

    #[test]
    fn missing_and_non_file_paths() {
        let dir = TempDir::new().unwrap();
        let err = RegistryFile::open(&dir.path().join("nope.db")).unwrap_err();
        assert!(matches!(err, RegistryError::NoSuchRegistry { .. }));
        let err = RegistryFile::open(dir.path()).unwrap_err();
        assert!(matches!(err, RegistryError::Inaccessible { .. }));
    }
}
