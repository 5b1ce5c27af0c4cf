//! Journal files on disk.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const STAGING_SUFFIX: &str = ".compact";

/// A journal file opened in append mode.
///
/// Appends always land at the end of the file. Reads seek a shared handle,
/// hence the mutex. [`replace`](StorageBackend::replace) stages the new
/// contents next to the journal, syncs them, renames over the journal and
/// syncs the directory, so a crash leaves either the old or the new file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    len: u64,
}

impl FileBackend {
    /// Opens or creates the journal file at `path`.
    ///
    /// A staging file left by a compaction that crashed before its rename
    /// is removed.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = open_journal(path)?;
        let len = file.metadata()?.len();

        let staging = staging_path(path);
        if staging.exists() {
            tracing::warn!(path = %staging.display(), "removing unfinished compaction");
            fs::remove_file(&staging)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len,
        })
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stage(&self, staging: &Path, data: &[u8]) -> StorageResult<File> {
        let mut staged = File::create(staging)?;
        staged.write_all(data)?;
        staged.sync_all()?;
        drop(staged);
        // Opened before the rename so the handle follows the new inode.
        Ok(open_journal(staging)?)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if end > self.len {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.len,
            });
        }
        let mut buffer = vec![0u8; len];
        if len > 0 {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.len;
        self.file.get_mut().write_all(data)?;
        self.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(self.file.get_mut().flush()?)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(self.file.get_mut().sync_data()?)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.len)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.len {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size} bytes, journal holds {}", self.len),
            )));
        }
        let file = self.file.get_mut();
        file.set_len(new_size)?;
        file.sync_all()?;
        self.len = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let staging = staging_path(&self.path);
        let staged = match self.stage(&staging, data) {
            Ok(file) => file,
            Err(e) => {
                let _ = fs::remove_file(&staging);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }

        *self.file.get_mut() = staged;
        self.len = data.len() as u64;
        sync_parent(&self.path)
    }
}

fn open_journal(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).append(true).create(true).open(path)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(STAGING_SUFFIX);
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> StorageResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> StorageResult<()> {
    // NTFS journals the rename itself.
    Ok(())
}
