//! Node data directory management.
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK                 # Advisory lock for single-writer
//! ├─ queue.journal        # Outbound queue (leaf)
//! ├─ mappings.journal     # Identity mappings
//! └─ ...                  # One journal per table
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use syncq_storage::{FileBackend, StorageBackend};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_EXT: &str = "journal";

/// A node's data directory, held under an exclusive lock.
///
/// Only one `DataDir` can exist per directory across processes, so a
/// scheduled sync and a manual CLI run never write the same journals.
#[derive(Debug)]
pub struct DataDir {
    path: PathBuf,
    _lock_file: File,
}

impl DataDir {
    /// Opens or creates a data directory.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DirectoryLocked`] if another process holds it.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::InvalidDirectory(format!(
                    "data directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::InvalidDirectory(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DirectoryLocked);
        }

        tracing::debug!(path = %path.display(), "data directory opened");

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the journal backing table `name`.
    #[must_use]
    pub fn journal_path(&self, name: &str) -> PathBuf {
        self.path.join(format!("{name}.{JOURNAL_EXT}"))
    }

    /// Opens the journal backend for table `name`.
    pub fn journal(&self, name: &str) -> CoreResult<Box<dyn StorageBackend>> {
        let backend = FileBackend::open(&self.journal_path(name))?;
        Ok(Box::new(backend))
    }
}
