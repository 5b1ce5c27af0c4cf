//! In-memory journal storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    bytes: RwLock<Vec<u8>>,
    failing: AtomicBool,
}

/// Journal bytes held in memory.
///
/// Clones share the same bytes, which is how tests simulate a restart:
/// keep a clone, drop the table built on the original and replay the
/// clone. [`set_failing`](Self::set_failing) makes every write fail until
/// cleared, for exercising error paths.
///
/// ```rust
/// use syncq_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let restarted = backend.clone();
/// backend.append(b"queue").unwrap();
/// assert_eq!(restarted.size().unwrap(), 5);
///
/// backend.set_failing(true);
/// assert!(backend.append(b"lost").is_err());
/// assert_eq!(restarted.data(), b"queue");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding `bytes`, e.g. a hand-made torn journal.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        let backend = Self::new();
        *backend.shared.bytes.write() = bytes;
        backend
    }

    /// Copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.shared.bytes.read().clone()
    }

    /// Makes writes through this backend and its clones fail.
    pub fn set_failing(&self, failing: bool) {
        self.shared.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.shared.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::other("simulated write failure")));
        }
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.shared.bytes.read();
        let size = bytes.len() as u64;
        match usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(len)?))
            .and_then(|range| bytes.get(range))
        {
            Some(slice) => Ok(slice.to_vec()),
            None => Err(StorageError::ReadPastEnd { offset, len, size }),
        }
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check_writable()?;
        let mut bytes = self.shared.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_writable()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_writable()
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.shared.bytes.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_writable()?;
        let mut bytes = self.shared.bytes.write();
        let current = bytes.len() as u64;
        if new_size > current {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size} bytes, journal holds {current}"),
            )));
        }
        bytes.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        let fresh = data.to_vec();
        *self.shared.bytes.write() = fresh;
        Ok(())
    }
}
