//! Storage backend trait definition.

use crate::error::StorageResult;

/// The byte store under a [`Journal`](crate::Journal).
///
/// A journal only ever appends at the end, reads back what it appended,
/// cuts off a torn tail after a crash and, when compacting, swaps the
/// whole contents for a shorter copy. Backends offer exactly that.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `sync` returns, appended data survives power loss
/// - `replace` is all or nothing: on error the old contents are intact
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// when the range extends beyond the current size.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data at the end and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Hands appended data to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces appended data to the device.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current size in bytes, which is where the next append lands.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts a torn tail, leaving the first `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` is larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole contents with `data`.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        (**self).append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        (**self).flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        (**self).sync()
    }

    fn size(&self) -> StorageResult<u64> {
        (**self).size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        (**self).truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        (**self).replace(data)
    }
}
