//! Attachment references for queued submissions.
//!
//! A reference records that a queue item carries a file, by content hash.
//! While a reference for a hash is pending, the same content attached to a
//! later item is not tracked again.

use crate::clock::SharedClock;
use crate::error::CoreResult;
use crate::table::Table;
use crate::types::{ItemId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use syncq_storage::{Durability, StorageBackend};
use syncq_sync_protocol::FileInfo;

/// Where a referenced file stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    /// Its queue item has not reached the hub.
    Pending,
    /// Its queue item was applied by the hub.
    Synced,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
        })
    }
}

/// One tracked attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Reference id.
    pub id: u64,
    /// Queue item the file was captured with.
    pub item_id: ItemId,
    /// Content digest.
    pub content_hash: String,
    /// File name.
    pub filename: String,
    /// Size in bytes.
    pub filesize: u64,
    /// MIME type.
    pub mimetype: String,
    /// Pending or synced.
    pub status: FileStatus,
    /// When the reference was recorded.
    pub time_created: Timestamp,
}

/// Journaled attachment references.
pub struct FileRefs {
    refs: Mutex<Table<u64, FileRef>>,
    clock: SharedClock,
}

impl FileRefs {
    /// Opens the table over a journal backend.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        durability: Durability,
        clock: SharedClock,
    ) -> CoreResult<Self> {
        Ok(Self {
            refs: Mutex::new(Table::open_with_durability(backend, durability)?),
            clock,
        })
    }

    /// Creates a table that lives only in memory.
    pub fn in_memory(clock: SharedClock) -> Self {
        Self {
            refs: Mutex::new(Table::in_memory()),
            clock,
        }
    }

    /// Records the files of `item_id`, skipping content that already has a
    /// pending reference. Returns how many references were added.
    pub fn track(&self, item_id: ItemId, files: &[FileInfo]) -> CoreResult<usize> {
        if files.is_empty() {
            return Ok(0);
        }
        let now = self.clock.now();
        let mut refs = self.refs.lock();
        let mut added = 0;
        for file in files {
            let pending = refs
                .values()
                .any(|r| r.status == FileStatus::Pending && r.content_hash == file.content_hash);
            if pending {
                tracing::debug!(item_id = %item_id, hash = %file.content_hash, "file already tracked");
                continue;
            }
            let id = refs.max_key_seen().map_or(1, |last| last + 1);
            refs.put(
                id,
                FileRef {
                    id,
                    item_id,
                    content_hash: file.content_hash.clone(),
                    filename: file.filename.clone(),
                    filesize: file.filesize,
                    mimetype: file.mimetype.clone(),
                    status: FileStatus::Pending,
                    time_created: now,
                },
            )?;
            added += 1;
        }
        Ok(added)
    }

    /// References captured with `item_id`.
    pub fn for_item(&self, item_id: ItemId) -> Vec<FileRef> {
        self.refs
            .lock()
            .values()
            .filter(|r| r.item_id == item_id)
            .cloned()
            .collect()
    }

    /// References in `status`, oldest first.
    pub fn list(&self, status: FileStatus) -> Vec<FileRef> {
        self.refs
            .lock()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect()
    }

    /// Marks the references of `item_id` synced.
    pub fn mark_synced(&self, item_id: ItemId) -> CoreResult<usize> {
        let mut refs = self.refs.lock();
        let pending: Vec<FileRef> = refs
            .values()
            .filter(|r| r.item_id == item_id && r.status == FileStatus::Pending)
            .cloned()
            .collect();
        for mut file in pending.iter().cloned() {
            file.status = FileStatus::Synced;
            refs.put(file.id, file)?;
        }
        Ok(pending.len())
    }

    /// Drops the references of a deleted item.
    pub fn forget(&self, item_id: ItemId) -> CoreResult<usize> {
        let mut refs = self.refs.lock();
        let ids: Vec<u64> = refs
            .values()
            .filter(|r| r.item_id == item_id)
            .map(|r| r.id)
            .collect();
        for id in &ids {
            refs.delete(id)?;
        }
        Ok(ids.len())
    }

    /// Removes synced references older than `retention`.
    pub fn cleanup(&self, retention: Duration) -> CoreResult<usize> {
        let cutoff = self.clock.now() - i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);
        let mut refs = self.refs.lock();
        let expired: Vec<u64> = refs
            .values()
            .filter(|r| r.status == FileStatus::Synced && r.time_created < cutoff)
            .map(|r| r.id)
            .collect();
        for id in &expired {
            refs.delete(id)?;
        }
        Ok(expired.len())
    }

    /// Number of references.
    pub fn len(&self) -> usize {
        self.refs.lock().len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.refs.lock().is_empty()
    }

    /// Rewrites the journal with live references only.
    pub fn compact(&self) -> CoreResult<()> {
        self.refs.lock().compact()
    }
}
