//! Durable leaf state.

use crate::cursor::DownloadCursor;
use crate::error::SyncResult;
use std::sync::Arc;
use syncq_core::{
    DataDir, FileRefs, MappingStore, OutboundQueue, QueueConfig, SharedClock, SyncLog,
};

/// Every table a leaf owns.
pub struct LeafStores {
    /// Captured events awaiting upload, with their attachments.
    pub queue: Arc<OutboundQueue>,
    /// Hub-to-leaf identity mappings.
    pub mappings: Arc<MappingStore>,
    /// Download watermark and deferred updates.
    pub cursor: DownloadCursor,
    /// Local audit trail of sync passes.
    pub sync_log: SyncLog,
}

impl LeafStores {
    /// Opens all tables inside `dir`.
    pub fn open(dir: &DataDir, queue: QueueConfig, clock: SharedClock) -> SyncResult<Self> {
        let files = FileRefs::open(dir.journal("files")?, queue.durability, clock.clone())?;
        let queue = OutboundQueue::open(dir.journal("queue")?, queue, clock.clone())?
            .with_attachments(files);
        Ok(Self {
            queue: Arc::new(queue),
            mappings: Arc::new(MappingStore::open(dir.journal("mappings")?, clock.clone())?),
            cursor: DownloadCursor::open(dir.journal("watermark")?, dir.journal("deferred")?)?,
            sync_log: SyncLog::open(dir.journal("sync_log")?, clock)?,
        })
    }

    /// Creates tables that live only in memory.
    pub fn in_memory(queue: QueueConfig, clock: SharedClock) -> Self {
        Self {
            queue: Arc::new(OutboundQueue::in_memory(queue, clock.clone())),
            mappings: Arc::new(MappingStore::in_memory(clock.clone())),
            cursor: DownloadCursor::in_memory(),
            sync_log: SyncLog::in_memory(clock),
        }
    }

    /// Rewrites every journal with only live rows.
    pub fn compact(&self) -> SyncResult<()> {
        self.queue.compact()?;
        self.mappings.compact()?;
        self.cursor.compact()?;
        Ok(())
    }
}
