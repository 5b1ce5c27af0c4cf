//! Append-only audit trail of sync passes.

use crate::clock::SharedClock;
use crate::error::CoreResult;
use crate::table::Table;
use crate::types::Timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use syncq_storage::StorageBackend;
use syncq_sync_protocol::{SyncDirection, SyncSummary};

/// One recorded sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Entry id.
    pub id: u64,
    /// Node the pass ran for.
    pub node_id: String,
    /// Upload or download.
    pub direction: SyncDirection,
    /// Items attempted.
    pub item_count: u32,
    /// Items applied.
    pub success_count: u32,
    /// Items failed.
    pub fail_count: u32,
    /// Items conflicted.
    pub conflict_count: u32,
    /// success, partial or failed.
    pub status: String,
    /// Free-form details.
    pub details: Option<String>,
    /// When the entry was written.
    pub time_created: Timestamp,
}

/// Audit log. Entries are informational only and never drive sync.
pub struct SyncLog {
    entries: Mutex<Table<u64, SyncLogEntry>>,
    clock: SharedClock,
}

impl SyncLog {
    /// Opens the log over a journal backend.
    pub fn open(backend: Box<dyn StorageBackend>, clock: SharedClock) -> CoreResult<Self> {
        Ok(Self {
            entries: Mutex::new(Table::open(backend)?),
            clock,
        })
    }

    /// Creates a log that lives only in memory.
    pub fn in_memory(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(Table::in_memory()),
            clock,
        }
    }

    /// Appends an entry for `node_id`.
    pub fn record(&self, node_id: &str, summary: &SyncSummary) -> CoreResult<u64> {
        let mut entries = self.entries.lock();
        let id = entries.max_key_seen().map_or(1, |last| last + 1);
        let entry = SyncLogEntry {
            id,
            node_id: node_id.to_string(),
            direction: summary.direction,
            item_count: summary.item_count,
            success_count: summary.success_count,
            fail_count: summary.fail_count,
            conflict_count: summary.conflict_count,
            status: summary.status.clone(),
            details: summary.details.clone(),
            time_created: self.clock.now(),
        };
        entries.put(id, entry)?;
        Ok(id)
    }

    /// Most recent entries first, optionally for one node.
    pub fn recent(&self, node_id: Option<&str>, limit: usize) -> Vec<SyncLogEntry> {
        let entries = self.entries.lock();
        entries
            .values()
            .rev()
            .filter(|e| node_id.map_or(true, |n| e.node_id == n))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Deletes entries older than `retention`.
    pub fn cleanup(&self, retention: Duration) -> CoreResult<usize> {
        let cutoff = self.clock.now() - i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);
        let mut entries = self.entries.lock();
        let expired: Vec<u64> = entries
            .values()
            .filter(|e| e.time_created < cutoff)
            .map(|e| e.id)
            .collect();
        for id in &expired {
            entries.delete(id)?;
        }
        Ok(expired.len())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
