//! The outbound queue of captured events awaiting upload.
//!
//! ## Lifecycle
//!
//! ```text
//! enqueue ──► Pending ──mark_processing──► Processing ──mark_synced──► Synced
//!               ▲                              │
//!               └──── mark_failed (retries) ◄──┤──mark_failed (spent)──► Failed
//!                                              └──mark_conflict────────► Conflict
//! ```
//!
//! Failed and Conflict items stay until an operator retries or deletes them.
//! Files attached to submissions are tracked alongside in [`FileRefs`] and
//! follow their item: synced with it, forgotten when it is deleted.

use crate::capture::CapturedEvent;
use crate::clock::SharedClock;
use crate::config::{DuplicatePolicy, QueueConfig};
use crate::digest::payload_hash;
use crate::error::{CoreError, CoreResult};
use crate::files::{FileRefs, FileStatus};
use crate::table::Table;
use crate::types::{ItemId, LocalId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use syncq_storage::StorageBackend;
use syncq_sync_protocol::{EventPayload, EventType, UploadItem};

/// Delivery status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for dispatch.
    Pending,
    /// Claimed by an upload pass.
    Processing,
    /// Accepted by the hub.
    Synced,
    /// Retry budget spent.
    Failed,
    /// The hub kept a newer copy.
    Conflict,
}

impl QueueStatus {
    /// Returns the lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            "conflict" => Ok(Self::Conflict),
            other => Err(format!("unknown queue status: {other}")),
        }
    }
}

/// A captured event and its delivery state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Queue id.
    pub id: ItemId,
    /// Event category.
    pub event_type: EventType,
    /// Fully-qualified event name.
    pub event_name: String,
    /// Table of the changed object.
    pub object_table: Option<String>,
    /// Local id of the changed object.
    pub object_id: Option<LocalId>,
    /// Local id of the user the event is about.
    pub related_user_id: Option<LocalId>,
    /// Local course id.
    pub course_id: Option<LocalId>,
    /// Structured payload.
    pub payload: EventPayload,
    /// Content digest used for duplicate suppression.
    pub payload_hash: String,
    /// Dispatch priority, 1 first.
    pub priority: u8,
    /// Delivery status.
    pub status: QueueStatus,
    /// Dispatch attempts so far.
    pub attempts: u32,
    /// Last failure or conflict detail.
    pub last_error: Option<String>,
    /// Enqueue time.
    pub time_created: Timestamp,
    /// Last status change.
    pub time_modified: Timestamp,
    /// When the hub accepted the item.
    pub time_synced: Option<Timestamp>,
}

impl QueueItem {
    /// Converts to the upload wire form.
    pub fn to_upload_item(&self) -> UploadItem {
        UploadItem {
            id: self.id.as_u64(),
            event_type: self.event_type.clone(),
            event_name: self.event_name.clone(),
            object_table: self.object_table.clone(),
            object_id: self.object_id,
            priority: self.priority,
            payload: self.payload.clone(),
            payload_hash: self.payload_hash.clone(),
            time_created: self.time_created,
        }
    }
}

/// Per-status counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Pending items.
    pub pending: usize,
    /// Processing items.
    pub processing: usize,
    /// Synced items not yet cleaned up.
    pub synced: usize,
    /// Permanently failed items.
    pub failed: usize,
    /// Items that lost a conflict.
    pub conflict: usize,
    /// All items.
    pub total: usize,
    /// Most recent sync time.
    pub last_synced: Option<Timestamp>,
    /// Attachments whose item has not synced.
    pub pending_files: usize,
}

/// Durable queue of outbound events.
///
/// All operations take the internal lock for their whole duration, so a
/// batch claim by [`mark_processing`](Self::mark_processing) is atomic with
/// respect to other callers in the process.
pub struct OutboundQueue {
    items: Mutex<Table<ItemId, QueueItem>>,
    files: FileRefs,
    config: QueueConfig,
    clock: SharedClock,
}

impl OutboundQueue {
    /// Opens a queue over a journal backend.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        config: QueueConfig,
        clock: SharedClock,
    ) -> CoreResult<Self> {
        let table = Table::open_with_durability(backend, config.durability)?;
        tracing::debug!(items = table.len(), "outbound queue opened");
        Ok(Self {
            items: Mutex::new(table),
            files: FileRefs::in_memory(clock.clone()),
            config,
            clock,
        })
    }

    /// Creates a queue that lives only in memory.
    pub fn in_memory(config: QueueConfig, clock: SharedClock) -> Self {
        Self {
            items: Mutex::new(Table::in_memory()),
            files: FileRefs::in_memory(clock.clone()),
            config,
            clock,
        }
    }

    /// Tracks attachments in `files` instead of in memory.
    #[must_use]
    pub fn with_attachments(mut self, files: FileRefs) -> Self {
        self.files = files;
        self
    }

    /// Attachment references of queued submissions.
    pub fn attachments(&self) -> &FileRefs {
        &self.files
    }

    /// Returns the queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Adds a captured event.
    ///
    /// Returns `None` without writing anything when a non-Failed item with
    /// the same payload hash was created inside the duplicate window.
    pub fn enqueue(&self, event: CapturedEvent) -> CoreResult<Option<ItemId>> {
        let hash = payload_hash(&event.payload)?;
        let now = self.clock.now();
        let mut items = self.items.lock();

        if let DuplicatePolicy::Window(window) = self.config.duplicate_policy {
            let cutoff = now - secs(window);
            let duplicate = items.values().find(|item| {
                item.payload_hash == hash
                    && item.status != QueueStatus::Failed
                    && item.time_created > cutoff
            });
            if let Some(existing) = duplicate {
                tracing::debug!(
                    existing = %existing.id,
                    event = %event.payload.event.event_name,
                    "duplicate event suppressed"
                );
                return Ok(None);
            }
        }

        let id = ItemId(items.max_key_seen().map_or(1, |last| last.0 + 1));
        let files = match event.event_type {
            EventType::Submission => event.payload.context.files.clone(),
            _ => Vec::new(),
        };
        let info = &event.payload.event;
        let item = QueueItem {
            id,
            event_type: event.event_type,
            event_name: info.event_name.clone(),
            object_table: info.object_table.clone(),
            object_id: info.object_id,
            related_user_id: info.related_user_id,
            course_id: info.course_id,
            payload_hash: hash,
            priority: event.priority,
            status: QueueStatus::Pending,
            attempts: 0,
            last_error: None,
            time_created: now,
            time_modified: now,
            time_synced: None,
            payload: event.payload,
        };

        tracing::debug!(item_id = %id, event_type = %item.event_type, priority = item.priority, "event queued");
        items.put(id, item)?;
        drop(items);

        // The item is already durable; a lost file reference must not undo it.
        if let Err(e) = self.files.track(id, &files) {
            tracing::warn!(item_id = %id, error = %e, "failed to track attachments");
        }
        Ok(Some(id))
    }

    /// Returns up to `limit` dispatchable items in priority order, oldest
    /// first within a priority.
    pub fn dequeue(&self, limit: usize) -> Vec<QueueItem> {
        let items = self.items.lock();
        let mut ready: Vec<&QueueItem> = items
            .values()
            .filter(|item| {
                item.status == QueueStatus::Pending && item.attempts < self.config.max_retries
            })
            .collect();
        ready.sort_by_key(|item| (item.priority, item.time_created, item.id));
        ready.into_iter().take(limit).cloned().collect()
    }

    /// Claims Pending items for an upload and counts the attempt.
    ///
    /// Returns the ids actually claimed; ids that are missing or not
    /// Pending are left alone.
    pub fn mark_processing(&self, ids: &[ItemId]) -> CoreResult<Vec<ItemId>> {
        let now = self.clock.now();
        let mut items = self.items.lock();
        let mut claimed = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(current) = items.get(id) else {
                continue;
            };
            if current.status != QueueStatus::Pending {
                continue;
            }
            let mut item = current.clone();
            item.status = QueueStatus::Processing;
            item.attempts += 1;
            item.time_modified = now;
            items.put(*id, item)?;
            claimed.push(*id);
        }

        tracing::info!(requested = ids.len(), claimed = claimed.len(), "batch claimed");
        Ok(claimed)
    }

    /// Records hub acceptance.
    pub fn mark_synced(&self, id: ItemId) -> CoreResult<()> {
        let now = self.clock.now();
        self.transition(id, QueueStatus::Synced, |item| {
            item.status = QueueStatus::Synced;
            item.last_error = None;
            item.time_synced = Some(now);
        })?;
        if let Err(e) = self.files.mark_synced(id) {
            tracing::warn!(item_id = %id, error = %e, "failed to mark attachments synced");
        }
        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// The item returns to Pending while attempts remain, otherwise it is
    /// failed permanently.
    pub fn mark_failed(&self, id: ItemId, error: &str) -> CoreResult<()> {
        let max_retries = self.config.max_retries;
        self.transition(id, QueueStatus::Failed, |item| {
            item.status = retry_or_fail(item.attempts, max_retries);
            item.last_error = Some(error.to_string());
        })?;
        tracing::debug!(item_id = %id, error, "item failed");
        Ok(())
    }

    /// Records that the hub kept a newer copy.
    pub fn mark_conflict(&self, id: ItemId, detail: &str) -> CoreResult<()> {
        self.transition(id, QueueStatus::Conflict, |item| {
            item.status = QueueStatus::Conflict;
            item.last_error = Some(detail.to_string());
        })?;
        tracing::info!(item_id = %id, detail, "item conflicted");
        Ok(())
    }

    /// Releases Processing items abandoned for longer than the processing
    /// timeout, as if their upload had failed.
    pub fn reclaim_stale(&self) -> CoreResult<usize> {
        let now = self.clock.now();
        let cutoff = now - secs(self.config.processing_timeout);
        let mut items = self.items.lock();

        let stale: Vec<QueueItem> = items
            .values()
            .filter(|item| item.status == QueueStatus::Processing && item.time_modified <= cutoff)
            .cloned()
            .collect();

        for mut item in stale.iter().cloned() {
            item.status = retry_or_fail(item.attempts, self.config.max_retries);
            item.last_error = Some("processing timed out".to_string());
            item.time_modified = now;
            items.put(item.id, item)?;
        }

        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), "reclaimed stale processing items");
        }
        Ok(stale.len())
    }

    /// Puts a Failed or Conflict item back in the queue with a fresh retry
    /// budget.
    pub fn retry(&self, id: ItemId) -> CoreResult<()> {
        let now = self.clock.now();
        let mut items = self.items.lock();
        let mut item = items.get(&id).cloned().ok_or(CoreError::ItemNotFound(id))?;
        if !matches!(item.status, QueueStatus::Failed | QueueStatus::Conflict) {
            return Err(invalid(id, item.status, QueueStatus::Pending));
        }
        item.status = QueueStatus::Pending;
        item.attempts = 0;
        item.last_error = None;
        item.time_modified = now;
        items.put(id, item)?;
        tracing::info!(item_id = %id, "item requeued");
        Ok(())
    }

    /// Removes an item regardless of status.
    pub fn delete(&self, id: ItemId) -> CoreResult<QueueItem> {
        let item = self
            .items
            .lock()
            .delete(&id)?
            .ok_or(CoreError::ItemNotFound(id))?;
        self.files.forget(id)?;
        Ok(item)
    }

    /// Returns an item by id.
    pub fn get(&self, id: ItemId) -> Option<QueueItem> {
        self.items.lock().get(&id).cloned()
    }

    /// Lists items, newest first, optionally filtered by status.
    pub fn list(&self, status: Option<QueueStatus>, limit: usize) -> Vec<QueueItem> {
        let items = self.items.lock();
        let mut listed: Vec<QueueItem> = items
            .values()
            .filter(|item| status.map_or(true, |s| item.status == s))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.id.cmp(&a.id));
        listed.truncate(limit);
        listed
    }

    /// Counts items by status.
    pub fn stats(&self) -> QueueStats {
        let items = self.items.lock();
        let mut stats = QueueStats::default();
        for item in items.values() {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Synced => stats.synced += 1,
                QueueStatus::Failed => stats.failed += 1,
                QueueStatus::Conflict => stats.conflict += 1,
            }
            if let Some(synced) = item.time_synced {
                stats.last_synced = Some(stats.last_synced.map_or(synced, |t| t.max(synced)));
            }
        }
        stats.total = items.len();
        drop(items);
        stats.pending_files = self.files.list(FileStatus::Pending).len();
        stats
    }

    /// Deletes Synced items older than `retention`. Items in any other
    /// status are never removed.
    pub fn cleanup(&self, retention: Duration) -> CoreResult<usize> {
        let cutoff = self.clock.now() - secs(retention);
        let mut items = self.items.lock();
        let expired: Vec<ItemId> = items
            .values()
            .filter(|item| {
                item.status == QueueStatus::Synced
                    && item.time_synced.unwrap_or(item.time_modified) < cutoff
            })
            .map(|item| item.id)
            .collect();
        for id in &expired {
            items.delete(id)?;
        }
        drop(items);
        let files = self.files.cleanup(retention)?;
        if !expired.is_empty() {
            tracing::info!(removed = expired.len(), files, "synced items cleaned up");
        }
        Ok(expired.len())
    }

    /// Rewrites the journal with only live items.
    pub fn compact(&self) -> CoreResult<()> {
        self.items.lock().compact()?;
        self.files.compact()
    }

    /// Number of items in any status.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true if the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn transition<F>(&self, id: ItemId, to: QueueStatus, apply: F) -> CoreResult<()>
    where
        F: FnOnce(&mut QueueItem),
    {
        let now = self.clock.now();
        let mut items = self.items.lock();
        let mut item = items.get(&id).cloned().ok_or(CoreError::ItemNotFound(id))?;
        if item.status != QueueStatus::Processing {
            return Err(invalid(id, item.status, to));
        }
        apply(&mut item);
        item.time_modified = now;
        items.put(id, item)?;
        Ok(())
    }
}

fn retry_or_fail(attempts: u32, max_retries: u32) -> QueueStatus {
    if attempts < max_retries {
        QueueStatus::Pending
    } else {
        QueueStatus::Failed
    }
}

fn invalid(id: ItemId, from: QueueStatus, to: QueueStatus) -> CoreError {
    CoreError::InvalidTransition {
        id,
        from: from.to_string(),
        to: to.to_string(),
    }
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
