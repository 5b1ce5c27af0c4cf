//! Download watermark and deferred updates.
//!
//! The watermark is the `since` value of the next download. Updates the
//! leaf applier skipped for missing prerequisites are kept as deferred and
//! retried before new downloads, since the hub will not deliver them again.
//! An update skipped `max_attempts` times is abandoned: it stays on record
//! for operators but is no longer retried.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use syncq_core::{CoreResult, Table, Timestamp};
use syncq_storage::StorageBackend;
use syncq_sync_protocol::WireUpdate;

const WATERMARK_KEY: &str = "since";

/// A downloaded update waiting for its prerequisites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredUpdate {
    /// The update as delivered.
    pub update: WireUpdate,
    /// Times it was skipped.
    pub attempts: u32,
    /// When it was first skipped.
    pub time_deferred: Timestamp,
    /// Set once the attempt budget ran out.
    #[serde(default)]
    pub abandoned: bool,
}

/// Persistent download position of a leaf.
pub struct DownloadCursor {
    watermark: Mutex<Table<String, Timestamp>>,
    deferred: Mutex<Table<u64, DeferredUpdate>>,
}

impl DownloadCursor {
    /// Opens the cursor over two journal backends.
    pub fn open(
        watermark: Box<dyn StorageBackend>,
        deferred: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        Ok(Self {
            watermark: Mutex::new(Table::open(watermark)?),
            deferred: Mutex::new(Table::open(deferred)?),
        })
    }

    /// Creates a cursor that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            watermark: Mutex::new(Table::in_memory()),
            deferred: Mutex::new(Table::in_memory()),
        }
    }

    /// The current watermark, 0 before the first download.
    pub fn since(&self) -> Timestamp {
        self.watermark
            .lock()
            .get(&WATERMARK_KEY.to_string())
            .copied()
            .unwrap_or(0)
    }

    /// Moves the watermark forward. Never moves it back.
    pub fn advance(&self, to: Timestamp) -> CoreResult<bool> {
        let mut watermark = self.watermark.lock();
        let key = WATERMARK_KEY.to_string();
        if watermark.get(&key).is_some_and(|current| *current >= to) {
            return Ok(false);
        }
        watermark.put(key, to)?;
        Ok(true)
    }

    /// Sets the watermark to 0 so the next pass starts over.
    pub fn reset(&self) -> CoreResult<()> {
        self.watermark.lock().delete(&WATERMARK_KEY.to_string())?;
        Ok(())
    }

    /// Records a skipped update, counting repeated skips.
    ///
    /// Returns false when this skip used up `max_attempts` and the update
    /// was abandoned.
    pub fn defer(&self, update: &WireUpdate, now: Timestamp, max_attempts: u32) -> CoreResult<bool> {
        let mut deferred = self.deferred.lock();
        let (attempts, time_deferred) = deferred
            .get(&update.id)
            .map_or((1, now), |existing| (existing.attempts + 1, existing.time_deferred));
        let abandoned = attempts >= max_attempts;
        if abandoned {
            tracing::warn!(
                update_id = update.id,
                update_type = %update.update_type,
                attempts,
                "deferred update abandoned, prerequisites never arrived"
            );
        }
        deferred.put(
            update.id,
            DeferredUpdate {
                update: update.clone(),
                attempts,
                time_deferred,
                abandoned,
            },
        )?;
        Ok(!abandoned)
    }

    /// Removes an update once it is applied.
    pub fn resolve(&self, update_id: u64) -> CoreResult<bool> {
        Ok(self.deferred.lock().delete(&update_id)?.is_some())
    }

    /// Updates still waiting to be retried, in distribution order.
    pub fn deferred(&self) -> Vec<DeferredUpdate> {
        let mut entries: Vec<DeferredUpdate> = self
            .deferred
            .lock()
            .values()
            .filter(|d| !d.abandoned)
            .cloned()
            .collect();
        entries.sort_by_key(|d| (d.update.priority, d.update.timestamp, d.update.id));
        entries
    }

    /// Number of updates still waiting to be retried.
    pub fn deferred_count(&self) -> usize {
        self.deferred.lock().values().filter(|d| !d.abandoned).count()
    }

    /// Updates given up on, oldest first.
    pub fn abandoned(&self) -> Vec<DeferredUpdate> {
        let mut entries: Vec<DeferredUpdate> = self
            .deferred
            .lock()
            .values()
            .filter(|d| d.abandoned)
            .cloned()
            .collect();
        entries.sort_by_key(|d| (d.time_deferred, d.update.id));
        entries
    }

    /// Number of updates given up on.
    pub fn abandoned_count(&self) -> usize {
        self.deferred.lock().values().filter(|d| d.abandoned).count()
    }

    /// Drops abandoned updates first deferred before `cutoff`.
    pub fn purge_abandoned(&self, cutoff: Timestamp) -> CoreResult<usize> {
        let mut deferred = self.deferred.lock();
        let expired: Vec<u64> = deferred
            .values()
            .filter(|d| d.abandoned && d.time_deferred < cutoff)
            .map(|d| d.update.id)
            .collect();
        for id in &expired {
            deferred.delete(id)?;
        }
        Ok(expired.len())
    }

    /// Rewrites both journals with only live rows.
    pub fn compact(&self) -> CoreResult<()> {
        self.watermark.lock().compact()?;
        self.deferred.lock().compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncq_sync_protocol::{UpdateAction, UpdateType};
    use syncq_testkit::{course_data, enrolment_data, wire_update, TempDataDir};

    #[test]
    fn watermark_only_moves_forward() {
        let cursor = DownloadCursor::in_memory();
        assert_eq!(cursor.since(), 0);

        assert!(cursor.advance(100).unwrap());
        assert!(!cursor.advance(50).unwrap());
        assert!(!cursor.advance(100).unwrap());
        assert_eq!(cursor.since(), 100);

        cursor.reset().unwrap();
        assert_eq!(cursor.since(), 0);
    }

    #[test]
    fn deferred_updates_are_ordered_and_counted() {
        let cursor = DownloadCursor::in_memory();
        let mut enrolment = wire_update(
            9,
            UpdateType::Enrolment,
            UpdateAction::Create,
            20,
            &enrolment_data(1, 2),
        );
        enrolment.priority = 3;
        let mut course = wire_update(4, UpdateType::Course, UpdateAction::Create, 30, &course_data(2, "ALG"));
        course.priority = 2;

        assert!(cursor.defer(&enrolment, 1_000, 10).unwrap());
        assert!(cursor.defer(&course, 1_000, 10).unwrap());
        assert!(cursor.defer(&enrolment, 2_000, 10).unwrap());

        let deferred = cursor.deferred();
        assert_eq!(deferred.len(), 2);
        assert_eq!(deferred[0].update.id, 4);
        assert_eq!(deferred[1].attempts, 2);
        assert_eq!(deferred[1].time_deferred, 1_000);

        assert!(cursor.resolve(9).unwrap());
        assert!(!cursor.resolve(9).unwrap());
        assert_eq!(cursor.deferred_count(), 1);
    }

    #[test]
    fn exhausted_updates_are_abandoned_not_retried() {
        let cursor = DownloadCursor::in_memory();
        let orphan = wire_update(3, UpdateType::Enrolment, UpdateAction::Create, 20, &enrolment_data(8, 9));

        assert!(cursor.defer(&orphan, 1_000, 3).unwrap());
        assert!(cursor.defer(&orphan, 2_000, 3).unwrap());
        assert!(!cursor.defer(&orphan, 3_000, 3).unwrap());

        assert!(cursor.deferred().is_empty());
        assert_eq!(cursor.deferred_count(), 0);
        let abandoned = cursor.abandoned();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].attempts, 3);
        assert_eq!(cursor.abandoned_count(), 1);

        assert_eq!(cursor.purge_abandoned(1_000).unwrap(), 0);
        assert_eq!(cursor.purge_abandoned(1_001).unwrap(), 1);
        assert_eq!(cursor.abandoned_count(), 0);
    }

    #[test]
    fn cursor_survives_reopen() {
        let dir = TempDataDir::new();
        {
            let cursor =
                DownloadCursor::open(dir.journal("watermark").unwrap(), dir.journal("deferred").unwrap())
                    .unwrap();
            cursor.advance(77).unwrap();
            cursor
                .defer(
                    &wire_update(1, UpdateType::Enrolment, UpdateAction::Create, 70, &enrolment_data(5, 6)),
                    80,
                    10,
                )
                .unwrap();
        }

        let cursor =
            DownloadCursor::open(dir.journal("watermark").unwrap(), dir.journal("deferred").unwrap())
                .unwrap();
        assert_eq!(cursor.since(), 77);
        let deferred = cursor.deferred();
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].update.data["userId"], 5);
    }
}
