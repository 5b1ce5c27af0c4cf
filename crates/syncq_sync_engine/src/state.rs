//! Sync engine state machine.
//!
//! A leaf runs two kinds of pass, each invoked by an external trigger:
//!
//! ```text
//! upload:   Idle ─► Checking ─► Uploading ─► Synced | Error
//! download: Idle ─► Checking ─► Downloading ─► Synced | Error
//! ```
//!
//! Passes on one engine never overlap. A pass that dies after claiming a
//! batch leaves the items Processing; the next upload pass reclaims them
//! once they are older than the queue's processing timeout.

use crate::applier::{BatchResult, ContentRestorer, LeafApplier, LocalDirectory};
use crate::config::SyncConfig;
use crate::cursor::DownloadCursor;
use crate::error::{SyncError, SyncResult};
use crate::stores::LeafStores;
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use syncq_core::{ItemId, OutboundQueue, QueueItem, SharedClock, SyncLog, Timestamp};
use syncq_sync_protocol::{
    DownloadRequest, ItemStatus, RegisterRequest, ReportRequest, StatusRequest, StatusResponse,
    SyncDirection, SyncSummary, UploadRequest,
};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No pass has run yet.
    Idle,
    /// Checking node status with the hub.
    Checking,
    /// Uploading queue items.
    Uploading,
    /// Downloading and applying updates.
    Downloading,
    /// The last pass completed.
    Synced,
    /// The last pass failed.
    Error,
}

impl SyncState {
    /// Returns true if a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Checking | SyncState::Uploading | SyncState::Downloading
        )
    }

    /// Returns true if a new pass can start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Statistics accumulated across passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Upload passes completed.
    pub uploads_completed: u64,
    /// Download passes completed.
    pub downloads_completed: u64,
    /// Queue items the hub applied.
    pub items_synced: u64,
    /// Queue items that failed an attempt.
    pub items_failed: u64,
    /// Queue items that lost a conflict.
    pub items_conflicted: u64,
    /// Updates applied locally.
    pub updates_applied: u64,
    /// Updates that failed locally.
    pub updates_failed: u64,
    /// Updates deferred for missing prerequisites.
    pub updates_skipped: u64,
    /// Deferred updates given up on.
    pub updates_abandoned: u64,
    /// Last completed pass.
    pub last_sync_time: Option<Timestamp>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of an upload pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Batches sent.
    pub batches: u32,
    /// Items claimed and sent.
    pub claimed: u32,
    /// Items the hub applied.
    pub success: u32,
    /// Items that failed this attempt.
    pub failed: u32,
    /// Items that lost a conflict.
    pub conflicts: u32,
    /// Stale Processing items released before the pass.
    pub reclaimed: u32,
}

impl UploadReport {
    /// The audit summary of this pass.
    pub fn summary(&self) -> SyncSummary {
        SyncSummary::new(SyncDirection::Upload, self.success, self.failed, self.conflicts)
    }
}

/// Result of a download pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Download rounds made.
    pub rounds: u32,
    /// Updates received from the hub.
    pub received: u32,
    /// Deferred updates retried before downloading.
    pub retried: u32,
    /// Outcome of all applied updates, retried ones included.
    pub applied: BatchResult,
    /// Updates still deferred after the pass.
    pub deferred: usize,
    /// Deferred updates abandoned during the pass.
    pub abandoned: u32,
    /// Watermark after the pass.
    pub watermark: Timestamp,
}

impl DownloadReport {
    /// The audit summary of this pass.
    pub fn summary(&self) -> SyncSummary {
        let summary = SyncSummary::new(
            SyncDirection::Download,
            self.applied.success,
            self.applied.failed,
            0,
        );
        if self.applied.skipped > 0 {
            summary.with_details(format!(
                "{} skipped, {} deferred, {} abandoned",
                self.applied.skipped, self.deferred, self.abandoned
            ))
        } else {
            summary
        }
    }
}

/// What [`SyncEngine::cleanup`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Synced queue items.
    pub items: usize,
    /// Local sync log entries.
    pub log_entries: usize,
    /// Abandoned deferred updates.
    pub abandoned: usize,
}

/// Result of a full sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Upload pass result.
    pub upload: UploadReport,
    /// Download pass result.
    pub download: DownloadReport,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// The sync engine runs upload and download passes against the hub.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    transport: Arc<T>,
    queue: Arc<OutboundQueue>,
    cursor: DownloadCursor,
    sync_log: SyncLog,
    applier: LeafApplier,
    clock: SharedClock,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    pass: Mutex<()>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new sync engine.
    pub fn new(
        config: SyncConfig,
        transport: T,
        stores: LeafStores,
        directory: Arc<dyn LocalDirectory>,
        clock: SharedClock,
    ) -> Self {
        let applier = LeafApplier::new(config.node_id.clone(), directory, stores.mappings);
        Self {
            config,
            transport: Arc::new(transport),
            queue: stores.queue,
            cursor: stores.cursor,
            sync_log: stores.sync_log,
            applier,
            clock,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            pass: Mutex::new(()),
        }
    }

    /// Enables course content updates.
    pub fn with_restorer(mut self, restorer: Arc<dyn ContentRestorer>) -> Self {
        self.applier = self.applier.with_restorer(restorer);
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The outbound queue.
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// The download cursor.
    pub fn cursor(&self) -> &DownloadCursor {
        &self.cursor
    }

    /// The local sync log.
    pub fn sync_log(&self) -> &SyncLog {
        &self.sync_log
    }

    /// The leaf applier.
    pub fn applier(&self) -> &LeafApplier {
        &self.applier
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn handle_error(&self, error: &SyncError) {
        tracing::warn!(node_id = %self.config.node_id, kind = error.kind(), error = %error, "sync pass failed");
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }

    fn status_request(&self) -> StatusRequest {
        StatusRequest {
            node_id: self.config.node_id.clone(),
            apikey: Some(self.config.api_key.clone()),
        }
    }

    /// Asks the hub about this node without requiring it to be active.
    pub fn check_status(&self) -> SyncResult<StatusResponse> {
        self.config.validate()?;
        self.transport.check_status(&self.status_request())
    }

    /// Registers this node and returns the one-time API key.
    pub fn register(
        &self,
        name: &str,
        secret: &str,
        contact_email: Option<String>,
        description: Option<String>,
    ) -> SyncResult<String> {
        if self.config.hub_url.trim().is_empty() || self.config.node_id.trim().is_empty() {
            return Err(SyncError::Configuration(
                "hub URL and node id are required to register".into(),
            ));
        }
        let response = self.transport.register(&RegisterRequest {
            node_id: self.config.node_id.clone(),
            name: name.to_string(),
            secret: secret.to_string(),
            contact_email,
            description,
        })?;
        if response.apikey.is_empty() {
            return Err(SyncError::Authentication(response.message));
        }
        tracing::info!(node_id = %self.config.node_id, "node registered with hub");
        Ok(response.apikey)
    }

    /// Streams a hub artifact into `sink`.
    pub fn fetch_artifact(&self, name: &str, sink: &mut dyn Write) -> SyncResult<u64> {
        self.config.validate()?;
        self.transport
            .fetch_artifact(&self.config.node_id, &self.config.api_key, name, sink)
    }

    fn ensure_active(&self) -> SyncResult<()> {
        self.set_state(SyncState::Checking);
        let status = self.transport.check_status(&self.status_request())?;
        if !status.is_ok() || !status.active {
            return Err(SyncError::Authentication(status.message));
        }
        Ok(())
    }

    /// Runs an upload pass.
    ///
    /// Each pending item is attempted at most once per pass. A transport
    /// failure fails every item of the batch in flight and ends the pass.
    pub fn upload(&self) -> SyncResult<UploadReport> {
        let _pass = self.pass.lock();
        let result = self.config.validate().and_then(|()| self.run_upload());
        match result {
            Ok(report) => {
                self.set_state(SyncState::Synced);
                let mut stats = self.stats.write();
                stats.uploads_completed += 1;
                stats.last_sync_time = Some(self.clock.now());
                stats.last_error = None;
                Ok(report)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    fn run_upload(&self) -> SyncResult<UploadReport> {
        let mut report = UploadReport {
            reclaimed: self.queue.reclaim_stale()? as u32,
            ..UploadReport::default()
        };
        self.ensure_active()?;
        self.set_state(SyncState::Uploading);

        let mut attempted: HashSet<ItemId> = HashSet::new();
        let mut failure = None;

        loop {
            let batch: Vec<QueueItem> = self
                .queue
                .dequeue(self.config.batch_size + attempted.len())
                .into_iter()
                .filter(|item| !attempted.contains(&item.id))
                .take(self.config.batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }

            let ids: Vec<ItemId> = batch.iter().map(|item| item.id).collect();
            let claimed = self.queue.mark_processing(&ids)?;
            attempted.extend(ids.iter().copied());
            if claimed.is_empty() {
                continue;
            }

            let items = batch
                .iter()
                .filter(|item| claimed.contains(&item.id))
                .map(QueueItem::to_upload_item)
                .collect();
            let request = UploadRequest {
                node_id: self.config.node_id.clone(),
                apikey: self.config.api_key.clone(),
                items,
            };
            report.batches += 1;
            report.claimed += claimed.len() as u32;

            match self.transport.upload(&request) {
                Ok(response) => self.settle(&claimed, response.results, &mut report)?,
                Err(e) => {
                    let message = e.to_string();
                    for id in &claimed {
                        self.queue.mark_failed(*id, &message)?;
                    }
                    report.failed += claimed.len() as u32;
                    failure = Some(e);
                    break;
                }
            }
        }

        tracing::info!(
            node_id = %self.config.node_id,
            batches = report.batches,
            success = report.success,
            failed = report.failed,
            conflicts = report.conflicts,
            "upload pass finished"
        );

        {
            let mut stats = self.stats.write();
            stats.items_synced += u64::from(report.success);
            stats.items_failed += u64::from(report.failed);
            stats.items_conflicted += u64::from(report.conflicts);
        }

        let mut summary = report.summary();
        if let Some(e) = &failure {
            summary = summary.with_details(e.to_string());
        }
        if report.claimed > 0 || failure.is_some() {
            self.log_pass(&summary)?;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn settle(
        &self,
        claimed: &[ItemId],
        results: Vec<syncq_sync_protocol::ItemResult>,
        report: &mut UploadReport,
    ) -> SyncResult<()> {
        let results: HashMap<u64, _> = results.into_iter().map(|r| (r.id, r)).collect();
        for id in claimed {
            match results.get(&id.as_u64()) {
                Some(result) => match result.status {
                    ItemStatus::Success => {
                        self.queue.mark_synced(*id)?;
                        report.success += 1;
                    }
                    ItemStatus::Conflict => {
                        self.queue.mark_conflict(*id, &result.message)?;
                        report.conflicts += 1;
                    }
                    ItemStatus::Error => {
                        self.queue.mark_failed(*id, &result.message)?;
                        report.failed += 1;
                    }
                },
                None => {
                    self.queue.mark_failed(*id, "no result returned")?;
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Runs a download pass.
    ///
    /// Deferred updates are retried first. The watermark only moves after
    /// a round's updates are applied or persisted as deferred.
    pub fn download(&self) -> SyncResult<DownloadReport> {
        let _pass = self.pass.lock();
        let result = self.config.validate().and_then(|()| self.run_download());
        match result {
            Ok(report) => {
                self.set_state(SyncState::Synced);
                let mut stats = self.stats.write();
                stats.downloads_completed += 1;
                stats.last_sync_time = Some(self.clock.now());
                stats.last_error = None;
                Ok(report)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    fn run_download(&self) -> SyncResult<DownloadReport> {
        self.ensure_active()?;
        self.set_state(SyncState::Downloading);

        let mut report = DownloadReport::default();
        self.retry_deferred(&mut report)?;

        let limit = self.config.download_limit;
        let mut failure = None;
        for _ in 0..self.config.max_download_rounds {
            let request = DownloadRequest {
                node_id: self.config.node_id.clone(),
                apikey: self.config.api_key.clone(),
                since: self.cursor.since(),
                limit,
            };
            let response = match self.transport.download(&request) {
                Ok(response) => response,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            report.rounds += 1;
            if response.updates.is_empty() {
                break;
            }
            report.received += response.updates.len() as u32;

            let result = self.applier.process_batch(&response.updates);
            let now = self.clock.now();
            for update in response
                .updates
                .iter()
                .filter(|u| result.skipped_ids.contains(&u.id))
            {
                if !self.cursor.defer(update, now, self.config.max_deferred_attempts)? {
                    report.abandoned += 1;
                }
            }
            report.applied.merge(result);

            // Delivery records hide what was just returned, so a full round
            // asks again from the same watermark.
            if (response.updates.len() as u32) < limit {
                if let Some(latest) = response.updates.iter().map(|u| u.timestamp).max() {
                    self.cursor.advance(latest - 1)?;
                }
                break;
            }
        }

        report.deferred = self.cursor.deferred_count();
        report.watermark = self.cursor.since();

        tracing::info!(
            node_id = %self.config.node_id,
            rounds = report.rounds,
            received = report.received,
            applied = report.applied.success,
            skipped = report.applied.skipped,
            failed = report.applied.failed,
            watermark = report.watermark,
            "download pass finished"
        );

        {
            let mut stats = self.stats.write();
            stats.updates_applied += u64::from(report.applied.success);
            stats.updates_failed += u64::from(report.applied.failed);
            stats.updates_skipped += u64::from(report.applied.skipped);
            stats.updates_abandoned += u64::from(report.abandoned);
        }

        let mut summary = report.summary();
        if let Some(e) = &failure {
            summary = summary.with_details(e.to_string());
        }
        if report.applied.total() > 0 || failure.is_some() {
            self.log_pass(&summary)?;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn retry_deferred(&self, report: &mut DownloadReport) -> SyncResult<()> {
        let deferred = self.cursor.deferred();
        if deferred.is_empty() {
            return Ok(());
        }
        let updates: Vec<_> = deferred.into_iter().map(|d| d.update).collect();
        let result = self.applier.process_batch(&updates);
        let now = self.clock.now();
        for update in &updates {
            if result.skipped_ids.contains(&update.id) {
                if !self.cursor.defer(update, now, self.config.max_deferred_attempts)? {
                    report.abandoned += 1;
                }
            } else {
                self.cursor.resolve(update.id)?;
            }
        }
        tracing::debug!(
            retried = updates.len(),
            applied = result.success,
            still_deferred = result.skipped,
            abandoned = report.abandoned,
            "deferred updates retried"
        );
        report.retried = updates.len() as u32;
        report.applied.merge(result);
        Ok(())
    }

    /// Records a pass locally and reports it to the hub. The report is
    /// best-effort.
    fn log_pass(&self, summary: &SyncSummary) -> SyncResult<()> {
        self.sync_log.record(&self.config.node_id, summary)?;
        let request = ReportRequest {
            node_id: self.config.node_id.clone(),
            apikey: self.config.api_key.clone(),
            summary: summary.clone(),
        };
        if let Err(e) = self.transport.report(&request) {
            tracing::debug!(error = %e, "sync report not delivered");
        }
        Ok(())
    }

    /// Performs a full sync cycle: upload then download.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        let upload = self.upload()?;
        let download = self.download()?;
        Ok(SyncCycleResult {
            upload,
            download,
            duration: start.elapsed(),
        })
    }

    /// Removes old Synced queue items, local log entries and abandoned
    /// updates. Abandoned updates follow the log retention.
    pub fn cleanup(&self, log_retention: Duration) -> SyncResult<CleanupReport> {
        let items = self.queue.cleanup(self.queue.config().retention)?;
        let log_entries = self.sync_log.cleanup(log_retention)?;
        let cutoff = self.clock.now() - i64::try_from(log_retention.as_secs()).unwrap_or(i64::MAX);
        let abandoned = self.cursor.purge_abandoned(cutoff)?;
        Ok(CleanupReport {
            items,
            log_entries,
            abandoned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::MemoryDirectory;
    use crate::transport::MockTransport;
    use syncq_core::{ManualClock, QueueConfig, QueueStatus};
    use syncq_sync_protocol::{
        DownloadResponse, ItemResult, ResponseStatus, UpdateAction, UpdateType, UploadResponse,
        WireUpdate,
    };
    use syncq_testkit::{
        captured, course_data, enrolment_data, grade_payload, manual_clock, user_data, wire_update,
    };

    struct Harness {
        clock: Arc<ManualClock>,
        directory: Arc<MemoryDirectory>,
        engine: SyncEngine<MockTransport>,
    }

    fn harness_with(transport: MockTransport, queue: QueueConfig) -> Harness {
        harness_configured(transport, queue, |config| config)
    }

    fn harness_configured(
        transport: MockTransport,
        queue: QueueConfig,
        configure: impl FnOnce(SyncConfig) -> SyncConfig,
    ) -> Harness {
        let (clock, shared) = manual_clock(10_000);
        let directory = Arc::new(MemoryDirectory::new());
        let config = configure(
            SyncConfig::new("https://hub.example.org", "leaf-a", "secret-key")
                .with_batch_size(2)
                .with_download_limit(2),
        );
        let stores = LeafStores::in_memory(queue, shared.clone());
        let engine = SyncEngine::new(config, transport, stores, directory.clone(), shared);
        Harness {
            clock,
            directory,
            engine,
        }
    }

    fn harness() -> Harness {
        harness_with(MockTransport::active(), QueueConfig::default())
    }

    fn enqueue_grades(h: &Harness, count: i64) -> Vec<ItemId> {
        (0..count)
            .map(|i| {
                h.engine
                    .queue()
                    .enqueue(captured(grade_payload("leaf-a", i + 1, 50.0 + i as f64, 9_000)))
                    .unwrap()
                    .unwrap()
            })
            .collect()
    }

    fn download(updates: Vec<WireUpdate>) -> DownloadResponse {
        DownloadResponse {
            count: updates.len() as u32,
            since: 0,
            server_time: 10_000,
            updates,
        }
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Synced.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::Uploading.can_start_sync());
        assert!(SyncState::Checking.is_active());
        assert!(!SyncState::Synced.is_active());
    }

    #[test]
    fn upload_pass_drains_queue_in_batches() {
        let h = harness();
        enqueue_grades(&h, 3);

        let report = h.engine.upload().unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.success, 3);
        assert_eq!(h.engine.queue().stats().synced, 3);
        assert_eq!(h.engine.state(), SyncState::Synced);

        let uploads = h.engine.transport().uploads();
        assert_eq!(uploads[0].items.len(), 2);
        assert_eq!(uploads[0].apikey, "secret-key");

        // One local log entry and one report for the pass.
        assert_eq!(h.engine.sync_log().len(), 1);
        assert_eq!(h.engine.transport().reports().len(), 1);
    }

    #[test]
    fn per_item_results_drive_queue_status() {
        let transport = MockTransport::active();
        transport.set_upload_response(UploadResponse::from_results(vec![
            ItemResult::success(1, Some(42), "Grade created"),
            ItemResult::conflict(2, 43, "Hub grade is newer"),
        ]));
        let h = harness_with(transport, QueueConfig::default().with_max_retries(1));
        let ids = enqueue_grades(&h, 3);

        let report = h.engine.upload().unwrap();
        assert_eq!(report.success, 1);
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.failed, 1);

        let queue = h.engine.queue();
        assert_eq!(queue.get(ids[0]).unwrap().status, QueueStatus::Synced);
        let conflicted = queue.get(ids[1]).unwrap();
        assert_eq!(conflicted.status, QueueStatus::Conflict);
        assert_eq!(conflicted.last_error.as_deref(), Some("Hub grade is newer"));
        let missing = queue.get(ids[2]).unwrap();
        assert_eq!(missing.status, QueueStatus::Failed);
        assert_eq!(missing.last_error.as_deref(), Some("no result returned"));
    }

    #[test]
    fn offline_hub_fails_pass_before_claiming() {
        let h = harness();
        let ids = enqueue_grades(&h, 2);
        h.engine.transport().set_offline(true);

        let err = h.engine.upload().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.engine.state(), SyncState::Error);
        assert_eq!(h.engine.queue().get(ids[0]).unwrap().attempts, 0);

        h.engine.transport().set_offline(false);
        h.engine.upload().unwrap();
        assert_eq!(h.engine.queue().stats().synced, 2);
        assert!(h.engine.stats().last_error.is_none());
    }

    #[test]
    fn upload_failure_returns_batch_to_pending() {
        let h = harness();
        let ids = enqueue_grades(&h, 3);
        h.engine.transport().set_uploads_failing(true);

        let err = h.engine.upload().unwrap_err();
        assert!(err.is_retryable());
        // The pass stops after the first failed batch.
        assert_eq!(h.engine.transport().uploads().len(), 1);

        let first = h.engine.queue().get(ids[0]).unwrap();
        assert_eq!(first.status, QueueStatus::Pending);
        assert_eq!(first.attempts, 1);
        assert!(first.last_error.unwrap().contains("timeout"));
        assert_eq!(h.engine.queue().get(ids[2]).unwrap().attempts, 0);

        // The failed pass is still logged locally.
        assert_eq!(h.engine.sync_log().len(), 1);
        assert_eq!(h.engine.stats().items_failed, 2);

        h.engine.transport().set_uploads_failing(false);
        let report = h.engine.upload().unwrap();
        assert_eq!(report.success, 3);
    }

    #[test]
    fn inactive_node_is_authentication_failure() {
        let transport = MockTransport::new();
        transport.set_status_response(syncq_sync_protocol::StatusResponse::error(
            "Node is suspended",
            true,
            0,
        ));
        let h = harness_with(transport, QueueConfig::default());
        enqueue_grades(&h, 1);

        let err = h.engine.upload().unwrap_err();
        assert!(matches!(err, SyncError::Authentication(ref m) if m == "Node is suspended"));
        assert_eq!(h.engine.queue().stats().pending, 1);
        assert!(h.engine.transport().uploads().is_empty());
    }

    #[test]
    fn missing_configuration_fails_before_network() {
        let (_clock, shared) = manual_clock(0);
        let engine = SyncEngine::new(
            SyncConfig::new("https://hub.example.org", "leaf-a", ""),
            MockTransport::active(),
            LeafStores::in_memory(QueueConfig::default(), shared.clone()),
            Arc::new(MemoryDirectory::new()),
            shared,
        );
        assert!(matches!(engine.upload(), Err(SyncError::Configuration(_))));
        assert!(matches!(engine.download(), Err(SyncError::Configuration(_))));
        assert!(engine.transport().downloads().is_empty());
    }

    #[test]
    fn stale_processing_items_are_reclaimed() {
        let h = harness();
        let ids = enqueue_grades(&h, 1);
        h.engine.queue().mark_processing(&ids).unwrap();

        h.clock.advance(11 * 60);
        let report = h.engine.upload().unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.success, 1);
        assert_eq!(h.engine.queue().get(ids[0]).unwrap().attempts, 2);
    }

    #[test]
    fn download_applies_and_advances_watermark() {
        let transport = MockTransport::active();
        transport.push_download_response(download(vec![wire_update(
            1,
            UpdateType::Course,
            UpdateAction::Create,
            9_500,
            &course_data(500, "ALG"),
        )]));
        let h = harness_with(transport, QueueConfig::default());

        let report = h.engine.download().unwrap();
        assert_eq!(report.applied.success, 1);
        assert_eq!(report.watermark, 9_499);
        assert_eq!(h.directory.course_count(), 1);

        let requests = h.engine.transport().downloads();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].since, 0);
        assert_eq!(requests[0].limit, 2);
    }

    #[test]
    fn full_round_requests_again_from_same_watermark() {
        let transport = MockTransport::active();
        transport.push_download_response(download(vec![
            wire_update(1, UpdateType::Course, UpdateAction::Create, 100, &course_data(500, "ALG")),
            wire_update(2, UpdateType::Course, UpdateAction::Create, 200, &course_data(501, "GEO")),
        ]));
        transport.push_download_response(download(vec![wire_update(
            3,
            UpdateType::User,
            UpdateAction::Create,
            300,
            &user_data(70, "ana"),
        )]));
        let h = harness_with(transport, QueueConfig::default());

        let report = h.engine.download().unwrap();
        assert_eq!(report.rounds, 2);
        assert_eq!(report.received, 3);
        assert_eq!(report.watermark, 299);

        let requests = h.engine.transport().downloads();
        assert_eq!(requests[0].since, 0);
        assert_eq!(requests[1].since, 0);
    }

    #[test]
    fn skipped_updates_are_deferred_and_retried() {
        let transport = MockTransport::active();
        transport.push_download_response(download(vec![wire_update(
            5,
            UpdateType::Enrolment,
            UpdateAction::Create,
            100,
            &enrolment_data(70, 500),
        )]));
        let h = harness_with(transport, QueueConfig::default());

        let first = h.engine.download().unwrap();
        assert_eq!(first.applied.skipped, 1);
        assert_eq!(first.deferred, 1);

        // The prerequisites arrive in a later pass.
        h.engine.transport().push_download_response(download(vec![
            wire_update(6, UpdateType::User, UpdateAction::Create, 200, &user_data(70, "ana")),
        ]));
        let second = h.engine.download().unwrap();
        assert_eq!(second.retried, 1);
        assert_eq!(second.deferred, 1);

        h.engine.transport().push_download_response(download(vec![wire_update(
            7,
            UpdateType::Course,
            UpdateAction::Create,
            300,
            &course_data(500, "ALG"),
        )]));
        h.engine.download().unwrap();
        let third = h.engine.download().unwrap();
        assert_eq!(third.retried, 1);
        assert_eq!(third.applied.success, 1);
        assert_eq!(third.deferred, 0);

        let mapper = h.engine.applier().mappings().mapper("leaf-a");
        let user = mapper.resolve_reverse("user", 70).unwrap();
        let course = mapper.resolve_reverse("course", 500).unwrap();
        assert!(h.directory.enrolment(user, course).is_some());
    }

    #[test]
    fn orphaned_updates_are_abandoned_after_max_attempts() {
        let transport = MockTransport::active();
        transport.push_download_response(download(vec![wire_update(
            8,
            UpdateType::Enrolment,
            UpdateAction::Create,
            100,
            &enrolment_data(71, 501),
        )]));
        let h = harness_configured(transport, QueueConfig::default(), |config| {
            config.with_max_deferred_attempts(3)
        });

        let first = h.engine.download().unwrap();
        assert_eq!(first.deferred, 1);
        let second = h.engine.download().unwrap();
        assert_eq!((second.retried, second.deferred, second.abandoned), (1, 1, 0));

        let third = h.engine.download().unwrap();
        assert_eq!((third.retried, third.deferred, third.abandoned), (1, 0, 1));
        assert_eq!(h.engine.cursor().abandoned_count(), 1);
        assert_eq!(h.engine.stats().updates_abandoned, 1);
        assert!(third.summary().details.unwrap_or_default().contains("1 abandoned"));

        // No longer retried.
        let fourth = h.engine.download().unwrap();
        assert_eq!(fourth.retried, 0);
        assert_eq!(h.engine.cursor().abandoned()[0].attempts, 3);

        h.clock.advance(2 * 24 * 60 * 60);
        let removed = h.engine.cleanup(Duration::from_secs(24 * 60 * 60)).unwrap();
        assert_eq!(removed.abandoned, 1);
        assert_eq!(h.engine.cursor().abandoned_count(), 0);
    }

    #[test]
    fn sync_runs_both_passes() {
        let h = harness();
        enqueue_grades(&h, 1);
        h.engine.transport().push_download_response(download(vec![wire_update(
            1,
            UpdateType::Course,
            UpdateAction::Create,
            100,
            &course_data(500, "ALG"),
        )]));

        let result = h.engine.sync().unwrap();
        assert_eq!(result.upload.success, 1);
        assert_eq!(result.download.applied.success, 1);

        let stats = h.engine.stats();
        assert_eq!(stats.uploads_completed, 1);
        assert_eq!(stats.downloads_completed, 1);
        assert_eq!(stats.last_sync_time, Some(10_000));
    }

    #[test]
    fn register_returns_key_or_refusal() {
        let h = harness();
        let key = h.engine.register("Leaf A", "provision", None, None).unwrap();
        assert_eq!(key, "mock-key-leaf-a");

        let status = h.engine.check_status().unwrap();
        assert_eq!(status.status, ResponseStatus::Ok);
    }

    #[test]
    fn cleanup_removes_old_synced_items() {
        let h = harness();
        enqueue_grades(&h, 1);
        h.engine.upload().unwrap();

        h.clock.advance(31 * 24 * 60 * 60);
        let removed = h.engine.cleanup(Duration::from_secs(24 * 60 * 60)).unwrap();
        assert_eq!(removed.items, 1);
        assert_eq!(removed.log_entries, 1);
        assert_eq!(removed.abandoned, 0);
        assert!(h.engine.queue().is_empty());
    }
}
