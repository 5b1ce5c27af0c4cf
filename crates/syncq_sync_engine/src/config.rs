//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;
use syncq_sync_protocol::MAX_DOWNLOAD_LIMIT;

/// Configuration for a leaf's sync passes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Hub base URL (e.g., "https://hub.example.org").
    pub hub_url: String,
    /// This leaf's node id.
    pub node_id: String,
    /// API key issued by the hub at registration.
    pub api_key: String,
    /// Maximum queue items per upload.
    pub batch_size: usize,
    /// Maximum updates requested per download round.
    pub download_limit: u32,
    /// Maximum download rounds in one pass.
    pub max_download_rounds: u32,
    /// Times a skipped update is retried before it is abandoned.
    pub max_deferred_attempts: u32,
    /// Request timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Whether sync passes run at all.
    pub enabled: bool,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(
        hub_url: impl Into<String>,
        node_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            hub_url: hub_url.into(),
            node_id: node_id.into(),
            api_key: api_key.into(),
            batch_size: 100,
            download_limit: MAX_DOWNLOAD_LIMIT,
            max_download_rounds: 10,
            max_deferred_attempts: 10,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            enabled: true,
        }
    }

    /// Sets the upload batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the per-round download limit, capped at the protocol maximum.
    pub fn with_download_limit(mut self, limit: u32) -> Self {
        self.download_limit = limit.min(MAX_DOWNLOAD_LIMIT);
        self
    }

    /// Sets the maximum download rounds per pass.
    pub fn with_max_download_rounds(mut self, rounds: u32) -> Self {
        self.max_download_rounds = rounds;
        self
    }

    /// Sets how many skips a deferred update gets before it is abandoned.
    pub fn with_max_deferred_attempts(mut self, attempts: u32) -> Self {
        self.max_deferred_attempts = attempts;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enables or disables sync.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Checks that everything a network call needs is present.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.enabled {
            return Err(SyncError::Configuration("sync is disabled".into()));
        }
        if self.hub_url.trim().is_empty() {
            return Err(SyncError::Configuration("hub URL is not configured".into()));
        }
        if !(self.hub_url.starts_with("http://") || self.hub_url.starts_with("https://")) {
            return Err(SyncError::Configuration(format!(
                "hub URL must be http(s): {}",
                self.hub_url
            )));
        }
        if self.node_id.trim().is_empty() {
            return Err(SyncError::Configuration("node id is not configured".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(SyncError::Configuration("API key is not configured".into()));
        }
        if self.batch_size == 0 || self.download_limit == 0 || self.max_deferred_attempts == 0 {
            return Err(SyncError::Configuration(
                "batch size, download limit and deferred attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "", "")
    }
}
