//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use syncq_sync_protocol::{ConflictPolicy, MAX_DOWNLOAD_LIMIT};

/// Configuration for the hub.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Whether the hub accepts sync traffic at all.
    pub enabled: bool,
    /// Whether leaves may self-register.
    pub allow_registration: bool,
    /// Provisioning passphrase required to register.
    pub registration_secret: Option<String>,
    /// Maximum updates returned by one download.
    pub max_download_batch: u32,
    /// Maximum items accepted by one upload.
    pub max_upload_batch: u32,
    /// Active nodes not synced within this window are reported overdue.
    pub overdue_threshold: Duration,
    /// Minimum age before a fully delivered update can be cleaned up.
    pub distribution_retention: Duration,
    /// How long sync log entries are kept.
    pub log_retention: Duration,
    /// Directory served by the artifact endpoint.
    pub artifact_dir: Option<PathBuf>,
    /// Conflict policy for uploaded events.
    pub conflict_policy: ConflictPolicy,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            enabled: true,
            allow_registration: false,
            registration_secret: None,
            max_download_batch: MAX_DOWNLOAD_LIMIT,
            max_upload_batch: 500,
            overdue_threshold: Duration::from_secs(24 * 60 * 60),
            distribution_retention: Duration::from_secs(30 * 24 * 60 * 60),
            log_retention: Duration::from_secs(90 * 24 * 60 * 60),
            artifact_dir: None,
            conflict_policy: ConflictPolicy::default(),
        }
    }

    /// Enables or disables sync.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Allows self-registration with the given passphrase.
    pub fn with_registration(mut self, secret: impl Into<String>) -> Self {
        self.allow_registration = true;
        self.registration_secret = Some(secret.into());
        self
    }

    /// Sets the maximum download batch, capped at the protocol limit.
    pub fn with_max_download_batch(mut self, size: u32) -> Self {
        self.max_download_batch = size.min(MAX_DOWNLOAD_LIMIT);
        self
    }

    /// Sets the maximum upload batch.
    pub fn with_max_upload_batch(mut self, size: u32) -> Self {
        self.max_upload_batch = size;
        self
    }

    /// Sets the overdue threshold.
    pub fn with_overdue_threshold(mut self, threshold: Duration) -> Self {
        self.overdue_threshold = threshold;
        self
    }

    /// Sets the distribution retention.
    pub fn with_distribution_retention(mut self, retention: Duration) -> Self {
        self.distribution_retention = retention;
        self
    }

    /// Sets the sync log retention.
    pub fn with_log_retention(mut self, retention: Duration) -> Self {
        self.log_retention = retention;
        self
    }

    /// Sets the artifact directory.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert!(config.enabled);
        assert!(!config.allow_registration);
        assert_eq!(config.max_download_batch, 500);
        assert_eq!(config.overdue_threshold.as_secs(), 86_400);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_registration("provision-me")
            .with_max_download_batch(10_000)
            .with_max_upload_batch(50);

        assert!(config.allow_registration);
        assert_eq!(config.registration_secret.as_deref(), Some("provision-me"));
        assert_eq!(config.max_download_batch, 500);
        assert_eq!(config.max_upload_batch, 50);
    }
}
