//! JSON profile holding leaf and hub settings.
//!
//! ```json
//! {
//!   "leaf": { "hubUrl": "https://hub.example.org", "nodeId": "leaf-a", "apiKey": "..." },
//!   "hub": { "bindAddr": "0.0.0.0:8080", "registrationSecret": "..." }
//! }
//! ```
//!
//! Missing fields take defaults; command-line flags override file values.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use syncq_core::{DuplicatePolicy, Durability, QueueConfig};
use syncq_sync_engine::SyncConfig;
use syncq_sync_server::{MemoryHubDirectory, ServerConfig};
use thiserror::Error;

/// Default profile file name.
pub const DEFAULT_PROFILE: &str = "syncq.json";

/// Profile loading errors.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// Profile path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not a valid profile.
    #[error("invalid profile {path}: {source}")]
    Parse {
        /// Profile path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// A value is out of range.
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Settings file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Leaf settings.
    pub leaf: LeafProfile,
    /// Hub settings.
    pub hub: HubProfile,
}

impl Profile {
    /// Loads `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no profile file, using defaults");
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path).map_err(|source| ProfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ProfileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Leaf node settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeafProfile {
    /// Hub base URL.
    pub hub_url: String,
    /// This leaf's node id.
    pub node_id: String,
    /// API key issued at registration.
    pub api_key: String,
    /// Directory holding the leaf journals.
    pub data_dir: PathBuf,
    /// Items per upload batch.
    pub batch_size: usize,
    /// Updates per download round.
    pub download_limit: u32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Upload attempts before an item fails permanently.
    pub max_retries: u32,
    /// Duplicate suppression window in seconds; 0 disables it.
    pub duplicate_window_secs: u64,
    /// Days Synced items are kept.
    pub retention_days: u64,
    /// Skips before a deferred update is abandoned.
    pub max_deferred_attempts: u32,
    /// Sync queue writes to the device before acknowledging them.
    pub sync_writes: bool,
}

impl Default for LeafProfile {
    fn default() -> Self {
        Self {
            hub_url: String::new(),
            node_id: String::new(),
            api_key: String::new(),
            data_dir: PathBuf::from("syncq-leaf"),
            batch_size: 100,
            download_limit: 500,
            timeout_secs: 30,
            max_retries: 5,
            duplicate_window_secs: 3600,
            retention_days: 30,
            max_deferred_attempts: 10,
            sync_writes: true,
        }
    }
}

impl LeafProfile {
    /// Engine settings.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new(&self.hub_url, &self.node_id, &self.api_key)
            .with_batch_size(self.batch_size)
            .with_download_limit(self.download_limit)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_deferred_attempts(self.max_deferred_attempts)
    }

    /// Queue settings.
    pub fn queue_config(&self) -> QueueConfig {
        let duplicates = match self.duplicate_window_secs {
            0 => DuplicatePolicy::Disabled,
            secs => DuplicatePolicy::Window(Duration::from_secs(secs)),
        };
        QueueConfig::new()
            .with_max_retries(self.max_retries)
            .with_duplicate_policy(duplicates)
            .with_retention(days(self.retention_days))
            .with_durability(if self.sync_writes {
                Durability::Sync
            } else {
                Durability::Flush
            })
    }
}

/// Hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubProfile {
    /// Listen address.
    pub bind_addr: String,
    /// Directory holding the hub journals.
    pub data_dir: PathBuf,
    /// Whether sync traffic is accepted.
    pub enabled: bool,
    /// Passphrase leaves present to self-register; unset disables it.
    pub registration_secret: Option<String>,
    /// Directory served as artifacts.
    pub artifact_dir: Option<PathBuf>,
    /// Hours without a sync before an active node is overdue.
    pub overdue_hours: u64,
    /// Days delivered updates are kept.
    pub distribution_retention_days: u64,
    /// Days sync log entries are kept.
    pub log_retention_days: u64,
    /// JSON file with the hub records uploads resolve against.
    pub directory_file: Option<PathBuf>,
}

impl Default for HubProfile {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            data_dir: PathBuf::from("syncq-hub"),
            enabled: true,
            registration_secret: None,
            artifact_dir: None,
            overdue_hours: 24,
            distribution_retention_days: 30,
            log_retention_days: 90,
            directory_file: None,
        }
    }
}

impl HubProfile {
    /// Server settings.
    pub fn server_config(&self) -> Result<ServerConfig, ProfileError> {
        let addr: SocketAddr = self
            .bind_addr
            .parse()
            .map_err(|e| ProfileError::Invalid(format!("bindAddr {}: {e}", self.bind_addr)))?;
        let mut config = ServerConfig::new(addr)
            .with_enabled(self.enabled)
            .with_overdue_threshold(Duration::from_secs(self.overdue_hours * 60 * 60))
            .with_distribution_retention(days(self.distribution_retention_days))
            .with_log_retention(days(self.log_retention_days));
        if let Some(secret) = self.registration_secret.as_deref().filter(|s| !s.is_empty()) {
            config = config.with_registration(secret);
        }
        if let Some(dir) = &self.artifact_dir {
            config = config.with_artifact_dir(dir);
        }
        Ok(config)
    }

    /// Builds the hub directory, seeded from `directory_file` when set.
    pub fn directory(&self) -> Result<MemoryHubDirectory, ProfileError> {
        let directory = MemoryHubDirectory::new();
        let Some(path) = &self.directory_file else {
            return Ok(directory);
        };
        let bytes = std::fs::read(path).map_err(|source| ProfileError::Read {
            path: path.clone(),
            source,
        })?;
        let seed: DirectorySeed =
            serde_json::from_slice(&bytes).map_err(|source| ProfileError::Parse {
                path: path.clone(),
                source,
            })?;
        seed.apply(&directory);
        Ok(directory)
    }
}

/// Hub records loaded at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySeed {
    /// Users.
    pub users: Vec<SeedUser>,
    /// Courses with their grade items.
    pub courses: Vec<SeedCourse>,
}

/// A seeded hub user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedUser {
    /// Login name.
    pub username: String,
    /// Email.
    pub email: String,
    /// External identifier.
    pub idnumber: String,
}

/// A seeded hub course.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeedCourse {
    /// Short name.
    pub shortname: String,
    /// External identifier.
    pub idnumber: String,
    /// Grade items as `{idnumber, name}`.
    pub grade_items: Vec<SeedGradeItem>,
}

/// A seeded grade item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedGradeItem {
    /// External identifier.
    pub idnumber: String,
    /// Display name.
    pub name: String,
}

impl DirectorySeed {
    fn apply(&self, directory: &MemoryHubDirectory) {
        for user in &self.users {
            directory.add_user(&user.username, &user.email, &user.idnumber);
        }
        for course in &self.courses {
            let id = directory.add_course(&course.shortname, &course.idnumber);
            for item in &course.grade_items {
                directory.add_grade_item(id, &item.idnumber, &item.name);
            }
        }
        tracing::info!(
            users = self.users.len(),
            courses = self.courses.len(),
            "hub directory seeded"
        );
    }
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n * 24 * 60 * 60)
}
