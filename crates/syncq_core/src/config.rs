//! Queue configuration.

use std::time::Duration;
use syncq_storage::Durability;

/// How repeated payloads are suppressed at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// An item whose payload hash matches a non-Failed item created within
    /// the window is dropped.
    Window(Duration),
    /// Every captured event is queued.
    Disabled,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self::Window(Duration::from_secs(60 * 60))
    }
}

/// Configuration for the outbound queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Dispatch attempts before an item is failed permanently.
    pub max_retries: u32,
    /// Duplicate suppression policy.
    pub duplicate_policy: DuplicatePolicy,
    /// Age after which a Processing item is considered abandoned.
    pub processing_timeout: Duration,
    /// How long Synced items are kept before cleanup removes them.
    pub retention: Duration,
    /// Whether an enqueue or status change is synced to the device before
    /// it is acknowledged.
    pub durability: Durability,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            duplicate_policy: DuplicatePolicy::default(),
            processing_timeout: Duration::from_secs(10 * 60),
            retention: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            durability: Durability::Sync,
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the duplicate suppression policy.
    #[must_use]
    pub const fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Sets the stale Processing timeout.
    #[must_use]
    pub const fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Sets the retention period for Synced items.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Sets how far journal writes are pushed before returning.
    #[must_use]
    pub const fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = QueueConfig::new();
        assert_eq!(config.max_retries, 5);
        assert_eq!(
            config.duplicate_policy,
            DuplicatePolicy::Window(Duration::from_secs(3600))
        );
        assert_eq!(config.retention.as_secs(), 2_592_000);
        assert_eq!(config.durability, Durability::Sync);
    }

    #[test]
    fn builder() {
        let config = QueueConfig::new()
            .with_max_retries(2)
            .with_duplicate_policy(DuplicatePolicy::Disabled)
            .with_durability(Durability::Flush);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.durability, Durability::Flush);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Disabled);
    }
}
