//! Registered leaf nodes and their credentials.

use crate::auth::{ApiKeyHasher, KeyDigest};
use crate::error::{ServerError, ServerResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use syncq_core::{SharedClock, Table, Timestamp};
use syncq_storage::StorageBackend;

/// Whether a node may sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Allowed to sync.
    Active,
    /// Blocked by an operator.
    Suspended,
    /// Awaiting approval.
    Pending,
}

impl NodeStatus {
    /// Returns the lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "pending" => Ok(Self::Pending),
            other => Err(ServerError::InvalidRequest(format!("invalid status: {other}"))),
        }
    }
}

/// One registered leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredNode {
    /// Node id chosen at registration.
    pub node_id: String,
    /// Display name.
    pub display_name: String,
    /// Contact address.
    pub contact_email: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Salt of the API key digest.
    pub api_key_salt: Vec<u8>,
    /// API key digest; the plaintext is never stored.
    pub api_key_hash: Vec<u8>,
    /// Whether the node may sync.
    pub status: NodeStatus,
    /// Last upload.
    pub last_synced_at: Option<Timestamp>,
    /// Items in the last upload.
    pub last_sync_item_count: u32,
    /// Items applied across all uploads.
    pub total_synced_count: u64,
    /// Registration time.
    pub time_created: Timestamp,
    /// Last change.
    pub time_modified: Timestamp,
}

impl RegisteredNode {
    /// Returns true if the node may sync.
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    fn digest(&self) -> KeyDigest {
        KeyDigest {
            salt: self.api_key_salt.clone(),
            hash: self.api_key_hash.clone(),
        }
    }
}

/// Durable registry of leaf nodes.
pub struct NodeRegistry {
    nodes: Mutex<Table<String, RegisteredNode>>,
    hasher: ApiKeyHasher,
    clock: SharedClock,
}

impl NodeRegistry {
    /// Opens the registry over a journal backend.
    pub fn open(backend: Box<dyn StorageBackend>, clock: SharedClock) -> ServerResult<Self> {
        Ok(Self {
            nodes: Mutex::new(Table::open(backend)?),
            hasher: ApiKeyHasher::new(),
            clock,
        })
    }

    /// Creates a registry that lives only in memory.
    pub fn in_memory(clock: SharedClock) -> Self {
        Self {
            nodes: Mutex::new(Table::in_memory()),
            hasher: ApiKeyHasher::new(),
            clock,
        }
    }

    /// Registers a node and returns its one-time API key.
    pub fn register(
        &self,
        node_id: &str,
        display_name: &str,
        contact_email: Option<String>,
        description: Option<String>,
    ) -> ServerResult<String> {
        let node_id = node_id.trim();
        if node_id.is_empty() {
            return Err(ServerError::InvalidRequest("node id is required".into()));
        }

        let mut nodes = self.nodes.lock();
        let key = node_id.to_string();
        if nodes.contains(&key) {
            return Err(ServerError::InvalidRequest(format!(
                "node already registered: {node_id}"
            )));
        }

        let (plaintext, digest) = self.hasher.issue()?;
        let now = self.clock.now();
        let node = RegisteredNode {
            node_id: key.clone(),
            display_name: display_name.to_string(),
            contact_email,
            description,
            api_key_salt: digest.salt,
            api_key_hash: digest.hash,
            status: NodeStatus::Active,
            last_synced_at: None,
            last_sync_item_count: 0,
            total_synced_count: 0,
            time_created: now,
            time_modified: now,
        };
        nodes.put(key, node)?;

        tracing::info!(node_id, display_name, "node registered");
        Ok(plaintext)
    }

    /// Replaces a node's API key and returns the new one.
    pub fn rotate_key(&self, node_id: &str) -> ServerResult<String> {
        let (plaintext, digest) = self.hasher.issue()?;
        self.modify(node_id, |node| {
            node.api_key_salt = digest.salt;
            node.api_key_hash = digest.hash;
        })?;
        tracing::info!(node_id, "api key rotated");
        Ok(plaintext)
    }

    /// Checks credentials and returns the node if it may sync.
    ///
    /// # Errors
    ///
    /// - [`ServerError::UnknownNode`] if the node is not registered
    /// - [`ServerError::AuthenticationFailed`] if the key does not match
    /// - [`ServerError::NotAuthorized`] if the node is not active
    pub fn verify(&self, node_id: &str, api_key: &str) -> ServerResult<RegisteredNode> {
        let node = self.authenticate(node_id, api_key)?;
        if !node.is_active() {
            return Err(ServerError::NotAuthorized(format!("Node is {}", node.status)));
        }
        Ok(node)
    }

    /// Checks credentials without looking at the node status.
    pub fn authenticate(&self, node_id: &str, api_key: &str) -> ServerResult<RegisteredNode> {
        let node = self
            .get(node_id)
            .ok_or_else(|| ServerError::UnknownNode(node_id.to_string()))?;
        if !self.hasher.verify(api_key, &node.digest()) {
            tracing::warn!(node_id, "api key rejected");
            return Err(ServerError::AuthenticationFailed("Invalid API key".into()));
        }
        Ok(node)
    }

    /// Sets a node's status.
    pub fn set_status(&self, node_id: &str, status: NodeStatus) -> ServerResult<()> {
        self.modify(node_id, |node| node.status = status)?;
        tracing::info!(node_id, %status, "node status changed");
        Ok(())
    }

    /// Records an upload.
    pub fn record_sync(&self, node_id: &str, item_count: u32, success_count: u32) -> ServerResult<()> {
        let now = self.clock.now();
        self.modify(node_id, |node| {
            node.last_synced_at = Some(now);
            node.last_sync_item_count = item_count;
            node.total_synced_count += u64::from(success_count);
        })
    }

    /// Removes a node. Returns false if it did not exist.
    pub fn remove(&self, node_id: &str) -> ServerResult<bool> {
        let removed = self.nodes.lock().delete(&node_id.to_string())?;
        Ok(removed.is_some())
    }

    /// Returns a node.
    pub fn get(&self, node_id: &str) -> Option<RegisteredNode> {
        self.nodes.lock().get(&node_id.to_string()).cloned()
    }

    /// Lists nodes by display name, optionally filtered by status.
    pub fn list(&self, status: Option<NodeStatus>) -> Vec<RegisteredNode> {
        let nodes = self.nodes.lock();
        let mut listed: Vec<RegisteredNode> = nodes
            .values()
            .filter(|n| status.map_or(true, |s| n.status == s))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        listed
    }

    /// Ids of active nodes.
    pub fn active_ids(&self) -> Vec<String> {
        self.list(Some(NodeStatus::Active))
            .into_iter()
            .map(|n| n.node_id)
            .collect()
    }

    /// Active nodes that have not synced within `threshold`, least recent
    /// first.
    pub fn overdue(&self, threshold: Duration) -> Vec<RegisteredNode> {
        let cutoff = self.clock.now() - i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
        let mut overdue: Vec<RegisteredNode> = self
            .list(Some(NodeStatus::Active))
            .into_iter()
            .filter(|n| n.last_synced_at.map_or(true, |t| t < cutoff))
            .collect();
        overdue.sort_by_key(|n| n.last_synced_at);
        overdue
    }

    fn modify<F>(&self, node_id: &str, apply: F) -> ServerResult<()>
    where
        F: FnOnce(&mut RegisteredNode),
    {
        let now = self.clock.now();
        let mut nodes = self.nodes.lock();
        let key = node_id.to_string();
        let mut node = nodes
            .get(&key)
            .cloned()
            .ok_or_else(|| ServerError::UnknownNode(node_id.to_string()))?;
        apply(&mut node);
        node.time_modified = now;
        nodes.put(key, node)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use syncq_core::ManualClock;
    use syncq_storage::InMemoryBackend;

    fn registry() -> (NodeRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        (NodeRegistry::in_memory(clock.clone()), clock)
    }

    #[test]
    fn register_and_verify() {
        let (registry, _) = registry();
        let key = registry.register("leaf-a", "Alpha School", None, None).unwrap();
        let node = registry.verify("leaf-a", &key).unwrap();
        assert_eq!(node.display_name, "Alpha School");
        assert!(node.is_active());
        assert_ne!(node.api_key_hash, key.as_bytes());
    }

    #[test]
    fn duplicate_registration_fails() {
        let (registry, _) = registry();
        registry.register("leaf-a", "Alpha", None, None).unwrap();
        assert!(matches!(
            registry.register("leaf-a", "Again", None, None),
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(registry.register("  ", "Blank", None, None).is_err());
    }

    #[test]
    fn verify_failures_are_distinct() {
        let (registry, _) = registry();
        let key = registry.register("leaf-a", "Alpha", None, None).unwrap();

        assert!(matches!(
            registry.verify("leaf-z", &key),
            Err(ServerError::UnknownNode(_))
        ));
        assert!(matches!(
            registry.verify("leaf-a", "nope"),
            Err(ServerError::AuthenticationFailed(_))
        ));

        registry.set_status("leaf-a", NodeStatus::Suspended).unwrap();
        let err = registry.verify("leaf-a", &key).unwrap_err();
        assert!(matches!(err, ServerError::NotAuthorized(_)));
        assert!(err.to_string().contains("suspended"));
        assert!(registry.authenticate("leaf-a", &key).is_ok());
    }

    #[test]
    fn rotation_invalidates_old_key() {
        let (registry, _) = registry();
        let old = registry.register("leaf-a", "Alpha", None, None).unwrap();
        let new = registry.rotate_key("leaf-a").unwrap();
        assert!(registry.verify("leaf-a", &old).is_err());
        assert!(registry.verify("leaf-a", &new).is_ok());
        assert!(matches!(
            registry.rotate_key("leaf-z"),
            Err(ServerError::UnknownNode(_))
        ));
    }

    #[test]
    fn sync_stats_accumulate() {
        let (registry, _) = registry();
        registry.register("leaf-a", "Alpha", None, None).unwrap();
        registry.record_sync("leaf-a", 10, 8).unwrap();
        registry.record_sync("leaf-a", 5, 5).unwrap();
        let node = registry.get("leaf-a").unwrap();
        assert_eq!(node.last_sync_item_count, 5);
        assert_eq!(node.total_synced_count, 13);
        assert_eq!(node.last_synced_at, Some(10_000));
    }

    #[test]
    fn overdue_lists_stale_active_nodes() {
        let (registry, clock) = registry();
        registry.register("never", "Never", None, None).unwrap();
        registry.register("fresh", "Fresh", None, None).unwrap();
        registry.register("stale", "Stale", None, None).unwrap();
        registry.register("off", "Off", None, None).unwrap();
        registry.record_sync("stale", 1, 1).unwrap();
        registry.set_status("off", NodeStatus::Suspended).unwrap();
        clock.advance(90_000);
        registry.record_sync("fresh", 1, 1).unwrap();

        let ids: Vec<String> = registry
            .overdue(Duration::from_secs(86_400))
            .into_iter()
            .map(|n| n.node_id)
            .collect();
        assert_eq!(ids, vec!["never".to_string(), "stale".to_string()]);
    }

    #[test]
    fn registry_survives_reopen() {
        let backend = InMemoryBackend::new();
        let clock: SharedClock = Arc::new(ManualClock::new(0));
        let key = {
            let registry = NodeRegistry::open(Box::new(backend.clone()), clock.clone()).unwrap();
            registry.register("leaf-a", "Alpha", Some("it@alpha.example".into()), None).unwrap()
        };
        let registry = NodeRegistry::open(Box::new(backend), clock).unwrap();
        assert!(registry.verify("leaf-a", &key).is_ok());
        assert!(registry.remove("leaf-a").unwrap());
        assert!(!registry.remove("leaf-a").unwrap());
    }

    #[test]
    fn status_parsing() {
        assert_eq!("pending".parse::<NodeStatus>().unwrap(), NodeStatus::Pending);
        assert!("gone".parse::<NodeStatus>().is_err());
    }
}
