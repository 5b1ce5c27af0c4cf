//! Durable hub state.

use crate::distribution::DistributionManager;
use crate::error::ServerResult;
use crate::registry::NodeRegistry;
use std::sync::Arc;
use syncq_core::{DataDir, MappingStore, SharedClock, SyncLog};

/// Every table the hub owns.
pub struct HubStores {
    /// Registered leaf nodes.
    pub registry: NodeRegistry,
    /// Outgoing updates and delivery records.
    pub distribution: DistributionManager,
    /// Leaf-to-hub identity mappings.
    pub mappings: Arc<MappingStore>,
    /// Audit trail of sync passes reported by leaves.
    pub sync_log: SyncLog,
}

impl HubStores {
    /// Opens all tables inside `dir`.
    pub fn open(dir: &DataDir, clock: SharedClock) -> ServerResult<Self> {
        Ok(Self {
            registry: NodeRegistry::open(dir.journal("nodes")?, clock.clone())?,
            distribution: DistributionManager::open(
                dir.journal("updates")?,
                dir.journal("deliveries")?,
                clock.clone(),
            )?,
            mappings: Arc::new(MappingStore::open(dir.journal("mappings")?, clock.clone())?),
            sync_log: SyncLog::open(dir.journal("sync_log")?, clock)?,
        })
    }

    /// Creates tables that live only in memory.
    pub fn in_memory(clock: SharedClock) -> Self {
        Self {
            registry: NodeRegistry::in_memory(clock.clone()),
            distribution: DistributionManager::in_memory(clock.clone()),
            mappings: Arc::new(MappingStore::in_memory(clock.clone())),
            sync_log: SyncLog::in_memory(clock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Target;
    use syncq_core::ManualClock;
    use syncq_sync_protocol::{UpdateAction, UpdateType};
    use tempfile::tempdir;

    #[test]
    fn reopen_keeps_hub_state() {
        let tmp = tempdir().unwrap();
        let clock: SharedClock = Arc::new(ManualClock::new(500));

        {
            let dir = DataDir::open(tmp.path(), true).unwrap();
            let stores = HubStores::open(&dir, clock.clone()).unwrap();
            stores.registry.register("leaf-a", "Leaf A", None, None).unwrap();
            stores
                .distribution
                .publish(
                    Target::Broadcast,
                    UpdateType::Course,
                    UpdateAction::Create,
                    Some(1),
                    serde_json::json!({"id": 1}),
                    2,
                )
                .unwrap();
            stores.mappings.mapper("leaf-a").upsert("grade_grades", 3, 30, None).unwrap();
        }

        let dir = DataDir::open(tmp.path(), false).unwrap();
        let stores = HubStores::open(&dir, clock).unwrap();
        assert!(stores.registry.get("leaf-a").is_some());
        assert_eq!(stores.distribution.pending_for("leaf-a", 0, 10).len(), 1);
        assert_eq!(stores.mappings.mapper("leaf-a").resolve("grade_grades", 3), Some(30));
    }
}
