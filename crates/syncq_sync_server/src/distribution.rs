//! Hub-originated updates and their per-node delivery records.
//!
//! An update targets one node or every node. A node sees an update until
//! it has a delivery record for it; records are written when the update is
//! returned by a download, so a download never hands out the same update
//! twice to the same node.

use crate::error::ServerResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use syncq_core::{HubId, SharedClock, Table, Timestamp};
use syncq_storage::StorageBackend;
use syncq_sync_protocol::{
    CourseData, EnrolmentData, UpdateAction, UpdateType, UserData, WireUpdate,
};

/// Who an update is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A single node.
    Node(String),
    /// Every node.
    Broadcast,
}

impl Target {
    fn into_node(self) -> Option<String> {
        match self {
            Target::Node(node) => Some(node),
            Target::Broadcast => None,
        }
    }
}

/// One outgoing change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionUpdate {
    /// Update id.
    pub id: u64,
    /// Target node, `None` for broadcast.
    pub target_node: Option<String>,
    /// Object kind.
    pub update_type: UpdateType,
    /// Create, update or delete.
    pub action: UpdateAction,
    /// Table of the object.
    pub object_table: String,
    /// Hub id of the object.
    pub object_id: Option<HubId>,
    /// Type-specific payload.
    pub payload: serde_json::Value,
    /// Lower is delivered first.
    pub priority: u8,
    /// Creation time.
    pub time_created: Timestamp,
}

impl DistributionUpdate {
    /// Whether `node_id` should receive this update.
    pub fn is_for(&self, node_id: &str) -> bool {
        self.target_node.as_deref().map_or(true, |t| t == node_id)
    }

    /// Wire form sent to leaves.
    pub fn to_wire(&self) -> WireUpdate {
        WireUpdate {
            id: self.id,
            update_type: self.update_type.clone(),
            action: self.action.clone(),
            priority: self.priority,
            timestamp: self.time_created,
            data: self.payload.clone(),
        }
    }
}

/// Delivery of one update to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Receiving node.
    pub node_id: String,
    /// Delivered update.
    pub update_id: u64,
    /// Always `delivered`.
    pub status: String,
    /// Delivery time.
    pub time_delivered: Timestamp,
}

/// Counters for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistributionStats {
    /// Updates stored.
    pub total: usize,
    /// Broadcast updates stored.
    pub broadcast: usize,
    /// Targeted updates stored.
    pub targeted: usize,
    /// Delivery records stored.
    pub deliveries: usize,
}

struct State {
    updates: Table<u64, DistributionUpdate>,
    deliveries: Table<(String, u64), DeliveryRecord>,
}

impl State {
    fn delivered(&self, node_id: &str, update_id: u64) -> bool {
        self.deliveries.contains(&(node_id.to_string(), update_id))
    }

    fn pending(&self, node_id: &str, since: Timestamp, limit: usize) -> Vec<DistributionUpdate> {
        let mut pending: Vec<DistributionUpdate> = self
            .updates
            .values()
            .filter(|u| u.is_for(node_id) && u.time_created > since)
            .filter(|u| !self.delivered(node_id, u.id))
            .cloned()
            .collect();
        pending.sort_by_key(|u| (u.priority, u.time_created, u.id));
        pending.truncate(limit);
        pending
    }

    fn record_delivery(&mut self, node_id: &str, update_id: u64, now: Timestamp) -> ServerResult<bool> {
        if self.delivered(node_id, update_id) {
            return Ok(false);
        }
        let record = DeliveryRecord {
            node_id: node_id.to_string(),
            update_id,
            status: "delivered".into(),
            time_delivered: now,
        };
        self.deliveries.put((node_id.to_string(), update_id), record)?;
        Ok(true)
    }
}

/// Records outgoing updates and tracks their delivery.
pub struct DistributionManager {
    state: Mutex<State>,
    clock: SharedClock,
}

impl DistributionManager {
    /// Opens the manager over two journal backends.
    pub fn open(
        updates: Box<dyn StorageBackend>,
        deliveries: Box<dyn StorageBackend>,
        clock: SharedClock,
    ) -> ServerResult<Self> {
        Ok(Self {
            state: Mutex::new(State {
                updates: Table::open(updates)?,
                deliveries: Table::open(deliveries)?,
            }),
            clock,
        })
    }

    /// Creates a manager that lives only in memory.
    pub fn in_memory(clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(State {
                updates: Table::in_memory(),
                deliveries: Table::in_memory(),
            }),
            clock,
        }
    }

    /// Records one update and returns its id.
    pub fn publish(
        &self,
        target: Target,
        update_type: UpdateType,
        action: UpdateAction,
        object_id: Option<HubId>,
        payload: serde_json::Value,
        priority: u8,
    ) -> ServerResult<u64> {
        let mut state = self.state.lock();
        let id = state.updates.max_key_seen().map_or(1, |last| last + 1);
        let update = DistributionUpdate {
            id,
            target_node: target.into_node(),
            object_table: update_type.object_table().to_string(),
            update_type,
            action,
            object_id,
            payload,
            priority,
            time_created: self.clock.now(),
        };
        tracing::info!(
            update_id = id,
            update_type = %update.update_type,
            action = %update.action,
            target = update.target_node.as_deref().unwrap_or("*"),
            "update published"
        );
        state.updates.put(id, update)?;
        Ok(id)
    }

    /// Publishes a course update.
    pub fn publish_course(
        &self,
        target: Target,
        action: UpdateAction,
        course: &CourseData,
    ) -> ServerResult<u64> {
        self.publish(
            target,
            UpdateType::Course,
            action,
            Some(course.id),
            to_value(course)?,
            2,
        )
    }

    /// Publishes a user update.
    pub fn publish_user(
        &self,
        target: Target,
        action: UpdateAction,
        user: &UserData,
    ) -> ServerResult<u64> {
        self.publish(
            target,
            UpdateType::User,
            action,
            Some(user.id),
            to_value(user)?,
            3,
        )
    }

    /// Publishes an enrolment update.
    pub fn publish_enrolment(
        &self,
        target: Target,
        action: UpdateAction,
        enrolment: &EnrolmentData,
    ) -> ServerResult<u64> {
        self.publish(
            target,
            UpdateType::Enrolment,
            action,
            None,
            to_value(enrolment)?,
            3,
        )
    }

    /// Updates for `node_id` created after `since` and not yet delivered to
    /// it, ordered by priority then creation time.
    pub fn pending_for(&self, node_id: &str, since: Timestamp, limit: usize) -> Vec<DistributionUpdate> {
        self.state.lock().pending(node_id, since, limit)
    }

    /// Selects pending updates for `node_id` and records them as delivered
    /// under one lock, so concurrent downloads by the same node never
    /// receive the same update.
    ///
    /// If recording a delivery fails, the updates already recorded are
    /// still returned; the rest stay pending.
    pub fn take_pending(
        &self,
        node_id: &str,
        since: Timestamp,
        limit: usize,
    ) -> ServerResult<Vec<DistributionUpdate>> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let pending = state.pending(node_id, since, limit);
        let mut taken = Vec::with_capacity(pending.len());
        for update in pending {
            match state.record_delivery(node_id, update.id, now) {
                Ok(_) => taken.push(update),
                Err(e) if taken.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        node_id,
                        update_id = update.id,
                        error = %e,
                        "delivery record failed, returning partial batch"
                    );
                    break;
                }
            }
        }
        Ok(taken)
    }

    /// Records delivery of `update_id` to `node_id`. Returns false if it was
    /// already recorded.
    pub fn acknowledge(&self, node_id: &str, update_id: u64) -> ServerResult<bool> {
        let now = self.clock.now();
        self.state.lock().record_delivery(node_id, update_id, now)
    }

    /// Returns an update.
    pub fn get(&self, update_id: u64) -> Option<DistributionUpdate> {
        self.state.lock().updates.get(&update_id).cloned()
    }

    /// Number of nodes that received `update_id`.
    pub fn delivered_count(&self, update_id: u64) -> usize {
        self.state
            .lock()
            .deliveries
            .values()
            .filter(|d| d.update_id == update_id)
            .count()
    }

    /// Deletes updates older than `retention` that every node entitled to
    /// them has received. A targeted update waits for its target; a
    /// broadcast waits for every node in `active_nodes`.
    pub fn cleanup(&self, retention: Duration, active_nodes: &[String]) -> ServerResult<usize> {
        let cutoff = self.clock.now() - i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);
        let mut state = self.state.lock();

        let expired: Vec<u64> = state
            .updates
            .values()
            .filter(|u| u.time_created < cutoff)
            .filter(|u| match &u.target_node {
                Some(node) => state.delivered(node, u.id),
                None => active_nodes.iter().all(|node| state.delivered(node, u.id)),
            })
            .map(|u| u.id)
            .collect();

        for id in &expired {
            state.updates.delete(id)?;
        }
        let orphaned: Vec<(String, u64)> = state
            .deliveries
            .iter()
            .filter(|(_, d)| expired.contains(&d.update_id))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &orphaned {
            state.deliveries.delete(key)?;
        }

        if !expired.is_empty() {
            tracing::info!(removed = expired.len(), "distribution cleanup");
        }
        Ok(expired.len())
    }

    /// Counters for operators.
    pub fn stats(&self) -> DistributionStats {
        let state = self.state.lock();
        let broadcast = state
            .updates
            .values()
            .filter(|u| u.target_node.is_none())
            .count();
        DistributionStats {
            total: state.updates.len(),
            broadcast,
            targeted: state.updates.len() - broadcast,
            deliveries: state.deliveries.len(),
        }
    }

    /// Rewrites both journals with live rows only.
    pub fn compact(&self) -> ServerResult<()> {
        let mut state = self.state.lock();
        state.updates.compact()?;
        state.deliveries.compact()?;
        Ok(())
    }
}

fn to_value<T: Serialize>(data: &T) -> ServerResult<serde_json::Value> {
    serde_json::to_value(data).map_err(|e| crate::error::ServerError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use syncq_core::ManualClock;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use syncq_storage::InMemoryBackend;

    fn manager() -> (DistributionManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (DistributionManager::in_memory(clock.clone()), clock)
    }

    fn course(id: HubId, shortname: &str) -> CourseData {
        CourseData {
            id,
            shortname: shortname.into(),
            fullname: format!("{shortname} full"),
            ..CourseData::default()
        }
    }

    #[test]
    fn targeted_updates_only_reach_their_node() {
        let (dist, _) = manager();
        dist.publish_course(Target::Node("leaf-a".into()), UpdateAction::Create, &course(1, "A"))
            .unwrap();
        dist.publish_course(Target::Broadcast, UpdateAction::Create, &course(2, "B"))
            .unwrap();

        assert_eq!(dist.pending_for("leaf-a", 0, 10).len(), 2);
        let for_b = dist.pending_for("leaf-b", 0, 10);
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].object_id, Some(2));
    }

    #[test]
    fn pending_is_ordered_by_priority_then_time() {
        let (dist, clock) = manager();
        let enrol = dist
            .publish_enrolment(
                Target::Broadcast,
                UpdateAction::Create,
                &EnrolmentData {
                    user_id: 5,
                    course_id: 1,
                    ..EnrolmentData::default()
                },
            )
            .unwrap();
        clock.advance(1);
        let late_course = dist
            .publish_course(Target::Broadcast, UpdateAction::Create, &course(1, "A"))
            .unwrap();
        clock.advance(1);
        let forum = dist
            .publish(Target::Broadcast, UpdateType::Unknown("forum".into()), UpdateAction::Update, None, json!({}), 5)
            .unwrap();

        let ids: Vec<u64> = dist.pending_for("leaf-a", 0, 10).iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![late_course, enrol, forum]);
    }

    #[test]
    fn since_excludes_older_updates() {
        let (dist, clock) = manager();
        dist.publish_course(Target::Broadcast, UpdateAction::Create, &course(1, "A"))
            .unwrap();
        clock.set(2_000);
        dist.publish_course(Target::Broadcast, UpdateAction::Create, &course(2, "B"))
            .unwrap();

        assert_eq!(dist.pending_for("leaf-a", 1_000, 10).len(), 1);
        assert_eq!(dist.pending_for("leaf-a", 999, 10).len(), 2);
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let (dist, _) = manager();
        let id = dist
            .publish_course(Target::Broadcast, UpdateAction::Create, &course(1, "A"))
            .unwrap();

        assert!(dist.acknowledge("leaf-a", id).unwrap());
        assert!(!dist.acknowledge("leaf-a", id).unwrap());
        assert_eq!(dist.delivered_count(id), 1);
        assert!(dist.pending_for("leaf-a", 0, 10).is_empty());
        assert_eq!(dist.pending_for("leaf-b", 0, 10).len(), 1);
    }

    #[test]
    fn take_pending_records_what_it_returns() {
        let (dist, _) = manager();
        for id in 1..=3 {
            dist.publish_course(Target::Broadcast, UpdateAction::Create, &course(id, "C"))
                .unwrap();
        }

        let first = dist.take_pending("leaf-a", 0, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|u| dist.delivered_count(u.id) == 1));

        let rest = dist.take_pending("leaf-a", 0, 10).unwrap();
        assert_eq!(rest.len(), 1);
        assert!(first.iter().all(|u| u.id != rest[0].id));
        assert!(dist.take_pending("leaf-a", 0, 10).unwrap().is_empty());
        assert_eq!(dist.pending_for("leaf-b", 0, 10).len(), 3);
    }

    #[test]
    fn cleanup_waits_for_every_active_node() {
        let (dist, clock) = manager();
        let broadcast = dist
            .publish_course(Target::Broadcast, UpdateAction::Create, &course(1, "A"))
            .unwrap();
        let targeted = dist
            .publish_course(Target::Node("leaf-b".into()), UpdateAction::Create, &course(2, "B"))
            .unwrap();
        let active = vec!["leaf-a".to_string(), "leaf-b".to_string()];
        dist.acknowledge("leaf-a", broadcast).unwrap();
        clock.advance(100);

        let retention = Duration::from_secs(10);
        assert_eq!(dist.cleanup(retention, &active).unwrap(), 0);

        dist.acknowledge("leaf-b", broadcast).unwrap();
        assert_eq!(dist.cleanup(retention, &active).unwrap(), 1);
        assert!(dist.get(broadcast).is_none());
        assert_eq!(dist.delivered_count(broadcast), 0);

        // the targeted update is pinned until its node acknowledges
        assert!(dist.get(targeted).is_some());
        dist.acknowledge("leaf-b", targeted).unwrap();
        assert_eq!(dist.cleanup(retention, &active).unwrap(), 1);
        assert_eq!(dist.stats(), DistributionStats::default());
    }

    #[test]
    fn cleanup_respects_retention() {
        let (dist, _) = manager();
        let id = dist
            .publish_course(Target::Broadcast, UpdateAction::Create, &course(1, "A"))
            .unwrap();
        dist.acknowledge("leaf-a", id).unwrap();
        let active = vec!["leaf-a".to_string()];
        assert_eq!(dist.cleanup(Duration::from_secs(60), &active).unwrap(), 0);
    }

    #[test]
    fn state_survives_reopen() {
        let clock = Arc::new(ManualClock::new(1_000));
        let updates = InMemoryBackend::new();
        let deliveries = InMemoryBackend::new();
        let open = || {
            DistributionManager::open(
                Box::new(updates.clone()),
                Box::new(deliveries.clone()),
                clock.clone(),
            )
            .unwrap()
        };

        let first = {
            let dist = open();
            let first = dist
                .publish_course(Target::Broadcast, UpdateAction::Create, &course(1, "A"))
                .unwrap();
            dist.acknowledge("leaf-a", first).unwrap();
            first
        };

        let dist = open();
        assert!(dist.pending_for("leaf-a", 0, 10).is_empty());
        let second = dist
            .publish_course(Target::Broadcast, UpdateAction::Update, &course(1, "A"))
            .unwrap();
        assert_eq!(second, first + 1);
    }

    #[test]
    fn wire_form_carries_type_and_payload() {
        let (dist, _) = manager();
        let id = dist
            .publish_user(
                Target::Broadcast,
                UpdateAction::Update,
                &UserData {
                    id: 9,
                    username: "jdoe".into(),
                    ..UserData::default()
                },
            )
            .unwrap();
        let wire = dist.get(id).unwrap().to_wire();
        assert_eq!(wire.update_type, UpdateType::User);
        assert_eq!(wire.priority, 3);
        let user: UserData = wire.data_as().unwrap();
        assert_eq!(user.username, "jdoe");
    }

    proptest! {
        #[test]
        fn pending_never_repeats_or_returns_acknowledged(
            priorities in prop::collection::vec(1u8..=5, 1..30),
            acks in prop::collection::vec(any::<prop::sample::Index>(), 0..30),
            limit in 1usize..40,
        ) {
            let (dist, clock) = manager();
            let mut ids = Vec::new();
            for priority in &priorities {
                ids.push(
                    dist.publish(Target::Broadcast, UpdateType::Course, UpdateAction::Update, None, json!({}), *priority)
                        .unwrap(),
                );
                clock.advance(1);
            }
            let mut acknowledged = HashSet::new();
            for index in &acks {
                let id = *index.get(&ids);
                dist.acknowledge("leaf-a", id).unwrap();
                acknowledged.insert(id);
            }

            let pending = dist.pending_for("leaf-a", 0, limit);
            prop_assert!(pending.len() <= limit);
            prop_assert_eq!(pending.len(), (ids.len() - acknowledged.len()).min(limit));

            let mut seen = HashSet::new();
            for update in &pending {
                prop_assert!(seen.insert(update.id));
                prop_assert!(!acknowledged.contains(&update.id));
            }
            let order: Vec<_> = pending.iter().map(|u| (u.priority, u.time_created, u.id)).collect();
            let mut sorted = order.clone();
            sorted.sort_unstable();
            prop_assert_eq!(order, sorted);
        }
    }
}
