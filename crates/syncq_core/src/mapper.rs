//! Identity mapping between leaf-local ids and hub ids.
//!
//! Mappings are unique per (node, table, local id) and per
//! (node, table, hub id). The forward index is the journaled table; the
//! reverse index is rebuilt from it on open.

use crate::clock::SharedClock;
use crate::error::CoreResult;
use crate::table::Table;
use crate::types::{HubId, LocalId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use syncq_storage::StorageBackend;

type MappingKey = (String, String, LocalId);
type ReverseKey = (String, String, HubId);

/// One local-to-hub correspondence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMapping {
    /// Node the local id belongs to.
    pub node: String,
    /// Table of the mapped object.
    pub table: String,
    /// Id on the leaf.
    pub local_id: LocalId,
    /// Id on the hub.
    pub hub_id: HubId,
    /// Content hash of the hub object when last synced.
    pub hub_content_hash: Option<String>,
    /// When the mapping was first recorded.
    pub time_created: Timestamp,
    /// When it last changed.
    pub time_modified: Timestamp,
}

struct Index {
    rows: Table<MappingKey, IdentityMapping>,
    reverse: HashMap<ReverseKey, LocalId>,
}

impl Index {
    fn new(rows: Table<MappingKey, IdentityMapping>) -> Self {
        let reverse = rows
            .values()
            .map(|m| ((m.node.clone(), m.table.clone(), m.hub_id), m.local_id))
            .collect();
        Self { rows, reverse }
    }
}

/// Durable storage for every node's identity mappings.
pub struct MappingStore {
    index: Mutex<Index>,
    clock: SharedClock,
}

impl MappingStore {
    /// Opens the store over a journal backend.
    pub fn open(backend: Box<dyn StorageBackend>, clock: SharedClock) -> CoreResult<Self> {
        let rows = Table::open(backend)?;
        Ok(Self {
            index: Mutex::new(Index::new(rows)),
            clock,
        })
    }

    /// Creates a store that lives only in memory.
    pub fn in_memory(clock: SharedClock) -> Self {
        Self {
            index: Mutex::new(Index::new(Table::in_memory())),
            clock,
        }
    }

    /// Returns the mapper scoped to `node`.
    pub fn mapper(&self, node: &str) -> IdentityMapper<'_> {
        IdentityMapper {
            store: self,
            node: node.to_string(),
        }
    }

    /// Total mappings across all nodes.
    pub fn len(&self) -> usize {
        self.index.lock().rows.len()
    }

    /// Returns true if no mappings exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites the journal with only live mappings.
    pub fn compact(&self) -> CoreResult<()> {
        self.index.lock().rows.compact()
    }
}

/// Mapping operations for a single node.
pub struct IdentityMapper<'a> {
    store: &'a MappingStore,
    node: String,
}

impl IdentityMapper<'_> {
    /// The node this mapper is scoped to.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Hub id for a local object.
    pub fn resolve(&self, table: &str, local_id: LocalId) -> Option<HubId> {
        self.get(table, local_id).map(|m| m.hub_id)
    }

    /// Local id for a hub object.
    pub fn resolve_reverse(&self, table: &str, hub_id: HubId) -> Option<LocalId> {
        let index = self.store.index.lock();
        index.reverse.get(&self.reverse_key(table, hub_id)).copied()
    }

    /// Full mapping row for a local object.
    pub fn get(&self, table: &str, local_id: LocalId) -> Option<IdentityMapping> {
        let index = self.store.index.lock();
        index.rows.get(&self.key(table, local_id)).cloned()
    }

    /// Records that `local_id` corresponds to `hub_id`.
    ///
    /// Re-mapping a local object to a new hub id replaces the old row. If
    /// another local object held `hub_id`, its mapping is removed.
    pub fn upsert(
        &self,
        table: &str,
        local_id: LocalId,
        hub_id: HubId,
        hash: Option<&str>,
    ) -> CoreResult<()> {
        let now = self.store.clock.now();
        let mut index = self.store.index.lock();
        let key = self.key(table, local_id);
        let reverse_key = self.reverse_key(table, hub_id);

        if let Some(&holder) = index.reverse.get(&reverse_key) {
            if holder != local_id {
                tracing::debug!(
                    node_id = %self.node,
                    table,
                    hub_id,
                    evicted = holder,
                    "hub id remapped to another local object"
                );
                index.rows.delete(&self.key(table, holder))?;
            }
        }

        let previous = index.rows.get(&key).cloned();
        if let Some(prev) = &previous {
            if prev.hub_id != hub_id {
                index.reverse.remove(&self.reverse_key(table, prev.hub_id));
            }
        }

        let mapping = IdentityMapping {
            node: self.node.clone(),
            table: table.to_string(),
            local_id,
            hub_id,
            hub_content_hash: hash.map(str::to_string),
            time_created: previous.map_or(now, |p| p.time_created),
            time_modified: now,
        };
        index.rows.put(key, mapping)?;
        index.reverse.insert(reverse_key, local_id);
        Ok(())
    }

    /// Removes the mapping for a local object. Returns false if none existed.
    pub fn delete(&self, table: &str, local_id: LocalId) -> CoreResult<bool> {
        let mut index = self.store.index.lock();
        match index.rows.delete(&self.key(table, local_id))? {
            Some(removed) => {
                index
                    .reverse
                    .remove(&self.reverse_key(table, removed.hub_id));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns true unless a recorded hash matches `current_hash`.
    ///
    /// A missing mapping or a mapping without a hash counts as changed.
    pub fn is_stale(&self, table: &str, local_id: LocalId, current_hash: &str) -> bool {
        match self.get(table, local_id).and_then(|m| m.hub_content_hash) {
            Some(recorded) => recorded != current_hash,
            None => true,
        }
    }

    /// Updates only the content hash. Returns false if no mapping exists.
    pub fn touch_hash(&self, table: &str, local_id: LocalId, hash: &str) -> CoreResult<bool> {
        let now = self.store.clock.now();
        let mut index = self.store.index.lock();
        let key = self.key(table, local_id);
        let Some(mut mapping) = index.rows.get(&key).cloned() else {
            return Ok(false);
        };
        mapping.hub_content_hash = Some(hash.to_string());
        mapping.time_modified = now;
        index.rows.put(key, mapping)?;
        Ok(true)
    }

    /// All mappings of this node for `table`, ordered by local id.
    pub fn mappings_for(&self, table: &str) -> Vec<IdentityMapping> {
        let index = self.store.index.lock();
        index
            .rows
            .values()
            .filter(|m| m.node == self.node && m.table == table)
            .cloned()
            .collect()
    }

    /// Upserts many (local id, hub id) pairs without hashes.
    pub fn bulk_upsert(&self, table: &str, pairs: &[(LocalId, HubId)]) -> CoreResult<usize> {
        for (local_id, hub_id) in pairs {
            self.upsert(table, *local_id, *hub_id, None)?;
        }
        Ok(pairs.len())
    }

    fn key(&self, table: &str, local_id: LocalId) -> MappingKey {
        (self.node.clone(), table.to_string(), local_id)
    }

    fn reverse_key(&self, table: &str, hub_id: HubId) -> ReverseKey {
        (self.node.clone(), table.to_string(), hub_id)
    }
}
