//! Conflict resolution between an uploaded event and an existing hub row.

use serde::{Deserialize, Serialize};

/// What to do with an incoming change that targets an existing hub row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Overwrite the hub row and touch its modification time.
    ApplyIncoming,
    /// Leave the hub row untouched and report a conflict.
    KeepExisting,
}

/// Policy for write-write conflicts on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The later timestamp wins; ties go to the incoming change.
    #[default]
    LastWriteWins,
    /// The hub copy always wins once it exists.
    HubWins,
    /// The leaf always overwrites the hub copy.
    LeafWins,
}

impl ConflictPolicy {
    /// Decides between the hub row and an incoming event.
    ///
    /// `hub_modified` is the hub row's last-modified time. `event_time` is
    /// the time the event was created on the leaf, not the time it reached
    /// the hub, so an edit that sat in a leaf queue can lose to a hub edit
    /// made while it was in transit.
    pub fn resolve(&self, hub_modified: i64, event_time: i64) -> Resolution {
        match self {
            ConflictPolicy::LastWriteWins if hub_modified > event_time => Resolution::KeepExisting,
            ConflictPolicy::LastWriteWins => Resolution::ApplyIncoming,
            ConflictPolicy::HubWins => Resolution::KeepExisting,
            ConflictPolicy::LeafWins => Resolution::ApplyIncoming,
        }
    }
}
