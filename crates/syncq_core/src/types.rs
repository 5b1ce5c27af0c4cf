//! Core type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix time in seconds.
pub type Timestamp = i64;

/// Identifier of an object in a leaf's own id space.
pub type LocalId = i64;

/// Identifier of an object in the hub's id space.
pub type HubId = i64;

/// Identifier of an outbound queue item.
///
/// Ids increase monotonically and are never reused, even after cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl ItemId {
    /// Creates an item id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item:{}", self.0)
    }
}
