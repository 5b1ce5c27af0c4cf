//! # syncq Core
//!
//! Durable state shared by leaf and hub nodes.
//!
//! This crate provides:
//! - The [`OutboundQueue`] of captured events awaiting upload
//! - The [`IdentityMapper`] translating leaf-local ids to hub ids
//! - The append-only [`SyncLog`] audit trail
//! - [`Table`], a journaled key/value table every store above is built on
//! - [`FileRefs`], the attachments of queued submissions
//! - [`DataDir`], the locked on-disk home of a node's journals
//!
//! ## Key Invariants
//!
//! - A journal record is flushed before the in-memory table changes
//! - A payload hash never produces two live queue items inside the
//!   duplicate window
//! - At most one mapping per (node, table, local id) and per
//!   (node, table, hub id)
//! - Only Synced queue items are ever removed by cleanup

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod capture;
mod clock;
mod config;
mod digest;
mod dir;
mod error;
mod files;
mod mapper;
mod queue;
mod sync_log;
mod table;
mod types;

pub use capture::{CapturedEvent, ContextSource, EventCapture};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{DuplicatePolicy, QueueConfig};
pub use digest::{content_hash, payload_hash};
pub use dir::DataDir;
pub use error::{CoreError, CoreResult};
pub use files::{FileRef, FileRefs, FileStatus};
pub use mapper::{IdentityMapper, IdentityMapping, MappingStore};
pub use queue::{OutboundQueue, QueueItem, QueueStats, QueueStatus};
pub use sync_log::{SyncLog, SyncLogEntry};
pub use table::Table;
pub use types::{HubId, ItemId, LocalId, Timestamp};
pub use syncq_storage::Durability;

/// syncq version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
