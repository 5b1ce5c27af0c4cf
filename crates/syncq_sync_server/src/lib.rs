//! # syncq Sync Server
//!
//! The hub side of syncq.
//!
//! This crate provides:
//! - A node registry with salted, one-time-displayed API keys
//! - The hub applier: per-item application of uploaded events with
//!   last-write-wins conflict resolution and row-level locking
//! - The distribution manager: targeted and broadcast updates with
//!   per-node delivery records
//! - HTTP endpoints (status, register, upload, download, report) and
//!   authenticated artifact streaming
//!
//! # Architecture
//!
//! Hub-side business records (users, courses, grades, ...) live behind the
//! [`HubDirectory`] trait. [`MemoryHubDirectory`] is a complete in-memory
//! implementation used by tests and the CLI; a deployment plugs in its own.
//! The hub's own state (registry, updates, deliveries, mappings, sync log)
//! is journaled through [`HubStores`].
//!
//! # Protocol
//!
//! Every node-scoped request carries a node id and an API key (JSON field
//! or `X-Api-Key` header). The key is checked before any node state is
//! read; failures end the call with an error body, never a partial result.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod applier;
mod artifact;
mod auth;
mod config;
mod directory;
mod distribution;
mod error;
mod handler;
mod http;
mod registry;
mod server;
mod stores;

pub use applier::{ApplyOutcome, HubApplier};
pub use artifact::ArtifactStore;
pub use auth::{secret_matches, ApiKeyHasher, KeyDigest};
pub use config::ServerConfig;
pub use directory::{
    CourseField, HubDirectory, HubRecord, MemoryHubDirectory, RecordFamily, RecordKey, UserField,
};
pub use distribution::{
    DeliveryRecord, DistributionManager, DistributionStats, DistributionUpdate, Target,
};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use http::{router, serve};
pub use registry::{NodeRegistry, NodeStatus, RegisteredNode};
pub use server::{CleanupReport, SyncServer};
pub use stores::HubStores;
