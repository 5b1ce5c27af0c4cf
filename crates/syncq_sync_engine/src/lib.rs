//! # syncq Sync Engine
//!
//! The leaf side of syncq.
//!
//! This crate provides:
//! - Upload passes that drain the outbound queue in batches and record
//!   per-item hub outcomes
//! - Download passes that pull distribution updates and apply them to the
//!   local directory through the [`LeafApplier`]
//! - A persistent download watermark with deferred updates for records
//!   whose prerequisites have not arrived yet
//! - The HTTP transport, plus an in-process loopback for tests
//!
//! ## Architecture
//!
//! A leaf never talks to the hub on its own. Each pass is triggered from
//! outside (a scheduler, the CLI) and runs to completion:
//! 1. Check that the node is registered and active
//! 2. Upload: claim a batch, send it, settle each item from its result
//! 3. Download: retry deferred updates, then pull new ones in rounds
//!
//! ## Key Invariants
//!
//! - Passes on one engine never overlap
//! - An item is attempted at most once per upload pass
//! - A transport failure never loses an item; it returns to Pending while
//!   retries remain
//! - The watermark never moves backwards and only moves after the updates
//!   before it are applied or deferred

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod config;
mod cursor;
mod error;
mod http;
mod state;
mod stores;
mod transport;

pub use applier::{
    BatchResult, ContentRestorer, LeafApplier, LocalCourse, LocalDirectory, LocalUser,
    MemoryDirectory,
};
pub use config::SyncConfig;
pub use cursor::{DeferredUpdate, DownloadCursor};
pub use error::{SyncError, SyncResult};
pub use http::{
    HttpClient, HttpReply, HttpTransport, LoopbackClient, LoopbackServer, ReqwestClient,
};
pub use state::{
    CleanupReport, DownloadReport, SyncCycleResult, SyncEngine, SyncState, SyncStats, UploadReport,
};
pub use stores::LeafStores;
pub use transport::{MockTransport, SyncTransport};
