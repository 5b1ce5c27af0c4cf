//! Leaf commands: status, test, register and the sync passes.

use super::{print_json, CliResult};
use crate::profile::LeafProfile;
use serde::Serialize;
use std::sync::Arc;
use syncq_core::{DataDir, QueueStats, SharedClock, SystemClock, Timestamp};
use syncq_sync_engine::{
    HttpTransport, LeafStores, MemoryDirectory, ReqwestClient, SyncEngine,
};

/// Engine type used by the CLI.
pub type LeafEngine = SyncEngine<HttpTransport<ReqwestClient>>;

/// An opened leaf. Holds the data directory lock while alive.
pub struct Leaf {
    _dir: DataDir,
    /// The sync engine over the leaf's journals.
    pub engine: LeafEngine,
}

/// Opens the leaf data directory and builds the engine.
///
/// The CLI host has no local records of its own, so downloads apply into
/// a [`MemoryDirectory`] and only the identity mappings persist.
pub fn open(profile: &LeafProfile) -> CliResult<Leaf> {
    let dir = DataDir::open(&profile.data_dir, true)?;
    let clock: SharedClock = Arc::new(SystemClock);
    let stores = LeafStores::open(&dir, profile.queue_config(), clock.clone())?;
    let config = profile.sync_config();
    let transport = HttpTransport::new(config.hub_url.clone(), ReqwestClient::new(&config)?);
    let engine = SyncEngine::new(
        config,
        transport,
        stores,
        Arc::new(MemoryDirectory::new()),
        clock,
    );
    Ok(Leaf { _dir: dir, engine })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    node_id: String,
    hub_url: String,
    hub_reachable: bool,
    registered: bool,
    active: bool,
    message: String,
    last_synced_at: Option<Timestamp>,
    queue: QueueStats,
    watermark: Timestamp,
    deferred: usize,
    abandoned: usize,
}

/// Prints hub-side node status and local queue state.
pub fn status(leaf: &Leaf, format: &str) -> CliResult {
    let engine = &leaf.engine;
    let config = engine.config();
    let mut report = StatusReport {
        node_id: config.node_id.clone(),
        hub_url: config.hub_url.clone(),
        hub_reachable: false,
        registered: false,
        active: false,
        message: String::new(),
        last_synced_at: None,
        queue: engine.queue().stats(),
        watermark: engine.cursor().since(),
        deferred: engine.cursor().deferred_count(),
        abandoned: engine.cursor().abandoned_count(),
    };
    match engine.check_status() {
        Ok(status) => {
            report.hub_reachable = true;
            report.registered = status.registered;
            report.active = status.active;
            report.message = status.message;
            report.last_synced_at = status.last_synced_at;
        }
        Err(e) => report.message = e.to_string(),
    }

    if format == "json" {
        return print_json(&report);
    }
    println!("Node:        {}", report.node_id);
    println!("Hub:         {}", report.hub_url);
    println!("Reachable:   {}", report.hub_reachable);
    println!("Registered:  {}", report.registered);
    println!("Active:      {}", report.active);
    println!("Message:     {}", report.message);
    if let Some(at) = report.last_synced_at {
        println!("Last synced: {at}");
    }
    println!();
    println!(
        "Queue:       {} pending, {} processing, {} synced, {} failed, {} conflict",
        report.queue.pending,
        report.queue.processing,
        report.queue.synced,
        report.queue.failed,
        report.queue.conflict
    );
    println!("Watermark:   {}", report.watermark);
    println!("Deferred:    {}", report.deferred);
    println!("Abandoned:   {}", report.abandoned);
    Ok(())
}

/// Checks that the hub accepts this node's credentials.
pub fn test(leaf: &Leaf) -> CliResult {
    let status = leaf.engine.check_status()?;
    if !status.is_ok() || !status.active {
        return Err(format!("hub refused node: {}", status.message).into());
    }
    println!("Connection OK: {}", status.message);
    if let Some(name) = status.node_name {
        println!("Registered as: {name}");
    }
    Ok(())
}

/// Registers this node and prints the one-time key.
pub fn register(
    leaf: &Leaf,
    name: &str,
    secret: &str,
    contact_email: Option<String>,
    description: Option<String>,
) -> CliResult {
    let key = leaf
        .engine
        .register(name, secret, contact_email, description)?;
    println!("Node registered. Store this API key now, it is not shown again:");
    println!("{key}");
    Ok(())
}

/// Runs an upload pass.
pub fn upload(leaf: &Leaf) -> CliResult {
    let report = leaf.engine.upload()?;
    println!(
        "Uploaded {} item(s) in {} batch(es): {} synced, {} failed, {} conflict",
        report.claimed, report.batches, report.success, report.failed, report.conflicts
    );
    if report.reclaimed > 0 {
        println!("Reclaimed {} stale item(s)", report.reclaimed);
    }
    Ok(())
}

/// Runs a download pass.
pub fn download(leaf: &Leaf) -> CliResult {
    let report = leaf.engine.download()?;
    println!(
        "Downloaded {} update(s) in {} round(s): {} applied, {} skipped, {} failed",
        report.received,
        report.rounds,
        report.applied.success,
        report.applied.skipped,
        report.applied.failed
    );
    for error in &report.applied.errors {
        println!("  {error}");
    }
    println!("Watermark {}, {} deferred", report.watermark, report.deferred);
    if report.abandoned > 0 {
        println!("Abandoned {} update(s) whose prerequisites never arrived", report.abandoned);
    }
    Ok(())
}

/// Runs an upload pass then a download pass.
pub fn sync(leaf: &Leaf) -> CliResult {
    let result = leaf.engine.sync()?;
    println!(
        "Sync complete in {:.2?}: {} uploaded, {} applied",
        result.duration, result.upload.success, result.download.applied.success
    );
    Ok(())
}
