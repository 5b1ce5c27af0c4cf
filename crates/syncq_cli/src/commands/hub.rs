//! Hub commands: serving, node administration and distribution.

use super::{print_json, CliResult};
use crate::profile::HubProfile;
use clap::ValueEnum;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use syncq_core::{DataDir, SharedClock, SystemClock, Timestamp};
use syncq_sync_protocol::{CourseData, EnrolmentData, UpdateAction, UserData};
use syncq_sync_server::{HubStores, NodeStatus, RegisteredNode, SyncServer, Target};

/// An opened hub. Holds the data directory lock while alive.
pub struct Hub {
    _dir: DataDir,
    /// The server over the hub's journals.
    pub server: Arc<SyncServer>,
}

/// Opens the hub data directory and builds the server.
pub fn open(profile: &HubProfile) -> CliResult<Hub> {
    let dir = DataDir::open(&profile.data_dir, true)?;
    let clock: SharedClock = Arc::new(SystemClock);
    let stores = HubStores::open(&dir, clock.clone())?;
    let server = SyncServer::with_stores(
        profile.server_config()?,
        stores,
        Arc::new(profile.directory()?),
        clock,
    );
    Ok(Hub {
        _dir: dir,
        server: Arc::new(server),
    })
}

/// Serves the HTTP endpoints until Ctrl-C.
pub fn serve(hub: &Hub, bind: Option<SocketAddr>) -> CliResult {
    let addr = bind.unwrap_or(hub.server.config().bind_addr);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(syncq_sync_server::serve(
        Arc::clone(&hub.server),
        addr,
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        },
    ))?;
    Ok(())
}

/// Registers a node on the operator's behalf and prints its key.
pub fn register_node(
    hub: &Hub,
    node_id: &str,
    name: &str,
    contact_email: Option<String>,
    description: Option<String>,
) -> CliResult {
    let key = hub
        .server
        .registry()
        .register(node_id, name, contact_email, description)?;
    println!("Node {node_id} registered. API key (shown once):");
    println!("{key}");
    Ok(())
}

/// Issues a new key, invalidating the old one.
pub fn rotate_key(hub: &Hub, node_id: &str) -> CliResult {
    let key = hub.server.registry().rotate_key(node_id)?;
    println!("New API key for {node_id} (shown once):");
    println!("{key}");
    Ok(())
}

/// Activates, suspends or parks a node.
pub fn set_status(hub: &Hub, node_id: &str, status: &str) -> CliResult {
    let status: NodeStatus = status.parse()?;
    hub.server.registry().set_status(node_id, status)?;
    println!("Node {node_id} is now {status}");
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeRow {
    node_id: String,
    name: String,
    status: String,
    last_synced_at: Option<Timestamp>,
    last_sync_item_count: u32,
    total_synced_count: u64,
}

impl From<RegisteredNode> for NodeRow {
    fn from(node: RegisteredNode) -> Self {
        Self {
            node_id: node.node_id,
            name: node.display_name,
            status: node.status.to_string(),
            last_synced_at: node.last_synced_at,
            last_sync_item_count: node.last_sync_item_count,
            total_synced_count: node.total_synced_count,
        }
    }
}

/// Lists registered nodes, or only overdue ones.
pub fn nodes(hub: &Hub, status: Option<&str>, overdue: bool, format: &str) -> CliResult {
    let registry = hub.server.registry();
    let nodes = if overdue {
        registry.overdue(hub.server.config().overdue_threshold)
    } else {
        let status = status.map(str::parse::<NodeStatus>).transpose()?;
        registry.list(status)
    };
    let rows: Vec<NodeRow> = nodes.into_iter().map(NodeRow::from).collect();

    if format == "json" {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No nodes");
        return Ok(());
    }
    println!(
        "{:<20}  {:<24}  {:<10}  {:>12}  {:>8}",
        "NODE", "NAME", "STATUS", "LAST SYNC", "TOTAL"
    );
    for row in rows {
        let last = row
            .last_synced_at
            .map_or_else(|| "never".to_string(), |t| t.to_string());
        println!(
            "{:<20}  {:<24}  {:<10}  {:>12}  {:>8}",
            row.node_id, row.name, row.status, last, row.total_synced_count
        );
    }
    Ok(())
}

/// Kind of record to publish.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PublishKind {
    /// A course (`CourseData` JSON).
    Course,
    /// A user (`UserData` JSON).
    User,
    /// An enrolment (`EnrolmentData` JSON).
    Enrolment,
}

/// Change to publish.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PublishAction {
    /// New record.
    Create,
    /// Changed record.
    Update,
    /// Removed record.
    Delete,
}

impl From<PublishAction> for UpdateAction {
    fn from(action: PublishAction) -> Self {
        match action {
            PublishAction::Create => UpdateAction::Create,
            PublishAction::Update => UpdateAction::Update,
            PublishAction::Delete => UpdateAction::Delete,
        }
    }
}

/// Publishes a record to one node or to every node.
pub fn publish(
    hub: &Hub,
    kind: PublishKind,
    action: PublishAction,
    data: &str,
    node: Option<String>,
) -> CliResult {
    let target = node.map_or(Target::Broadcast, Target::Node);
    let action = UpdateAction::from(action);
    let distribution = hub.server.distribution();
    let id = match kind {
        PublishKind::Course => {
            let course: CourseData = serde_json::from_str(data)?;
            distribution.publish_course(target, action, &course)?
        }
        PublishKind::User => {
            let user: UserData = serde_json::from_str(data)?;
            distribution.publish_user(target, action, &user)?
        }
        PublishKind::Enrolment => {
            let enrolment: EnrolmentData = serde_json::from_str(data)?;
            distribution.publish_enrolment(target, action, &enrolment)?
        }
    };
    println!("Published update {id}");
    Ok(())
}

/// Removes delivered updates and old log entries, then compacts.
pub fn cleanup(hub: &Hub) -> CliResult {
    let report = hub.server.cleanup()?;
    hub.server.distribution().compact()?;
    let stats = hub.server.distribution().stats();
    println!(
        "Removed {} update(s) and {} log entr(ies)",
        report.updates, report.log_entries
    );
    println!(
        "Remaining: {} update(s) ({} broadcast, {} targeted), {} delivery record(s)",
        stats.total, stats.broadcast, stats.targeted, stats.deliveries
    );
    Ok(())
}
