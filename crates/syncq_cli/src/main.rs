//! syncq CLI
//!
//! Command-line tools for syncq leaves and hubs.
//!
//! # Leaf commands
//!
//! - `status` - Hub-side node status and local queue state
//! - `test` - Check the hub accepts this node's credentials
//! - `register` - Self-register with a provisioning secret
//! - `upload`, `download`, `sync` - Run sync passes
//! - `queue` - Inspect and maintain the outbound queue
//!
//! # Hub commands
//!
//! - `hub serve` - Serve the sync endpoints
//! - `hub register-node`, `hub rotate-key`, `hub set-status`, `hub nodes`
//! - `hub publish` - Queue a record for distribution
//! - `hub cleanup` - Remove delivered updates and old log entries

mod commands;
mod profile;

use clap::{Parser, Subcommand};
use commands::hub::{PublishAction, PublishKind};
use profile::{Profile, DEFAULT_PROFILE};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// syncq store-and-forward sync tools.
#[derive(Parser)]
#[command(name = "syncq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Profile file
    #[arg(global = true, short, long, default_value = DEFAULT_PROFILE, env = "SYNCQ_PROFILE")]
    config: PathBuf,

    /// Data directory (overrides the profile)
    #[arg(global = true, short, long)]
    data_dir: Option<PathBuf>,

    /// Hub base URL (overrides the profile)
    #[arg(global = true, long, env = "SYNCQ_HUB_URL")]
    hub_url: Option<String>,

    /// Node id (overrides the profile)
    #[arg(global = true, long, env = "SYNCQ_NODE_ID")]
    node_id: Option<String>,

    /// API key (overrides the profile)
    #[arg(global = true, long, env = "SYNCQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show hub-side node status and local queue state
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check that the hub accepts this node's credentials
    Test,

    /// Register this node with the hub
    Register {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// Provisioning secret
        #[arg(short, long, env = "SYNCQ_REGISTRATION_SECRET", hide_env_values = true)]
        secret: String,

        /// Contact email
        #[arg(long)]
        contact: Option<String>,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,
    },

    /// Upload pending queue items
    Upload,

    /// Download and apply hub updates
    Download,

    /// Upload then download
    Sync,

    /// Inspect and maintain the outbound queue
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Hub administration
    Hub {
        #[command(subcommand)]
        command: HubCommand,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Counts by status
    Stats {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List items, newest first
    List {
        /// Only items in this status
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum items to show
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Requeue a failed or conflicted item
    Retry {
        /// Item id
        id: u64,
    },

    /// Delete an item
    Delete {
        /// Item id
        id: u64,
    },

    /// Remove old synced items and log entries
    Cleanup {
        /// Days of local sync log to keep
        #[arg(long, default_value = "90")]
        log_days: u64,
    },
}

#[derive(Subcommand)]
enum HubCommand {
    /// Serve the sync endpoints until Ctrl-C
    Serve {
        /// Listen address (overrides the profile)
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Register a node and print its API key
    RegisterNode {
        /// Node id
        node_id: String,

        /// Display name
        name: String,

        /// Contact email
        #[arg(long)]
        contact: Option<String>,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,
    },

    /// Issue a new API key for a node
    RotateKey {
        /// Node id
        node_id: String,
    },

    /// Set a node's status (active, suspended, pending)
    SetStatus {
        /// Node id
        node_id: String,

        /// New status
        status: String,
    },

    /// List registered nodes
    Nodes {
        /// Only nodes in this status
        #[arg(short, long)]
        status: Option<String>,

        /// Only active nodes that are overdue for a sync
        #[arg(long)]
        overdue: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Publish a record for distribution
    Publish {
        /// Record kind
        #[arg(value_enum)]
        kind: PublishKind,

        /// Record as JSON
        data: String,

        /// Change type
        #[arg(short, long, value_enum, default_value = "create")]
        action: PublishAction,

        /// Target a single node instead of broadcasting
        #[arg(short, long)]
        node: Option<String>,
    },

    /// Remove delivered updates and old log entries
    Cleanup,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut profile = Profile::load(&cli.config)?;
    if let Some(dir) = &cli.data_dir {
        profile.leaf.data_dir = dir.clone();
        profile.hub.data_dir = dir.clone();
    }
    if let Some(url) = cli.hub_url {
        profile.leaf.hub_url = url;
    }
    if let Some(node_id) = cli.node_id {
        profile.leaf.node_id = node_id;
    }
    if let Some(key) = cli.api_key {
        profile.leaf.api_key = key;
    }

    match cli.command {
        Commands::Status { format } => {
            let leaf = commands::leaf::open(&profile.leaf)?;
            commands::leaf::status(&leaf, &format)?;
        }
        Commands::Test => {
            let leaf = commands::leaf::open(&profile.leaf)?;
            commands::leaf::test(&leaf)?;
        }
        Commands::Register {
            name,
            secret,
            contact,
            description,
        } => {
            let leaf = commands::leaf::open(&profile.leaf)?;
            commands::leaf::register(&leaf, &name, &secret, contact, description)?;
        }
        Commands::Upload => {
            let leaf = commands::leaf::open(&profile.leaf)?;
            commands::leaf::upload(&leaf)?;
        }
        Commands::Download => {
            let leaf = commands::leaf::open(&profile.leaf)?;
            commands::leaf::download(&leaf)?;
        }
        Commands::Sync => {
            let leaf = commands::leaf::open(&profile.leaf)?;
            commands::leaf::sync(&leaf)?;
        }
        Commands::Queue { command } => {
            let leaf = commands::leaf::open(&profile.leaf)?;
            match command {
                QueueCommand::Stats { format } => commands::queue::stats(&leaf, &format)?,
                QueueCommand::List {
                    status,
                    limit,
                    format,
                } => commands::queue::list(&leaf, status.as_deref(), limit, &format)?,
                QueueCommand::Retry { id } => commands::queue::retry(&leaf, id)?,
                QueueCommand::Delete { id } => commands::queue::delete(&leaf, id)?,
                QueueCommand::Cleanup { log_days } => commands::queue::cleanup(&leaf, log_days)?,
            }
        }
        Commands::Hub { command } => {
            let hub = commands::hub::open(&profile.hub)?;
            match command {
                HubCommand::Serve { bind } => commands::hub::serve(&hub, bind)?,
                HubCommand::RegisterNode {
                    node_id,
                    name,
                    contact,
                    description,
                } => commands::hub::register_node(&hub, &node_id, &name, contact, description)?,
                HubCommand::RotateKey { node_id } => commands::hub::rotate_key(&hub, &node_id)?,
                HubCommand::SetStatus { node_id, status } => {
                    commands::hub::set_status(&hub, &node_id, &status)?
                }
                HubCommand::Nodes {
                    status,
                    overdue,
                    format,
                } => commands::hub::nodes(&hub, status.as_deref(), overdue, &format)?,
                HubCommand::Publish {
                    kind,
                    data,
                    action,
                    node,
                } => commands::hub::publish(&hub, kind, action, &data, node)?,
                HubCommand::Cleanup => commands::hub::cleanup(&hub)?,
            }
        }
        Commands::Version => {
            println!("syncq CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("syncq core v{}", syncq_core::VERSION);
        }
    }

    Ok(())
}
