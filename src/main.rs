use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapshot_shipper::config::{self, Config, Provider};
use snapshot_shipper::credentials::CredentialResolver;
use snapshot_shipper::managers::logging::{self, LoggingConfig};
use snapshot_shipper::managers::{BackupOperation, LocalCoordinator};
use snapshot_shipper::storage::{DefaultBackendFactory, NodeIdentity, RemoteObjectReference};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "snapshot-shipper")]
#[command(about = "Ships database snapshots to object storage", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/snapshot-shipper/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ship the configured snapshot from the selected nodes
    Backup {
        /// Only back up this node (can be used multiple times)
        #[arg(short, long)]
        node: Vec<String>,

        /// Cancel unfinished node backups after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Validate configuration file
    Validate,

    /// Show the resolved storage configuration (secrets redacted)
    Credentials,

    /// Show the remote paths local keys resolve to
    Refs {
        /// Object keys relative to the node, e.g. data/ks/table/file.db
        #[arg(required = true)]
        keys: Vec<PathBuf>,

        /// Node to resolve node-aware paths for (defaults to the local node)
        #[arg(short, long)]
        node: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

    match cli.command {
        Commands::Backup { node, timeout_secs } => {
            // file logging must stay alive until the operation is done
            let _log_guard = logging::init_logging(&LoggingConfig::from_settings(&config.logging))?;
            handle_backup(&config, &node, timeout_secs).await
        }
        Commands::Validate => {
            logging::init_console_logging();
            handle_validate(&config)
        }
        Commands::Credentials => {
            logging::init_console_logging();
            handle_credentials(&config)
        }
        Commands::Refs { keys, node } => {
            logging::init_console_logging();
            handle_refs(&config, &keys, node.as_deref())
        }
    }
}

async fn handle_backup(config: &Config, only: &[String], timeout_secs: Option<u64>) -> Result<()> {
    let targets = config::select_targets(config, only)?;
    let factory = Arc::new(DefaultBackendFactory::from_config(config));

    let mut coordinator = LocalCoordinator::new(targets, factory);
    if let Some(secs) = timeout_secs {
        coordinator = coordinator.with_timeout(Duration::from_secs(secs));
    }

    let operation = BackupOperation::new(Some(Arc::new(coordinator)), config.request.clone())?;
    let result = operation.run().await;

    println!("{}", serde_json::to_string_pretty(&operation.summary())?);

    result.with_context(|| format!("Backup operation {} failed", operation.id()))
}

fn handle_validate(config: &Config) -> Result<()> {
    let targets = config::select_targets(config, &[])?;

    println!("Configuration is valid!");
    println!("Storage location: {}", config.request.storage_location);
    println!("Snapshot tag: {}", config.request.snapshot_tag);
    println!("Nodes: {}", config.nodes.len());
    println!(
        "Targets: {}",
        targets.iter().map(|n| n.id.as_str()).collect::<Vec<_>>().join(", ")
    );

    Ok(())
}

fn handle_credentials(config: &Config) -> Result<()> {
    let provider = config.request.storage_location.provider;
    if provider == Provider::File {
        println!("Provider: {} (no credentials required)", provider);
        return Ok(());
    }

    let resolver = CredentialResolver::from_process(&config::expand_tilde(&config.storage.secrets_root));
    let resolved = resolver
        .resolve(&config.request)
        .context("Failed to resolve storage configuration")?;

    let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "<not set>".to_string());

    println!("Provider: {}", provider);
    println!("Source: {:?}", resolved.source);
    println!("Endpoint: {}", show(&resolved.endpoint));
    println!("Region: {}", show(&resolved.region));
    println!("Access key id: {}", show(&resolved.access_key_id));
    println!(
        "Secret access key: {}",
        if resolved.secret_access_key.is_some() { "<redacted>" } else { "<not set>" }
    );
    println!("Path-style access: {}", config.storage.path_style_access);

    Ok(())
}

fn handle_refs(config: &Config, keys: &[PathBuf], node: Option<&str>) -> Result<()> {
    let node_id = node
        .map(str::to_string)
        .or_else(|| config.local_node.clone())
        .or_else(|| config.nodes.first().map(|n| n.id.clone()))
        .context("No node given and none configured")?;

    let target = config
        .nodes
        .iter()
        .find(|n| n.id == node_id)
        .ok_or_else(|| config::ConfigError::NodeNotFound(node_id.clone()))?;

    let identity = NodeIdentity::new(&config.request.storage_location.cluster, &target.datacenter, &target.id)?;

    for key in keys {
        let plain = RemoteObjectReference::plain(key)?;
        let node_aware = RemoteObjectReference::node_aware(&identity, key)?;
        println!("{}", key.display());
        println!("  plain:      {}", plain);
        println!("  node-aware: {}", node_aware);
    }

    Ok(())
}
