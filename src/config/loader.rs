use super::types::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid storage location {0}")]
    InvalidStorageLocation(String),

    #[error("Invalid entity '{0}' (expected 'keyspace' or 'keyspace.table')")]
    InvalidEntity(String),

    #[error("Node '{0}' not found")]
    NodeNotFound(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_request(&config.request)?;

    if config.nodes.is_empty() {
        return Err(ConfigError::ValidationError("No nodes defined".to_string()));
    }

    let mut seen = HashSet::new();
    for node in &config.nodes {
        validate_identifier("node id", &node.id)?;
        validate_identifier("datacenter", &node.datacenter)?;

        if !seen.insert(node.id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Node '{}' is defined more than once",
                node.id
            )));
        }
    }

    if let Some(ref local) = config.local_node {
        if !config.nodes.iter().any(|n| &n.id == local) {
            return Err(ConfigError::NodeNotFound(local.clone()));
        }
    }

    if !config.request.global_request && config.local_node.is_none() {
        return Err(ConfigError::ValidationError(
            "A per-node request requires 'local_node' to be set".to_string(),
        ));
    }

    Ok(())
}

/// Validate the invariants of a backup request
pub fn validate_request(request: &BackupRequest) -> Result<()> {
    if request.snapshot_tag.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "Snapshot tag must not be empty".to_string(),
        ));
    }

    if request.snapshot_tag.contains('/') {
        return Err(ConfigError::ValidationError(format!(
            "Snapshot tag must not contain '/': {}",
            request.snapshot_tag
        )));
    }

    validate_identifier("cluster name", &request.storage_location.cluster)?;

    if request.timeout == Some(0) {
        return Err(ConfigError::ValidationError(
            "Timeout must be at least 1 hour".to_string(),
        ));
    }

    if request.concurrent_connections == 0 {
        return Err(ConfigError::ValidationError(
            "Concurrent connections must be at least 1".to_string(),
        ));
    }

    if request.bandwidth == Some(0) {
        return Err(ConfigError::ValidationError(
            "Bandwidth must be greater than 0 when set".to_string(),
        ));
    }

    if let Some(proxy) = request.active_proxy() {
        if proxy.host.is_none() || proxy.port.is_none() {
            return Err(ConfigError::ValidationError(
                "An enabled proxy needs both host and port".to_string(),
            ));
        }
    }

    Ok(())
}

/// Identifiers become path segments of remote keys
fn validate_identifier(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') || value == "." || value == ".." {
        return Err(ConfigError::ValidationError(format!(
            "Invalid {} '{}': must be non-empty, must not contain '/' and must not be '.' or '..'",
            what, value
        )));
    }
    Ok(())
}

/// Select the nodes a backup runs against.
///
/// A global request targets every node (limited to `dc` when set), a per-node
/// request only the local node. `only` further restricts by node id.
pub fn select_targets(config: &Config, only: &[String]) -> Result<Vec<NodeTarget>> {
    let request = &config.request;

    let mut targets: Vec<NodeTarget> = if request.global_request {
        config
            .nodes
            .iter()
            .filter(|n| request.dc.as_ref().map_or(true, |dc| &n.datacenter == dc))
            .cloned()
            .collect()
    } else {
        let local = config.local_node.as_ref().ok_or_else(|| {
            ConfigError::ValidationError("local_node is not set".to_string())
        })?;
        config
            .nodes
            .iter()
            .filter(|n| &n.id == local)
            .cloned()
            .collect()
    };

    for id in only {
        if !targets.iter().any(|n| &n.id == id) {
            return Err(ConfigError::NodeNotFound(id.clone()));
        }
    }

    if !only.is_empty() {
        targets.retain(|n| only.contains(&n.id));
    }

    if targets.is_empty() {
        return Err(ConfigError::ValidationError(
            "No nodes match the request".to_string(),
        ));
    }

    Ok(targets)
}
