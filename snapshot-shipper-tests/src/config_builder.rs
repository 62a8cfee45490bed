//! Fluent API for building test configurations
//!
//! Provides a builder pattern for creating test configurations with sensible defaults.
//! Every builder owns a temporary directory holding node data directories, the
//! backup root of the `file` provider, logs and mounted secrets.

use snapshot_shipper::config::{
    BackupRequest, Config, DatabaseEntities, LoggingSettings, NodeTarget, StorageSettings,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Bucket used by default `file://` locations
pub const TEST_BUCKET: &str = "test-bucket";
/// Cluster used by default locations
pub const TEST_CLUSTER: &str = "test-cluster";
/// Snapshot tag used by default requests
pub const TEST_TAG: &str = "snap-1";

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    request: BackupRequest,
    nodes: Vec<NodeTarget>,
    local_node: Option<String>,
    storage: StorageSettings,
    logging: LoggingSettings,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder without nodes, backing up to a local directory
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let backup_root = temp_dir.path().join("backups");
        fs::create_dir_all(&backup_root).expect("Failed to create backup root");

        let log_directory = temp_dir.path().join("logs");
        fs::create_dir_all(&log_directory).expect("Failed to create log directory");

        let secrets_root = temp_dir.path().join("secrets");
        fs::create_dir_all(&secrets_root).expect("Failed to create secrets root");

        let location = format!(
            "file://{}/{}/{}",
            toml_path(&backup_root),
            TEST_BUCKET,
            TEST_CLUSTER
        );
        let request = BackupRequest::new(
            location.parse().expect("Failed to parse test storage location"),
            TEST_TAG,
        );

        Self {
            temp_dir,
            request,
            nodes: Vec::new(),
            local_node: None,
            storage: StorageSettings {
                path_style_access: false,
                secrets_root,
            },
            logging: LoggingSettings {
                directory: log_directory,
                level: "debug".to_string(),
                max_files: 3,
            },
        }
    }

    /// Create a minimal config with a single node in dc1
    pub fn minimal() -> Self {
        Self::new().add_node("node-1", "dc1")
    }

    /// Add a node with its own data directory below the temp dir
    pub fn add_node(mut self, id: &str, datacenter: &str) -> Self {
        let data_dir = self.temp_dir.path().join("nodes").join(id).join("data");
        fs::create_dir_all(&data_dir).expect("Failed to create node data dir");

        self.nodes.push(NodeTarget {
            id: id.to_string(),
            datacenter: datacenter.to_string(),
            data_dir,
        });
        self
    }

    /// Add a node whose data directory does not exist
    pub fn add_node_at(mut self, id: &str, datacenter: &str, data_dir: &Path) -> Self {
        self.nodes.push(NodeTarget {
            id: id.to_string(),
            datacenter: datacenter.to_string(),
            data_dir: data_dir.to_path_buf(),
        });
        self
    }

    /// Use a different storage location, e.g. `s3://bucket/cluster`
    pub fn with_location(mut self, location: &str) -> Self {
        self.request.storage_location = location.parse().expect("Invalid storage location");
        self
    }

    /// Set the snapshot tag
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.request.snapshot_tag = tag.to_string();
        self
    }

    /// Restrict the backup to keyspaces or tables (`ks` or `ks.table`)
    pub fn with_entities(mut self, entities: &[&str]) -> Self {
        self.request.entities = DatabaseEntities(
            entities
                .iter()
                .map(|e| e.parse().expect("Invalid entity selector"))
                .collect(),
        );
        self
    }

    pub fn with_concurrency(mut self, connections: usize) -> Self {
        self.request.concurrent_connections = connections;
        self
    }

    pub fn with_bandwidth(mut self, bytes_per_sec: u64) -> Self {
        self.request.bandwidth = Some(bytes_per_sec);
        self
    }

    /// Set the operation timeout in hours
    pub fn with_timeout_hours(mut self, hours: u32) -> Self {
        self.request.timeout = Some(hours);
        self
    }

    /// Limit a global request to one datacenter
    pub fn with_dc(mut self, dc: &str) -> Self {
        self.request.dc = Some(dc.to_string());
        self
    }

    /// Turn the request into a per-node request for `node`
    pub fn local_only(mut self, node: &str) -> Self {
        self.request.global_request = false;
        self.local_node = Some(node.to_string());
        self
    }

    pub fn create_missing_bucket(mut self) -> Self {
        self.request.create_missing_bucket = true;
        self
    }

    /// Read credentials from a mounted secret in `namespace`
    pub fn with_secret(mut self, namespace: &str, name: &str) -> Self {
        self.request.k8s_namespace = Some(namespace.to_string());
        self.request.k8s_secret_name = Some(name.to_string());
        self
    }

    /// Set the log directory
    pub fn with_log_dir(mut self, path: &Path) -> Self {
        self.logging.directory = path.to_path_buf();
        self
    }

    /// Get the temp directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Root directory holding the bucket directory of default locations
    pub fn backup_root(&self) -> PathBuf {
        self.temp_dir.path().join("backups")
    }

    /// Data directory of a configured node
    pub fn data_dir(&self, node: &str) -> Option<PathBuf> {
        self.nodes
            .iter()
            .find(|n| n.id == node)
            .map(|n| n.data_dir.clone())
    }

    fn into_parts(self) -> (Config, TempDir) {
        let config = Config {
            request: self.request,
            nodes: self.nodes,
            local_node: self.local_node,
            storage: self.storage,
            logging: self.logging,
        };
        (config, self.temp_dir)
    }

    /// Build the Config
    pub fn build(self) -> Config {
        self.into_parts().0
    }

    /// Keep the temp directory (don't delete on drop)
    pub fn persist(self) -> (Config, TempDir) {
        self.into_parts()
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Path as it can be embedded in a TOML string or URL
pub fn toml_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
