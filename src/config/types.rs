use super::loader::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub request: BackupRequest,

    /// Nodes whose snapshots can be shipped
    #[serde(default)]
    pub nodes: Vec<NodeTarget>,

    /// Node targeted by a per-node (non-global) request
    #[serde(default)]
    pub local_node: Option<String>,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Supported storage providers, tagged by the storage location scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    S3,
    Azure,
    Gcp,
    File,
}

impl Provider {
    /// URL scheme used in storage locations
    pub fn scheme(&self) -> &'static str {
        match self {
            Provider::S3 => "s3",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
            Provider::File => "file",
        }
    }

    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_lowercase().as_str() {
            "s3" => Some(Provider::S3),
            "azure" => Some(Provider::Azure),
            "gcp" | "gcs" => Some(Provider::Gcp),
            "file" => Some(Provider::File),
            _ => None,
        }
    }

    /// Prefix of the environment variables holding region and endpoint.
    /// The local filesystem needs no credentials.
    pub fn env_prefix(&self) -> Option<&'static str> {
        match self {
            Provider::S3 => Some("AWS"),
            Provider::Azure => Some("AZURE"),
            Provider::Gcp => Some("GCP"),
            Provider::File => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Where backups go: `provider://bucket/cluster`.
///
/// For the `file` provider the bucket is a directory below a root directory:
/// `file:///var/backups/bucket/cluster`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageLocation {
    raw: String,
    pub provider: Provider,
    pub bucket: String,
    pub cluster: String,
    /// Root directory holding the bucket directory (file provider only)
    pub file_root: Option<PathBuf>,
}

impl StorageLocation {
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for StorageLocation {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidStorageLocation(format!("{}: {}", raw, reason));

        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| invalid("expected provider://bucket/cluster"))?;

        let provider = Provider::from_scheme(scheme)
            .ok_or_else(|| invalid(&format!("unknown provider '{}'", scheme)))?;

        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        let (file_root, bucket, cluster) = match provider {
            Provider::File => {
                if !rest.starts_with('/') {
                    return Err(invalid("file locations must use an absolute path"));
                }
                if segments.len() < 2 {
                    return Err(invalid("expected file:///root/bucket/cluster"));
                }
                let split = segments.len() - 2;
                let mut root = PathBuf::from("/");
                root.extend(&segments[..split]);
                (Some(root), segments[split], segments[split + 1])
            }
            _ => {
                if segments.len() != 2 {
                    return Err(invalid("expected exactly a bucket and a cluster name"));
                }
                (None, segments[0], segments[1])
            }
        };

        Ok(Self {
            raw: raw.to_string(),
            provider,
            bucket: bucket.to_string(),
            cluster: cluster.to_string(),
            file_root,
        })
    }
}

impl TryFrom<String> for StorageLocation {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StorageLocation> for String {
    fn from(location: StorageLocation) -> Self {
        location.raw
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A keyspace, or a single table within a keyspace (`keyspace.table`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntitySelector {
    pub keyspace: String,
    pub table: Option<String>,
}

impl EntitySelector {
    pub fn matches(&self, keyspace: &str, table: &str) -> bool {
        self.keyspace == keyspace && self.table.as_deref().map_or(true, |t| t == table)
    }
}

impl FromStr for EntitySelector {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.split('.');
        let keyspace = parts.next().unwrap_or_default().trim();
        let table = parts.next().map(str::trim);

        if keyspace.is_empty() || table == Some("") || parts.next().is_some() {
            return Err(ConfigError::InvalidEntity(raw.to_string()));
        }

        Ok(Self {
            keyspace: keyspace.to_string(),
            table: table.map(str::to_string),
        })
    }
}

impl TryFrom<String> for EntitySelector {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntitySelector> for String {
    fn from(entity: EntitySelector) -> Self {
        match entity.table {
            Some(table) => format!("{}.{}", entity.keyspace, table),
            None => entity.keyspace,
        }
    }
}

/// Set of entities to back up; empty means everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DatabaseEntities(pub Vec<EntitySelector>);

impl DatabaseEntities {
    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    pub fn includes(&self, keyspace: &str, table: &str) -> bool {
        self.is_all() || self.0.iter().any(|e| e.matches(keyspace, table))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
}

/// Optional proxy for the object store transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub use_proxy: bool,
    #[serde(default)]
    pub protocol: ProxyProtocol,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Immutable description of one backup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackupRequest {
    pub storage_location: StorageLocation,

    pub snapshot_tag: String,

    #[serde(default)]
    pub entities: DatabaseEntities,

    /// Maximum concurrent transfers per node
    #[serde(default = "default_concurrent_connections")]
    pub concurrent_connections: usize,

    /// Bandwidth cap per node in bytes per second
    #[serde(default)]
    pub bandwidth: Option<u64>,

    /// Operation timeout in hours
    #[serde(default)]
    pub timeout: Option<u32>,

    /// Use plain http towards the object store
    #[serde(default)]
    pub insecure: bool,

    #[serde(default)]
    pub create_missing_bucket: bool,

    #[serde(default)]
    pub skip_bucket_verification: bool,

    /// Back up every node (optionally limited to `dc`) instead of the local node only
    #[serde(default)]
    pub global_request: bool,

    #[serde(default)]
    pub dc: Option<String>,

    #[serde(default)]
    pub k8s_namespace: Option<String>,

    #[serde(default)]
    pub k8s_secret_name: Option<String>,

    #[serde(default)]
    pub proxy: Option<ProxySettings>,
}

impl BackupRequest {
    /// Minimal request with defaults for everything but location and tag
    pub fn new(storage_location: StorageLocation, snapshot_tag: &str) -> Self {
        Self {
            storage_location,
            snapshot_tag: snapshot_tag.to_string(),
            entities: DatabaseEntities::default(),
            concurrent_connections: default_concurrent_connections(),
            bandwidth: None,
            timeout: None,
            insecure: false,
            create_missing_bucket: false,
            skip_bucket_verification: false,
            global_request: true,
            dc: None,
            k8s_namespace: None,
            k8s_secret_name: None,
            proxy: None,
        }
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
            .map(|hours| Duration::from_secs(u64::from(hours) * 3600))
    }

    /// Secret name, when one is configured and non-empty
    pub fn secret_name(&self) -> Option<&str> {
        self.k8s_secret_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Proxy settings, only when the proxy is enabled
    pub fn active_proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref().filter(|p| p.use_proxy)
    }
}

/// A cluster node and where its data lives
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeTarget {
    pub id: String,
    pub datacenter: String,
    pub data_dir: PathBuf,
}

/// Backend construction settings that are not part of a request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    /// Path-style addressing (`endpoint/bucket/key`) for S3-compatible stores
    #[serde(default)]
    pub path_style_access: bool,

    /// Root of mounted Kubernetes secrets (`<root>/<namespace>/<name>/<key>`)
    #[serde(default = "default_secrets_root")]
    pub secrets_root: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path_style_access: false,
            secrets_root: default_secrets_root(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_max_files")]
    pub max_files: u32,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            level: default_log_level(),
            max_files: default_log_max_files(),
        }
    }
}

// Default value functions

fn default_concurrent_connections() -> usize { 10 }
fn default_secrets_root() -> PathBuf { PathBuf::from("/etc/snapshot-shipper/secrets") }
fn default_log_directory() -> PathBuf { PathBuf::from("~/logs") }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
