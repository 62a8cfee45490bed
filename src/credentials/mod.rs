//! Tiered resolution of storage backend configuration
//!
//! Resolution order:
//! 1. Inside Kubernetes with a secret name configured: the named secret
//!    (`access-key-id` and `secret-access-key` required, `endpoint` and
//!    `region` optional)
//! 2. Otherwise `{PREFIX}_REGION` / `{PREFIX}_ENDPOINT` from the environment,
//!    leaving access keys to the provider's ambient credential chain
//!
//! An endpoint without a region is rejected in every tier.

mod secrets;

pub use secrets::{EnvSource, MountedSecretReader, ProcessEnv, SecretReader, SERVICE_ACCOUNT_NAMESPACE};

#[cfg(test)]
pub use secrets::MockSecretReader;

use crate::config::BackupRequest;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

pub const ACCESS_KEY_ID: &str = "access-key-id";
pub const SECRET_ACCESS_KEY: &str = "secret-access-key";
pub const ENDPOINT: &str = "endpoint";
pub const REGION: &str = "region";

/// Set by Kubernetes in every pod
const KUBERNETES_SERVICE_HOST: &str = "KUBERNETES_SERVICE_HOST";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Secret '{secret}' in namespace '{namespace}' does not contain required entries: {}", .keys.join(", "))]
    MissingSecretEntries {
        namespace: String,
        secret: String,
        keys: Vec<String>,
    },

    #[error("Unable to read secret '{secret}' in namespace '{namespace}': {source}")]
    SecretUnavailable {
        namespace: String,
        secret: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to determine Kubernetes namespace: {0}")]
    NamespaceUnavailable(#[source] std::io::Error),

    #[error("Secret entry '{0}' is not valid UTF-8")]
    InvalidSecretEntry(String),

    #[error("{region_var} must be set if {endpoint_var} is set")]
    EndpointWithoutRegion {
        endpoint_var: String,
        region_var: String,
    },
}

pub type Result<T> = std::result::Result<T, CredentialError>;

/// Which tier produced a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Secret { namespace: String, name: String },
    Environment,
    /// Provider needs no configuration (local filesystem)
    NotRequired,
}

/// Resolved configuration for one storage backend
#[derive(Clone, PartialEq, Eq)]
pub struct StorageBackendConfig {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub source: ConfigSource,
}

impl StorageBackendConfig {
    pub fn empty(source: ConfigSource) -> Self {
        Self {
            endpoint: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            source,
        }
    }

    /// Whether static keys are present; otherwise the ambient chain applies
    pub fn has_static_keys(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }

    fn validate(self, prefix: &str) -> Result<Self> {
        if self.endpoint.is_some() && self.region.is_none() {
            return Err(CredentialError::EndpointWithoutRegion {
                endpoint_var: format!("{}_ENDPOINT", prefix),
                region_var: format!("{}_REGION", prefix),
            });
        }
        Ok(Self {
            region: self.region.map(|r| r.to_lowercase()),
            ..self
        })
    }
}

impl fmt::Debug for StorageBackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBackendConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("source", &self.source)
            .finish()
    }
}

/// Resolves backend configuration for a request
#[derive(Clone)]
pub struct CredentialResolver {
    env: Arc<dyn EnvSource>,
    secrets: Arc<dyn SecretReader>,
}

impl CredentialResolver {
    pub fn new(env: Arc<dyn EnvSource>, secrets: Arc<dyn SecretReader>) -> Self {
        Self { env, secrets }
    }

    /// Resolver backed by the process environment and mounted secrets
    pub fn from_process(secrets_root: &Path) -> Self {
        Self::new(
            Arc::new(ProcessEnv),
            Arc::new(MountedSecretReader::new(secrets_root)),
        )
    }

    pub fn running_in_kubernetes(&self) -> bool {
        self.env.var(KUBERNETES_SERVICE_HOST).is_some()
    }

    /// Resolve the configuration for the request's storage provider
    pub fn resolve(&self, request: &BackupRequest) -> Result<StorageBackendConfig> {
        let Some(prefix) = request.storage_location.provider.env_prefix() else {
            return Ok(StorageBackendConfig::empty(ConfigSource::NotRequired));
        };

        let config = if self.running_in_kubernetes() {
            match request.secret_name() {
                Some(secret) => self.from_secret(request, secret)?,
                None => {
                    warn!(
                        "Kubernetes secret name for resolving {} credentials was not specified, \
                         resolving from environment; credentials fall back to the ambient chain",
                        request.storage_location.provider
                    );
                    self.from_env(prefix)
                }
            }
        } else {
            self.from_env(prefix)
        };

        config.validate(prefix)
    }

    fn from_env(&self, prefix: &str) -> StorageBackendConfig {
        debug!("Resolving storage configuration from {}_* environment variables", prefix);

        StorageBackendConfig {
            endpoint: self.env.var(&format!("{}_ENDPOINT", prefix)),
            region: self.env.var(&format!("{}_REGION", prefix)),
            access_key_id: None,
            secret_access_key: None,
            source: ConfigSource::Environment,
        }
    }

    fn from_secret(&self, request: &BackupRequest, secret: &str) -> Result<StorageBackendConfig> {
        let namespace = match request.k8s_namespace.as_deref().filter(|n| !n.is_empty()) {
            Some(namespace) => namespace.to_string(),
            None => self
                .secrets
                .current_namespace()
                .map_err(CredentialError::NamespaceUnavailable)?,
        };

        debug!("Resolving storage configuration from secret {}/{}", namespace, secret);

        let data = self
            .secrets
            .read_secret(&namespace, secret)
            .map_err(|source| CredentialError::SecretUnavailable {
                namespace: namespace.clone(),
                secret: secret.to_string(),
                source,
            })?;

        let missing: Vec<String> = [ACCESS_KEY_ID, SECRET_ACCESS_KEY]
            .iter()
            .filter(|key| !data.contains_key(**key))
            .map(|key| key.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(CredentialError::MissingSecretEntries {
                namespace,
                secret: secret.to_string(),
                keys: missing,
            });
        }

        Ok(StorageBackendConfig {
            endpoint: entry(&data, ENDPOINT)?,
            region: entry(&data, REGION)?,
            access_key_id: entry(&data, ACCESS_KEY_ID)?,
            secret_access_key: entry(&data, SECRET_ACCESS_KEY)?,
            source: ConfigSource::Secret {
                namespace,
                name: secret.to_string(),
            },
        })
    }
}

fn entry(data: &HashMap<String, Vec<u8>>, key: &str) -> Result<Option<String>> {
    match data.get(key) {
        Some(bytes) => String::from_utf8(bytes.clone())
            .map(|s| Some(s.trim().to_string()))
            .map_err(|_| CredentialError::InvalidSecretEntry(key.to_string())),
        None => Ok(None),
    }
}
