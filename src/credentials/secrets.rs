//! Secret and environment sources for credential resolution
//!
//! Both are traits so resolution can run against fakes in tests.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Namespace of the pod's service account, as mounted by Kubernetes
pub const SERVICE_ACCOUNT_NAMESPACE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Reads named secrets from the orchestrator
#[cfg_attr(test, mockall::automock)]
pub trait SecretReader: Send + Sync {
    /// Namespace the process runs in
    fn current_namespace(&self) -> io::Result<String>;

    /// Read all entries of a secret
    fn read_secret(&self, namespace: &str, name: &str) -> io::Result<HashMap<String, Vec<u8>>>;
}

/// Secrets mounted as files: `<root>/<namespace>/<name>/<key>`
#[derive(Debug, Clone)]
pub struct MountedSecretReader {
    root: PathBuf,
    namespace_file: PathBuf,
}

impl MountedSecretReader {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            namespace_file: PathBuf::from(SERVICE_ACCOUNT_NAMESPACE),
        }
    }

    pub fn with_namespace_file(mut self, path: &Path) -> Self {
        self.namespace_file = path.to_path_buf();
        self
    }
}

impl SecretReader for MountedSecretReader {
    fn current_namespace(&self) -> io::Result<String> {
        let namespace = fs::read_to_string(&self.namespace_file)?;
        Ok(namespace.trim().to_string())
    }

    fn read_secret(&self, namespace: &str, name: &str) -> io::Result<HashMap<String, Vec<u8>>> {
        let dir = self.root.join(namespace).join(name);
        let mut entries = HashMap::new();

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            // Kubernetes mounts use hidden ..data symlinks next to the keys
            let key = entry.file_name().to_string_lossy().to_string();
            if key.starts_with('.') || !entry.path().is_file() {
                continue;
            }
            entries.insert(key, fs::read(entry.path())?);
        }

        Ok(entries)
    }
}

/// Source of environment variables
pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.is_empty()).cloned()
    }
}
