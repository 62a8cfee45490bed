//! Remote object references and node-aware key resolution

use super::StorageError;
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Identity of the node a backup originates from.
///
/// Components never contain `/` and are never `.` or `..`, so a node-aware
/// path can always be split back into its identity and key: two distinct
/// (node, key) pairs never resolve to the same canonical path, even after a
/// filesystem or URL resolves dot segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NodeIdentity {
    cluster: String,
    datacenter: String,
    node: String,
}

impl NodeIdentity {
    pub fn new(cluster: &str, datacenter: &str, node: &str) -> Result<Self, StorageError> {
        for (what, value) in [("cluster", cluster), ("datacenter", datacenter), ("node", node)] {
            if value.is_empty() || value.contains('/') || value == "." || value == ".." {
                return Err(StorageError::InvalidNode(format!(
                    "{} '{}' must be non-empty, must not contain '/' and must not be '.' or '..'",
                    what, value
                )));
            }
        }

        Ok(Self {
            cluster: cluster.to_string(),
            datacenter: datacenter.to_string(),
            node: node.to_string(),
        })
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Prefix under which all of this node's objects live
    pub fn prefix(&self) -> String {
        format!("{}/{}/{}", self.cluster, self.datacenter, self.node)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// One object in remote storage: the local key and where it lives remotely
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RemoteObjectReference {
    object_key: PathBuf,
    canonical_path: String,
}

impl RemoteObjectReference {
    /// Reference whose canonical path is the key itself
    pub fn plain(key: &Path) -> Result<Self, StorageError> {
        Ok(Self {
            object_key: key.to_path_buf(),
            canonical_path: normalize_key(key)?,
        })
    }

    /// Reference namespaced under the originating node
    pub fn node_aware(node: &NodeIdentity, key: &Path) -> Result<Self, StorageError> {
        Ok(Self {
            object_key: key.to_path_buf(),
            canonical_path: format!("{}/{}", node.prefix(), normalize_key(key)?),
        })
    }

    pub fn object_key(&self) -> &Path {
        &self.object_key
    }

    pub fn canonical_path(&self) -> &str {
        &self.canonical_path
    }
}

impl fmt::Display for RemoteObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_path)
    }
}

/// Render a relative key as a `/`-separated path.
///
/// Absolute keys and keys escaping upwards are rejected.
pub fn normalize_key(key: &Path) -> Result<String, StorageError> {
    let invalid = || StorageError::InvalidKey(key.display().to_string());
    let mut segments = Vec::new();

    for component in key.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str().ok_or_else(invalid)?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid())
            }
        }
    }

    if segments.is_empty() {
        return Err(invalid());
    }

    Ok(segments.join("/"))
}
