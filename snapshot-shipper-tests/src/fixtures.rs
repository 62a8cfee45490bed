//! Test fixtures and sample data
//!
//! Snapshot files follow the database's on-disk layout:
//! `<data_dir>/<keyspace>/<table>-<id>/snapshots/<tag>/<file>`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Table id suffix used by sample table directories
pub const TABLE_ID: &str = "0123456789abcdef0123456789abcdef";

/// Directory name of a table, as the database creates it
pub fn table_dir_name(table: &str) -> String {
    format!("{}-{}", table, TABLE_ID)
}

/// Write one snapshot file and return its path
pub fn write_snapshot_file(
    data_dir: &Path,
    keyspace: &str,
    table: &str,
    tag: &str,
    name: &str,
    content: &[u8],
) -> PathBuf {
    let dir = data_dir
        .join(keyspace)
        .join(table_dir_name(table))
        .join("snapshots")
        .join(tag);
    fs::create_dir_all(&dir).expect("Failed to create snapshot dir");

    let path = dir.join(name);
    fs::write(&path, content).expect("Failed to write snapshot file");
    path
}

/// A small snapshot of two keyspaces, three files in total
pub fn sample_snapshot(data_dir: &Path, tag: &str) -> Vec<PathBuf> {
    vec![
        write_snapshot_file(data_dir, "ks1", "users", tag, "nb-1-big-Data.db", b"user rows"),
        write_snapshot_file(data_dir, "ks1", "users", tag, "nb-1-big-Index.db", b"user index"),
        write_snapshot_file(data_dir, "ks2", "orders", tag, "nb-1-big-Data.db", b"order rows"),
    ]
}

/// Object key (below the node prefix) of a sample snapshot file
pub fn sample_object_key(keyspace: &str, table: &str, name: &str) -> String {
    format!("data/{}/{}/{}", keyspace, table_dir_name(table), name)
}

/// Remote path of a node's object below the bucket
pub fn node_object_path(cluster: &str, dc: &str, node: &str, key: &str) -> String {
    format!("{}/{}/{}/{}", cluster, dc, node, key)
}

/// Mount a secret as files: `<root>/<namespace>/<name>/<key>`
pub fn write_secret(root: &Path, namespace: &str, name: &str, entries: &HashMap<&str, &str>) -> PathBuf {
    let dir = root.join(namespace).join(name);
    fs::create_dir_all(&dir).expect("Failed to create secret dir");

    for (key, value) in entries {
        fs::write(dir.join(key), value).expect("Failed to write secret entry");
    }
    dir
}

/// Environment of a process running inside Kubernetes
pub fn kubernetes_env() -> HashMap<String, String> {
    HashMap::from([("KUBERNETES_SERVICE_HOST".to_string(), "10.0.0.1".to_string())])
}
