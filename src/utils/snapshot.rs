//! Snapshot discovery in a node's data directory
//!
//! Layout: `<data_dir>/<keyspace>/<table>/snapshots/<tag>/...`. Table
//! directories may carry a `-<32 hex digit id>` suffix which is ignored when
//! matching entities but kept in object keys.

use crate::config::DatabaseEntities;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SNAPSHOTS_DIR: &str = "snapshots";

/// One file of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub keyspace: String,
    pub table: String,
    pub local_path: PathBuf,
    /// Key below the node prefix: `data/<keyspace>/<table dir>/<file>`
    pub object_key: PathBuf,
    pub size: u64,
}

/// Table name without its id suffix
pub fn table_name(dir_name: &str) -> &str {
    match dir_name.rsplit_once('-') {
        Some((name, id))
            if !name.is_empty() && id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            name
        }
        _ => dir_name,
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();

    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read directory {:?}", dir))? {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }

    dirs.sort();
    Ok(dirs)
}

fn collect_files(dir: &Path, files: &mut Vec<(PathBuf, u64)>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read snapshot directory {:?}", dir))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), files)?;
        } else if file_type.is_file() {
            files.push((entry.path(), entry.metadata()?.len()));
        }
    }

    Ok(())
}

/// Find every file of snapshot `tag` below `data_dir` that `entities` selects
pub fn discover(data_dir: &Path, tag: &str, entities: &DatabaseEntities) -> Result<Vec<SnapshotFile>> {
    let mut found = Vec::new();

    for keyspace_dir in subdirectories(data_dir)? {
        let keyspace = keyspace_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for table_dir in subdirectories(&keyspace_dir)? {
            let table_dir_name = table_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let table = table_name(&table_dir_name).to_string();

            if !entities.includes(&keyspace, &table) {
                continue;
            }

            let snapshot_dir = table_dir.join(SNAPSHOTS_DIR).join(tag);
            if !snapshot_dir.is_dir() {
                continue;
            }

            let mut files = Vec::new();
            collect_files(&snapshot_dir, &mut files)?;
            debug!("Found {} files for {}.{} in {:?}", files.len(), keyspace, table, snapshot_dir);

            for (local_path, size) in files {
                let relative = local_path
                    .strip_prefix(&snapshot_dir)
                    .with_context(|| format!("{:?} is outside {:?}", local_path, snapshot_dir))?;

                found.push(SnapshotFile {
                    keyspace: keyspace.clone(),
                    table: table.clone(),
                    object_key: Path::new("data")
                        .join(&keyspace)
                        .join(&table_dir_name)
                        .join(relative),
                    local_path,
                    size,
                });
            }
        }
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntitySelector;
    use tempfile::TempDir;

    const TABLE_ID: &str = "0123456789abcdef0123456789abcdef";

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn data_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, &format!("ks1/users-{}/snapshots/snap-1/nb-1-big-Data.db", TABLE_ID), "users");
        write(root, "ks1/events/snapshots/snap-1/nb-2-big-Data.db", "events");
        write(root, "ks1/events/snapshots/snap-1/backups/nb-3-big-Data.db", "nested");
        write(root, "ks1/events/snapshots/snap-0/old.db", "old");
        write(root, "ks2/logs/snapshots/snap-1/nb-4-big-Data.db", "logs");
        temp_dir
    }

    #[test]
    fn test_table_name_strips_id() {
        assert_eq!(table_name(&format!("users-{}", TABLE_ID)), "users");
        assert_eq!(table_name("user-events"), "user-events");
        assert_eq!(table_name("events"), "events");
    }

    #[test]
    fn test_discover_all_entities() {
        let temp_dir = data_dir();
        let files = discover(temp_dir.path(), "snap-1", &DatabaseEntities::default()).unwrap();

        let keys: Vec<_> = files.iter().map(|f| f.object_key.clone()).collect();
        assert_eq!(
            keys,
            vec![
                PathBuf::from("data/ks1/events/backups/nb-3-big-Data.db"),
                PathBuf::from("data/ks1/events/nb-2-big-Data.db"),
                PathBuf::from(format!("data/ks1/users-{}/nb-1-big-Data.db", TABLE_ID)),
                PathBuf::from("data/ks2/logs/nb-4-big-Data.db"),
            ]
        );
        assert_eq!(files[3].size, 4);
    }

    #[test]
    fn test_discover_filters_entities() {
        let temp_dir = data_dir();
        let entities = DatabaseEntities(vec![
            "ks1.users".parse::<EntitySelector>().unwrap(),
            "ks2".parse::<EntitySelector>().unwrap(),
        ]);

        let files = discover(temp_dir.path(), "snap-1", &entities).unwrap();

        let tables: Vec<_> = files.iter().map(|f| f.table.as_str()).collect();
        assert_eq!(tables, vec!["users", "logs"]);
    }

    #[test]
    fn test_unknown_tag_finds_nothing() {
        let temp_dir = data_dir();
        assert!(discover(temp_dir.path(), "snap-9", &DatabaseEntities::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_data_dir_is_error() {
        assert!(discover(Path::new("/nonexistent/data"), "snap-1", &DatabaseEntities::default()).is_err());
    }
}
