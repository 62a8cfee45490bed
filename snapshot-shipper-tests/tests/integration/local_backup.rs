//! Full backups to a local directory bucket

use snapshot_shipper::config::{select_targets, Config};
use snapshot_shipper::storage::DefaultBackendFactory;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use test_utils::{
    node_object_path, sample_object_key, sample_snapshot, write_snapshot_file, BackupOperation,
    ConfigBuilder, LocalCoordinator, OperationState, TestContext, TestResult,
};

async fn run_backup(config: &Config) -> (BackupOperation, anyhow::Result<()>) {
    let targets = select_targets(config, &[]).unwrap();
    let factory = Arc::new(DefaultBackendFactory::from_config(config));
    let coordinator = LocalCoordinator::new(targets, factory);
    let op = BackupOperation::new(Some(Arc::new(coordinator)), config.request.clone()).unwrap();
    let result = op.run().await.map_err(anyhow::Error::from);
    (op, result)
}

fn remote_file(ctx: &TestContext, node: &str, key: &str) -> PathBuf {
    ctx.bucket_dir()
        .join(node_object_path("test-cluster", "dc1", node, key))
}

#[tokio::test]
async fn test_backup_to_local_bucket() -> TestResult {
    let builder = ConfigBuilder::minimal()
        .add_node("node-2", "dc1")
        .create_missing_bucket();
    sample_snapshot(&builder.data_dir("node-1").unwrap(), "snap-1");
    sample_snapshot(&builder.data_dir("node-2").unwrap(), "snap-1");
    let ctx = TestContext::from_builder(builder);
    let config = ctx.config().unwrap().clone();

    let (op, result) = run_backup(&config).await;
    result?;

    assert_eq!(op.state(), OperationState::Completed);
    for node in ["node-1", "node-2"] {
        let data = remote_file(&ctx, node, &sample_object_key("ks2", "orders", "nb-1-big-Data.db"));
        assert_eq!(fs::read(&data)?, b"order rows");
    }

    // no partial uploads are left behind
    let leftovers: Vec<_> = walk(&ctx.bucket_dir())
        .into_iter()
        .filter(|p| p.extension().map_or(false, |e| e == "part"))
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
    Ok(())
}

#[tokio::test]
async fn test_manifest_lists_shipped_files() -> TestResult {
    let builder = ConfigBuilder::minimal().create_missing_bucket();
    sample_snapshot(&builder.data_dir("node-1").unwrap(), "snap-1");
    let ctx = TestContext::from_builder(builder);
    let config = ctx.config().unwrap().clone();

    run_backup(&config).await.1?;

    let manifest_path = remote_file(&ctx, "node-1", "manifests/snap-1.json");
    let manifest: serde_json::Value = serde_json::from_slice(&fs::read(manifest_path)?)?;

    assert_eq!(manifest["snapshot_tag"], "snap-1");
    let files = manifest["files"].as_array().unwrap();
    assert_eq!(files.len(), 3);
    assert!(files.iter().all(|f| f["uploaded"] == true));
    Ok(())
}

#[tokio::test]
async fn test_second_backup_freshens_and_adds_new_files() -> TestResult {
    let builder = ConfigBuilder::minimal().create_missing_bucket();
    let data_dir = builder.data_dir("node-1").unwrap();
    sample_snapshot(&data_dir, "snap-1");
    let ctx = TestContext::from_builder(builder);
    let config = ctx.config().unwrap().clone();

    run_backup(&config).await.1?;

    write_snapshot_file(&data_dir, "ks1", "users", "snap-1", "nb-2-big-Data.db", b"more rows");
    let (op, result) = run_backup(&config).await;
    result?;

    assert_eq!(op.summary().bytes_transferred, Some(9));
    let added = remote_file(&ctx, "node-1", &sample_object_key("ks1", "users", "nb-2-big-Data.db"));
    assert!(added.is_file());

    let manifest_path = remote_file(&ctx, "node-1", "manifests/snap-1.json");
    let manifest: serde_json::Value = serde_json::from_slice(&fs::read(manifest_path)?)?;
    let uploaded = manifest["files"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|f| f["uploaded"] == true)
        .count();
    assert_eq!(uploaded, 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_bucket_fails_without_create() -> TestResult {
    let builder = ConfigBuilder::minimal();
    sample_snapshot(&builder.data_dir("node-1").unwrap(), "snap-1");
    let ctx = TestContext::from_builder(builder);
    let config = ctx.config().unwrap().clone();

    let (op, result) = run_backup(&config).await;

    assert!(result.is_err());
    assert_eq!(op.state(), OperationState::Failed);
    assert_eq!(op.summary().failed, 1);
    assert!(!ctx.bucket_dir().exists());
    Ok(())
}

#[tokio::test]
async fn test_entity_filter_limits_shipped_tables() -> TestResult {
    let builder = ConfigBuilder::minimal()
        .create_missing_bucket()
        .with_entities(&["ks1.users"]);
    sample_snapshot(&builder.data_dir("node-1").unwrap(), "snap-1");
    let ctx = TestContext::from_builder(builder);
    let config = ctx.config().unwrap().clone();

    run_backup(&config).await.1?;

    assert!(remote_file(&ctx, "node-1", &sample_object_key("ks1", "users", "nb-1-big-Index.db")).is_file());
    assert!(!remote_file(&ctx, "node-1", &sample_object_key("ks2", "orders", "nb-1-big-Data.db")).exists());
    Ok(())
}

fn walk(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(walk(&path));
            } else {
                found.push(path);
            }
        }
    }
    found
}
