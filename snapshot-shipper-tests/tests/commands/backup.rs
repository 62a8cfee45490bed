//! Tests for the 'backup' command
//!
//! The backup command selects the targets, coordinates one sub-task per node
//! and reports the operation summary.

use snapshot_shipper::config::{select_targets, Config};
use snapshot_shipper::managers::{manifest_key, OperationError};
use std::sync::Arc;
use std::time::Duration;
use test_utils::{
    node_object_path, sample_object_key, sample_snapshot, BackupOperation, ConfigBuilder,
    InMemoryBackendFactory, InMemoryBucket, LocalCoordinator, OperationState, TaskStatus,
    TestResult,
};

fn operation(config: &Config, factory: InMemoryBackendFactory) -> TestResult<BackupOperation> {
    let targets = select_targets(config, &[])?;
    let coordinator = LocalCoordinator::new(targets, Arc::new(factory));
    Ok(BackupOperation::new(Some(Arc::new(coordinator)), config.request.clone())?)
}

fn two_node_builder() -> ConfigBuilder {
    let builder = ConfigBuilder::minimal()
        .with_location("s3://bucket/prod")
        .add_node("node-2", "dc1");
    sample_snapshot(&builder.data_dir("node-1").unwrap(), "snap-1");
    sample_snapshot(&builder.data_dir("node-2").unwrap(), "snap-1");
    builder
}

#[tokio::test]
async fn test_backup_uploads_every_node() -> TestResult {
    let builder = two_node_builder();
    let config = builder.build();
    let bucket = InMemoryBucket::new();

    let op = operation(&config, InMemoryBackendFactory::new(bucket.clone()))?;
    op.run().await?;

    assert_eq!(op.state(), OperationState::Completed);
    assert_eq!(op.progress(), 1.0);

    for node in ["node-1", "node-2"] {
        let key = sample_object_key("ks1", "users", "nb-1-big-Data.db");
        let object = bucket
            .object(&node_object_path("prod", "dc1", node, &key))
            .expect("object uploaded");
        assert_eq!(object.content, b"user rows");

        let manifest = manifest_key("snap-1");
        let manifest_path = node_object_path("prod", "dc1", node, &manifest.to_string_lossy());
        assert!(bucket.object(&manifest_path).is_some(), "manifest for {}", node);
    }

    let summary = op.summary();
    assert_eq!(summary.succeeded, 2);
    assert!(summary.erroneous.is_empty());
    assert_eq!(summary.bytes_transferred, Some(2 * (9 + 10 + 10)));
    Ok(())
}

#[tokio::test]
async fn test_repeated_backup_only_freshens() -> TestResult {
    let config = two_node_builder().build();
    let bucket = InMemoryBucket::new();

    operation(&config, InMemoryBackendFactory::new(bucket.clone()))?.run().await?;
    let puts_after_first = bucket.put_count();

    let second = operation(&config, InMemoryBackendFactory::new(bucket.clone()))?;
    second.run().await?;

    // only the two manifests are written again
    assert_eq!(bucket.put_count(), puts_after_first + 2);
    assert_eq!(second.summary().bytes_transferred, Some(0));

    let key = sample_object_key("ks2", "orders", "nb-1-big-Data.db");
    let object = bucket.object(&node_object_path("prod", "dc1", "node-1", &key)).unwrap();
    assert_eq!(object.refresh_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_snapshot_fails_operation() -> TestResult {
    let builder = ConfigBuilder::minimal()
        .with_location("s3://bucket/prod")
        .add_node("node-2", "dc1");
    sample_snapshot(&builder.data_dir("node-1").unwrap(), "snap-1");
    let config = builder.build();

    let op = operation(&config, InMemoryBackendFactory::new(InMemoryBucket::new()))?;
    let result = op.run().await;

    assert!(matches!(result, Err(OperationError::Gathered(_))));
    assert_eq!(op.state(), OperationState::Failed);

    let summary = op.summary();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(summary.erroneous.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_transport_error_is_erroneous() -> TestResult {
    let config = two_node_builder().build();
    let bucket = InMemoryBucket::new();
    let broken = InMemoryBucket::new().fail_uploads("connection reset by peer");

    let op = operation(
        &config,
        InMemoryBackendFactory::new(bucket).with_node_bucket("node-2", broken),
    )?;
    let result = op.run().await;

    assert!(result.is_err());
    let erroneous = op.summary().erroneous;
    assert_eq!(erroneous.len(), 1);
    assert_eq!(erroneous[0].target, "node-2");
    assert_eq!(erroneous[0].status, TaskStatus::Erroneous);
    assert!(erroneous[0]
        .message
        .as_deref()
        .unwrap()
        .contains("connection reset by peer"));
    assert!(op.failure_cause().unwrap().contains("node-2"));
    Ok(())
}

#[tokio::test]
async fn test_missing_bucket_is_created_on_request() -> TestResult {
    let builder = two_node_builder().create_missing_bucket();
    let config = builder.build();
    let bucket = InMemoryBucket::missing();

    operation(&config, InMemoryBackendFactory::new(bucket.clone()))?.run().await?;

    assert!(bucket.exists());
    assert!(!bucket.paths().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_timeout_cancels_slow_nodes() -> TestResult {
    let config = two_node_builder().build();
    let slow = InMemoryBucket::new().delay_uploads(Duration::from_secs(30));
    let targets = select_targets(&config, &[])?;

    let coordinator = LocalCoordinator::new(targets, Arc::new(InMemoryBackendFactory::new(slow)))
        .with_timeout(Duration::from_millis(200));
    let op = BackupOperation::new(Some(Arc::new(coordinator)), config.request.clone())?;

    assert!(op.run().await.is_err());

    let summary = op.summary();
    assert_eq!(summary.erroneous.len(), 2);
    assert!(summary
        .erroneous
        .iter()
        .all(|o| o.message.as_deref().unwrap_or_default().contains("cancelled")));
    Ok(())
}

#[tokio::test]
async fn test_operation_runs_only_once() -> TestResult {
    let config = two_node_builder().build();
    let op = operation(&config, InMemoryBackendFactory::new(InMemoryBucket::new()))?;

    op.run().await?;
    let second = op.run().await;

    assert!(matches!(second, Err(OperationError::InvalidState { .. })));
    assert_eq!(op.state(), OperationState::Completed);
    Ok(())
}

#[test]
fn test_operation_requires_coordinator() {
    let config = ConfigBuilder::minimal().build();
    let result = BackupOperation::new(None, config.request);
    assert!(matches!(result, Err(OperationError::NoCoordinator)));
}
