//! End-to-end operation scenarios across backends and credential tiers

use snapshot_shipper::config::select_targets;
use snapshot_shipper::credentials::{CredentialResolver, MountedSecretReader};
use snapshot_shipper::managers::OperationError;
use snapshot_shipper::storage::{BackendFactory, DefaultBackendFactory, NodeIdentity};
use std::collections::HashMap;
use std::sync::Arc;
use test_utils::{
    kubernetes_env, sample_snapshot, write_secret, BackupOperation, ConfigBuilder,
    InMemoryBackendFactory, InMemoryBucket, LocalCoordinator, OperationState, TaskStatus,
    TestResult,
};

fn kubernetes_factory(secrets_root: &std::path::Path) -> DefaultBackendFactory {
    let resolver = CredentialResolver::new(
        Arc::new(kubernetes_env()),
        Arc::new(MountedSecretReader::new(secrets_root)),
    );
    DefaultBackendFactory::new(resolver, true)
}

#[tokio::test]
async fn test_two_nodes_complete() -> TestResult {
    let builder = ConfigBuilder::minimal()
        .with_location("s3://bucket/prod")
        .add_node("node-2", "dc1")
        .with_tag("snap-1");
    sample_snapshot(&builder.data_dir("node-1").unwrap(), "snap-1");
    sample_snapshot(&builder.data_dir("node-2").unwrap(), "snap-1");
    let config = builder.build();

    let coordinator = LocalCoordinator::new(
        select_targets(&config, &[])?,
        Arc::new(InMemoryBackendFactory::new(InMemoryBucket::new())),
    );
    let op = BackupOperation::new(Some(Arc::new(coordinator)), config.request.clone())?;
    op.run().await?;

    assert_eq!(op.state(), OperationState::Completed);
    assert!(op.failure_cause().is_none());
    assert_eq!(op.summary().succeeded, 2);
    Ok(())
}

#[tokio::test]
async fn test_transport_error_on_one_node() -> TestResult {
    let builder = ConfigBuilder::minimal()
        .with_location("s3://bucket/prod")
        .add_node("node-2", "dc1")
        .with_tag("snap-2");
    sample_snapshot(&builder.data_dir("node-1").unwrap(), "snap-2");
    sample_snapshot(&builder.data_dir("node-2").unwrap(), "snap-2");
    let config = builder.build();

    let factory = InMemoryBackendFactory::new(InMemoryBucket::new()).with_node_bucket(
        "node-2",
        InMemoryBucket::new().fail_uploads_matching("ks2", "connection reset"),
    );
    let coordinator = LocalCoordinator::new(select_targets(&config, &[])?, Arc::new(factory));
    let op = BackupOperation::new(Some(Arc::new(coordinator)), config.request.clone())?;

    match op.run().await {
        Err(OperationError::Gathered(error)) => {
            assert_eq!(error.outcomes().len(), 1);
            assert_eq!(error.outcomes()[0].target, "node-2");
            assert_eq!(error.outcomes()[0].status, TaskStatus::Erroneous);
        }
        other => panic!("Expected gathered errors, got {:?}", other),
    }
    assert_eq!(op.state(), OperationState::Failed);
    Ok(())
}

#[tokio::test]
async fn test_missing_secret_keys_fail_before_transfer() -> TestResult {
    let builder = ConfigBuilder::minimal()
        .with_location("s3://bucket/prod")
        .with_secret("backups", "empty-secret");
    sample_snapshot(&builder.data_dir("node-1").unwrap(), "snap-1");
    let secrets_root = builder.temp_dir().join("secrets");
    write_secret(&secrets_root, "backups", "empty-secret", &HashMap::from([("region", "us-east-1")]));
    let config = builder.build();

    let coordinator = LocalCoordinator::new(
        select_targets(&config, &[])?,
        Arc::new(kubernetes_factory(&secrets_root)),
    );
    let op = BackupOperation::new(Some(Arc::new(coordinator)), config.request.clone())?;

    let result = op.run().await;

    assert!(matches!(result, Err(OperationError::Coordinator(_))));
    assert_eq!(op.state(), OperationState::Failed);
    let cause = op.failure_cause().unwrap();
    assert!(cause.contains("access-key-id"), "{}", cause);
    assert!(cause.contains("secret-access-key"), "{}", cause);
    assert!(op.summary().erroneous.is_empty());
    Ok(())
}

#[test]
fn test_complete_secret_builds_backend() {
    let builder = ConfigBuilder::minimal()
        .with_location("s3://bucket/prod")
        .with_secret("backups", "object-store");
    let secrets_root = builder.temp_dir().join("secrets");
    write_secret(
        &secrets_root,
        "backups",
        "object-store",
        &HashMap::from([
            ("access-key-id", "AKIA"),
            ("secret-access-key", "s3cr3t"),
            ("endpoint", "http://minio.local:9000"),
            ("region", "us-east-1"),
        ]),
    );
    let config = builder.build();
    let node = NodeIdentity::new("prod", "dc1", "node-1").unwrap();

    let backend = kubernetes_factory(&secrets_root)
        .build(&config.request, &node)
        .unwrap();

    assert_eq!(backend.node(), &node);
    backend.cleanup();
}
