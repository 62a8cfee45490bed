//! Default coordinator: one sub-task per node, run in this process

use super::gatherer::{ResultGatherer, TaskOutcome};
use super::operation::{BackupOperation, OperationCoordinator};
use crate::config::{BackupRequest, NodeTarget};
use crate::storage::{freshen_or_upload, BackendFactory, BucketStatus, NodeIdentity, Shipped, StorageBackend};
use crate::utils::{discover, SnapshotFile, Throttle};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Record of what a node shipped for a snapshot, uploaded next to the data
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifest {
    pub snapshot_tag: String,
    pub node: NodeIdentity,
    pub created_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    /// false when the remote copy was only freshened
    pub uploaded: bool,
}

/// Remote key of the manifest for `tag`, below the node prefix
pub fn manifest_key(tag: &str) -> PathBuf {
    Path::new("manifests").join(format!("{}.json", tag))
}

#[derive(Debug)]
enum NodeResult {
    Shipped { bytes: u64, uploaded: usize, freshened: usize },
    /// Nothing could be done; not an error in the operation sense
    Declined(String),
}

/// Ships the snapshot files of one node
struct NodeBackup {
    target: NodeTarget,
    backend: Arc<dyn StorageBackend>,
    request: Arc<BackupRequest>,
}

impl NodeBackup {
    async fn run(&self) -> Result<NodeResult> {
        let request = &self.request;

        if !request.skip_bucket_verification {
            let bucket = &request.storage_location.bucket;
            match self.backend.ensure_bucket(request.create_missing_bucket).await? {
                BucketStatus::Present => debug!("Bucket '{}' is present", bucket),
                BucketStatus::Created => info!("Created missing bucket '{}'", bucket),
                BucketStatus::Missing => {
                    return Ok(NodeResult::Declined(format!(
                        "bucket '{}' does not exist and creating it was not requested",
                        bucket
                    )))
                }
            }
        }

        let files = self.discover().await?;
        if files.is_empty() {
            return Ok(NodeResult::Declined(format!(
                "no snapshot '{}' found in {:?}",
                request.snapshot_tag, self.target.data_dir
            )));
        }

        info!(
            "Shipping {} files of snapshot '{}' from node {}",
            files.len(),
            request.snapshot_tag,
            self.target.id
        );

        let throttle = Throttle::new(request.bandwidth);
        let backend = self.backend.as_ref();

        let mut entries: Vec<ManifestEntry> = stream::iter(files)
            .map(|file| {
                let throttle = &throttle;
                async move {
                    let reference = backend.to_node_aware_reference(&file.object_key)?;
                    let shipped = freshen_or_upload(backend, &reference, &file.local_path).await?;
                    throttle.consume(shipped.bytes()).await;

                    Ok::<_, anyhow::Error>(ManifestEntry {
                        path: reference.canonical_path().to_string(),
                        size: file.size,
                        uploaded: matches!(shipped, Shipped::Uploaded { .. }),
                    })
                }
            })
            .buffer_unordered(request.concurrent_connections.max(1))
            .try_collect()
            .await?;

        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let uploaded = entries.iter().filter(|e| e.uploaded).count();
        let bytes: u64 = entries.iter().filter(|e| e.uploaded).map(|e| e.size).sum();
        let freshened = entries.len() - uploaded;

        self.upload_manifest(entries).await?;

        Ok(NodeResult::Shipped { bytes, uploaded, freshened })
    }

    async fn discover(&self) -> Result<Vec<SnapshotFile>> {
        let data_dir = self.target.data_dir.clone();
        let tag = self.request.snapshot_tag.clone();
        let entities = self.request.entities.clone();

        tokio::task::spawn_blocking(move || discover(&data_dir, &tag, &entities))
            .await
            .context("Snapshot discovery task failed")?
    }

    async fn upload_manifest(&self, files: Vec<ManifestEntry>) -> Result<()> {
        let manifest = SnapshotManifest {
            snapshot_tag: self.request.snapshot_tag.clone(),
            node: self.backend.node().clone(),
            created_at: Utc::now(),
            files,
        };

        let text = serde_json::to_string_pretty(&manifest)?;
        let reference = self
            .backend
            .to_node_aware_reference(&manifest_key(&self.request.snapshot_tag))?;
        self.backend.upload_text(&text, &reference).await?;

        debug!("Uploaded manifest {}", reference);
        Ok(())
    }

    async fn into_outcome(self) -> TaskOutcome {
        let node = self.target.id.as_str();
        match self.run().await {
            Ok(NodeResult::Shipped { bytes, uploaded, freshened }) => {
                info!(
                    "Node {}: {} files uploaded ({} bytes), {} freshened",
                    node, uploaded, bytes, freshened
                );
                TaskOutcome::succeeded(node).with_bytes(bytes)
            }
            Ok(NodeResult::Declined(reason)) => TaskOutcome::failed(node, reason),
            Err(e) => TaskOutcome::erroneous(node, format!("{:#}", e)),
        }
    }
}

/// Runs every node of a request as a task of the current runtime
pub struct LocalCoordinator {
    nodes: Vec<NodeTarget>,
    factory: Arc<dyn BackendFactory>,
    timeout: Option<Duration>,
}

impl LocalCoordinator {
    /// `nodes` are the already selected targets of the operation
    pub fn new(nodes: Vec<NodeTarget>, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            nodes,
            factory,
            timeout: None,
        }
    }

    /// Override the request's timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn nodes(&self) -> &[NodeTarget] {
        &self.nodes
    }

    /// Build one backend per node; on failure the ones already built are released
    fn build_backends(&self, request: &BackupRequest) -> Result<Vec<Arc<dyn StorageBackend>>> {
        let mut backends: Vec<Arc<dyn StorageBackend>> = Vec::with_capacity(self.nodes.len());

        for node in &self.nodes {
            let built = NodeIdentity::new(&request.storage_location.cluster, &node.datacenter, &node.id)
                .and_then(|identity| self.factory.build(request, &identity))
                .with_context(|| format!("Failed to create storage backend for node {}", node.id));

            match built {
                Ok(backend) => backends.push(backend),
                Err(e) => {
                    backends.iter().for_each(|b| b.cleanup());
                    return Err(e);
                }
            }
        }

        Ok(backends)
    }
}

#[async_trait]
impl OperationCoordinator for LocalCoordinator {
    async fn coordinate(&self, operation: &BackupOperation) -> Result<ResultGatherer> {
        if self.nodes.is_empty() {
            bail!("No target nodes for operation {}", operation.id());
        }

        // outcomes are keyed by node id
        let mut seen = HashSet::new();
        for target in &self.nodes {
            if !seen.insert(target.id.as_str()) {
                bail!(
                    "Node id '{}' is targeted more than once in operation {}",
                    target.id,
                    operation.id()
                );
            }
        }

        let request = Arc::new(operation.request().clone());
        let backends = self.build_backends(&request)?;
        let gatherer = ResultGatherer::new();
        let mut tasks = JoinSet::new();

        for (target, backend) in self.nodes.iter().zip(&backends) {
            let node_backup = NodeBackup {
                target: target.clone(),
                backend: Arc::clone(backend),
                request: Arc::clone(&request),
            };
            let gatherer = gatherer.clone();

            tasks.spawn(async move {
                gatherer.report(node_backup.into_outcome().await);
            });
        }

        let total = self.nodes.len();
        let timeout = self.timeout.or_else(|| request.timeout_duration());
        let all_joined = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("Node backup task ended abnormally: {}", e);
                }
                operation.update_progress(gatherer.len(), total);
            }
        };

        let timed_out = match timeout {
            Some(limit) => tokio::time::timeout(limit, all_joined).await.is_err(),
            None => {
                all_joined.await;
                false
            }
        };

        let unreported_reason = match timeout {
            Some(limit) if timed_out => {
                warn!(
                    "Operation {} timed out after {:?}; cancelling remaining node backups",
                    operation.id(),
                    limit
                );
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                format!("cancelled: backup did not finish within {:?}", limit)
            }
            _ => "sub-task ended without reporting an outcome".to_string(),
        };

        for target in &self.nodes {
            if !gatherer.is_reported(&target.id) {
                gatherer.report(TaskOutcome::erroneous(&target.id, unreported_reason.clone()));
            }
        }
        operation.update_progress(gatherer.len(), total);

        for backend in &backends {
            backend.cleanup();
        }

        Ok(gatherer)
    }
}
