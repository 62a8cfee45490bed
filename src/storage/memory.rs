//! In-memory object store for tests
//!
//! An [`InMemoryBucket`] plays the remote bucket; every backend gets its own
//! [`InMemoryTransferClient`] handle onto it. Failures can be injected per
//! bucket. Available for use in external test crates.

use super::object::ObjectBackuper;
use super::{
    BackendFactory, ByteStream, NodeIdentity, PartProgress, StorageBackend, StorageError,
    TransferClient, TransferEvent, TransferObserver,
};
use crate::config::{BackupRequest, Provider};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Object as stored in the bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Vec<u8>,
    /// Number of successful in-place copies
    pub refresh_count: u32,
}

#[derive(Default)]
struct BucketState {
    missing: bool,
    objects: HashMap<String, StoredObject>,
    absent_status: Option<u16>,
    copy_failure: Option<u16>,
    upload_failures: Vec<(String, String)>,
    upload_delay: Option<Duration>,
    shutdown_failure: Option<String>,
    put_count: usize,
    copy_count: usize,
    clients: usize,
}

/// Shared remote bucket
#[derive(Clone, Default)]
pub struct InMemoryBucket {
    state: Arc<Mutex<BucketState>>,
}

impl InMemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket that does not exist yet
    pub fn missing() -> Self {
        let bucket = Self::default();
        bucket.state.lock().missing = true;
        bucket
    }

    pub fn with_object(self, path: &str, content: &[u8]) -> Self {
        self.state.lock().objects.insert(
            path.to_string(),
            StoredObject {
                content: content.to_vec(),
                refresh_count: 0,
            },
        );
        self
    }

    /// Answer 403 instead of 404 for absent keys, like a restrictive policy
    pub fn deny_absent_objects(self) -> Self {
        self.state.lock().absent_status = Some(403);
        self
    }

    /// Fail every in-place copy with the given status
    pub fn fail_copies_with(self, status: u16) -> Self {
        self.state.lock().copy_failure = Some(status);
        self
    }

    /// Fail every upload with a transport error
    pub fn fail_uploads(self, message: &str) -> Self {
        self.fail_uploads_matching("", message)
    }

    /// Fail uploads whose path contains `fragment`
    pub fn fail_uploads_matching(self, fragment: &str, message: &str) -> Self {
        self.state
            .lock()
            .upload_failures
            .push((fragment.to_string(), message.to_string()));
        self
    }

    pub fn delay_uploads(self, delay: Duration) -> Self {
        self.state.lock().upload_delay = Some(delay);
        self
    }

    /// Make client shutdown report an error
    pub fn fail_shutdown(self, message: &str) -> Self {
        self.state.lock().shutdown_failure = Some(message.to_string());
        self
    }

    /// New client handle onto this bucket
    pub fn client(&self) -> InMemoryTransferClient {
        self.state.lock().clients += 1;
        InMemoryTransferClient {
            bucket: self.clone(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// S3 backend for `node` in cluster `cluster`, datacenter `dc1`
    pub fn backend(&self, node: &str) -> ObjectBackuper {
        self.backend_with_observer(node, Arc::new(super::LoggingObserver))
    }

    pub fn backend_with_observer(
        &self,
        node: &str,
        observer: Arc<dyn TransferObserver>,
    ) -> ObjectBackuper {
        let identity = NodeIdentity::new("cluster", "dc1", node)
            .unwrap_or_else(|e| panic!("invalid test node '{}': {}", node, e));
        let location = "s3://in-memory/cluster"
            .parse()
            .unwrap_or_else(|e| panic!("invalid test location: {}", e));
        let request = BackupRequest::new(location, "test");
        ObjectBackuper::new(Provider::S3, identity, &request, Box::new(self.client()), observer)
    }

    pub fn object(&self, path: &str) -> Option<StoredObject> {
        self.state.lock().objects.get(path).cloned()
    }

    /// All stored paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state.lock().objects.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn exists(&self) -> bool {
        !self.state.lock().missing
    }

    pub fn put_count(&self) -> usize {
        self.state.lock().put_count
    }

    pub fn copy_count(&self) -> usize {
        self.state.lock().copy_count
    }

    pub fn clients_created(&self) -> usize {
        self.state.lock().clients
    }
}

/// Client handle onto an [`InMemoryBucket`]
pub struct InMemoryTransferClient {
    bucket: InMemoryBucket,
    shut_down: AtomicBool,
}

impl InMemoryTransferClient {
    fn ensure_running(&self) -> Result<(), StorageError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StorageError::Transport(
                "transfer client has been shut down".to_string(),
            ));
        }
        Ok(())
    }
}

fn service_error(status: u16, message: &str) -> StorageError {
    StorageError::Service {
        provider: Provider::S3,
        status,
        message: message.to_string(),
    }
}

#[async_trait]
impl TransferClient for InMemoryTransferClient {
    async fn bucket_exists(&self) -> Result<bool, StorageError> {
        self.ensure_running()?;
        Ok(self.bucket.exists())
    }

    async fn create_bucket(&self) -> Result<(), StorageError> {
        self.ensure_running()?;
        self.bucket.state.lock().missing = false;
        Ok(())
    }

    async fn copy_in_place(&self, path: &str) -> Result<(), StorageError> {
        self.ensure_running()?;
        let mut state = self.bucket.state.lock();

        if state.missing {
            return Err(service_error(404, "NoSuchBucket"));
        }

        state.copy_count += 1;

        if let Some(status) = state.copy_failure {
            return Err(service_error(status, "injected copy failure"));
        }

        let absent_status = state.absent_status.unwrap_or(404);
        match state.objects.get_mut(path) {
            Some(object) => {
                object.refresh_count += 1;
                Ok(())
            }
            None if absent_status == 403 => Err(service_error(403, "AccessDenied")),
            None => Err(service_error(absent_status, "NoSuchKey")),
        }
    }

    async fn put(
        &self,
        path: &str,
        size_hint: u64,
        mut body: ByteStream,
        progress: &dyn PartProgress,
    ) -> Result<u64, StorageError> {
        self.ensure_running()?;

        let delay = self.bucket.state.lock().upload_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            // shutdown during the transfer fails it instead of completing
            self.ensure_running()?;
        }

        let mut content = Vec::with_capacity(size_hint as usize);
        body.read_to_end(&mut content).await?;

        let mut state = self.bucket.state.lock();

        if state.missing {
            progress.part_finished(1, false);
            return Err(service_error(404, "NoSuchBucket"));
        }

        let failure = state
            .upload_failures
            .iter()
            .find(|(fragment, _)| path.contains(fragment.as_str()))
            .map(|(_, message)| message.clone());

        if let Some(message) = failure {
            progress.part_finished(1, false);
            return Err(StorageError::Transport(message));
        }

        let bytes = content.len() as u64;
        state.objects.insert(
            path.to_string(),
            StoredObject {
                content,
                refresh_count: 0,
            },
        );
        state.put_count += 1;
        progress.part_finished(1, true);

        Ok(bytes)
    }

    fn shutdown(&self) -> Result<(), StorageError> {
        self.shut_down.store(true, Ordering::SeqCst);
        match self.bucket.state.lock().shutdown_failure.clone() {
            Some(message) => Err(StorageError::Transport(message)),
            None => Ok(()),
        }
    }
}

/// Builds S3 backends over in-memory buckets
pub struct InMemoryBackendFactory {
    default_bucket: InMemoryBucket,
    node_buckets: HashMap<String, InMemoryBucket>,
    observer: Arc<dyn TransferObserver>,
    built: AtomicUsize,
}

impl InMemoryBackendFactory {
    pub fn new(bucket: InMemoryBucket) -> Self {
        Self {
            default_bucket: bucket,
            node_buckets: HashMap::new(),
            observer: Arc::new(super::LoggingObserver),
            built: AtomicUsize::new(0),
        }
    }

    /// Serve `node` from its own bucket, e.g. one with injected failures
    pub fn with_node_bucket(mut self, node: &str, bucket: InMemoryBucket) -> Self {
        self.node_buckets.insert(node.to_string(), bucket);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn built_count(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}

impl BackendFactory for InMemoryBackendFactory {
    fn build(
        &self,
        request: &BackupRequest,
        node: &NodeIdentity,
    ) -> Result<Arc<dyn StorageBackend>, StorageError> {
        let bucket = self
            .node_buckets
            .get(node.node())
            .unwrap_or(&self.default_bucket);

        self.built.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(ObjectBackuper::new(
            Provider::S3,
            node.clone(),
            request,
            Box::new(bucket.client()),
            Arc::clone(&self.observer),
        )))
    }
}

/// Observer that records events for assertions
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(String, TransferEvent)>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().iter().map(|(_, e)| *e).collect()
    }

    pub fn events_for(&self, canonical_path: &str) -> Vec<TransferEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(path, _)| path == canonical_path)
            .map(|(_, e)| *e)
            .collect()
    }
}

impl TransferObserver for RecordingObserver {
    fn on_event(&self, reference: &super::RemoteObjectReference, event: TransferEvent) {
        self.events
            .lock()
            .push((reference.canonical_path().to_string(), event));
    }
}
