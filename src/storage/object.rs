//! Backend shared by the object-store providers
//!
//! S3, Azure Blob and GCS differ only in how their store is built; the
//! freshen protocol, cleanup handling and progress reporting live here once.

use super::transfer::ReferenceProgress;
use super::{
    BucketStatus, ByteStream, FreshenResult, NodeIdentity, RemoteObjectReference, StorageBackend,
    StorageError, TransferClient, TransferEvent, TransferObserver,
};
use crate::config::{BackupRequest, Provider};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether a failed in-place copy means the object does not exist.
///
/// 403 is treated like 404: stores answer AccessDenied for keys that never
/// existed when the policy forbids listing. This conflates real permission
/// problems with absence.
fn is_absent(error: &StorageError) -> bool {
    matches!(error.status(), Some(404) | Some(403))
}

/// Object-store backend of one node
pub struct ObjectBackuper {
    provider: Provider,
    node: NodeIdentity,
    bucket: String,
    client: Box<dyn TransferClient>,
    observer: Arc<dyn TransferObserver>,
    cleaned_up: AtomicBool,
}

impl ObjectBackuper {
    pub fn new(
        provider: Provider,
        node: NodeIdentity,
        request: &BackupRequest,
        client: Box<dyn TransferClient>,
        observer: Arc<dyn TransferObserver>,
    ) -> Self {
        Self {
            provider,
            node,
            bucket: request.storage_location.bucket.clone(),
            client,
            observer,
            cleaned_up: AtomicBool::new(false),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn ensure_active(&self) -> Result<(), StorageError> {
        if self.cleaned_up.load(Ordering::SeqCst) {
            return Err(StorageError::CleanedUp);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for ObjectBackuper {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn node(&self) -> &NodeIdentity {
        &self.node
    }

    async fn ensure_bucket(&self, create_missing: bool) -> Result<BucketStatus, StorageError> {
        self.ensure_active()?;

        if self.client.bucket_exists().await? {
            return Ok(BucketStatus::Present);
        }

        if !create_missing {
            return Ok(BucketStatus::Missing);
        }

        self.client.create_bucket().await?;
        info!("Created {} bucket '{}'", self.provider, self.bucket);
        Ok(BucketStatus::Created)
    }

    async fn freshen(&self, reference: &RemoteObjectReference) -> Result<FreshenResult, StorageError> {
        self.ensure_active()?;

        // refresh the existing object via an in-place copy
        match self.client.copy_in_place(reference.canonical_path()).await {
            Ok(()) => Ok(FreshenResult::Freshened),
            Err(e) if is_absent(&e) => {
                debug!("{} is not present in bucket '{}': {}", reference, self.bucket, e);
                Ok(FreshenResult::UploadRequired)
            }
            Err(e) => Err(e),
        }
    }

    async fn upload(
        &self,
        size_hint: u64,
        stream: ByteStream,
        reference: &RemoteObjectReference,
    ) -> Result<(), StorageError> {
        self.ensure_active()?;

        let progress = ReferenceProgress {
            reference,
            observer: self.observer.as_ref(),
        };

        match self
            .client
            .put(reference.canonical_path(), size_hint, stream, &progress)
            .await
        {
            Ok(bytes) => {
                self.observer
                    .on_event(reference, TransferEvent::TransferCompleted { bytes });
                Ok(())
            }
            Err(e) => {
                self.observer.on_event(reference, TransferEvent::TransferFailed);
                Err(e)
            }
        }
    }

    fn cleanup(&self) {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.client.shutdown() {
            warn!(
                "Failed to shut down {} transfer client for node {}: {}",
                self.provider, self.node, e
            );
        }
    }
}
