//! Storage backends
//!
//! Every provider implements [`StorageBackend`]. Callers freshen an object
//! first and only pay for a transfer when the backend reports
//! [`FreshenResult::UploadRequired`]:
//!
//! ```no_run
//! # use snapshot_shipper::storage::{freshen_or_upload, StorageBackend};
//! # use std::path::Path;
//! # async fn ship(backend: &dyn StorageBackend) -> Result<(), snapshot_shipper::storage::StorageError> {
//! let key = Path::new("data/ks/users/nb-1-big-Data.db");
//! let reference = backend.to_node_aware_reference(key)?;
//! freshen_or_upload(backend, &reference, Path::new("/var/lib/data/ks/users/nb-1-big-Data.db")).await?;
//! # Ok(())
//! # }
//! ```

mod azure;
mod factory;
mod gcs;
mod local;
mod object;
mod reference;
mod s3;
mod store;
mod transfer;

pub mod memory;

pub use factory::{BackendFactory, DefaultBackendFactory};
pub use local::LocalBackuper;
pub use object::ObjectBackuper;
pub use reference::{normalize_key, NodeIdentity, RemoteObjectReference};
pub use store::{ObjectStoreClient, DEFAULT_PART_SIZE};
pub use transfer::{LoggingObserver, PartProgress, TransferClient, TransferEvent, TransferObserver};

use crate::config::Provider;
use crate::credentials::CredentialError;
use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Streamed object content
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{provider} request failed with status {status}: {message}")]
    Service {
        provider: Provider,
        status: u16,
        message: String,
    },

    #[error("Transfer failed: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend has been cleaned up")]
    CleanedUp,

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Invalid node identity: {0}")]
    InvalidNode(String),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("Invalid backend configuration: {0}")]
    Config(String),
}

impl StorageError {
    /// Service status code, when the error came from the remote service
    pub fn status(&self) -> Option<u16> {
        match self {
            StorageError::Service { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Outcome of an in-place refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshenResult {
    /// The object exists and its "last touched" marker was refreshed
    Freshened,
    /// The object does not exist remotely and must be uploaded
    UploadRequired,
}

/// Outcome of bucket verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Present,
    Created,
    Missing,
}

/// What [`freshen_or_upload`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shipped {
    Freshened,
    Uploaded { bytes: u64 },
}

impl Shipped {
    pub fn bytes(&self) -> u64 {
        match self {
            Shipped::Freshened => 0,
            Shipped::Uploaded { bytes } => *bytes,
        }
    }
}

/// A storage provider.
///
/// Calls against different references may run concurrently. After
/// [`cleanup`](StorageBackend::cleanup) every transfer call fails with
/// [`StorageError::CleanedUp`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn provider(&self) -> Provider;

    /// Node this backend ships objects for
    fn node(&self) -> &NodeIdentity;

    fn to_reference(&self, key: &Path) -> Result<RemoteObjectReference, StorageError> {
        RemoteObjectReference::plain(key)
    }

    fn to_node_aware_reference(&self, key: &Path) -> Result<RemoteObjectReference, StorageError> {
        RemoteObjectReference::node_aware(self.node(), key)
    }

    /// Check that the bucket exists, creating it when asked to
    async fn ensure_bucket(&self, create_missing: bool) -> Result<BucketStatus, StorageError>;

    /// Refresh an already uploaded object in place.
    ///
    /// Absent objects yield `UploadRequired`. Stores answer 403 instead of
    /// 404 for absent keys under restrictive policies, so both count as
    /// absent; any other failure is returned as an error.
    async fn freshen(&self, reference: &RemoteObjectReference) -> Result<FreshenResult, StorageError>;

    /// Upload a stream; returns once the transfer completed or failed
    async fn upload(
        &self,
        size_hint: u64,
        stream: ByteStream,
        reference: &RemoteObjectReference,
    ) -> Result<(), StorageError>;

    async fn upload_text(&self, text: &str, reference: &RemoteObjectReference) -> Result<(), StorageError> {
        let bytes = text.as_bytes().to_vec();
        let size = bytes.len() as u64;
        self.upload(size, Box::pin(std::io::Cursor::new(bytes)), reference)
            .await
    }

    /// Release held resources. Idempotent and never fails.
    fn cleanup(&self);
}

/// Freshen `reference`, uploading the local file only when the remote copy is absent
pub async fn freshen_or_upload<B>(
    backend: &B,
    reference: &RemoteObjectReference,
    local_path: &Path,
) -> Result<Shipped, StorageError>
where
    B: StorageBackend + ?Sized,
{
    match backend.freshen(reference).await? {
        FreshenResult::Freshened => Ok(Shipped::Freshened),
        FreshenResult::UploadRequired => {
            let file = tokio::fs::File::open(local_path).await?;
            let size = file.metadata().await?.len();
            backend.upload(size, Box::pin(file), reference).await?;
            Ok(Shipped::Uploaded { bytes: size })
        }
    }
}
