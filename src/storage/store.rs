//! Transfer client over the `object_store` crate
//!
//! Signing, the ambient credential chain, retries and proxies are handled by
//! the store; this module streams uploads in parts and refreshes objects
//! server-side.

use super::{ByteStream, PartProgress, StorageError, TransferClient};
use crate::config::{BackupRequest, Provider, ProxyProtocol, ProxySettings};
use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, MultipartUpload, ObjectStore, PutPayload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Size of one upload part. S3 rejects non-final parts below 5 MiB.
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Object key with nothing behind it, listed to check that a bucket exists
const BUCKET_CHECK_PREFIX: &str = ".snapshot-shipper-bucket-check";

/// Parse a configured endpoint, defaulting the scheme by `insecure`
pub(crate) fn parse_endpoint(raw: &str, insecure: bool) -> Result<Url, StorageError> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("{}://{}", if insecure { "http" } else { "https" }, raw)
    };

    let mut url = Url::parse(&with_scheme)
        .map_err(|e| StorageError::Config(format!("Invalid endpoint '{}': {}", raw, e)))?;

    if insecure && url.scheme() == "https" {
        url.set_scheme("http")
            .map_err(|_| StorageError::Config(format!("Cannot use plain http for '{}'", raw)))?;
    }

    Ok(url)
}

/// Proxy URL with percent-encoded credentials
pub(crate) fn proxy_url(settings: &ProxySettings) -> Result<String, StorageError> {
    let (host, port) = match (&settings.host, settings.port) {
        (Some(host), Some(port)) => (host, port),
        _ => {
            return Err(StorageError::Config(
                "Proxy is enabled but host or port is missing".to_string(),
            ))
        }
    };

    let scheme = match settings.protocol {
        ProxyProtocol::Http => "http",
        ProxyProtocol::Https => "https",
    };

    let mut url = Url::parse(&format!("{}://{}:{}", scheme, host, port))
        .map_err(|e| StorageError::Config(format!("Invalid proxy: {}", e)))?;

    if let Some(username) = &settings.username {
        url.set_username(username)
            .and_then(|_| url.set_password(settings.password.as_deref()))
            .map_err(|_| StorageError::Config("Proxy credentials cannot be set".to_string()))?;
    }

    Ok(url.to_string())
}

/// HTTP options shared by every provider's store
pub(crate) fn client_options(request: &BackupRequest) -> Result<ClientOptions, StorageError> {
    let mut options = ClientOptions::new().with_allow_http(request.insecure);

    if let Some(proxy) = request.active_proxy() {
        options = options.with_proxy_url(proxy_url(proxy)?);
    }

    Ok(options)
}

/// Map a store error, keeping the status code where the store classified one
pub(crate) fn store_error(provider: Provider, error: object_store::Error) -> StorageError {
    let status = match &error {
        object_store::Error::NotFound { .. } => Some(404),
        object_store::Error::PermissionDenied { .. } => Some(403),
        object_store::Error::Unauthenticated { .. } => Some(401),
        object_store::Error::AlreadyExists { .. } => Some(409),
        object_store::Error::Precondition { .. } => Some(412),
        _ => None,
    };

    match status {
        Some(status) => StorageError::Service {
            provider,
            status,
            message: error.to_string(),
        },
        None => StorageError::Transport(error.to_string()),
    }
}

/// Listing errors are not always classified; fall back to the service codes
fn is_missing_bucket(error: &object_store::Error) -> bool {
    match error {
        object_store::Error::NotFound { .. } => true,
        object_store::Error::Generic { source, .. } => {
            let message = source.to_string();
            ["NoSuchBucket", "ContainerNotFound", "The specified bucket does not exist"]
                .iter()
                .any(|code| message.contains(code))
        }
        _ => false,
    }
}

fn object_path(path: &str) -> Result<ObjectPath, StorageError> {
    ObjectPath::parse(path).map_err(|_| StorageError::InvalidKey(path.to_string()))
}

async fn read_part(body: &mut ByteStream, size: usize) -> std::io::Result<Vec<u8>> {
    let mut part = Vec::new();
    AsyncReadExt::take(&mut *body, size as u64)
        .read_to_end(&mut part)
        .await?;
    Ok(part)
}

/// [`TransferClient`] over one bucket of an [`ObjectStore`]
pub struct ObjectStoreClient {
    provider: Provider,
    bucket: String,
    store: Arc<dyn ObjectStore>,
    part_size: usize,
    shut_down: AtomicBool,
}

impl ObjectStoreClient {
    pub fn new(provider: Provider, bucket: &str, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            provider,
            bucket: bucket.to_string(),
            store,
            part_size: DEFAULT_PART_SIZE,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    fn ensure_running(&self) -> Result<(), StorageError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StorageError::Transport(
                "transfer client has been shut down".to_string(),
            ));
        }
        Ok(())
    }

    fn error(&self, error: object_store::Error) -> StorageError {
        store_error(self.provider, error)
    }

    async fn put_parts(
        &self,
        upload: &mut dyn MultipartUpload,
        first: Vec<u8>,
        body: &mut ByteStream,
        progress: &dyn PartProgress,
    ) -> Result<u64, StorageError> {
        let mut part = 1;
        let mut bytes = 0;
        let mut chunk = first;

        while !chunk.is_empty() {
            self.ensure_running()?;

            let len = chunk.len() as u64;
            match upload.put_part(PutPayload::from(chunk)).await {
                Ok(()) => {
                    progress.part_finished(part, true);
                    bytes += len;
                }
                Err(e) => {
                    progress.part_finished(part, false);
                    return Err(self.error(e));
                }
            }

            part += 1;
            chunk = read_part(body, self.part_size).await?;
        }

        Ok(bytes)
    }
}

#[async_trait]
impl TransferClient for ObjectStoreClient {
    async fn bucket_exists(&self) -> Result<bool, StorageError> {
        self.ensure_running()?;

        match self
            .store
            .list_with_delimiter(Some(&ObjectPath::from(BUCKET_CHECK_PREFIX)))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_missing_bucket(&e) => Ok(false),
            Err(e) => Err(self.error(e)),
        }
    }

    async fn create_bucket(&self) -> Result<(), StorageError> {
        Err(StorageError::Config(format!(
            "{} buckets cannot be created by the object store client; create '{}' before backing up",
            self.provider, self.bucket
        )))
    }

    /// Copies the object to a staging key and back. Providers refuse a plain
    /// copy onto the same key, and the object's metadata is carried over.
    async fn copy_in_place(&self, path: &str) -> Result<(), StorageError> {
        self.ensure_running()?;

        let location = object_path(path)?;
        let staging = object_path(&format!("{}.{}.freshen", path, Uuid::new_v4().simple()))?;

        self.store
            .copy(&location, &staging)
            .await
            .map_err(|e| self.error(e))?;

        let restored = self.store.copy(&staging, &location).await;

        if let Err(e) = self.store.delete(&staging).await {
            warn!("Failed to remove staging copy {}: {}", staging, e);
        }

        restored.map_err(|e| self.error(e))
    }

    async fn put(
        &self,
        path: &str,
        size_hint: u64,
        mut body: ByteStream,
        progress: &dyn PartProgress,
    ) -> Result<u64, StorageError> {
        self.ensure_running()?;

        let location = object_path(path)?;
        let first = read_part(&mut body, self.part_size).await?;

        if first.len() < self.part_size {
            let bytes = first.len() as u64;
            return match self.store.put(&location, PutPayload::from(first)).await {
                Ok(_) => {
                    progress.part_finished(1, true);
                    Ok(bytes)
                }
                Err(e) => {
                    progress.part_finished(1, false);
                    Err(self.error(e))
                }
            };
        }

        debug!(
            "Uploading {} ({} bytes) in parts of {} bytes",
            path, size_hint, self.part_size
        );

        let mut upload = self
            .store
            .put_multipart(&location)
            .await
            .map_err(|e| self.error(e))?;

        let uploaded = match self
            .put_parts(upload.as_mut(), first, &mut body, progress)
            .await
        {
            Ok(bytes) => upload.complete().await.map(|_| bytes).map_err(|e| self.error(e)),
            Err(e) => Err(e),
        };

        if uploaded.is_err() {
            if let Err(e) = upload.abort().await {
                warn!("Failed to abort multipart upload of {}: {}", path, e);
            }
        }

        uploaded
    }

    fn shutdown(&self) -> Result<(), StorageError> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}
