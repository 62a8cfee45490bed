//! Local filesystem backend
//!
//! The bucket is a directory below the location's root; objects are files
//! at their canonical path. Freshening touches the modification time.

use super::{
    BucketStatus, ByteStream, FreshenResult, NodeIdentity, RemoteObjectReference, StorageBackend,
    StorageError, TransferEvent, TransferObserver,
};
use crate::config::{BackupRequest, Provider};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub struct LocalBackuper {
    node: NodeIdentity,
    bucket_dir: PathBuf,
    observer: Arc<dyn TransferObserver>,
    cleaned_up: AtomicBool,
}

impl LocalBackuper {
    pub fn new(
        node: NodeIdentity,
        request: &BackupRequest,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<Self, StorageError> {
        let location = &request.storage_location;
        let root = location.file_root.as_ref().ok_or_else(|| {
            StorageError::Config(format!("'{}' is not a file location", location.as_str()))
        })?;

        Ok(Self {
            node,
            bucket_dir: root.join(&location.bucket),
            observer,
            cleaned_up: AtomicBool::new(false),
        })
    }

    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    fn object_path(&self, reference: &RemoteObjectReference) -> PathBuf {
        self.bucket_dir.join(reference.canonical_path())
    }

    fn ensure_active(&self) -> Result<(), StorageError> {
        if self.cleaned_up.load(Ordering::SeqCst) {
            return Err(StorageError::CleanedUp);
        }
        Ok(())
    }

    async fn write_object(&self, target: &Path, mut stream: ByteStream) -> Result<u64, StorageError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut partial = target.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let mut file = fs::File::create(&partial).await?;
        let written = tokio::io::copy(&mut stream, &mut file).await;
        let flushed = match written {
            Ok(bytes) => file.flush().await.map(|_| bytes),
            Err(e) => Err(e),
        };
        drop(file);

        match flushed {
            Ok(bytes) => {
                fs::rename(&partial, target).await?;
                Ok(bytes)
            }
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                Err(e.into())
            }
        }
    }
}

fn touch(path: &Path) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(SystemTime::now())
}

#[async_trait]
impl StorageBackend for LocalBackuper {
    fn provider(&self) -> Provider {
        Provider::File
    }

    fn node(&self) -> &NodeIdentity {
        &self.node
    }

    async fn ensure_bucket(&self, create_missing: bool) -> Result<BucketStatus, StorageError> {
        self.ensure_active()?;

        if fs::metadata(&self.bucket_dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(BucketStatus::Present);
        }

        if !create_missing {
            return Ok(BucketStatus::Missing);
        }

        fs::create_dir_all(&self.bucket_dir).await?;
        info!("Created bucket directory {:?}", self.bucket_dir);
        Ok(BucketStatus::Created)
    }

    async fn freshen(&self, reference: &RemoteObjectReference) -> Result<FreshenResult, StorageError> {
        self.ensure_active()?;

        let path = self.object_path(reference);
        let result = tokio::task::spawn_blocking(move || touch(&path))
            .await
            .map_err(|e| StorageError::Transport(format!("freshen task failed: {}", e)))?;

        match result {
            Ok(()) => Ok(FreshenResult::Freshened),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                debug!("{} is not present locally: {}", reference, e);
                Ok(FreshenResult::UploadRequired)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(
        &self,
        _size_hint: u64,
        stream: ByteStream,
        reference: &RemoteObjectReference,
    ) -> Result<(), StorageError> {
        self.ensure_active()?;

        match self.write_object(&self.object_path(reference), stream).await {
            Ok(bytes) => {
                self.observer.on_event(reference, TransferEvent::PartCompleted { part: 1 });
                self.observer
                    .on_event(reference, TransferEvent::TransferCompleted { bytes });
                Ok(())
            }
            Err(e) => {
                self.observer.on_event(reference, TransferEvent::PartFailed { part: 1 });
                self.observer.on_event(reference, TransferEvent::TransferFailed);
                Err(e)
            }
        }
    }

    fn cleanup(&self) {
        self.cleaned_up.store(true, Ordering::SeqCst);
    }
}
