//! Transfer clients and progress observation

use super::{ByteStream, RemoteObjectReference, StorageError};
use async_trait::async_trait;
use tracing::debug;

/// Progress of a single transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    PartCompleted { part: u32 },
    PartFailed { part: u32 },
    TransferCompleted { bytes: u64 },
    TransferFailed,
}

/// Receives progress events for uploads.
///
/// Partial uploads are never resumed; observers only see what happened.
pub trait TransferObserver: Send + Sync {
    fn on_event(&self, reference: &RemoteObjectReference, event: TransferEvent);
}

/// Observer that logs every event at debug level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl TransferObserver for LoggingObserver {
    fn on_event(&self, reference: &RemoteObjectReference, event: TransferEvent) {
        match event {
            TransferEvent::PartCompleted { part } => {
                debug!("Successfully uploaded part {} for {}", part, reference)
            }
            TransferEvent::PartFailed { part } => {
                debug!("Failed to upload part {} for {}", part, reference)
            }
            TransferEvent::TransferCompleted { bytes } => {
                debug!("Successfully uploaded {} ({} bytes)", reference, bytes)
            }
            TransferEvent::TransferFailed => debug!("Failed to upload {}", reference),
        }
    }
}

/// Per-part callback handed to a transfer client
pub trait PartProgress: Send + Sync {
    fn part_finished(&self, part: u32, succeeded: bool);
}

/// Forwards part progress of one reference to an observer
pub(crate) struct ReferenceProgress<'a> {
    pub reference: &'a RemoteObjectReference,
    pub observer: &'a dyn TransferObserver,
}

impl PartProgress for ReferenceProgress<'_> {
    fn part_finished(&self, part: u32, succeeded: bool) {
        let event = if succeeded {
            TransferEvent::PartCompleted { part }
        } else {
            TransferEvent::PartFailed { part }
        };
        self.observer.on_event(self.reference, event);
    }
}

/// Moves bytes to and within one bucket of an object store.
///
/// Each backend owns its own client; clients are never shared.
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn bucket_exists(&self) -> Result<bool, StorageError>;

    async fn create_bucket(&self) -> Result<(), StorageError>;

    /// Rewrite an object server-side so its modification time is refreshed
    /// without moving bytes through this client
    async fn copy_in_place(&self, path: &str) -> Result<(), StorageError>;

    /// Stream `body` to `path`, reporting each part; returns the number of bytes sent
    async fn put(
        &self,
        path: &str,
        size_hint: u64,
        body: ByteStream,
        progress: &dyn PartProgress,
    ) -> Result<u64, StorageError>;

    /// Stop the client; in-flight and later calls fail
    fn shutdown(&self) -> Result<(), StorageError>;
}
