//! Snapshot Shipper Library
//!
//! Ships database snapshot files from cluster nodes to object storage,
//! refreshing objects that are already stored instead of uploading them again.

pub mod config;
pub mod credentials;
pub mod managers;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, select_targets, BackupRequest, Config};
pub use credentials::{CredentialResolver, StorageBackendConfig};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::{BackupOperation, LocalCoordinator, OperationCoordinator, ResultGatherer};
pub use storage::{freshen_or_upload, FreshenResult, RemoteObjectReference, StorageBackend};
