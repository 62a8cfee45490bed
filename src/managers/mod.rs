//! Operation lifecycle, coordination and logging

pub mod coordinator;
pub mod gatherer;
pub mod logging;
pub mod operation;

pub use coordinator::{manifest_key, LocalCoordinator, ManifestEntry, SnapshotManifest};
pub use gatherer::{ResultGatherer, TaskOutcome, TaskStatus};
pub use operation::{
    BackupOperation, GatheringError, OperationCoordinator, OperationError, OperationState,
    OperationSummary,
};
