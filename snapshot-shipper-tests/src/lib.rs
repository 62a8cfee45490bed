//! Test utilities for snapshot-shipper
//!
//! This crate provides shared test utilities and helper functions for
//! testing snapshot-shipper against the in-memory and local backends.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ConfigBuilder, TestContext};
//!
//! #[test]
//! fn my_test() {
//!     let ctx = TestContext::from_builder(
//!         ConfigBuilder::minimal().add_node("node-2", "dc1"),
//!     );
//!     let config_path = ctx.write_config();
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use test_context::{ResultAssertions, TestContext};

// Re-export types from the main crate for convenience
pub use snapshot_shipper::config::{BackupRequest, Config, NodeTarget, Provider, StorageLocation};
pub use snapshot_shipper::managers::{
    BackupOperation, LocalCoordinator, OperationState, ResultGatherer, TaskOutcome, TaskStatus,
};

// Re-export in-memory storage from the main crate
pub use snapshot_shipper::storage::memory::{InMemoryBackendFactory, InMemoryBucket, RecordingObserver};

/// Common test result type
pub type TestResult<T = ()> = anyhow::Result<T>;
