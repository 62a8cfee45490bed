pub mod snapshot;
pub mod throttle;

pub use snapshot::{discover, SnapshotFile};
pub use throttle::Throttle;
