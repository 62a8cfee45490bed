//! Configuration module for snapshot-shipper
//!
//! This module handles loading, validating, and resolving configuration from TOML files.
//!
//! ## Target Selection
//!
//! A request reaches nodes in this order of narrowing:
//! 1. All configured nodes (global request) or the local node only
//! 2. The request's datacenter filter (`dc`)
//! 3. Node ids given on the command line
//!
//! ## Example Usage
//!
//! ```no_run
//! use snapshot_shipper::config;
//!
//! let config = config::load_config("snapshot-shipper.toml")?;
//! let targets = config::select_targets(&config, &[])?;
//!
//! for node in targets {
//!     println!("Node: {} ({})", node.id, node.datacenter);
//! }
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{load_config, select_targets, validate_config, validate_request, ConfigError, Result};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
