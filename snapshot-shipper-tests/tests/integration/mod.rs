//! Integration tests for snapshot-shipper
//!
//! These tests run complete backup operations through the default backend
//! factory. The `file` provider keeps everything on the local filesystem.
//! Run with: `cargo test -p snapshot-shipper-tests --test integration`

mod local_backup;
mod scenarios;
