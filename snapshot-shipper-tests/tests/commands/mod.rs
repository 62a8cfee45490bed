//! Command tests for snapshot-shipper
//!
//! These tests drive the flows behind the CLI commands through the library,
//! with in-memory object storage standing in for the cloud providers.

mod backup;
mod refs;
mod validate;
