//! Unit tests for snapshot-shipper
//!
//! These tests exercise configuration and credential resolution through the
//! public API, using files written to temporary directories.

mod config;
mod credentials;
