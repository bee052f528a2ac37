//! Integration tests for backup-manager
//!
//! These tests require Docker and run against a MinIO container.
//! Run with: `cargo test -p backup-manager-tests --test integration -- --ignored`

mod common;
