//! Unit tests for backup-manager building blocks
//!
//! Run with: `cargo test -p backup-manager-tests --test unit`

mod archive;
mod catalog;
mod config;
mod cron;
mod encryption;
mod storage;
