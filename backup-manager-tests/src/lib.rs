//! Test utilities for backup-manager
//!
//! This crate provides shared test utilities, fixtures and helper functions
//! for testing the backup-manager library and binary.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ConfigBuilder, TestContext};
//!
//! #[tokio::test]
//! async fn my_test() {
//!     let ctx = TestContext::new();
//!     let source = ctx.source_tree("data");
//!     let manager = ctx.manager();
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use test_context::{OptionAssertions, ResultAssertions, TestContext};

// Re-export types from the main crate for convenience
pub use backup_manager::config::{Config, StorageConfig};
pub use backup_manager::storage::mock::{MockStorage, StorageCall};
pub use backup_manager::storage::StorageBackend;
pub use backup_manager::{
    BackupError, BackupFileRecord, BackupJob, BackupManager, BackupPolicy, BackupResult, Catalog,
    JobStatus,
};

/// Common test result type
pub type TestResult<T = ()> = anyhow::Result<T>;
