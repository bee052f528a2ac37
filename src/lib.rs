//! Backup Manager Library
//!
//! This library provides policy-driven backups: a source directory is copied,
//! archived, optionally encrypted, checksummed and uploaded to local, S3 or
//! GCS storage, with every run recorded in a SQLite catalog and old artifacts
//! pruned by the retention engine.

pub mod catalog;
pub mod config;
pub mod error;
pub mod managers;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use catalog::Catalog;
pub use config::{load_config, Config};
pub use error::{BackupError, Phase, Result};
pub use managers::backup::BackupManager;
pub use managers::logging::{
    init_console_logging, init_logging, BackupLogger, LogGuard, LoggingConfig,
};
pub use managers::retention::{RetentionManager, RetentionReport};
pub use storage::{StorageBackend, StorageProvider};
pub use types::{BackupFileRecord, BackupJob, BackupPolicy, BackupResult, JobStatus, PolicyStatus};
