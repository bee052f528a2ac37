//! Fluent API for building test configurations
//!
//! Provides a builder pattern for creating test configurations whose catalog,
//! backup, workspace and lock paths all live in one temporary directory.

use backup_manager::config::{Config, LogFormat, StorageConfig};
use backup_manager::utils::encryption::EncryptionFormat;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    config: Config,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder with every path inside a fresh temp dir
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();

        let backup_path = root.join("backups");
        fs::create_dir_all(&backup_path).expect("Failed to create backup dir");

        let mut config = Config::default();
        config.database.path = root.join("catalog").join("backup.db");
        config.storage.local_path = backup_path;
        config.pipeline.temp_dir = Some(root.join("tmp"));
        config.pipeline.lock_dir = Some(root.join("locks"));
        config.logging.format = LogFormat::Text;
        // Fast key derivation keeps encrypted tests quick
        config.encryption.key_derivation.iterations = 1_000;

        Self { temp_dir, config }
    }

    /// Set the log level
    pub fn with_log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    /// Set the log directory
    pub fn with_log_dir(mut self, path: &Path) -> Self {
        self.config.logging.directory = Some(path.to_path_buf());
        self
    }

    /// Set the gzip level
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.config.compression.level = level;
        self
    }

    /// Select the encryption container format
    pub fn with_encryption_format(mut self, format: EncryptionFormat) -> Self {
        self.config.encryption.format = format;
        self
    }

    /// Accept retention_count = 0 during policy validation
    pub fn allow_unlimited_retention(mut self) -> Self {
        self.config.retention.allow_unlimited = true;
        self
    }

    /// Enable age-based retention during maintenance
    pub fn with_max_age_days(mut self, days: u64) -> Self {
        self.config.retention.max_age_days = Some(days);
        self
    }

    /// Add a local mirror directory inside the temp dir
    pub fn add_local_mirror(mut self, name: &str) -> Self {
        let path = self.temp_dir.path().join(name);
        fs::create_dir_all(&path).expect("Failed to create mirror dir");
        self.config.storage.mirrors.push(StorageConfig::Local { path });
        self
    }

    /// Point S3 destinations at a custom endpoint with static credentials
    pub fn with_s3_endpoint(mut self, endpoint: &str, access_key: &str, secret_key: &str) -> Self {
        self.config.storage.s3.endpoint = Some(endpoint.to_string());
        self.config.storage.s3.access_key_id = Some(access_key.to_string());
        self.config.storage.s3.secret_access_key = Some(secret_key.to_string());
        self.config.storage.s3.use_ssl = !endpoint.starts_with("http://");
        self
    }

    /// Get the temp directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory used as the local backup destination
    pub fn backup_dir(&self) -> PathBuf {
        self.config.storage.local_path.clone()
    }

    /// Build the Config, discarding the temp dir
    ///
    /// Only useful for tests that never touch the configured paths.
    pub fn build(self) -> Config {
        self.config
    }

    /// Keep the temp directory alive alongside the config
    pub fn persist(self) -> (Config, TempDir) {
        (self.config, self.temp_dir)
    }

    /// Write the config as TOML into the temp dir and return its path
    pub fn write_toml(&self) -> PathBuf {
        let path = self.temp_dir.path().join("backup-manager.toml");
        let content = toml::to_string_pretty(&self.config).expect("Failed to serialize config");
        fs::write(&path, content).expect("Failed to write config file");
        path
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
