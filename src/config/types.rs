use crate::utils::encryption::{EncryptionFormat, EncryptionOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub encryption: EncryptionSettings,
    #[serde(default)]
    pub compression: CompressionSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite catalog
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for daily-rotated log files; console only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
            max_files: default_log_max_files(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Storage defaults used when a policy destination selects a backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    #[serde(default = "default_backup_path")]
    pub local_path: PathBuf,
    #[serde(default)]
    pub s3: S3Settings,
    #[serde(default)]
    pub gcs: GcsSettings,
    /// Extra backends that receive a copy of every artifact
    #[serde(default)]
    pub mirrors: Vec<StorageConfig>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            local_path: default_backup_path(),
            s3: S3Settings::default(),
            gcs: GcsSettings::default(),
            mirrors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Settings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default = "default_true")]
    pub use_ssl: bool,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_s3_region(),
            access_key_id: None,
            secret_access_key: None,
            use_ssl: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GcsSettings {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default)]
    pub service_account_json: Option<String>,
}

/// A single fully-specified storage backend.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local { path: PathBuf },
    S3(S3Config),
    Gcs(GcsConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_true")]
    pub use_ssl: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GcsConfig {
    pub bucket: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default)]
    pub service_account_json: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EncryptionSettings {
    /// Container format written for new artifacts
    #[serde(default)]
    pub format: EncryptionFormat,
    #[serde(default)]
    pub key_derivation: KeyDerivationSettings,
}

impl EncryptionSettings {
    pub fn options(&self) -> EncryptionOptions {
        EncryptionOptions {
            format: self.format,
            iterations: self.key_derivation.iterations,
            salt_size: self.key_derivation.salt_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyDerivationSettings {
    #[serde(default = "default_kdf_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_kdf_iterations")]
    pub iterations: u32,
    /// Salt length for the salted format
    #[serde(default = "default_salt_size")]
    pub salt_size: usize,
}

impl Default for KeyDerivationSettings {
    fn default() -> Self {
        Self {
            algorithm: default_kdf_algorithm(),
            iterations: default_kdf_iterations(),
            salt_size: default_salt_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompressionSettings {
    /// gzip level, 0-9
    #[serde(default = "default_compression_level")]
    pub level: u32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            level: default_compression_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineSettings {
    /// Parent directory for `backup-*` working directories
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Directory holding per-policy lock files
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            temp_dir: None,
            lock_dir: None,
            history_limit: default_history_limit(),
        }
    }
}

impl PipelineSettings {
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn lock_root(&self) -> PathBuf {
        self.lock_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionSettings {
    /// Accept retention_count = 0 (keep everything) during policy validation
    #[serde(default)]
    pub allow_unlimited: bool,
    #[serde(default = "default_failed_job_max_age_hours")]
    pub failed_job_max_age_hours: u64,
    #[serde(default)]
    pub max_age_days: Option<u64>,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            allow_unlimited: false,
            failed_job_max_age_hours: default_failed_job_max_age_hours(),
            max_age_days: None,
        }
    }
}

// Default value functions
fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".config").join("backup-manager").join("backup.db"))
        .unwrap_or_else(|| PathBuf::from("./backup-manager.db"))
}

fn default_backup_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("backups"))
        .unwrap_or_else(|| PathBuf::from("./backups"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_files() -> usize {
    10
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_kdf_algorithm() -> String {
    "PBKDF2".to_string()
}

fn default_kdf_iterations() -> u32 {
    100_000
}

fn default_salt_size() -> usize {
    16
}

fn default_compression_level() -> u32 {
    6
}

fn default_history_limit() -> usize {
    1000
}

fn default_failed_job_max_age_hours() -> u64 {
    168
}
