//! Policy and storage validation.
//!
//! Validation runs before any side effect: a policy that fails here is never
//! persisted and no job is created for it.

use super::loader::{ConfigError, Result};
use super::types::{GcsConfig, RetentionSettings, S3Config, StorageConfig};
use crate::types::BackupPolicy;
use crate::utils::cron::validate_cron_schedule;
use std::path::Path;

const MAX_NAME_LEN: usize = 100;
const MAX_RETENTION: i64 = 100;

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

/// Validate a backup policy before it is stored or executed
pub fn validate_policy(policy: &BackupPolicy, retention: &RetentionSettings) -> Result<()> {
    if policy.id.trim().is_empty() {
        return Err(invalid("policy id is required"));
    }

    let name_len = policy.name.chars().count();
    if name_len == 0 || name_len > MAX_NAME_LEN {
        return Err(invalid(format!(
            "policy name must be between 1 and {} characters",
            MAX_NAME_LEN
        )));
    }

    if policy.source_path.is_empty() {
        return Err(invalid("source path is required"));
    }
    if !Path::new(&policy.source_path).is_dir() {
        return Err(invalid(format!(
            "source path must be an existing directory: {}",
            policy.source_path
        )));
    }

    if policy.destination_path.trim().is_empty() {
        return Err(invalid("destination path is required"));
    }

    if !policy.schedule.is_empty() && !validate_cron_schedule(&policy.schedule) {
        return Err(invalid(format!(
            "invalid cron expression: {}",
            policy.schedule
        )));
    }

    let min_retention = if retention.allow_unlimited { 0 } else { 1 };
    if policy.retention_count < min_retention || policy.retention_count > MAX_RETENTION {
        return Err(invalid(format!(
            "retention count must be between {} and {}, got {}",
            min_retention, MAX_RETENTION, policy.retention_count
        )));
    }

    if policy.encryption_enabled && policy.encryption_password.is_empty() {
        return Err(invalid("encryption password is required when encryption is enabled"));
    }

    Ok(())
}

pub fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    match config {
        StorageConfig::Local { path } => {
            if path.as_os_str().is_empty() {
                return Err(invalid("local storage path is required"));
            }
            Ok(())
        }
        StorageConfig::S3(s3) => validate_s3_config(s3),
        StorageConfig::Gcs(gcs) => validate_gcs_config(gcs),
    }
}

pub fn validate_s3_config(config: &S3Config) -> Result<()> {
    if config.bucket.is_empty() {
        return Err(invalid("S3 bucket name is required"));
    }
    if config.region.is_empty() {
        return Err(invalid("S3 region is required"));
    }
    if config.access_key_id.is_empty() {
        return Err(invalid("S3 access key id is required"));
    }
    if config.secret_access_key.is_empty() {
        return Err(invalid("S3 secret access key is required"));
    }
    if !is_valid_bucket_name(&config.bucket) {
        return Err(invalid(format!("invalid S3 bucket name: {}", config.bucket)));
    }
    Ok(())
}

pub fn validate_gcs_config(config: &GcsConfig) -> Result<()> {
    if config.bucket.is_empty() {
        return Err(invalid("GCS bucket name is required"));
    }
    if config.project_id.is_empty() {
        return Err(invalid("GCS project id is required"));
    }

    let has_json = config
        .service_account_json
        .as_deref()
        .is_some_and(|json| !json.is_empty());
    match &config.credentials_path {
        Some(path) if !path.exists() => Err(invalid(format!(
            "GCS credentials file not found: {}",
            path.display()
        ))),
        Some(_) => Ok(()),
        None if has_json => Ok(()),
        None => Err(invalid(
            "GCS credentials path or service account JSON is required",
        )),
    }
}

/// Bucket names are 3-63 characters of lowercase letters, digits, dots and
/// hyphens, and may not start or end with a dot or hyphen.
pub fn is_valid_bucket_name(bucket: &str) -> bool {
    if bucket.len() < 3 || bucket.len() > 63 {
        return false;
    }

    if !bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return false;
    }

    let edge = |c: char| c == '.' || c == '-';
    !bucket.starts_with(edge) && !bucket.ends_with(edge)
}
