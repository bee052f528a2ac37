use super::types::*;
use super::validate::validate_storage_config;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

const ENV_PREFIX: &str = "BACKUP_MANAGER_";

/// Locations searched, in order, when no explicit config path is given
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("backup-manager.toml")];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("backup-manager").join("config.toml"));
    }
    paths.push(PathBuf::from("/etc/backup-manager/config.toml"));
    paths
}

/// Load configuration, apply environment overrides and validate.
///
/// An explicit path must exist. Without one, the default locations are
/// searched and built-in defaults are used when none of them exist.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => parse_config_file(path)?,
        None => match default_config_paths().into_iter().find(|p| p.is_file()) {
            Some(found) => parse_config_file(&found)?,
            None => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config)?;
    Ok(config)
}

fn parse_config_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&contents)?;
    config.database.path = super::expand_tilde(&config.database.path);
    config.storage.local_path = super::expand_tilde(&config.storage.local_path);
    Ok(config)
}

/// Write configuration as pretty TOML, creating parent directories
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = toml::to_string_pretty(config)?;
    fs::write(path, contents)?;
    Ok(())
}

/// Apply `BACKUP_MANAGER_*` overrides using the given variable lookup
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());

    if let Some(path) = get("DATABASE_PATH") {
        config.database.path = PathBuf::from(path);
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = get("LOG_FORMAT") {
        match format.to_lowercase().as_str() {
            "json" => config.logging.format = LogFormat::Json,
            "text" => config.logging.format = LogFormat::Text,
            other => tracing::warn!("Ignoring unknown log format override: {}", other),
        }
    }
    if let Some(path) = get("STORAGE_PATH") {
        config.storage.local_path = PathBuf::from(path);
    }
    if let Some(endpoint) = get("S3_ENDPOINT") {
        config.storage.s3.endpoint = Some(endpoint);
    }
    if let Some(region) = get("S3_REGION") {
        config.storage.s3.region = region;
    }
    if let Some(key) = get("S3_ACCESS_KEY_ID") {
        config.storage.s3.access_key_id = Some(key);
    }
    if let Some(secret) = get("S3_SECRET_ACCESS_KEY") {
        config.storage.s3.secret_access_key = Some(secret);
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> Result<()> {
    match config.logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => {
            return Err(ConfigError::ValidationError(format!(
                "Unknown log level: {}",
                other
            )))
        }
    }

    if config.database.path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "Database path must not be empty".to_string(),
        ));
    }

    if config.compression.level > 9 {
        return Err(ConfigError::ValidationError(format!(
            "Compression level must be between 0 and 9, got {}",
            config.compression.level
        )));
    }

    let kdf = &config.encryption.key_derivation;
    if !kdf.algorithm.eq_ignore_ascii_case("pbkdf2") {
        return Err(ConfigError::ValidationError(format!(
            "Unsupported key derivation algorithm: {}",
            kdf.algorithm
        )));
    }
    if kdf.iterations == 0 {
        return Err(ConfigError::ValidationError(
            "Key derivation iterations must be at least 1".to_string(),
        ));
    }
    if !(8..=64).contains(&kdf.salt_size) {
        return Err(ConfigError::ValidationError(format!(
            "Salt size must be between 8 and 64 bytes, got {}",
            kdf.salt_size
        )));
    }

    if config.pipeline.history_limit == 0 {
        return Err(ConfigError::ValidationError(
            "History limit must be at least 1".to_string(),
        ));
    }

    for (index, mirror) in config.storage.mirrors.iter().enumerate() {
        validate_storage_config(mirror).map_err(|e| {
            ConfigError::ValidationError(format!("Storage mirror {}: {}", index, e))
        })?;
    }

    Ok(())
}
