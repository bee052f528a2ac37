//! Configuration module for backup-manager
//!
//! This module handles loading configuration from TOML files, applying
//! environment overrides, and validating policies and storage settings.
//!
//! ## Precedence
//!
//! Settings are applied in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. The TOML file (explicit `--config` path or the first default location found)
//! 3. `BACKUP_MANAGER_*` environment variables
//!
//! ## Example Usage
//!
//! ```no_run
//! use backup_manager::config;
//!
//! let config = config::load_config(Some(std::path::Path::new("backup-manager.toml")))?;
//! println!("Catalog: {}", config.database.path.display());
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;
mod validate;

pub use loader::{
    apply_env_overrides, default_config_paths, load_config, save_config, validate_config,
    ConfigError, Result,
};
pub use types::*;
pub use validate::{
    is_valid_bucket_name, validate_gcs_config, validate_policy, validate_s3_config,
    validate_storage_config,
};

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
