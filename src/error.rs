//! Error taxonomy shared by the catalog, codecs, storage backends and managers.

use crate::config::ConfigError;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Security violation: {0}")]
    Security(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled during {0}")]
    Cancelled(String),

    #[error(transparent)]
    Config(ConfigError),

    #[error("{phase} phase failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<BackupError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;

impl BackupError {
    /// True when the error, or the error wrapped by a phase, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            BackupError::Cancelled(_) => true,
            BackupError::Phase { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            BackupError::NotFound(_) => true,
            BackupError::Phase { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            already @ BackupError::Phase { .. } => already,
            other => BackupError::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }
}

impl From<ConfigError> for BackupError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ValidationError(msg) => BackupError::Validation(msg),
            other => BackupError::Config(other),
        }
    }
}

impl From<walkdir::Error> for BackupError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.display().to_string());
        match (err.into_io_error(), path) {
            (Some(io), _) => BackupError::Io(io),
            (None, Some(path)) => BackupError::Io(std::io::Error::other(format!(
                "filesystem loop detected at {}",
                path
            ))),
            (None, None) => BackupError::Internal("directory walk failed".to_string()),
        }
    }
}

/// Pipeline phase names used when reporting which step of a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scan,
    Copy,
    Archive,
    Encrypt,
    Checksum,
    Upload,
    Persist,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Scan => "scan",
            Phase::Copy => "copy",
            Phase::Archive => "archive",
            Phase::Encrypt => "encrypt",
            Phase::Checksum => "checksum",
            Phase::Upload => "upload",
            Phase::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Return a cancellation error if the token has been triggered.
pub fn check_cancelled(token: &tokio_util::sync::CancellationToken, during: &str) -> Result<()> {
    if token.is_cancelled() {
        return Err(BackupError::Cancelled(during.to_string()));
    }
    Ok(())
}
