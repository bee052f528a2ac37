//! Logging setup and the job-scoped backup logger
//!
//! Provides dual-output logging:
//! - Console: stderr, JSON or plain text
//! - File: optional, daily rotation with a retention cap on old files

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, info_span, Span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::{BackupError, Phase};
use crate::types::BackupResult;

const LOG_FILE_PREFIX: &str = "backup-manager";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for rotated log files; console only when `None`
    pub log_directory: Option<PathBuf>,
    /// Filter directive, e.g. `info` or `backup_manager=debug`
    pub log_level: String,
    pub format: LogFormat,
    /// Maximum number of log files to keep
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::from_settings(&LoggingSettings::default())
    }
}

impl LoggingConfig {
    /// Create from the `[logging]` config section
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            log_directory: settings.directory.clone(),
            log_level: settings.level.clone(),
            format: settings.format,
            max_files: settings.max_files,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

/// Initialize logging with console and optional file outputs
///
/// Returns a guard that must be kept alive for the duration of the program.
/// When the guard is dropped, any remaining logs are flushed to disk.
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_filter(level_filter(&config.log_level)?)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(level_filter(&config.log_level)?)
            .boxed(),
    };
    layers.push(console_layer);

    let mut file_guard = None;
    if let Some(dir) = &config.log_directory {
        let log_dir = crate::config::expand_tilde(dir);
        fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;

        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, &log_dir, format!("{}.log", LOG_FILE_PREFIX));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guard = Some(guard);

        // Files always get JSON so they can be shipped as-is
        layers.push(
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(level_filter(&config.log_level)?)
                .boxed(),
        );

        cleanup_old_logs(&log_dir, config.max_files)?;
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

/// Initialize simple console-only logging (for when config isn't available)
pub fn init_console_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// `RUST_LOG` wins over the configured level
fn level_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level directive: {}", level)),
    }
}

/// Cleanup old log files, keeping only the most recent N files
pub fn cleanup_old_logs(log_dir: &Path, max_files: usize) -> Result<()> {
    let mut log_files: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(LOG_FILE_PREFIX)
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| {
        let a_time = a.metadata().and_then(|m| m.modified()).ok();
        let b_time = b.metadata().and_then(|m| m.modified()).ok();
        b_time.cmp(&a_time)
    });

    for file in log_files.into_iter().skip(max_files) {
        if let Err(e) = fs::remove_file(file.path()) {
            tracing::warn!("Failed to remove old log file {:?}: {}", file.path(), e);
        } else {
            tracing::debug!("Removed old log file: {:?}", file.path());
        }
    }

    Ok(())
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any remaining logs to disk.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Logger bound to one pipeline run; every event carries the job and policy ids
#[derive(Clone)]
pub struct BackupLogger {
    span: Span,
}

impl BackupLogger {
    pub fn new(job_id: &str, policy_id: &str) -> Self {
        Self {
            span: info_span!("backup", job_id = %job_id, policy_id = %policy_id),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn log_backup_start(&self, source: &str, destination: &str) {
        info!(parent: &self.span, source, destination, "Backup started");
    }

    pub fn log_backup_progress(&self, phase: Phase, message: &str) {
        info!(parent: &self.span, phase = %phase, "{}", message);
    }

    pub fn log_backup_complete(&self, result: &BackupResult) {
        info!(
            parent: &self.span,
            path = %result.backup_path,
            files = result.files_processed,
            total_size = result.total_size,
            compressed_size = result.compressed_size,
            compression_ratio = result.compression_ratio,
            encrypted = result.encrypted,
            duration_secs = result.duration.as_secs_f64(),
            "Backup completed"
        );
    }

    pub fn log_backup_error(&self, err: &BackupError) {
        match err {
            BackupError::Phase { phase, source } => {
                error!(parent: &self.span, phase = %phase, error = %source, "Backup failed")
            }
            other => error!(parent: &self.span, error = %other, "Backup failed"),
        }
    }
}
