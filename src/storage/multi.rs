//! Fan-out over several backends: a primary destination plus mirrors.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::StorageBackend;
use crate::error::{BackupError, Result};

/// Writes go to every backend, reads are served by the first that can
pub struct MultiStorage {
    backends: Vec<Arc<dyn StorageBackend>>,
}

impl MultiStorage {
    pub fn new(backends: Vec<Arc<dyn StorageBackend>>) -> Self {
        Self { backends }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    fn require_backends(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(BackupError::Storage("no storage backends configured".to_string()));
        }
        Ok(())
    }
}

fn tag(index: usize, backend: &dyn StorageBackend, err: BackupError) -> BackupError {
    match err {
        BackupError::Storage(msg) => {
            BackupError::Storage(format!("storage {} ({}): {}", index, backend.name(), msg))
        }
        other => other,
    }
}

#[async_trait]
impl StorageBackend for MultiStorage {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        self.require_backends()?;
        for (i, backend) in self.backends.iter().enumerate() {
            backend
                .upload(cancel, local_path, remote_path)
                .await
                .map_err(|e| tag(i, backend.as_ref(), e))?;
            debug!("Uploaded {} to storage {} ({})", remote_path, i, backend.name());
        }
        Ok(())
    }

    async fn download(
        &self,
        cancel: &CancellationToken,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        self.require_backends()?;
        let mut last_error = None;
        for (i, backend) in self.backends.iter().enumerate() {
            match backend.download(cancel, remote_path, local_path).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!("Download from storage {} ({}) failed: {}", i, backend.name(), e);
                    last_error = Some(tag(i, backend.as_ref(), e));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| BackupError::Storage("download failed".to_string())))
    }

    async fn delete(&self, cancel: &CancellationToken, remote_path: &str) -> Result<()> {
        self.require_backends()?;
        let mut failures = Vec::new();
        for (i, backend) in self.backends.iter().enumerate() {
            if let Err(e) = backend.delete(cancel, remote_path).await {
                if e.is_cancelled() {
                    return Err(e);
                }
                failures.push(format!("storage {} ({}): {}", i, backend.name(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BackupError::Storage(format!(
                "delete failed on {} backend(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> Result<Vec<String>> {
        self.require_backends()?;
        // Mirrors hold the same keys as the primary
        self.backends[0].list(cancel, prefix).await
    }

    async fn exists(&self, cancel: &CancellationToken, remote_path: &str) -> Result<bool> {
        self.require_backends()?;
        let mut first_error = None;
        for (i, backend) in self.backends.iter().enumerate() {
            match backend.exists(cancel, remote_path).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(tag(i, backend.as_ref(), e));
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "multi"
    }
}
