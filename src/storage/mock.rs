//! In-memory storage backend for tests.

use super::{cancellable, StorageBackend};
use crate::error::{check_cancelled, BackupError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Recorded storage call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageCall {
    Upload { remote_path: String },
    Download { remote_path: String },
    Delete { remote_path: String },
    List { prefix: String },
    Exists { remote_path: String },
}

/// Mock storage keeping objects in a shared map
#[derive(Clone, Default)]
pub struct MockStorage {
    /// Stored objects by key
    pub objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    /// Recorded operation calls
    pub calls: Arc<Mutex<Vec<StorageCall>>>,
    pub should_fail_upload: Arc<Mutex<bool>>,
    pub should_fail_delete: Arc<Mutex<bool>>,
    pub should_fail_exists: Arc<Mutex<bool>>,
    /// Artificial latency applied to uploads
    pub upload_delay: Arc<Mutex<Option<Duration>>>,
}

fn key(remote_path: &str) -> String {
    remote_path.trim_start_matches('/').to_string()
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure upload to fail
    pub fn with_failing_upload(self) -> Self {
        *self.should_fail_upload.lock().unwrap() = true;
        self
    }

    /// Configure delete to fail
    pub fn with_failing_delete(self) -> Self {
        *self.should_fail_delete.lock().unwrap() = true;
        self
    }

    /// Configure exists to fail
    pub fn with_failing_exists(self) -> Self {
        *self.should_fail_exists.lock().unwrap() = true;
        self
    }

    /// Make every upload sleep first, so cancellation can land mid-transfer
    pub fn with_upload_delay(self, delay: Duration) -> Self {
        *self.upload_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Insert an object directly
    pub fn put(&self, remote_path: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key(remote_path), data.to_vec());
    }

    pub fn contains(&self, remote_path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(&key(remote_path))
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<StorageCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, StorageCall::Upload { .. }))
            .count()
    }

    fn record(&self, call: StorageCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl StorageBackend for MockStorage {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        self.record(StorageCall::Upload {
            remote_path: remote_path.to_string(),
        });
        check_cancelled(cancel, "upload")?;

        if *self.should_fail_upload.lock().unwrap() {
            return Err(BackupError::Storage("mock upload failure".to_string()));
        }

        let delay = *self.upload_delay.lock().unwrap();
        if let Some(delay) = delay {
            cancellable(cancel, "upload", async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
        }

        let data = tokio::fs::read(local_path).await?;
        self.objects.lock().unwrap().insert(key(remote_path), data);
        Ok(())
    }

    async fn download(
        &self,
        cancel: &CancellationToken,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        self.record(StorageCall::Download {
            remote_path: remote_path.to_string(),
        });
        check_cancelled(cancel, "download")?;

        let data = self
            .objects
            .lock()
            .unwrap()
            .get(&key(remote_path))
            .cloned()
            .ok_or_else(|| BackupError::NotFound(format!("mock object {}", remote_path)))?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, data).await?;
        Ok(())
    }

    async fn delete(&self, cancel: &CancellationToken, remote_path: &str) -> Result<()> {
        self.record(StorageCall::Delete {
            remote_path: remote_path.to_string(),
        });
        check_cancelled(cancel, "delete")?;

        if *self.should_fail_delete.lock().unwrap() {
            return Err(BackupError::Storage("mock delete failure".to_string()));
        }
        self.objects.lock().unwrap().remove(&key(remote_path));
        Ok(())
    }

    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> Result<Vec<String>> {
        self.record(StorageCall::List {
            prefix: prefix.to_string(),
        });
        check_cancelled(cancel, "list")?;

        let prefix = key(prefix);
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, cancel: &CancellationToken, remote_path: &str) -> Result<bool> {
        self.record(StorageCall::Exists {
            remote_path: remote_path.to_string(),
        });
        check_cancelled(cancel, "exists")?;

        if *self.should_fail_exists.lock().unwrap() {
            return Err(BackupError::Storage("mock exists failure".to_string()));
        }
        Ok(self.contains(remote_path))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
