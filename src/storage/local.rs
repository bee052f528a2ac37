//! Filesystem storage backend.
//!
//! Remote paths are resolved under a root directory. Leading separators are
//! ignored, so `/srv/backups/a.tar.gz` under root `/mnt/mirror` lands at
//! `/mnt/mirror/srv/backups/a.tar.gz`. Keys returned by `list` are
//! root-relative with forward slashes.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

use super::{cancellable, StorageBackend};
use crate::error::{check_cancelled, BackupError, Result};

/// Filesystem-based storage backend
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a remote path to a location under the root
    fn resolve(&self, remote_path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(remote_path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    return Err(BackupError::Security(format!(
                        "storage path may not contain '..': {}",
                        remote_path
                    )))
                }
            }
        }
        Ok(resolved)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
    }
}

fn storage_err(action: &str, path: &Path, e: std::io::Error) -> BackupError {
    BackupError::Storage(format!("Failed to {} {}: {}", action, path.display(), e))
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        check_cancelled(cancel, "upload")?;
        let target = self.resolve(remote_path)?;

        cancellable(cancel, "upload", async {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| storage_err("create directory", parent, e))?;
            }
            fs::copy(local_path, &target)
                .await
                .map_err(|e| storage_err("copy to", &target, e))?;
            Ok(())
        })
        .await?;

        debug!(path = %target.display(), "Local upload complete");
        Ok(())
    }

    async fn download(
        &self,
        cancel: &CancellationToken,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        check_cancelled(cancel, "download")?;
        let source = self.resolve(remote_path)?;

        if !fs::try_exists(&source).await? {
            return Err(BackupError::NotFound(format!(
                "storage object not found: {}",
                remote_path
            )));
        }

        cancellable(cancel, "download", async {
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(&source, local_path)
                .await
                .map_err(|e| storage_err("copy from", &source, e))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, cancel: &CancellationToken, remote_path: &str) -> Result<()> {
        check_cancelled(cancel, "delete")?;
        let target = self.resolve(remote_path)?;

        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %target.display(), "Delete of missing object ignored");
                Ok(())
            }
            Err(e) => Err(storage_err("delete", &target, e)),
        }
    }

    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> Result<Vec<String>> {
        check_cancelled(cancel, "list")?;
        let prefix_path = self.resolve(prefix)?;

        // Walk the deepest directory that can hold matching keys, then filter.
        // Without a trailing '/', `app` also matches siblings like `app-db/`.
        let names_dir = prefix.is_empty() || prefix.ends_with('/') || prefix_path == self.root;
        let walk_root = if names_dir && prefix_path.is_dir() {
            prefix_path.clone()
        } else {
            match prefix_path.parent() {
                Some(parent) if parent.is_dir() => parent.to_path_buf(),
                _ => return Ok(Vec::new()),
            }
        };

        let root = self.root.clone();
        let prefix_key = self.key_for(&prefix_path).unwrap_or_default();
        let token = cancel.clone();
        let keys = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let storage = LocalStorage::new(root);
            let mut keys = Vec::new();
            for entry in WalkDir::new(&walk_root) {
                check_cancelled(&token, "list")?;
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(key) = storage.key_for(entry.path()) {
                    if key.starts_with(&prefix_key) {
                        keys.push(key);
                    }
                }
            }
            Ok(keys)
        })
        .await
        .map_err(|e| BackupError::Internal(format!("list task failed: {}", e)))??;

        Ok(keys)
    }

    async fn exists(&self, cancel: &CancellationToken, remote_path: &str) -> Result<bool> {
        check_cancelled(cancel, "exists")?;
        let target = self.resolve(remote_path)?;
        fs::try_exists(&target)
            .await
            .map_err(|e| storage_err("stat", &target, e))
    }

    fn name(&self) -> &str {
        "local"
    }
}
