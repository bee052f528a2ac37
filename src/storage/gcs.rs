//! Google Cloud Storage backend built on `object_store`.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::buffered::BufWriter;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{cancellable, StorageBackend};
use crate::config::GcsConfig;
use crate::error::{check_cancelled, BackupError, Result};

/// GCS storage backend
pub struct GcsStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl GcsStorage {
    /// Credentials come from the inline service-account JSON, then the
    /// credentials file, then the environment (`GOOGLE_*` variables).
    pub fn new(config: &GcsConfig) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(BackupError::Validation("GCS bucket is required".to_string()));
        }

        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&config.bucket);
        if let Some(json) = config.service_account_json.as_deref().filter(|j| !j.is_empty()) {
            builder = builder.with_service_account_key(json);
        } else if let Some(path) = &config.credentials_path {
            builder = builder.with_service_account_path(path.to_string_lossy());
        }

        let store = builder
            .build()
            .map_err(|e| BackupError::Storage(format!("Failed to create GCS client: {}", e)))?;

        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    /// Wrap an existing object store, e.g. `object_store::memory::InMemory` in tests
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    fn location(&self, remote_path: &str) -> Result<ObjectPath> {
        ObjectPath::parse(remote_path.trim_start_matches('/')).map_err(|e| {
            BackupError::Validation(format!("invalid GCS object path '{}': {}", remote_path, e))
        })
    }
}

fn gcs_err(action: &str, key: &str, err: object_store::Error) -> BackupError {
    match err {
        object_store::Error::NotFound { .. } => {
            BackupError::NotFound(format!("gcs object not found: {}", key))
        }
        other => BackupError::Storage(format!("GCS {} failed for {}: {}", action, key, other)),
    }
}

#[async_trait]
impl StorageBackend for GcsStorage {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        check_cancelled(cancel, "upload")?;
        let location = self.location(remote_path)?;

        cancellable(cancel, "upload", async {
            let mut file = tokio::fs::File::open(local_path).await?;
            let mut writer = BufWriter::new(Arc::clone(&self.store), location.clone());
            tokio::io::copy(&mut file, &mut writer)
                .await
                .map_err(|e| BackupError::Storage(format!("GCS upload failed for {}: {}", location, e)))?;
            writer
                .shutdown()
                .await
                .map_err(|e| BackupError::Storage(format!("GCS upload failed for {}: {}", location, e)))?;
            Ok(())
        })
        .await?;

        debug!(bucket = %self.bucket, key = remote_path, "GCS upload complete");
        Ok(())
    }

    async fn download(
        &self,
        cancel: &CancellationToken,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        check_cancelled(cancel, "download")?;
        let location = self.location(remote_path)?;

        cancellable(cancel, "download", async {
            let result = self
                .store
                .get(&location)
                .await
                .map_err(|e| gcs_err("download", remote_path, e))?;

            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::File::create(local_path).await?;
            let mut stream = result.into_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| gcs_err("download", remote_path, e))?;
                file.write_all(&chunk).await?;
            }
            file.sync_all().await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, cancel: &CancellationToken, remote_path: &str) -> Result<()> {
        check_cancelled(cancel, "delete")?;
        let location = self.location(remote_path)?;

        match cancellable(cancel, "delete", async {
            self.store
                .delete(&location)
                .await
                .map_err(|e| gcs_err("delete", remote_path, e))
        })
        .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> Result<Vec<String>> {
        check_cancelled(cancel, "list")?;
        let prefix = prefix.trim_start_matches('/');

        // Object store prefixes match whole path segments, so list the
        // enclosing directory and filter on the raw string.
        let dir = match prefix.rsplit_once('/') {
            Some((dir, _)) => Some(self.location(dir)?),
            None => None,
        };

        let objects: Vec<_> = cancellable(cancel, "list", async {
            self.store
                .list(dir.as_ref())
                .try_collect()
                .await
                .map_err(|e| gcs_err("list", prefix, e))
        })
        .await?;

        Ok(objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn exists(&self, cancel: &CancellationToken, remote_path: &str) -> Result<bool> {
        check_cancelled(cancel, "exists")?;
        let location = self.location(remote_path)?;

        cancellable(cancel, "exists", async {
            match self.store.head(&location).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(gcs_err("head", remote_path, e)),
            }
        })
        .await
    }

    fn name(&self) -> &str {
        "gcs"
    }
}
