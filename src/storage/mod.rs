//! Storage backends for backup artifacts.
//!
//! Every backend exposes the same five verbs behind [`StorageBackend`].
//! Policy destinations select a backend: `s3://bucket/prefix` and
//! `gcs://bucket/prefix` map to object stores keyed below the bucket, any
//! other string is a local filesystem path.

pub mod gcs;
pub mod local;
pub mod mock;
pub mod multi;
pub mod s3;

use crate::config::{GcsConfig, S3Config, StorageConfig, StorageSettings};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use gcs::GcsStorage;
pub use local::LocalStorage;
pub use multi::MultiStorage;
pub use s3::S3Storage;

/// Storage backend trait
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Copy a local file to `remote_path`, creating intermediate structure
    async fn upload(
        &self,
        cancel: &CancellationToken,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()>;

    /// Copy `remote_path` to a local file, creating local directories
    async fn download(
        &self,
        cancel: &CancellationToken,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()>;

    /// Remove an object; a missing object is not an error
    async fn delete(&self, cancel: &CancellationToken, remote_path: &str) -> Result<()>;

    /// All keys under a prefix, in no particular order
    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> Result<Vec<String>>;

    /// `Ok(false)` only when the object is confirmed absent
    async fn exists(&self, cancel: &CancellationToken, remote_path: &str) -> Result<bool>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}

/// Run a storage future, aborting with a cancellation error if the token fires first
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, during: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BackupError::Cancelled(during.to_string())),
        result = fut => result,
    }
}

/// A parsed policy destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Local(PathBuf),
    S3 { bucket: String, prefix: String },
    Gcs { bucket: String, prefix: String },
}

impl Destination {
    pub fn parse(destination: &str) -> Self {
        if let Some(rest) = destination.strip_prefix("s3://") {
            let (bucket, prefix) = split_bucket(rest);
            return Destination::S3 { bucket, prefix };
        }
        if let Some(rest) = destination.strip_prefix("gcs://") {
            let (bucket, prefix) = split_bucket(rest);
            return Destination::Gcs { bucket, prefix };
        }

        let path = Path::new(destination);
        Destination::Local(std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()))
    }

    /// Backend-relative path for an artifact named `name`
    pub fn remote_path(&self, name: &str) -> String {
        match self {
            Destination::Local(dir) => dir.join(name).to_string_lossy().into_owned(),
            Destination::S3 { prefix, .. } | Destination::Gcs { prefix, .. } => {
                if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{}/{}", prefix, name)
                }
            }
        }
    }

    /// Fully qualified location of an artifact, as recorded on the job.
    /// Parsing it again yields a destination whose [`object_key`](Self::object_key)
    /// is the artifact's remote path.
    pub fn location(&self, name: &str) -> String {
        match self {
            Destination::Local(_) => self.remote_path(name),
            Destination::S3 { bucket, .. } => format!("s3://{}/{}", bucket, self.remote_path(name)),
            Destination::Gcs { bucket, .. } => format!("gcs://{}/{}", bucket, self.remote_path(name)),
        }
    }

    /// The backend-relative key this destination points at
    pub fn object_key(&self) -> String {
        match self {
            Destination::Local(path) => path.to_string_lossy().into_owned(),
            Destination::S3 { prefix, .. } | Destination::Gcs { prefix, .. } => prefix.clone(),
        }
    }
}

fn split_bucket(rest: &str) -> (String, String) {
    match rest.split_once('/') {
        Some((bucket, prefix)) => (bucket.to_string(), prefix.trim_matches('/').to_string()),
        None => (rest.to_string(), String::new()),
    }
}

/// Remote path for an artifact under a policy destination
pub fn generate_remote_path(destination: &str, name: &str) -> String {
    Destination::parse(destination).remote_path(name)
}

/// Build a backend from a fully-specified storage config
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config {
        StorageConfig::Local { path } => Arc::new(LocalStorage::new(path)),
        StorageConfig::S3(s3) => Arc::new(S3Storage::new(s3).await?),
        StorageConfig::Gcs(gcs) => Arc::new(GcsStorage::new(gcs)?),
    };
    Ok(backend)
}

/// Build the backend for a policy destination, plus any configured mirrors
pub async fn from_destination(
    destination: &str,
    settings: &StorageSettings,
) -> Result<Arc<dyn StorageBackend>> {
    let primary_config = match Destination::parse(destination) {
        // Local remote paths are absolute, so the backend is rooted at the filesystem root
        Destination::Local(_) => StorageConfig::Local {
            path: filesystem_root(),
        },
        Destination::S3 { bucket, .. } => StorageConfig::S3(S3Config {
            bucket,
            region: settings.s3.region.clone(),
            access_key_id: settings.s3.access_key_id.clone().unwrap_or_default(),
            secret_access_key: settings.s3.secret_access_key.clone().unwrap_or_default(),
            endpoint: settings.s3.endpoint.clone(),
            use_ssl: settings.s3.use_ssl,
        }),
        Destination::Gcs { bucket, .. } => StorageConfig::Gcs(GcsConfig {
            bucket,
            project_id: settings.gcs.project_id.clone().unwrap_or_default(),
            credentials_path: settings.gcs.credentials_path.clone(),
            service_account_json: settings.gcs.service_account_json.clone(),
        }),
    };

    let primary = from_config(&primary_config).await?;
    if settings.mirrors.is_empty() {
        return Ok(primary);
    }

    let mut backends = vec![primary];
    for mirror in &settings.mirrors {
        backends.push(from_config(mirror).await?);
    }
    info!("Using {} storage backends (primary + mirrors)", backends.len());
    Ok(Arc::new(MultiStorage::new(backends)))
}

/// Hands out the backend for a destination or artifact location
#[derive(Clone)]
pub enum StorageProvider {
    /// Every location is served by one backend
    Fixed(Arc<dyn StorageBackend>),
    /// Backends are built from the destination scheme and storage settings
    Configured(StorageSettings),
}

impl StorageProvider {
    pub async fn for_location(&self, location: &str) -> Result<Arc<dyn StorageBackend>> {
        match self {
            StorageProvider::Fixed(backend) => Ok(Arc::clone(backend)),
            StorageProvider::Configured(settings) => from_destination(location, settings).await,
        }
    }
}

fn filesystem_root() -> PathBuf {
    std::env::current_dir()
        .ok()
        .and_then(|dir| dir.ancestors().last().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("/"))
}
