//! S3 and S3-compatible (MinIO, Ceph) storage backend.

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{cancellable, StorageBackend};
use crate::config::S3Config;
use crate::error::{check_cancelled, BackupError, Result};

/// S3 storage backend
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Build a client from explicit settings. Static credentials are used
    /// when both keys are set, otherwise the default AWS provider chain.
    pub async fn new(config: &S3Config) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(BackupError::Validation("S3 bucket is required".to_string()));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if !config.access_key_id.is_empty() && !config.secret_access_key.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                config.access_key_id.clone(),
                config.secret_access_key.clone(),
                None,
                None,
                "backup-manager",
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            let url = endpoint_url(endpoint, config.use_ssl);
            info!("Using custom S3 endpoint: {}", url);
            builder = builder.endpoint_url(url).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }

    pub fn with_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Endpoints without a scheme pick one from `use_ssl`
fn endpoint_url(endpoint: &str, use_ssl: bool) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if use_ssl {
        format!("https://{}", endpoint)
    } else {
        format!("http://{}", endpoint)
    }
}

fn key_for(remote_path: &str) -> &str {
    remote_path.trim_start_matches('/')
}

fn status_is_404<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response().map(|r| r.status().as_u16()) == Some(404)
}

fn s3_err<E>(action: &str, key: &str, err: E) -> BackupError
where
    E: std::error::Error,
{
    BackupError::Storage(format!(
        "S3 {} failed for {}: {}",
        action,
        key,
        DisplayErrorContext(err)
    ))
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        check_cancelled(cancel, "upload")?;
        let key = key_for(remote_path);

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| BackupError::Storage(format!("Failed to read {}: {}", local_path.display(), e)))?;

        cancellable(cancel, "upload", async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body)
                .send()
                .await
                .map_err(|e| s3_err("upload", key, e))
        })
        .await?;

        debug!(bucket = %self.bucket, key, "S3 upload complete");
        Ok(())
    }

    async fn download(
        &self,
        cancel: &CancellationToken,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        check_cancelled(cancel, "download")?;
        let key = key_for(remote_path);

        cancellable(cancel, "download", async {
            let output = match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    let missing = e
                        .as_service_error()
                        .map(|se| se.is_no_such_key())
                        .unwrap_or(false)
                        || status_is_404(&e);
                    if missing {
                        return Err(BackupError::NotFound(format!(
                            "s3://{}/{}",
                            self.bucket, key
                        )));
                    }
                    return Err(s3_err("download", key, e));
                }
            };

            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = File::create(local_path).await?;
            let mut reader = output.body.into_async_read();
            tokio::io::copy(&mut reader, &mut file).await?;
            file.sync_all().await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, cancel: &CancellationToken, remote_path: &str) -> Result<()> {
        check_cancelled(cancel, "delete")?;
        let key = key_for(remote_path);

        // DeleteObject succeeds for missing keys
        cancellable(cancel, "delete", async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| s3_err("delete", key, e))
        })
        .await?;
        Ok(())
    }

    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> Result<Vec<String>> {
        check_cancelled(cancel, "list")?;
        let prefix = key_for(prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let output = cancellable(cancel, "list", async {
                request.send().await.map_err(|e| s3_err("list", prefix, e))
            })
            .await?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn exists(&self, cancel: &CancellationToken, remote_path: &str) -> Result<bool> {
        check_cancelled(cancel, "exists")?;
        let key = key_for(remote_path);

        cancellable(cancel, "exists", async {
            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(e) => {
                    let missing = e
                        .as_service_error()
                        .map(|se| se.is_not_found())
                        .unwrap_or(false)
                        || status_is_404(&e);
                    if missing {
                        Ok(false)
                    } else {
                        Err(s3_err("head", key, e))
                    }
                }
            }
        })
        .await
    }

    fn name(&self) -> &str {
        "s3"
    }
}
