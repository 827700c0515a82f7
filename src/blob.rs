//! Object storage for screenshots and rendered exports.
//!
//! `BlobStore::get` is the asset fetcher used by the composer: a missing key and an
//! I/O failure are reported as distinct variants so callers can log them differently,
//! but both are recoverable at the document level.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("blob storage I/O error: {0}")]
    TransientIo(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Stores `bytes` under `key` and returns the key.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, BlobError>;

    /// Time-limited download URL for `key`.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, BlobError>;
}

/// S3-compatible storage (AWS or MinIO).
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

/// Connection settings for [`S3BlobStore::connect`].
#[derive(Debug, Clone, PartialEq)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl S3BlobStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a client from settings. Static credentials are used when both keys are
    /// set, otherwise the default AWS provider chain.
    pub async fn connect(settings: &S3Settings) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(true);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if let (Some(access), Some(secret)) = (&settings.access_key, &settings.secret_key) {
            builder = builder.credentials_provider(aws_credential_types::Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "snapstep-env",
            ));
        }

        Self::new(Client::from_conf(builder.build()), settings.bucket.clone())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    BlobError::NotFound(key.to_string())
                } else {
                    BlobError::TransientIo(DisplayErrorContext(&err).to_string())
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|err| BlobError::TransientIo(err.to_string()))?;

        debug!(key, "Fetched blob from S3");
        Ok(body.into_bytes().to_vec())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| BlobError::TransientIo(DisplayErrorContext(&err).to_string()))?;
        Ok(key.to_string())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, BlobError> {
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|err| BlobError::TransientIo(err.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|err| BlobError::TransientIo(DisplayErrorContext(&err).to_string()))?;
        Ok(request.uri().to_string())
    }
}

/// Blobs as files under a root directory. Used for local development.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a key to a path below the root. Keys that could escape it do not exist.
    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.split('/').any(str::is_empty)
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(BlobError::NotFound(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => BlobError::NotFound(key.to_string()),
            _ => BlobError::TransientIo(format!("{}: {}", path.display(), err)),
        })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String, BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| BlobError::TransientIo(format!("{}: {}", parent.display(), err)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| BlobError::TransientIo(format!("{}: {}", path.display(), err)))?;
        Ok(key.to_string())
    }

    async fn presign_get(&self, key: &str, _expires_in: Duration) -> Result<String, BlobError> {
        let path = self.path_for(key)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(BlobError::NotFound(key.to_string()));
        }
        Ok(format!("file://{}", path.display()))
    }
}
