//! Blob storage client: S3 uploads and signed download URLs.

use std::{collections::HashMap, path::Path, time::Duration};

use async_trait::async_trait;
use aws_sdk_s3::{presigning::PresigningConfig, primitives::ByteStream};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    error::{PipelineError, Result},
    sanitize::sanitize_key,
};

/// Uploads local files under caller-supplied keys and signs download URLs.
///
/// Implementations never retry internally; transient upload failures feed
/// the engine's retry state machine.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Streams a local file to storage under `key`.
    ///
    /// Returns the key actually stored, after uniform sanitization.
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<String>;

    /// Issues a time-limited signed download URL for an existing key.
    ///
    /// URLs are never cached; every call signs afresh.
    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String>;
}

/// S3-backed blob store.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    /// Creates a store using ambient AWS credentials (env/profile/IMDS).
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self { client: aws_sdk_s3::Client::new(&config), bucket: bucket.into() }
    }

    /// Creates a store from an explicit client, mainly for localstack-style
    /// endpoints.
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self { client, bucket: bucket.into() }
    }
}

/// Upstream files are either PDFs or zip archives.
fn content_type_for(key: &str) -> &'static str {
    if key.to_lowercase().ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/zip"
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<String> {
        let stored_key = sanitize_key(key);
        debug!(original = key, sanitized = %stored_key, bucket = %self.bucket, "uploading to S3");

        let body = ByteStream::from_path(local_path).await.map_err(|e| {
            PipelineError::store(&stored_key, format!("failed to stream local file: {e}"))
        })?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&stored_key)
            .content_type(content_type_for(key))
            .body(body);

        if let Some(metadata) = metadata {
            for (name, value) in metadata {
                request = request.metadata(name, value);
            }
        }

        request
            .send()
            .await
            .map_err(|e| PipelineError::store(&stored_key, e.to_string()))?;

        Ok(stored_key)
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| PipelineError::store(key, format!("invalid expiry: {e}")))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| PipelineError::store(key, e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

/// In-memory blob store for tests and local development.
///
/// Holds uploaded bytes in a map and returns deterministic fake signed URLs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored bytes for a key, if any.
    pub async fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    /// Keys currently stored.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        _metadata: Option<HashMap<String, String>>,
    ) -> Result<String> {
        let stored_key = sanitize_key(key);
        let bytes = tokio::fs::read(local_path).await.map_err(|e| {
            PipelineError::store(&stored_key, format!("failed to read local file: {e}"))
        })?;

        self.objects.write().await.insert(stored_key.clone(), bytes);
        Ok(stored_key)
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        if !self.objects.read().await.contains_key(key) {
            return Err(PipelineError::store(key, "no such object"));
        }
        Ok(format!("https://blobs.invalid/{key}?expires={}", expires_in.as_secs()))
    }
}
