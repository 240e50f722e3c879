//! Object storage for uploaded chat images.

use std::path::Path;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

const UPLOAD_PREFIX: &str = "uploads";
const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Stores blobs by filename and hands back the path clients reference them by.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, filename: &str, blob: StoredBlob) -> Result<String>;

    /// `Ok(None)` when nothing is stored under `filename`.
    async fn get(&self, filename: &str) -> Result<Option<StoredBlob>>;
}

/// The path under which an uploaded file is served back.
pub fn published_path(filename: &str) -> String {
    format!("/{UPLOAD_PREFIX}/{filename}")
}

/// A fresh `<uuid>.<ext>` name, keeping the extension of `original` when it
/// has a usable one.
pub fn upload_filename(original: Option<&str>) -> String {
    let ext = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    format!("{}.{ext}", Uuid::new_v4())
}

/// Only flat names are served; anything that could escape the upload prefix
/// is rejected.
pub fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && filename
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub fn content_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    fn key(filename: &str) -> String {
        format!("{UPLOAD_PREFIX}/{filename}")
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, filename: &str, blob: StoredBlob) -> Result<String> {
        let key = Self::key(filename);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(blob.bytes))
            .content_type(blob.content_type)
            .send()
            .await
            .map_err(|e| anyhow!("S3 upload failed: {e}"))?;

        info!("Uploaded image to s3://{}/{}", self.bucket, key);
        Ok(published_path(filename))
    }

    async fn get(&self, filename: &str) -> Result<Option<StoredBlob>> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(filename))
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    return Ok(None);
                }
                return Err(anyhow!("S3 download failed: {e}"));
            }
        };

        let content_type = output
            .content_type()
            .map(String::from)
            .unwrap_or_else(|| content_type_for(filename).to_string());
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| anyhow!("S3 body read failed: {e}"))?
            .into_bytes();
        Ok(Some(StoredBlob {
            bytes,
            content_type,
        }))
    }
}
