//! Asset storage
//!
//! Blob read/write/delete plus presigned read URLs. The transformation engine,
//! the submission path and the listing handlers only see the [`AssetStore`]
//! trait; [`S3AssetStore`] backs it with any S3-compatible service (AWS, MinIO).

pub mod presign;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use uuid::Uuid;

use crate::models::ProcessingMode;

pub use presign::presign_all;
pub use s3::S3AssetStore;

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object storage error: {0}")]
    Backend(String),

    #[error("Presigning failed: {0}")]
    Presign(String),

    #[error("Presign task failed: {0}")]
    TaskFailed(String),
}

/// Content-addressed blob store
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store `data` under `key`, overwriting any existing object
    async fn upload(&self, key: &str, data: Bytes) -> Result<(), StorageError>;

    /// Fetch the full object stored under `key`
    async fn download(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Remove the object stored under `key`
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Time-limited read URL for `key`
    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError>;
}

// ========================================
// Object key conventions
// ========================================

/// `uploads/<uuid>.<ext>`
pub fn upload_key(extension: &str) -> String {
    format!("uploads/{}.{}", Uuid::new_v4(), extension)
}

/// `watermarks/<uuid>.<ext>`
pub fn watermark_key(extension: &str) -> String {
    format!("watermarks/{}.{}", Uuid::new_v4(), extension)
}

/// `processed/<label>/<uuid>-<label>.<ext>`, e.g. `processed/resized/<uuid>-resized.png`
pub fn processed_key(mode: ProcessingMode, extension: &str) -> String {
    let label = mode.output_label();
    format!("processed/{}/{}-{}.{}", label, Uuid::new_v4(), label, extension)
}

/// MIME type for an object key, derived from its extension
pub fn content_type_for(key: &str) -> &'static str {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}
