//! Submission path: store an upload, create its pending record, queue the task

use crate::db::ImageRepository;
use crate::error::{AppError, Result};
use crate::kafka::TaskPublisher;
use crate::models::{ImageTask, ProcessingMode};
use crate::services::transform::DEFAULT_MAX_DIMENSION;
use crate::storage::{upload_key, watermark_key, AssetStore};
use bytes::Bytes;
use resilience::{presets, RetryConfig};
use std::sync::Arc;
use tracing::info;

/// Extensions accepted for uploaded images (compared case-insensitively)
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "gif", "jpeg", "jpg"];

/// A file received from the client
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub image: UploadedFile,
    pub type_processing: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub watermark: Option<UploadedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub image_id: i64,
    pub object_name: String,
}

pub struct SubmissionService {
    store: Arc<dyn AssetStore>,
    repository: Arc<dyn ImageRepository>,
    publisher: Arc<dyn TaskPublisher>,
    publish_strategy: RetryConfig,
    max_dimension: u32,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn AssetStore>,
        repository: Arc<dyn ImageRepository>,
        publisher: Arc<dyn TaskPublisher>,
    ) -> Self {
        Self {
            store,
            repository,
            publisher,
            publish_strategy: presets::queue_publish(),
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }

    pub fn with_publish_strategy(mut self, strategy: RetryConfig) -> Self {
        self.publish_strategy = strategy;
        self
    }

    /// Largest `resize` width or height accepted at submission
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Validate, upload, record, publish.
    ///
    /// Nothing is written until the request has passed validation.
    pub async fn submit(&self, request: SubmissionRequest) -> Result<SubmissionReceipt> {
        let extension = allowed_extension(&request.image.file_name)?;
        let mode: ProcessingMode = request
            .type_processing
            .parse()
            .map_err(|e| AppError::ValidationError(format!("{e}")))?;

        let watermark_extension = match mode {
            ProcessingMode::Resize => {
                validate_dimensions(request.width, request.height, self.max_dimension)?;
                None
            }
            ProcessingMode::Thumbnail => None,
            ProcessingMode::Watermark => {
                let watermark = request.watermark.as_ref().ok_or_else(|| {
                    AppError::ValidationError("watermark file is required".to_string())
                })?;
                Some(allowed_extension(&watermark.file_name)?)
            }
        };

        let object_name = upload_key(&extension);
        self.store
            .upload(&object_name, request.image.data.clone())
            .await?;

        let mut task = ImageTask::new(0, mode, object_name.clone());

        match mode {
            ProcessingMode::Resize => {
                if let (Some(width), Some(height)) = (request.width, request.height) {
                    task = task.with_dimensions(width, height);
                }
            }
            ProcessingMode::Thumbnail => {}
            ProcessingMode::Watermark => {
                if let (Some(watermark), Some(ext)) = (&request.watermark, &watermark_extension) {
                    let watermark_path = watermark_key(ext);
                    self.store
                        .upload(&watermark_path, watermark.data.clone())
                        .await?;
                    task = task.with_watermark(watermark_path);
                }
            }
        }

        let record = self.repository.create(&object_name).await?;
        task.image_id = record.id;

        self.publisher
            .publish_with_retry(&self.publish_strategy, &task)
            .await?;

        info!(
            image_id = record.id,
            mode = %mode,
            object_name = %object_name,
            "Image submitted for processing"
        );

        Ok(SubmissionReceipt {
            image_id: record.id,
            object_name,
        })
    }
}

/// Lower-cased extension of `file_name` if it is an accepted image type
pub fn allowed_extension(file_name: &str) -> Result<String> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .ok_or_else(|| {
            AppError::ValidationError(format!("file {file_name:?} has no extension"))
        })?;

    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(AppError::ValidationError(format!(
            "unsupported file extension .{extension}, expected one of .png, .gif, .jpeg, .jpg"
        )))
    }
}

fn validate_dimensions(width: Option<i64>, height: Option<i64>, max: u32) -> Result<()> {
    let max = i64::from(max);
    match (width, height) {
        (Some(w), Some(h)) if w <= 0 || h <= 0 => Err(AppError::ValidationError(
            "width and height must be positive".to_string(),
        )),
        (Some(w), Some(h)) if w > max || h > max => Err(AppError::ValidationError(format!(
            "width and height must be at most {max}, got {w}x{h}"
        ))),
        (Some(_), Some(_)) => Ok(()),
        _ => Err(AppError::ValidationError(
            "width and height are required for resize".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_extension_is_case_insensitive() {
        assert_eq!(allowed_extension("cat.PNG").unwrap(), "png");
        assert_eq!(allowed_extension("a.b.JpG").unwrap(), "jpg");
        assert_eq!(allowed_extension("loop.gif").unwrap(), "gif");
    }

    #[test]
    fn test_rejected_extensions() {
        assert!(allowed_extension("doc.pdf").is_err());
        assert!(allowed_extension("noext").is_err());
        assert!(allowed_extension("image.webp").is_err());
    }

    #[test]
    fn test_validate_dimensions() {
        assert!(validate_dimensions(Some(10), Some(10), 100).is_ok());
        assert!(validate_dimensions(Some(10), None, 100).is_err());
        assert!(validate_dimensions(Some(0), Some(10), 100).is_err());
    }

    #[test]
    fn test_validate_dimensions_upper_bound() {
        assert!(validate_dimensions(Some(100), Some(100), 100).is_ok());
        assert!(validate_dimensions(Some(101), Some(10), 100).is_err());
        assert!(validate_dimensions(Some(60_000), Some(60_000), 8192).is_err());
    }
}
