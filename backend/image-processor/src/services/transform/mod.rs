//! Transformation engine
//!
//! Turns an [`ImageTask`] into a processed asset: download the source, dispatch
//! on the processing mode, encode, upload under `processed/<label>/`.
//!
//! Decode/scale/encode runs on the blocking thread pool.

pub mod animated;
pub mod codec;
pub mod composite;

use crate::models::{ImageTask, ProcessedImage, ProcessingMode, ProcessingParams, UnknownMode};
use crate::storage::{processed_key, AssetStore, StorageError};
use animated::AnimatedImage;
use bytes::Bytes;
use codec::Encoded;
use image::{imageops, DynamicImage};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default bound on either side of a `resize` target
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

/// Engine configuration
#[derive(Clone, Debug)]
pub struct TransformConfig {
    /// Output width of `thumbnail` tasks
    pub thumbnail_width: u32,
    /// Output height of `thumbnail` tasks
    pub thumbnail_height: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Largest accepted `resize` width or height
    pub max_dimension: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            thumbnail_width: 150,
            thumbnail_height: 150,
            jpeg_quality: 90,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Transformation error types
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Bad parameters: {0}")]
    BadParameters(String),

    #[error(transparent)]
    UnknownMode(#[from] UnknownMode),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transform task panicked: {0}")]
    TaskPanicked(String),
}

pub struct TransformEngine {
    store: Arc<dyn AssetStore>,
    config: TransformConfig,
}

impl TransformEngine {
    pub fn new(store: Arc<dyn AssetStore>, config: TransformConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Run one task end to end.
    ///
    /// Parameters are validated before any I/O. On failure nothing is written.
    pub async fn process(&self, task: &ImageTask) -> Result<ProcessedImage, TransformError> {
        let mode = task.mode()?;

        match mode {
            ProcessingMode::Thumbnail => {
                let (width, height) = (self.config.thumbnail_width, self.config.thumbnail_height);
                self.resize(task, mode, width, height).await
            }
            ProcessingMode::Resize => {
                let (width, height) =
                    required_dimensions(&task.parameters, self.config.max_dimension)?;
                self.resize(task, mode, width, height).await
            }
            ProcessingMode::Watermark => {
                let overlay = task
                    .parameters
                    .watermark_path
                    .as_deref()
                    .filter(|path| !path.is_empty())
                    .ok_or_else(|| {
                        TransformError::BadParameters("watermark path is required".to_string())
                    })?;
                self.watermark(task, overlay).await
            }
        }
    }

    async fn resize(
        &self,
        task: &ImageTask,
        mode: ProcessingMode,
        width: u32,
        height: u32,
    ) -> Result<ProcessedImage, TransformError> {
        let source = self.store.download(&task.uploads_path).await?;
        let quality = self.config.jpeg_quality;

        let encoded =
            run_blocking(move || resize_bytes(&source, width, height, quality)).await?;

        self.finish(task, mode, encoded).await
    }

    async fn watermark(
        &self,
        task: &ImageTask,
        overlay_path: &str,
    ) -> Result<ProcessedImage, TransformError> {
        let base = self.store.download(&task.uploads_path).await?;
        let overlay = self.store.download(overlay_path).await?;
        let quality = self.config.jpeg_quality;

        let encoded = run_blocking(move || watermark_bytes(&base, &overlay, quality)).await?;
        let processed = self.finish(task, ProcessingMode::Watermark, encoded).await?;

        if let Err(e) = self.store.delete(overlay_path).await {
            warn!(
                image_id = task.image_id,
                watermark_path = %overlay_path,
                error = %e,
                "Failed to delete watermark overlay"
            );
        }

        Ok(processed)
    }

    async fn finish(
        &self,
        task: &ImageTask,
        mode: ProcessingMode,
        encoded: Encoded,
    ) -> Result<ProcessedImage, TransformError> {
        let key = processed_key(mode, encoded.extension);
        let size = encoded.data.len();

        self.store.upload(&key, encoded.data).await?;

        info!(
            image_id = task.image_id,
            mode = %mode,
            processed_path = %key,
            size = size,
            "Image transformed"
        );

        Ok(ProcessedImage {
            id: task.image_id,
            uploads_path: task.uploads_path.clone(),
            processed_path: key,
            processed: true,
        })
    }
}

/// `width` and `height` must both be present, positive and at most `max`
fn required_dimensions(
    params: &ProcessingParams,
    max: u32,
) -> Result<(u32, u32), TransformError> {
    let (Some(width), Some(height)) = (params.width, params.height) else {
        return Err(TransformError::BadParameters(
            "width and height are required".to_string(),
        ));
    };

    if width <= 0 || height <= 0 {
        return Err(TransformError::BadParameters(format!(
            "width and height must be positive, got {width}x{height}"
        )));
    }

    if width > i64::from(max) || height > i64::from(max) {
        return Err(TransformError::BadParameters(format!(
            "{width}x{height} exceeds the {max} pixel limit"
        )));
    }

    // Both fit below `max`, which is a u32
    Ok((width as u32, height as u32))
}

async fn run_blocking<T, F>(f: F) -> Result<T, TransformError>
where
    F: FnOnce() -> Result<T, TransformError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransformError::TaskPanicked(e.to_string()))?
}

/// Multi-frame decode first; anything that is not a GIF takes the still path
fn resize_bytes(
    source: &Bytes,
    width: u32,
    height: u32,
    jpeg_quality: u8,
) -> Result<Encoded, TransformError> {
    if let Ok(animated) = AnimatedImage::decode(source) {
        debug!(
            frames = animated.frame_count(),
            width = width,
            height = height,
            "Resizing animated image"
        );

        let data = animated.resize(width, height)?.encode()?;
        return Ok(Encoded {
            data,
            extension: "gif",
        });
    }

    let (image, format) = codec::decode_still(source)?;
    debug!(
        format = ?format,
        original_width = image.width(),
        original_height = image.height(),
        width = width,
        height = height,
        "Resizing still image"
    );

    let scaled = composite::scale_onto_transparent(&image.to_rgba8(), width, height);
    codec::encode_still(DynamicImage::ImageRgba8(scaled), format, jpeg_quality)
}

fn watermark_bytes(base: &Bytes, overlay: &Bytes, jpeg_quality: u8) -> Result<Encoded, TransformError> {
    let (base_image, format) = codec::decode_still(base)?;
    let (overlay_image, _) = codec::decode_still(overlay)?;

    let mut canvas = base_image.to_rgba8();
    let stretched =
        composite::scale_bilinear(&overlay_image.to_rgba8(), canvas.width(), canvas.height());
    imageops::overlay(&mut canvas, &stretched, 0, 0);

    codec::encode_still(DynamicImage::ImageRgba8(canvas), format, jpeg_quality)
}
