/// Data models for image-processor
///
/// This module defines structures for:
/// - ImageRecord: persisted metadata of an uploaded image
/// - ImageTask: the queue payload describing one transformation
/// - ProcessedImage: the result written back after a successful transform
/// - PageCursor: keyset pagination over `(created_at, id)`
///
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ========================================
// Image Records
// ========================================

/// Image metadata row (`image_path` table)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImageRecord {
    pub id: i64,
    pub uploads_path: String,
    pub processed_path: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Object key clients should be sent to: the processed asset once it
    /// exists, the original upload before that.
    pub fn display_path(&self) -> &str {
        if self.processed_path.is_empty() {
            &self.uploads_path
        } else {
            &self.processed_path
        }
    }
}

/// Outcome of a successful transformation, applied to an `ImageRecord`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub id: i64,
    pub uploads_path: String,
    pub processed_path: String,
    pub processed: bool,
}

// ========================================
// Processing Tasks
// ========================================

/// Transformation requested for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingMode {
    Resize,
    Thumbnail,
    Watermark,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resize => "resize",
            Self::Thumbnail => "thumbnail",
            Self::Watermark => "watermark",
        }
    }

    /// Directory under `processed/` and file-name suffix of the output asset
    pub fn output_label(&self) -> &'static str {
        match self {
            Self::Resize => "resized",
            Self::Thumbnail => "thumbnails",
            Self::Watermark => "watermarked",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a task names a mode this service does not implement
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown processing mode: {0:?}")]
pub struct UnknownMode(pub String);

impl FromStr for ProcessingMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resize" => Ok(Self::Resize),
            "thumbnail" => Ok(Self::Thumbnail),
            "watermark" => Ok(Self::Watermark),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Mode-specific task parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(
        default,
        alias = "watermark_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub watermark_path: Option<String>,
    /// Accepted for wire compatibility; no mode reads it
    #[serde(default, alias = "max_size", skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,
}

/// Queue payload: one transformation of one uploaded image.
///
/// `type_processing` stays a string on the wire; [`ImageTask::mode`] turns it
/// into the closed [`ProcessingMode`] set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageTask {
    #[serde(alias = "image_id")]
    pub image_id: i64,
    #[serde(alias = "type_processing")]
    pub type_processing: String,
    #[serde(alias = "uploads_path")]
    pub uploads_path: String,
    #[serde(default)]
    pub parameters: ProcessingParams,
}

impl ImageTask {
    pub fn new(image_id: i64, mode: ProcessingMode, uploads_path: impl Into<String>) -> Self {
        Self {
            image_id,
            type_processing: mode.as_str().to_string(),
            uploads_path: uploads_path.into(),
            parameters: ProcessingParams::default(),
        }
    }

    pub fn with_dimensions(mut self, width: i64, height: i64) -> Self {
        self.parameters.width = Some(width);
        self.parameters.height = Some(height);
        self
    }

    pub fn with_watermark(mut self, watermark_path: impl Into<String>) -> Self {
        self.parameters.watermark_path = Some(watermark_path.into());
        self
    }

    pub fn mode(&self) -> Result<ProcessingMode, UnknownMode> {
        self.type_processing.parse()
    }
}

// ========================================
// Pagination
// ========================================

/// Records returned per listing page
pub const PAGE_SIZE: i64 = 4;

/// Direction of travel from a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Strictly after the cursor, `created_at ASC, id ASC`
    Next,
    /// Strictly before the cursor, `created_at DESC, id DESC`
    Prev,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next" => Ok(Self::Next),
            "prev" => Ok(Self::Prev),
            other => Err(format!("invalid mode {other:?}, expected \"next\" or \"prev\"")),
        }
    }
}

/// Keyset cursor: the `(created_at, id)` of the last record the client saw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: i64,
    pub direction: Direction,
}

impl PageCursor {
    pub fn new(created_at: DateTime<Utc>, id: i64, direction: Direction) -> Self {
        Self {
            created_at,
            id,
            direction,
        }
    }

    /// Cursor continuing past `record` in `direction`
    pub fn after(record: &ImageRecord, direction: Direction) -> Self {
        Self::new(record.created_at, record.id, direction)
    }
}
