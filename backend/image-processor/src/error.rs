/// HTTP-facing error type
///
/// Domain errors (repository, object storage, queue) collapse into an
/// [`AppError`]; `ResponseError` renders every variant as the same JSON body.
use crate::db::RepositoryError;
use crate::kafka::QueueError;
use crate::storage::StorageError;
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    /// Request parsed but violates a submission rule (extension, mode, dimensions)
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Request could not be parsed (multipart body, query string)
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// Machine-readable `(type, code)` pair of the error body
    fn classification(&self) -> (&'static str, &'static str) {
        match self {
            AppError::DatabaseError(_) => ("server_error", "DATABASE_ERROR"),
            AppError::StorageError(_) => ("server_error", "STORAGE_ERROR"),
            AppError::QueueError(_) => ("server_error", "QUEUE_ERROR"),
            AppError::ValidationError(_) => ("validation_error", "VALIDATION_ERROR"),
            AppError::NotFound(_) => ("not_found_error", "IMAGE_NOT_FOUND"),
            AppError::Internal(_) => ("server_error", "INTERNAL_SERVER_ERROR"),
            AppError::BadRequest(_) => ("validation_error", "INVALID_REQUEST"),
        }
    }
}

/// JSON body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_)
            | AppError::StorageError(_)
            | AppError::QueueError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let (error_type, code) = self.classification();

        HttpResponse::build(status).json(ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.to_string(),
            status: status.as_u16(),
            error_type: error_type.to_string(),
            code: code.to_string(),
        })
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => AppError::NotFound(format!("image {id}")),
            other => AppError::DatabaseError(other.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("object {key}")),
            other => AppError::StorageError(other.to_string()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::QueueError(err.to_string())
    }
}
