/// HTTP handlers for image endpoints
///
/// - `POST /upload`: submit an image for processing
/// - `GET /image/{id}`: presigned URL of the processed asset
/// - `GET /images`: cursor-paginated listing
/// - `DELETE /image/{id}`: remove a record
pub mod images;

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use std::time::Duration;

use crate::db::ImageRepository;
use crate::services::submission::SubmissionService;
use crate::storage::AssetStore;

pub use images::{delete_image, get_image, list_images, upload_image};

/// Shared state of the HTTP layer
pub struct AppState {
    pub store: Arc<dyn AssetStore>,
    pub repository: Arc<dyn ImageRepository>,
    pub submission: Arc<SubmissionService>,
    pub presign_expiry: Duration,
    pub max_upload_bytes: usize,
}

/// Register every route of the service
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/api/v1/health",
        web::get().to(|| async { HttpResponse::Ok().json(serde_json::json!({"status": "ok"})) }),
    )
    .route(
        "/api/v1/health/ready",
        web::get().to(|| async { HttpResponse::Ok().finish() }),
    )
    .route(
        "/api/v1/health/live",
        web::get().to(|| async { HttpResponse::Ok().finish() }),
    )
    .route("/upload", web::post().to(upload_image))
    .route("/images", web::get().to(list_images))
    .route("/image/{id}", web::get().to(get_image))
    .route("/image/{id}", web::delete().to(delete_image));
}
