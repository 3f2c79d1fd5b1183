/// Image handlers - HTTP endpoints for submission, retrieval, listing and deletion
use actix_multipart::Multipart;
use actix_web::http::header::{self, ContentDisposition};
use actix_web::{web, HttpResponse};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::AppState;
use crate::error::{AppError, Result};
use crate::models::{Direction, ImageRecord, PageCursor};
use crate::services::submission::{SubmissionRequest, UploadedFile};
use crate::storage::presign_all;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub result: String,
    pub object_name: String,
    pub image_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ImageUrlResponse {
    pub id: i64,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ImageWithUrl {
    #[serde(flatten)]
    pub record: ImageRecord,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ImageListResponse {
    pub count: i64,
    pub images: Vec<ImageWithUrl>,
}

#[derive(Debug, Deserialize)]
pub struct ListImagesQuery {
    pub last_created_at: Option<String>,
    pub last_id: Option<i64>,
    pub mode: Option<String>,
}

/// Multipart fields collected from a submission
#[derive(Default)]
struct UploadForm {
    image: Option<UploadedFile>,
    watermark: Option<UploadedFile>,
    type_processing: Option<String>,
    width: Option<String>,
    height: Option<String>,
}

/// Accept an image and queue its transformation
pub async fn upload_image(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse> {
    let form = read_upload_form(payload, state.max_upload_bytes).await?;

    let image = form
        .image
        .ok_or_else(|| AppError::BadRequest("img file is required".to_string()))?;
    let type_processing = form
        .type_processing
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest("type_processing is required".to_string()))?;

    let request = SubmissionRequest {
        image,
        type_processing,
        width: parse_dimension("width", form.width.as_deref())?,
        height: parse_dimension("height", form.height.as_deref())?,
        watermark: form.watermark,
    };

    let receipt = state.submission.submit(request).await?;

    Ok(HttpResponse::Ok().json(UploadResponse {
        result: "image published to queue".to_string(),
        object_name: receipt.object_name,
        image_id: receipt.image_id,
    }))
}

/// Presigned URL of a processed image; 202 while it is still being processed
pub async fn get_image(state: web::Data<AppState>, id: web::Path<i64>) -> Result<HttpResponse> {
    let id = id.into_inner();

    let record = state
        .repository
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("image {id}")))?;

    if !record.processed {
        return Ok(HttpResponse::Accepted().json(serde_json::json!({
            "id": record.id,
            "status": "processing",
        })));
    }

    let url = state
        .store
        .presigned_url(&record.processed_path, state.presign_expiry)
        .await?;

    Ok(HttpResponse::Ok().json(ImageUrlResponse { id: record.id, url }))
}

/// One page of images around a `(created_at, id)` cursor
pub async fn list_images(
    state: web::Data<AppState>,
    query: web::Query<ListImagesQuery>,
) -> Result<HttpResponse> {
    let query = query.into_inner();
    let cursor = parse_cursor(&query)?;

    let records = state.repository.list(&cursor).await?;
    let count = state.repository.count().await?;

    let keys = records
        .iter()
        .map(|record| record.display_path().to_string())
        .collect();
    let urls = presign_all(state.store.clone(), keys, state.presign_expiry).await?;

    debug!(
        direction = ?cursor.direction,
        returned = records.len(),
        "Listed images"
    );

    let images = records
        .into_iter()
        .zip(urls)
        .map(|(record, url)| ImageWithUrl { record, url })
        .collect();

    Ok(HttpResponse::Ok().json(ImageListResponse { count, images }))
}

/// Remove an image record
pub async fn delete_image(state: web::Data<AppState>, id: web::Path<i64>) -> Result<HttpResponse> {
    let id = id.into_inner();

    if !state.repository.delete(id).await? {
        return Err(AppError::NotFound(format!("image {id}")));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "result": "image deleted" })))
}

fn parse_cursor(query: &ListImagesQuery) -> Result<PageCursor> {
    let raw = query
        .last_created_at
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("last_created_at is required".to_string()))?;

    let created_at = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| AppError::BadRequest(format!("invalid last_created_at {raw:?}: {e}")))?
        .with_timezone(&Utc);

    let direction = match query.mode.as_deref() {
        None | Some("") => Direction::Next,
        Some(mode) => mode.parse().map_err(AppError::BadRequest)?,
    };

    Ok(PageCursor::new(
        created_at,
        query.last_id.unwrap_or(0),
        direction,
    ))
}

fn parse_dimension(name: &str, raw: Option<&str>) -> Result<Option<i64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("{name} must be an integer, got {value:?}"))),
    }
}

async fn read_upload_form(mut payload: Multipart, max_bytes: usize) -> Result<UploadForm> {
    let mut form = UploadForm::default();
    let mut total_bytes: usize = 0;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| {
            error!("Error reading multipart field: {}", e);
            AppError::BadRequest(format!("invalid multipart body: {e}"))
        })?;

        let disposition = field
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| ContentDisposition::from_raw(value).ok());
        let name = disposition
            .as_ref()
            .and_then(|cd| cd.get_name())
            .unwrap_or_default()
            .to_string();
        let file_name = disposition
            .as_ref()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        let mut data = BytesMut::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| {
                error!("Error reading upload field: {}", e);
                AppError::BadRequest(format!("failed to read field {name}: {e}"))
            })?;

            total_bytes += chunk.len();
            if total_bytes > max_bytes {
                return Err(AppError::BadRequest(format!(
                    "upload exceeds {max_bytes} byte limit"
                )));
            }
            data.extend_from_slice(&chunk);
        }
        let data: Bytes = data.freeze();

        match name.as_str() {
            "img" => {
                form.image = Some(UploadedFile {
                    file_name: file_name.unwrap_or_default(),
                    data,
                })
            }
            "watermark" => {
                form.watermark = Some(UploadedFile {
                    file_name: file_name.unwrap_or_default(),
                    data,
                })
            }
            "type_processing" => form.type_processing = Some(text_field(&name, data)?),
            "width" => form.width = Some(text_field(&name, data)?),
            "height" => form.height = Some(text_field(&name, data)?),
            other => debug!(field = %other, "Ignoring unknown multipart field"),
        }
    }

    Ok(form)
}

fn text_field(name: &str, data: Bytes) -> Result<String> {
    String::from_utf8(data.to_vec())
        .map(|value| value.trim().to_string())
        .map_err(|_| AppError::BadRequest(format!("field {name} is not valid UTF-8")))
}
