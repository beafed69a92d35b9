use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::Submitter;
use crate::api::validation::validate_image_upload;
use crate::core::state::AppState;
use crate::schemas::upload::UploadResponse;

const UPLOAD_SUBFOLDER: &str = "papers";
// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub(crate) fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_image))
        .layer(DefaultBodyLimit::max(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES)))
}

async fn upload_image(
    State(state): State<AppState>,
    submitter: Submitter,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let storage_settings = state.settings().storage();
    let max_bytes = storage_settings.max_upload_bytes();

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Invalid multipart data".to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        filename = field.file_name().map(|s| s.to_string());
        content_type = field.content_type().map(|s| s.to_string());
        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|_| ApiError::BadRequest("Failed to read file".to_string()))?
        {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(ApiError::PayloadTooLarge(format!(
                    "File size exceeds {}MB limit",
                    storage_settings.max_upload_size_mb
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        file_bytes = Some(bytes);
    }

    let file_bytes =
        file_bytes.ok_or_else(|| ApiError::BadRequest("File is required".to_string()))?;
    if file_bytes.is_empty() {
        return Err(ApiError::BadRequest("File is empty".to_string()));
    }
    let filename = filename.unwrap_or_else(|| "image.jpg".to_string());
    let content_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());

    validate_image_upload(&filename, &content_type, &storage_settings.allowed_image_extensions)?;

    let path = state
        .storage()
        .save(UPLOAD_SUBFOLDER, &filename, &file_bytes)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to store uploaded file"))?;

    tracing::info!(path = %path, size = file_bytes.len(), owner = %submitter.username, "Image uploaded");

    Ok(Json(UploadResponse { path, filename, size: file_bytes.len() }))
}
