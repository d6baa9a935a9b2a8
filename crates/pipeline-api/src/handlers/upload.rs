//! `POST /api/upload-url`.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Duration;
use pipeline_api_models::{UploadUrlRequest, UploadUrlResponse};

use crate::error::ApiError;
use crate::state::ApiState;

/// GC window for stale `UPLOADED`/`PROCESSING` records, per `§6`.
const STALE_UPLOAD_WINDOW: Duration = Duration::hours(24);

pub(crate) async fn mint_upload_url(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<UploadUrlRequest>,
) -> Result<Json<UploadUrlResponse>, ApiError> {
    if request.file_name.trim().is_empty() || request.content_type.trim().is_empty() {
        return Err(ApiError::bad_request(
            "file_name and content_type are required",
        ));
    }

    if let Err(err) = state.store.gc_stale_uploads(STALE_UPLOAD_WINDOW).await {
        tracing::warn!(error = %err, "stale-upload GC failed; continuing with the upload request");
    }

    let ticket = state
        .blob
        .mint_upload(&request.file_name, &request.content_type, request.file_size)
        .await
        .map_err(|err| ApiError::internal("failed to mint upload ticket").with_details(err.to_string()))?;

    let (key, public_url) = match &ticket {
        pipeline_core::UploadTicket::Single { key, public_url, .. }
        | pipeline_core::UploadTicket::Multipart { key, public_url, .. } => {
            (key.clone(), public_url.clone())
        }
    };

    let record = state
        .store
        .create_uploaded(
            &request.file_name,
            Some(&key),
            Some(&state.bucket_name),
            public_url.as_deref(),
        )
        .await?;

    Ok(Json(UploadUrlResponse::from_ticket(ticket, record.id)))
}
