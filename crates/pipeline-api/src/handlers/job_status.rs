//! `GET /api/job-status/:id`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use pipeline_api_models::JobStatusResponse;
use pipeline_core::JobType;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::ApiState;

const STAGES: [JobType; 3] = [JobType::Transcription, JobType::Summary, JobType::Article];

/// Tries every stage queue for a live job with this id first, since a job's
/// identifier is independent of the record it operates on; falls back to the
/// record store, keyed by the same id, and synthesizes progress from the
/// persisted status.
pub(crate) async fn job_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    for stage in STAGES {
        if let Some(snapshot) = state.queue.find_job(stage.queue_name(), &id).await? {
            return Ok(Json(JobStatusResponse::from_snapshot(snapshot)));
        }
    }

    let not_found = || ApiError::not_found(format!("no job or record found for id {id}"));

    let record_id = Uuid::parse_str(&id).map_err(|_| not_found())?;
    let record = state.store.get(record_id).await?.ok_or_else(not_found)?;

    Ok(Json(JobStatusResponse::from_record(&record)))
}
