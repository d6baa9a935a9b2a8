//! `POST /api/process`.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use pipeline_api_models::{ProcessRequest, ProcessResponse};
use pipeline_core::{DEFAULT_STAGE_DEADLINE, Job, JobType, RecordStatus};

use crate::error::ApiError;
use crate::state::ApiState;

pub(crate) async fn start_processing(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let record = state
        .store
        .get(request.record_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("record {} not found", request.record_id)))?;

    if !matches!(record.status, RecordStatus::Uploaded | RecordStatus::Error) {
        return Err(ApiError::conflict(format!(
            "record is {:?}, expected UPLOADED or ERROR",
            record.status
        )));
    }

    let record = if request.file_key.is_some() || request.file_url.is_some() {
        state
            .store
            .set_source(
                record.id,
                request.file_key.as_deref(),
                request.file_url.as_deref(),
            )
            .await?
    } else {
        record
    };
    state.store.start_processing(record.id).await?;

    let job = Job {
        id: Job::new_id(),
        job_type: JobType::Transcription,
        record_id: record.id,
        file_key: record.file_key.clone(),
        attempt: 0,
        created_at: Utc::now(),
        processing_deadline: Utc::now() + DEFAULT_STAGE_DEADLINE,
        priority: Job::priority_for_size(None),
    };
    let job_id = job.id.clone();

    state
        .queue
        .enqueue(JobType::Transcription.queue_name(), job, None)
        .await?;
    state.metrics.inc_job_enqueued(JobType::Transcription.queue_name());

    Ok(Json(ProcessResponse {
        record_id: record.id,
        job_id,
    }))
}
