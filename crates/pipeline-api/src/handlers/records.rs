//! `GET /api/records/:id`, `GET /api/records`, `POST /api/records/:id/retry`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{Duration, Utc};
use pipeline_api_models::{
    PaginationView, RecordListResponse, RecordView, RetryRequest, RetryResponse,
};
use pipeline_core::{DEFAULT_STAGE_DEADLINE, Job, JobType, ProcessingStep, RecordStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::ApiState;

const DOWNLOAD_URL_TTL: Duration = Duration::hours(1);
const DEFAULT_PAGE: u32 = 1;
const DEFAULT_PAGE_SIZE: u32 = 20;

pub(crate) async fn get_record(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RecordView>, ApiError> {
    let record = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("record {id} not found")))?;

    let download_url = match record.file_key.as_deref() {
        Some(key) => match state.blob.get_download_url(key, DOWNLOAD_URL_TTL).await {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::warn!(error = %err, record_id = %id, "failed to mint download url");
                None
            }
        },
        None => None,
    };

    Ok(Json(RecordView::from_record(record, download_url)))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

pub(crate) async fn list_records(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<RecordListResponse>, ApiError> {
    let page = query.page.unwrap_or(DEFAULT_PAGE).max(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100);

    let result = state.store.list(page, page_size).await?;
    let records = result
        .records
        .into_iter()
        .map(|record| RecordView::from_record(record, None))
        .collect();

    Ok(Json(RecordListResponse {
        records,
        pagination: PaginationView {
            page,
            page_size,
            total: result.total,
        },
    }))
}

pub(crate) async fn retry_record(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<RetryRequest>>,
) -> Result<Json<RetryResponse>, ApiError> {
    let request = body.map_or_else(RetryRequest::default, |Json(request)| request);

    let record = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("record {id} not found")))?;

    let stage = match request.step {
        Some(step) => step.stage(),
        None if matches!(record.status, RecordStatus::Error) => {
            stage_for_failed_step(record.processing_step)
        }
        None => {
            return Err(ApiError::bad_request(
                "step is required unless the record is in ERROR",
            ));
        }
    };

    let record = state.store.begin_stage(id, stage).await?;

    let job = Job {
        id: Job::new_id(),
        job_type: stage,
        record_id: record.id,
        file_key: record.file_key.clone(),
        attempt: 0,
        created_at: Utc::now(),
        processing_deadline: Utc::now() + DEFAULT_STAGE_DEADLINE,
        priority: Job::priority_for_size(None),
    };
    let job_id = job.id.clone();

    state.queue.enqueue(stage.queue_name(), job, None).await?;
    state.metrics.inc_job_enqueued(stage.queue_name());

    Ok(Json(RetryResponse {
        record_id: record.id,
        job_id,
    }))
}

/// Resume from wherever the last stage failed, per the `ERROR` processing
/// step recorded at failure time. `Timestamps` is folded into the
/// transcription stage since it runs inside the same handler.
const fn stage_for_failed_step(step: Option<ProcessingStep>) -> JobType {
    match step {
        Some(ProcessingStep::Summary) => JobType::Summary,
        Some(ProcessingStep::Article) => JobType::Article,
        Some(ProcessingStep::Download | ProcessingStep::Transcription | ProcessingStep::Timestamps)
        | None => JobType::Transcription,
    }
}
