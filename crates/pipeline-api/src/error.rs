//! API error wrapper translating the pipeline error taxonomy into HTTP
//! status codes and the `{error, details?}` response body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pipeline_api_models::ProblemDetails;
use pipeline_core::PipelineError;

/// Structured API error carrying the status code and response body.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    body: ProblemDetails,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ProblemDetails::new(error),
        }
    }

    pub(crate) fn with_details(mut self, details: impl Into<String>) -> Self {
        self.body = self.body.with_details(details);
        self
    }

    pub(crate) fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub(crate) fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub(crate) fn conflict(error: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, error)
    }

    pub(crate) fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

/// Maps a [`PipelineError`] surfaced from a collaborator call onto the HTTP
/// taxonomy in `§7`: `StaleState` is a conflict (the record moved under us),
/// `NotFound` is 404, everything else is an opaque 500 (the collaborator
/// already logged the retryable/poison distinction where it mattered).
impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match &err {
            PipelineError::NotFound { record_id } => {
                Self::not_found(format!("record {record_id} not found"))
            }
            PipelineError::StaleState { record_id } => {
                Self::conflict(format!("record {record_id} changed state concurrently"))
            }
            other => Self::internal("internal server error").with_details(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
