//! `GET /api/health`, `GET /api/healthcheck`.

use axum::Json;
use pipeline_api_models::HealthResponse;

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok_now())
}
