//! SSE bridge for the progress event bus.
//!
//! `GET /api/events/:job_id` maps each [`pipeline_events::Event`] concerning
//! the path's job onto a `text/event-stream` message. A `Last-Event-ID`
//! header resumes from the bus's replay ring, matching the reconnect
//! contract the external push-channel edge (out of scope here) relies on.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{self, Sse};
use futures_core::Stream;
use pipeline_events::EventId;

use crate::state::ApiState;

const KEEP_ALIVE_SECS: u64 = 15;
const LAST_EVENT_ID_HEADER: &str = "last-event-id";

pub(crate) async fn stream_job_events(
    State(state): State<Arc<ApiState>>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let since_id = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<EventId>().ok());

    let mut events = state.events.subscribe(since_id);

    let stream = stream! {
        while let Some(envelope) = events.next().await {
            if envelope.event.job_id() != Some(job_id.as_str()) {
                continue;
            }
            let data = serde_json::to_string(&envelope.event).unwrap_or_default();
            yield Ok(sse::Event::default()
                .id(envelope.id.to_string())
                .event(envelope.event.kind())
                .data(data));
        }
    };

    Sse::new(stream).keep_alive(
        sse::KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keep-alive"),
    )
}
