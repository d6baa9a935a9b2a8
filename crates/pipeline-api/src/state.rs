//! Shared application state injected into every HTTP handler.

use std::sync::Arc;

use pipeline_config::OpsConfig;
use pipeline_core::{BlobBroker, JobQueue, RecordStore};
use pipeline_events::EventBus;
use pipeline_telemetry::Metrics;

/// Collaborators and configuration every control-plane handler needs.
pub struct ApiState {
    /// Record persistence.
    pub store: Arc<dyn RecordStore>,
    /// Durable per-stage job queues.
    pub queue: Arc<dyn JobQueue>,
    /// Presigned-URL object storage broker.
    pub blob: Arc<dyn BlobBroker>,
    /// Progress/event bus, also fed to the SSE bridge.
    pub events: Arc<EventBus>,
    /// Prometheus metrics registry.
    pub metrics: Metrics,
    /// Operational knobs (timeouts, origins, GC window).
    pub ops: OpsConfig,
    /// Bucket name recorded alongside newly created records.
    pub bucket_name: String,
}

impl ApiState {
    /// Construct state from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn JobQueue>,
        blob: Arc<dyn BlobBroker>,
        events: Arc<EventBus>,
        metrics: Metrics,
        ops: OpsConfig,
        bucket_name: String,
    ) -> Self {
        Self {
            store,
            queue,
            blob,
            events,
            metrics,
            ops,
            bucket_name,
        }
    }
}
