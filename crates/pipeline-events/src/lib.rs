#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]
#![allow(unexpected_cfgs)]

//! Progress event bus for the media enrichment pipeline.
//!
//! The bus provides a typed event enum, sequential identifiers, and support for
//! replaying recent events when subscribers reconnect (e.g. SSE clients that
//! supply `Last-Event-ID`). Internally it uses `tokio::broadcast` with a bounded
//! buffer; when the channel overflows, the oldest events are dropped, matching
//! the desired backpressure behaviour. Delivery out of the bus is best-effort
//! and lossy by design: clients reconcile state by re-polling the record.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use tracing::error;
use uuid::Uuid;

/// Identifier assigned to each event emitted by the platform.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// The stage a job belongs to; mirrors the three dedicated queues.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Audio/video decode + speech-to-text + timestamp extraction.
    Transcription,
    /// Paragraph-style summary of the transcript.
    Summary,
    /// Long-form Markdown article derived from transcript and summary.
    Article,
}

impl StageKind {
    /// Name of the durable queue backing this stage.
    #[must_use]
    pub const fn queue_name(self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Summary => "summary",
            Self::Article => "article",
        }
    }
}

/// Typed domain events surfaced across the system.
///
/// Topics follow `job:progress:<id>`, `job:completed:<id>`, `job:failed:<id>`,
/// matching the push-channel room naming (`job-<id>`) used by the external
/// edge this crate does not implement.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new job was enqueued for a stage.
    JobEnqueued {
        /// Identifier of the enqueued job.
        job_id: String,
        /// Record the job operates on.
        record_id: Uuid,
        /// Stage the job belongs to.
        stage: StageKind,
    },
    /// Worker-reported progress for an in-flight job.
    JobProgress {
        /// Identifier of the job being processed.
        job_id: String,
        /// Record the job operates on.
        record_id: Uuid,
        /// Completion percentage in `0..=100`.
        progress: u8,
        /// Free-form short status tag (e.g. `"downloading"`, `"transcribing"`).
        status: String,
        /// Optional human-readable detail.
        message: Option<String>,
    },
    /// A job finished successfully and was archived.
    JobCompleted {
        /// Identifier of the completed job.
        job_id: String,
        /// Record the job operated on.
        record_id: Uuid,
        /// Stage the job belonged to.
        stage: StageKind,
    },
    /// A job exhausted its retry budget and was archived as failed.
    JobFailed {
        /// Identifier of the failed job.
        job_id: String,
        /// Record the job operated on.
        record_id: Uuid,
        /// Stage the job belonged to.
        stage: StageKind,
        /// Human-readable failure detail.
        message: String,
    },
    /// The record's persisted status changed.
    RecordStatusChanged {
        /// Record whose status changed.
        record_id: Uuid,
        /// New status value.
        status: String,
    },
    /// System health status changed (degraded or restored collaborators).
    HealthChanged {
        /// Components currently considered degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for SSE consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::JobEnqueued { .. } => "job_enqueued",
            Self::JobProgress { .. } => "job_progress",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::RecordStatusChanged { .. } => "record_status_changed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }

    /// The job identifier this event is keyed by, when applicable.
    ///
    /// SSE subscribers filter on this to implement the `job-<id>` room
    /// semantics of the external push-channel layer.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobEnqueued { job_id, .. }
            | Self::JobProgress { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. } => Some(job_id.as_str()),
            Self::RecordStatusChanged { .. } | Self::HealthChanged { .. } => None,
        }
    }

    /// The record identifier this event relates to, when applicable.
    #[must_use]
    pub const fn record_id(&self) -> Option<Uuid> {
        match self {
            Self::JobEnqueued { record_id, .. }
            | Self::JobProgress { record_id, .. }
            | Self::JobCompleted { record_id, .. }
            | Self::JobFailed { record_id, .. }
            | Self::RecordStatusChanged { record_id, .. } => Some(*record_id),
            Self::HealthChanged { .. } => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, ensuring dropped events impact both structures consistently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn publish(&self, event: Event) -> EventId {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.lock_buffer();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.lock_buffer();
            for item in buffer.iter() {
                if item.id > since {
                    backlog.push_back(item.clone());
                }
            }
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Return a snapshot of buffered events newer than the supplied identifier.
    ///
    /// This is useful for endpoints that need incremental views without
    /// establishing a long-lived subscription.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn backlog_since(&self, since_id: EventId) -> Vec<EventEnvelope> {
        let buffer = self.lock_buffer();
        buffer
            .iter()
            .filter(|item| item.id > since_id)
            .cloned()
            .collect()
    }

    /// Returns the last assigned identifier, if any events have been published.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.lock_buffer();
        buffer.back().map(|event| event.id)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("event buffer mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => self.receiver.recv().await.ok(),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

    fn sample_progress_event(id: usize) -> Event {
        Event::JobProgress {
            job_id: format!("job-{id:x}"),
            record_id: Uuid::from_u128(id as u128 + 1),
            progress: (id % 100) as u8,
            status: "transcribing".to_string(),
            message: None,
        }
    }

    #[test]
    fn event_kinds_cover_all_variants() {
        let record_id = Uuid::new_v4();
        let events = [
            Event::JobEnqueued {
                job_id: "job-1".to_string(),
                record_id,
                stage: StageKind::Transcription,
            },
            sample_progress_event(1),
            Event::JobCompleted {
                job_id: "job-1".to_string(),
                record_id,
                stage: StageKind::Transcription,
            },
            Event::JobFailed {
                job_id: "job-1".to_string(),
                record_id,
                stage: StageKind::Summary,
                message: "boom".to_string(),
            },
            Event::RecordStatusChanged {
                record_id,
                status: "DONE".to_string(),
            },
            Event::HealthChanged {
                degraded: vec!["queue".to_string()],
            },
        ];

        let expected = [
            "job_enqueued",
            "job_progress",
            "job_completed",
            "job_failed",
            "record_status_changed",
            "health_changed",
        ];

        for (event, kind) in events.iter().zip(expected) {
            assert_eq!(event.kind(), kind);
        }
    }

    #[test]
    fn job_id_and_record_id_extraction() {
        let record_id = Uuid::new_v4();
        let progress = sample_progress_event(7);
        assert!(progress.job_id().is_some());
        assert_eq!(progress.record_id(), Some(Uuid::from_u128(8)));

        let health = Event::HealthChanged { degraded: vec![] };
        assert!(health.job_id().is_none());
        assert!(health.record_id().is_none());

        let status = Event::RecordStatusChanged {
            record_id,
            status: "ERROR".to_string(),
        };
        assert!(status.job_id().is_none());
        assert_eq!(status.record_id(), Some(record_id));
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(sample_progress_event(i));
        }
        assert_eq!(last_id, 5);

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event);
            }
        }

        assert_eq!(received.len(), 3);
        assert_eq!(received.first().unwrap().id, 3);
        assert_eq!(received.last().unwrap().id, 5);
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() {
        let bus = Arc::new(EventBus::with_capacity(512));
        let mut stream = bus.subscribe(None);

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for i in 0..500 {
                    let publish_bus = bus.clone();
                    timeout(PUBLISH_TIMEOUT, async move {
                        let _ = publish_bus.publish(sample_progress_event(i));
                    })
                    .await
                    .expect("publish timed out");
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(event) = stream.next().await {
                    ids.insert(event.id);
                }
            }
            ids
        });

        publisher.await.expect("publisher task panicked");
        let ids = consumer.await.expect("consumer task panicked");
        assert_eq!(ids.len(), 500);
    }

    #[tokio::test]
    async fn last_event_id_reflects_recent_publish() {
        let bus = EventBus::with_capacity(2);
        assert!(bus.last_event_id().is_none(), "no events published yet");
        let published = bus.publish(sample_progress_event(0));
        assert_eq!(bus.last_event_id(), Some(published));
    }

    #[tokio::test]
    async fn stream_returns_none_after_sender_dropped() {
        let mut stream = {
            let bus = EventBus::with_capacity(1);
            let stream = bus.subscribe(None);
            drop(bus);
            stream
        };
        assert!(
            stream.next().await.is_none(),
            "closing the sender should end the stream"
        );
    }
}
