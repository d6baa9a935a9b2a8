//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes a minimal set of counters/gauges relevant to the media pipeline's
//!   queue and stage-handler surface.

use std::convert::TryFrom;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    events_emitted_total: IntCounterVec,
    queue_depth: IntGaugeVec,
    job_duration_seconds: HistogramVec,
    handler_errors_total: IntCounterVec,
    jobs_enqueued_total: IntCounterVec,
    jobs_completed_total: IntCounterVec,
    jobs_failed_total: IntCounterVec,
    idle_shutdowns_total: IntCounter,
    sweeper_reclaims_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total configuration/process idle shutdowns observed.
    pub idle_shutdowns_total: u64,
    /// Total jobs reclaimed by the deadline sweeper.
    pub sweeper_reclaims_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests received"),
            &["route", "code"],
        )?;
        let events_emitted_total = IntCounterVec::new(
            Opts::new("events_emitted_total", "Progress events emitted by kind"),
            &["kind"],
        )?;
        let queue_depth = IntGaugeVec::new(
            Opts::new("queue_depth", "Jobs waiting per stage queue"),
            &["stage"],
        )?;
        let job_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "job_duration_seconds",
                "Time a stage handler spent processing a claimed job",
            ),
            &["stage"],
        )?;
        let handler_errors_total = IntCounterVec::new(
            Opts::new(
                "handler_errors_total",
                "Stage handler failures by stage and error kind",
            ),
            &["stage", "kind"],
        )?;
        let jobs_enqueued_total = IntCounterVec::new(
            Opts::new("jobs_enqueued_total", "Jobs enqueued per stage"),
            &["stage"],
        )?;
        let jobs_completed_total = IntCounterVec::new(
            Opts::new("jobs_completed_total", "Jobs completed per stage"),
            &["stage"],
        )?;
        let jobs_failed_total = IntCounterVec::new(
            Opts::new(
                "jobs_failed_total",
                "Jobs moved to the failed archive per stage",
            ),
            &["stage"],
        )?;
        let idle_shutdowns_total = IntCounter::with_opts(Opts::new(
            "idle_shutdowns_total",
            "Worker processes that exited due to the idle supervisor",
        ))?;
        let sweeper_reclaims_total = IntCounter::with_opts(Opts::new(
            "sweeper_reclaims_total",
            "Jobs reclaimed by the deadline sweeper after a missed handler deadline",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(events_emitted_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(job_duration_seconds.clone()))?;
        registry.register(Box::new(handler_errors_total.clone()))?;
        registry.register(Box::new(jobs_enqueued_total.clone()))?;
        registry.register(Box::new(jobs_completed_total.clone()))?;
        registry.register(Box::new(jobs_failed_total.clone()))?;
        registry.register(Box::new(idle_shutdowns_total.clone()))?;
        registry.register(Box::new(sweeper_reclaims_total.clone()))?;

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                http_requests_total,
                events_emitted_total,
                queue_depth,
                job_duration_seconds,
                handler_errors_total,
                jobs_enqueued_total,
                jobs_completed_total,
                jobs_failed_total,
                idle_shutdowns_total,
                sweeper_reclaims_total,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Increment the emitted progress event counter for the specific event kind.
    pub fn inc_event(&self, event_kind: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_kind])
            .inc();
    }

    /// Set the queue depth gauge for a given stage.
    pub fn set_queue_depth(&self, stage: &str, depth: i64) {
        self.inner.queue_depth.with_label_values(&[stage]).set(depth);
    }

    /// Record how long a stage handler spent processing a claimed job.
    pub fn observe_job_duration(&self, stage: &str, duration: Duration) {
        self.inner
            .job_duration_seconds
            .with_label_values(&[stage])
            .observe(duration.as_secs_f64());
    }

    /// Increment the handler error counter for a stage and error kind.
    pub fn inc_handler_error(&self, stage: &str, kind: &str) {
        self.inner
            .handler_errors_total
            .with_label_values(&[stage, kind])
            .inc();
    }

    /// Increment the jobs-enqueued counter for a stage.
    pub fn inc_job_enqueued(&self, stage: &str) {
        self.inner
            .jobs_enqueued_total
            .with_label_values(&[stage])
            .inc();
    }

    /// Increment the jobs-completed counter for a stage.
    pub fn inc_job_completed(&self, stage: &str) {
        self.inner
            .jobs_completed_total
            .with_label_values(&[stage])
            .inc();
    }

    /// Increment the jobs-failed counter for a stage.
    pub fn inc_job_failed(&self, stage: &str) {
        self.inner
            .jobs_failed_total
            .with_label_values(&[stage])
            .inc();
    }

    /// Increment the idle-shutdown counter.
    pub fn inc_idle_shutdown(&self) {
        self.inner.idle_shutdowns_total.inc();
    }

    /// Increment the deadline-sweeper reclaim counter.
    pub fn inc_sweeper_reclaim(&self) {
        self.inner.sweeper_reclaims_total.inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the counters least suited to
    /// per-label Prometheus scraping (process-lifetime totals).
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            idle_shutdowns_total: self.inner.idle_shutdowns_total.get(),
            sweeper_reclaims_total: self.inner.sweeper_reclaims_total.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn duration_to_ms_saturates_on_large_values() {
        let duration = Duration::from_secs(u64::MAX / 2);
        assert_eq!(Metrics::duration_to_ms(duration), i64::MAX);
    }

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_http_request("/api/health", 200);
        metrics.inc_event("job_progress");
        metrics.set_queue_depth("transcription", 3);
        metrics.observe_job_duration("transcription", Duration::from_secs(12));
        metrics.inc_handler_error("summary", "transient_downstream");
        metrics.inc_job_enqueued("article");
        metrics.inc_job_completed("article");
        metrics.inc_job_failed("article");
        metrics.inc_idle_shutdown();
        metrics.inc_sweeper_reclaim();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.idle_shutdowns_total, 1);
        assert_eq!(snapshot.sweeper_reclaims_total, 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("queue_depth"));
        assert!(rendered.contains("job_duration_seconds"));
        assert!(rendered.contains("handler_errors_total"));
        Ok(())
    }
}
