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
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]
#![allow(unexpected_cfgs)]

//! Stage worker runtime, deadline sweeper, and idle supervisor.
//!
//! [`StageWorker`] claims jobs from one stage's durable queue and drives them
//! through a [`StageHandler`], translating the handler's outcome into the
//! queue/store transitions the rest of the system observes. [`DeadlineSweeper`]
//! periodically reclaims jobs whose handler never finished in time.
//! [`IdleSupervisor`] watches aggregate queue depth and requests a cooperative
//! shutdown once a worker process has been idle past its configured timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration as StdDuration, Instant};

use chrono::Duration;
use pipeline_core::{
    JobQueue, JobType, PipelineError, ProgressReporter, RecordStore, StageContext, StageHandler,
};
use pipeline_events::{Event, EventBus};
use pipeline_telemetry::Metrics;
use tokio::sync::watch;
use tracing::{info, warn};

/// Tunables for one [`StageWorker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent claim loops to run for this stage.
    pub concurrency: u32,
    /// Wall-clock budget given to a single handler invocation.
    pub stage_deadline: Duration,
    /// How long to sleep between empty claims before polling again.
    pub poll_interval: StdDuration,
    /// Maximum attempts (including the first) before a job is archived failed.
    pub max_attempts: u32,
}

/// Drives one stage's queue: claims jobs, invokes the handler, and reconciles
/// the outcome against the store and queue.
pub struct StageWorker {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn RecordStore>,
    handler: Arc<dyn StageHandler>,
    bus: Arc<EventBus>,
    metrics: Metrics,
    config: WorkerConfig,
    last_activity: Arc<AtomicI64>,
}

impl StageWorker {
    /// Construct a worker for `handler`'s stage, wired to its collaborators.
    #[must_use]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn RecordStore>,
        handler: Arc<dyn StageHandler>,
        bus: Arc<EventBus>,
        metrics: Metrics,
        config: WorkerConfig,
        last_activity: Arc<AtomicI64>,
    ) -> Self {
        Self {
            queue,
            store,
            handler,
            bus,
            metrics,
            config,
            last_activity,
        }
    }

    /// Spawn `config.concurrency` claim loops, returning once every loop has
    /// observed `shutdown` and drained.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut loops = Vec::with_capacity(self.config.concurrency as usize);
        for worker_index in 0..self.config.concurrency {
            let worker = Arc::clone(&self);
            let worker_id = format!("{}-{worker_index}", self.handler.stage().queue_name());
            let mut shutdown = shutdown.clone();
            loops.push(tokio::spawn(async move {
                worker.claim_loop(&worker_id, &mut shutdown).await;
            }));
        }
        for handle in loops {
            if let Err(err) = handle.await {
                warn!(error = %err, "stage worker claim loop panicked");
            }
        }
    }

    async fn claim_loop(&self, worker_id: &str, shutdown: &mut watch::Receiver<bool>) {
        let queue_name = self.handler.stage().queue_name();
        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.queue.claim(queue_name, worker_id).await {
                Ok(Some(job)) => {
                    self.touch_activity();
                    self.process_claimed(job, shutdown).await;
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(stage = queue_name, error = %err, "failed to claim job");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    async fn process_claimed(
        &self,
        job: pipeline_core::Job,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let queue_name = self.handler.stage().queue_name();
        let stage_label = queue_name;

        let record = match self.store.begin_stage(job.record_id, self.handler.stage()).await {
            Ok(record) => record,
            Err(PipelineError::StaleState { record_id }) => {
                info!(record_id = %record_id, stage = stage_label, "lost predicate race, yielding job silently");
                let _ = self.queue.complete(queue_name, &job.id).await;
                return;
            }
            Err(err) => {
                warn!(stage = stage_label, job_id = %job.id, error = %err, "begin_stage failed, leaving job for the sweeper");
                return;
            }
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let reporter = ProgressReporter::new(
            Arc::clone(&self.bus),
            self.metrics.clone(),
            job.id.clone(),
            record.id,
        );
        let ctx = StageContext::new(Arc::clone(&cancelled), reporter);

        let handler_future = self.handler.handle(&job, &ctx);
        let deadline = self
            .config
            .stage_deadline
            .to_std()
            .unwrap_or(StdDuration::from_secs(30 * 60));

        let started = Instant::now();
        let outcome = tokio::select! {
            result = tokio::time::timeout(deadline, handler_future) => result,
            _ = shutdown.changed() => {
                cancelled.store(true, Ordering::Relaxed);
                info!(job_id = %job.id, stage = stage_label, "shutdown requested mid-job, leaving for sweeper");
                return;
            }
        };
        self.metrics
            .observe_job_duration(stage_label, started.elapsed());
        self.touch_activity();

        match outcome {
            Ok(Ok(())) => {
                let _ = self.queue.complete(queue_name, &job.id).await;
                let event = Event::JobCompleted {
                    job_id: job.id.clone(),
                    record_id: job.record_id,
                    stage: self.handler.stage(),
                };
                self.metrics.inc_event(event.kind());
                self.bus.publish(event);
                self.metrics.inc_job_completed(stage_label);
            }
            Ok(Err(PipelineError::OperatorAbort { operation })) => {
                info!(job_id = %job.id, operation, "handler observed cooperative cancellation");
            }
            Ok(Err(PipelineError::Fatal { detail })) => {
                tracing::error!(job_id = %job.id, stage = stage_label, detail, "fatal invariant violation, exiting process");
                std::process::exit(1);
            }
            Ok(Err(err)) => self.fail_job(&job, queue_name, stage_label, &err).await,
            Err(_elapsed) => {
                let timeout_err = std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "stage deadline exceeded",
                );
                let err = PipelineError::transient("handler.stage_deadline", timeout_err);
                self.fail_job(&job, queue_name, stage_label, &err).await;
            }
        }
    }

    async fn fail_job(
        &self,
        job: &pipeline_core::Job,
        queue_name: &str,
        stage_label: &str,
        err: &PipelineError,
    ) {
        let step = self.handler.stage().failing_step();
        if let Err(store_err) = self.store.record_error(job.record_id, &err.to_string(), step).await {
            warn!(record_id = %job.record_id, error = %store_err, "failed to record handler error on record");
        }
        let _ = self
            .queue
            .fail(queue_name, &job.id, self.config.max_attempts)
            .await;
        let event = Event::JobFailed {
            job_id: job.id.clone(),
            record_id: job.record_id,
            stage: self.handler.stage(),
            message: err.to_string(),
        };
        self.metrics.inc_event(event.kind());
        self.bus.publish(event);
        self.metrics.inc_handler_error(stage_label, error_kind(err));
        self.metrics.inc_job_failed(stage_label);
    }

    fn touch_activity(&self) {
        self.last_activity
            .store(now_millis(), Ordering::Relaxed);
    }
}

/// Extension mapping a stage to the [`pipeline_core::ProcessingStep`] it was
/// on when it failed, for [`RecordStore::record_error`].
trait StageFailingStep {
    /// The processing step to attribute a failure of this stage to.
    fn failing_step(self) -> Option<pipeline_core::ProcessingStep>;
}

impl StageFailingStep for JobType {
    fn failing_step(self) -> Option<pipeline_core::ProcessingStep> {
        match self {
            Self::Transcription => Some(pipeline_core::ProcessingStep::Transcription),
            Self::Summary => Some(pipeline_core::ProcessingStep::Summary),
            Self::Article => Some(pipeline_core::ProcessingStep::Article),
        }
    }
}

fn error_kind(err: &PipelineError) -> &'static str {
    match err {
        PipelineError::TransientDownstream { .. } => "transient_downstream",
        PipelineError::PoisonInput { .. } => "poison_input",
        PipelineError::MissingPrerequisite { .. } => "missing_prerequisite",
        PipelineError::Hallucination { .. } => "hallucination",
        PipelineError::StaleState { .. } => "stale_state",
        PipelineError::OperatorAbort { .. } => "operator_abort",
        PipelineError::Fatal { .. } => "fatal",
        PipelineError::NotFound { .. } => "not_found",
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Periodically reclaims jobs stuck in `processing` past their deadline plus
/// a grace window, across every stage queue.
pub struct DeadlineSweeper {
    queue: Arc<dyn JobQueue>,
    metrics: Metrics,
    interval: StdDuration,
    grace: Duration,
}

impl DeadlineSweeper {
    /// Construct a sweeper covering all three stage queues.
    #[must_use]
    pub const fn new(
        queue: Arc<dyn JobQueue>,
        metrics: Metrics,
        interval: StdDuration,
        grace: Duration,
    ) -> Self {
        Self {
            queue,
            metrics,
            interval,
            grace,
        }
    }

    /// Run the sweep loop until `shutdown` is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        const STAGES: [JobType; 3] = [
            JobType::Transcription,
            JobType::Summary,
            JobType::Article,
        ];

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
            if *shutdown.borrow() {
                return;
            }

            for stage in STAGES {
                match self.queue.sweep(stage.queue_name(), self.grace).await {
                    Ok(0) => {}
                    Ok(reclaimed) => {
                        info!(stage = stage.queue_name(), reclaimed, "deadline sweeper reclaimed stuck jobs");
                        for _ in 0..reclaimed {
                            self.metrics.inc_sweeper_reclaim();
                        }
                    }
                    Err(err) => warn!(stage = stage.queue_name(), error = %err, "deadline sweep failed"),
                }
            }
        }
    }
}

/// Watches aggregate queue depth and process idle time, triggering a
/// cooperative shutdown once both the queues are empty and the idle timeout
/// has elapsed. Never fires while a job is in flight, since an in-flight job
/// keeps a `processing` entry and `total_active()` stays above zero.
pub struct IdleSupervisor {
    queue: Arc<dyn JobQueue>,
    metrics: Metrics,
    last_activity: Arc<AtomicI64>,
    check_interval: StdDuration,
    idle_timeout: StdDuration,
    shutdown: watch::Sender<bool>,
}

impl IdleSupervisor {
    /// Construct a supervisor sharing `last_activity` with the stage workers
    /// it watches, and the `shutdown` sender workers subscribe to.
    #[must_use]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        metrics: Metrics,
        last_activity: Arc<AtomicI64>,
        check_interval: StdDuration,
        idle_timeout: StdDuration,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            queue,
            metrics,
            last_activity,
            check_interval,
            idle_timeout,
            shutdown,
        }
    }

    /// Run the idle check loop until shutdown is requested (by this
    /// supervisor or externally).
    pub async fn run(self) {
        const STAGES: [JobType; 3] = [
            JobType::Transcription,
            JobType::Summary,
            JobType::Article,
        ];
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.check_interval) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
            }
            if *shutdown_rx.borrow() {
                return;
            }

            let mut total_active = 0u64;
            for stage in STAGES {
                match self.queue.depth(stage.queue_name()).await {
                    Ok(depth) => {
                        #[allow(clippy::cast_possible_wrap)]
                        self.metrics.set_queue_depth(stage.queue_name(), depth.total_active() as i64);
                        total_active += depth.total_active();
                    }
                    Err(err) => {
                        warn!(stage = stage.queue_name(), error = %err, "idle supervisor depth check failed");
                        total_active += 1;
                    }
                }
            }

            if total_active > 0 {
                continue;
            }

            let idle_for = now_millis().saturating_sub(self.last_activity.load(Ordering::Relaxed));
            #[allow(clippy::cast_possible_wrap)]
            let threshold_ms = self.idle_timeout.as_millis() as i64;
            if idle_for >= threshold_ms {
                info!(idle_for_ms = idle_for, "idle timeout elapsed with empty queues, requesting shutdown");
                self.metrics.inc_idle_shutdown();
                let _ = self.shutdown.send(true);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pipeline_core::{Job, PipelineResult};
    use pipeline_test_support::{InMemoryJobQueue, InMemoryRecordStore, sample_job, sample_record};
    use uuid::Uuid;

    struct EchoHandler {
        stage: JobType,
        fail_once: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl StageHandler for EchoHandler {
        fn stage(&self) -> JobType {
            self.stage
        }

        async fn handle(&self, _job: &Job, ctx: &StageContext) -> PipelineResult<()> {
            ctx.progress.report(50, "working", None);
            if self.fail_once.swap(false, Ordering::SeqCst) {
                return Err(PipelineError::poison("synthetic failure"));
            }
            Ok(())
        }
    }

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 1,
            stage_deadline: Duration::seconds(5),
            poll_interval: StdDuration::from_millis(5),
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn successful_job_is_completed_and_published() {
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
        let store = Arc::new(InMemoryRecordStore::new());
        let mut record = sample_record();
        record.status = pipeline_core::RecordStatus::Uploaded;
        let record_id = store.insert(record);

        let handler = Arc::new(EchoHandler {
            stage: JobType::Transcription,
            fail_once: std::sync::atomic::AtomicBool::new(false),
        });
        let bus = Arc::new(EventBus::with_capacity(16));
        let metrics = Metrics::new().expect("metrics register");
        let last_activity = Arc::new(AtomicI64::new(now_millis()));

        let worker = Arc::new(StageWorker::new(
            Arc::clone(&queue),
            store.clone() as Arc<dyn RecordStore>,
            handler,
            Arc::clone(&bus),
            metrics,
            worker_config(),
            last_activity,
        ));

        queue
            .enqueue(
                JobType::Transcription.queue_name(),
                sample_job(JobType::Transcription, record_id),
                None,
            )
            .await
            .expect("enqueue");

        let (tx, rx) = watch::channel(false);
        let run_handle = tokio::spawn(worker.run(rx));
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let _ = tx.send(true);
        run_handle.await.expect("worker task");

        let depth = queue
            .depth(JobType::Transcription.queue_name())
            .await
            .expect("depth");
        assert_eq!(depth.total_active(), 0);
    }

    #[tokio::test]
    async fn failed_job_is_reflected_on_the_record() {
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
        let store = Arc::new(InMemoryRecordStore::new());
        let mut record = sample_record();
        record.status = pipeline_core::RecordStatus::Uploaded;
        let record_id = store.insert(record);

        let handler = Arc::new(EchoHandler {
            stage: JobType::Transcription,
            fail_once: std::sync::atomic::AtomicBool::new(true),
        });
        let bus = Arc::new(EventBus::with_capacity(16));
        let metrics = Metrics::new().expect("metrics register");
        let last_activity = Arc::new(AtomicI64::new(now_millis()));

        let mut config = worker_config();
        config.max_attempts = 1;

        let worker = Arc::new(StageWorker::new(
            Arc::clone(&queue),
            store.clone() as Arc<dyn RecordStore>,
            handler,
            bus,
            metrics,
            config,
            last_activity,
        ));

        queue
            .enqueue(
                JobType::Transcription.queue_name(),
                sample_job(JobType::Transcription, record_id),
                None,
            )
            .await
            .expect("enqueue");

        let (tx, rx) = watch::channel(false);
        let run_handle = tokio::spawn(worker.run(rx));
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let _ = tx.send(true);
        run_handle.await.expect("worker task");

        let stored = store.get(record_id).await.expect("get").expect("present");
        assert_eq!(stored.status, pipeline_core::RecordStatus::Error);
        assert!(stored.error.is_some());
    }

    #[tokio::test]
    async fn idle_supervisor_requests_shutdown_once_queues_drain() {
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
        let metrics = Metrics::new().expect("metrics register");
        let last_activity = Arc::new(AtomicI64::new(now_millis() - 10_000));
        let (tx, mut rx) = watch::channel(false);

        let supervisor = IdleSupervisor::new(
            queue,
            metrics,
            last_activity,
            StdDuration::from_millis(5),
            StdDuration::from_millis(1),
            tx,
        );

        tokio::time::timeout(StdDuration::from_secs(1), supervisor.run())
            .await
            .expect("supervisor should shut down promptly");
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn deadline_sweeper_reclaims_and_counts() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let record_id = Uuid::new_v4();
        let mut job = sample_job(JobType::Transcription, record_id);
        job.processing_deadline = chrono::Utc::now() - Duration::hours(3);
        queue
            .enqueue(JobType::Transcription.queue_name(), job, None)
            .await
            .expect("enqueue");
        queue
            .claim(JobType::Transcription.queue_name(), "w1")
            .await
            .expect("claim");

        let metrics = Metrics::new().expect("metrics register");
        let sweeper = DeadlineSweeper::new(
            queue.clone(),
            metrics,
            StdDuration::from_millis(5),
            Duration::hours(2),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sweeper.run(rx));
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        let _ = tx.send(true);
        handle.await.expect("sweeper task");

        let depth = queue
            .depth(JobType::Transcription.queue_name())
            .await
            .expect("depth");
        assert_eq!(depth.waiting, 1);
    }
}
