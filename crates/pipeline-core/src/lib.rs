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
#![allow(unexpected_cfgs)]
#![allow(clippy::multiple_crate_versions)]

//! Engine-agnostic data model and collaborator interfaces shared across the
//! media enrichment pipeline workspace.

pub mod error;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pipeline_events::{Event, EventBus, StageKind};
use pipeline_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::{PipelineError, PipelineResult};
pub use pipeline_events::StageKind as JobType;

/// Default stage deadline: 30 minutes per job.
pub const DEFAULT_STAGE_DEADLINE: Duration = Duration::minutes(30);

/// Lifecycle status of a `Record`, mirroring the persisted column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    /// Upload completed; no processing has started.
    Uploaded,
    /// A stage handler currently owns the record.
    Processing,
    /// Transcription finished; summary not yet produced.
    Transcribed,
    /// Summary finished; article not yet produced.
    Summarized,
    /// All three stages finished successfully.
    Done,
    /// The last attempted stage failed.
    Error,
}

/// The step within `PROCESSING` a record is currently on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStep {
    /// Fetching the source object from the blob store.
    Download,
    /// Calling the speech adapter over decoded audio chunks.
    Transcription,
    /// Deriving a timestamped outline from the full transcript.
    Timestamps,
    /// Calling the LLM adapter for the paragraph summary.
    Summary,
    /// Calling the LLM adapter for the long-form article.
    Article,
}

/// The persistent unit of work corresponding to one uploaded media file and
/// its derived artifacts.
///
/// Terminal status `Done` implies all four artifacts are present and `error`
/// is `None`. A transition out of `Error` clears `error` and resets
/// `processing_step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Opaque stable identifier.
    pub id: Uuid,
    /// Original uploaded file name.
    pub file_name: String,
    /// Object-store key, when the upload went through the blob broker.
    pub file_key: Option<String>,
    /// Bucket the object was written to.
    pub bucket: Option<String>,
    /// Optional public URL, used as a fallback source when `file_key` is
    /// absent or the blob broker is unavailable.
    pub file_url: Option<String>,
    /// Current lifecycle status.
    pub status: RecordStatus,
    /// Current processing step, when `status == Processing`.
    pub processing_step: Option<ProcessingStep>,
    /// Completion percentage in `0..=100`.
    pub processing_progress: Option<u8>,
    /// Full transcript text, set once transcription succeeds.
    pub transcript_text: Option<String>,
    /// Timestamped outline, as a JSON array; `None` when the parser cascade
    /// could not extract a non-empty array.
    pub timestamps_json: Option<serde_json::Value>,
    /// Paragraph-style summary, set once summarization succeeds.
    pub summary_text: Option<String>,
    /// Long-form Markdown article, set once article generation succeeds.
    pub article_text: Option<String>,
    /// Last error message; `None` on success.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Soft-delete timestamp; soft-deleted records are invisible to listing
    /// and processing.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Whether this record is visible to listing and processing.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// The progress value the job-status endpoint should synthesize when no
    /// live queue entry exists for this record, per the status/progress
    /// guideline table.
    #[must_use]
    pub fn synthesized_progress(&self) -> u8 {
        match self.status {
            RecordStatus::Uploaded => 0,
            RecordStatus::Processing => self.processing_progress.unwrap_or(25),
            RecordStatus::Transcribed => self.processing_progress.unwrap_or(50),
            RecordStatus::Summarized => self.processing_progress.unwrap_or(75),
            RecordStatus::Done => 100,
            RecordStatus::Error => self.processing_progress.unwrap_or(0),
        }
    }
}

/// The queue payload carried between the durable queue and a stage handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, format `job-<hex>`, generated at enqueue.
    pub id: String,
    /// Which stage this job drives.
    pub job_type: JobType,
    /// Record this job operates on.
    pub record_id: Uuid,
    /// Object-store key carried for the handler, when known at enqueue time.
    pub file_key: Option<String>,
    /// 0-based attempt counter; incremented on each retry/sweep.
    pub attempt: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Deadline by which the stage must finish; `created_at + stage timeout`.
    pub processing_deadline: DateTime<Utc>,
    /// Derived at enqueue from file size; lower sorts sooner.
    pub priority: u8,
}

impl Job {
    /// Derive the enqueue priority from a known file size, per the blob
    /// broker's chunking policy: small files jump the queue.
    #[must_use]
    pub const fn priority_for_size(size_bytes: Option<u64>) -> u8 {
        const TEN_MIB: u64 = 10 * 1024 * 1024;
        const HUNDRED_MIB: u64 = 100 * 1024 * 1024;
        match size_bytes {
            Some(size) if size < TEN_MIB => 1,
            Some(size) if size < HUNDRED_MIB => 2,
            _ => 3,
        }
    }

    /// Generate a fresh job identifier in the `job-<hex>` format.
    #[must_use]
    pub fn new_id() -> String {
        format!("job-{:032x}", Uuid::new_v4().as_u128())
    }
}

/// Outcome of a single resolved upload, returned by the blob broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadTicket {
    /// A single presigned `PUT` is sufficient for the whole object.
    Single {
        /// Presigned PUT URL, valid for 1 hour.
        put_url: String,
        /// Object-store key assigned to the upload.
        key: String,
        /// Public URL, when the bucket is configured with one.
        public_url: Option<String>,
    },
    /// The object must be uploaded in parts via the S3 multipart API.
    Multipart {
        /// Object-store key assigned to the upload.
        key: String,
        /// Multipart upload identifier returned by the object store.
        upload_id: String,
        /// Presigned PUT URL per part, 1-indexed by position, valid for 24h.
        part_urls: Vec<String>,
        /// Presigned `CompleteMultipartUpload` URL, valid for 24h.
        complete_url: String,
        /// Presigned `AbortMultipartUpload` URL, valid for 24h.
        abort_url: String,
        /// Size in bytes of each part except possibly the last.
        part_size: u64,
        /// Public URL, when the bucket is configured with one.
        public_url: Option<String>,
    },
}

/// Mints and resolves presigned object-store access.
///
/// No retry happens inside the broker; retry is the caller's (worker's)
/// responsibility.
#[async_trait]
pub trait BlobBroker: Send + Sync {
    /// Mint an upload ticket for a new object. Chooses single-PUT or
    /// multipart based on `size` against the 50 MiB threshold.
    async fn mint_upload(
        &self,
        file_name: &str,
        content_type: &str,
        size: Option<u64>,
    ) -> PipelineResult<UploadTicket>;

    /// Mint a presigned `GET` URL for an existing key.
    async fn get_download_url(&self, key: &str, ttl: Duration) -> PipelineResult<String>;

    /// Fetch an object's full bytes into memory. Callers should prefer
    /// [`BlobBroker::fetch_to_file`] for large objects.
    async fn fetch(&self, key: &str) -> PipelineResult<Vec<u8>>;

    /// Stream an object directly to a file path without buffering it whole
    /// in memory. On storage failure, implementations fall back to an HTTP
    /// `GET` of `public_url` when one is known.
    async fn fetch_to_file(
        &self,
        key: &str,
        public_url: Option<&str>,
        path: &Path,
    ) -> PipelineResult<()>;
}

/// A page of [`Record`]s plus the total visible count, for `list`.
#[derive(Debug, Clone)]
pub struct RecordPage {
    /// Records on this page.
    pub records: Vec<Record>,
    /// Total count of non-deleted records.
    pub total: u64,
}

/// Typed persistence for `Record` entities with atomic, status-predicated
/// transitions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a new record in `Uploaded` status. Side effect of the
    /// upload-url endpoint.
    async fn create_uploaded(
        &self,
        file_name: &str,
        file_key: Option<&str>,
        bucket: Option<&str>,
        file_url: Option<&str>,
    ) -> PipelineResult<Record>;

    /// Begin processing. Succeeds only from `Uploaded` or `Error`; resets
    /// `step`, `progress`, and `error`.
    async fn start_processing(&self, id: Uuid) -> PipelineResult<Record>;

    /// Enter `Processing` for the handoff into `stage`, the worker-runtime
    /// counterpart of the "Set record.status = PROCESSING" step in the
    /// worker loop (spec.md §4.4 step 2). Unlike [`RecordStore::start_processing`],
    /// which is the API's entry point restricted to `Uploaded`/`Error`, this
    /// is predicate-gated on whichever statuses are valid immediately
    /// before `stage` runs: the prior stage's terminal status, `Error` (a
    /// step-targeted retry), or `Processing` itself (a sweeper-reclaimed job
    /// whose handler never got to commit, or the normal no-op case for
    /// transcription where the API already made this transition). Resets
    /// `step` to `None`, `progress` to 5, and clears `error`.
    async fn begin_stage(&self, id: Uuid, stage: JobType) -> PipelineResult<Record>;

    /// Overwrite `file_key`/`file_url` with a caller-supplied (re)processing
    /// override. Each argument that is `None` leaves the existing column
    /// untouched; passing both as `None` is a no-op read of the record.
    async fn set_source(
        &self,
        id: Uuid,
        file_key: Option<&str>,
        file_url: Option<&str>,
    ) -> PipelineResult<Record>;

    /// Bump progress within the current step. Progress is monotone within a
    /// step but may jump at step boundaries.
    async fn set_step(&self, id: Uuid, step: ProcessingStep, progress: u8) -> PipelineResult<()>;

    /// Persist the transcript and optional timestamp outline; transitions to
    /// `Transcribed`.
    async fn save_transcript(
        &self,
        id: Uuid,
        text: &str,
        timestamps_json: Option<serde_json::Value>,
    ) -> PipelineResult<()>;

    /// Persist the summary; transitions to `Summarized`.
    async fn save_summary(&self, id: Uuid, text: &str) -> PipelineResult<()>;

    /// Persist the article; transitions to `Done` at 100% progress.
    async fn save_article(&self, id: Uuid, text: &str) -> PipelineResult<()>;

    /// Record a terminal failure; transitions to `Error`.
    async fn record_error(
        &self,
        id: Uuid,
        message: &str,
        step: Option<ProcessingStep>,
    ) -> PipelineResult<()>;

    /// Hard-delete records older than `older_than` that never left
    /// `Uploaded`/`Processing`.
    async fn gc_stale_uploads(&self, older_than: Duration) -> PipelineResult<u64>;

    /// Fetch a single visible record.
    async fn get(&self, id: Uuid) -> PipelineResult<Option<Record>>;

    /// Fetch a page of visible records, most recent first.
    async fn list(&self, page: u32, page_size: u32) -> PipelineResult<RecordPage>;

    /// Count all visible records.
    async fn count(&self) -> PipelineResult<u64>;
}

/// Waiting/processing/delayed counts for one named queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueDepth {
    /// Jobs ready to be claimed.
    pub waiting: u64,
    /// Jobs currently claimed by a worker.
    pub processing: u64,
    /// Jobs scheduled for a delayed retry.
    pub delayed: u64,
}

impl QueueDepth {
    /// Total jobs the idle supervisor should consider "active".
    #[must_use]
    pub const fn total_active(&self) -> u64 {
        self.waiting + self.processing + self.delayed
    }
}

/// A point-in-time view of one job, wherever it currently lives, for the
/// job-status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// The job payload.
    pub job: Job,
    /// Which list the job currently occupies.
    pub state: JobState,
}

/// Which list within a queue a job currently occupies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to be claimed.
    Waiting,
    /// Claimed by a worker.
    Processing,
    /// Scheduled for a delayed retry.
    Delayed,
    /// Finished successfully and archived.
    Completed,
    /// Exhausted its retry budget and archived.
    Failed,
}

/// A named channel with five associated lists: waiting, processing, delayed,
/// completed, failed.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append to `waiting` (or schedule a `delayed` -> `waiting` transition
    /// after `delay`).
    async fn enqueue(&self, queue: &str, job: Job, delay: Option<Duration>) -> PipelineResult<()>;

    /// Atomically pop the highest-priority `waiting` entry and push it onto
    /// `processing`. Must be atomic against concurrent claimers.
    async fn claim(&self, queue: &str, worker_id: &str) -> PipelineResult<Option<Job>>;

    /// Remove from `processing`; append to `completed`, truncated to the
    /// last 100 entries.
    async fn complete(&self, queue: &str, job_id: &str) -> PipelineResult<()>;

    /// If `attempt + 1 <= max_attempts`, schedule a retry with exponential
    /// backoff; otherwise archive to `failed`.
    async fn fail(&self, queue: &str, job_id: &str, max_attempts: u32) -> PipelineResult<()>;

    /// Scan `processing`; requeue any job whose deadline plus grace has
    /// elapsed, incrementing `attempt`. Returns the count requeued.
    async fn sweep(&self, queue: &str, grace: Duration) -> PipelineResult<u64>;

    /// Current waiting/processing/delayed counts.
    async fn depth(&self, queue: &str) -> PipelineResult<QueueDepth>;

    /// Locate a job by id across every list in this queue, for status
    /// lookups.
    async fn find_job(&self, queue: &str, job_id: &str) -> PipelineResult<Option<JobSnapshot>>;
}

/// Small progress-reporting handle passed into stage handlers, standing in
/// for the source's callback-style progress hook.
#[derive(Clone)]
pub struct ProgressReporter {
    bus: Arc<EventBus>,
    metrics: Metrics,
    job_id: String,
    record_id: Uuid,
}

impl ProgressReporter {
    /// Construct a reporter bound to one job/record pair.
    #[must_use]
    pub fn new(bus: Arc<EventBus>, metrics: Metrics, job_id: String, record_id: Uuid) -> Self {
        Self {
            bus,
            metrics,
            job_id,
            record_id,
        }
    }

    /// Publish a progress update to the bus under `job:progress:<id>`.
    pub fn report(&self, progress: u8, status: &str, message: Option<&str>) {
        let event = Event::JobProgress {
            job_id: self.job_id.clone(),
            record_id: self.record_id,
            progress,
            status: status.to_string(),
            message: message.map(str::to_string),
        };
        self.metrics.inc_event(event.kind());
        self.bus.publish(event);
    }
}

/// Cooperative cancellation + progress handle threaded through a handler
/// invocation. Observable between any two suspension points inside a
/// handler (download, subprocess wait, adapter HTTP, DB/queue writes).
#[derive(Clone)]
pub struct StageContext {
    cancelled: Arc<AtomicBool>,
    /// Progress reporter bound to the job currently being handled.
    pub progress: ProgressReporter,
}

impl StageContext {
    /// Construct a context from a shared cancellation flag and reporter.
    #[must_use]
    pub const fn new(cancelled: Arc<AtomicBool>, progress: ProgressReporter) -> Self {
        Self {
            cancelled,
            progress,
        }
    }

    /// Whether the worker runtime has requested cancellation (shutdown or
    /// stage deadline).
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Return `Err(OperatorAbort)` if cancellation has been requested;
    /// handlers call this between suspension points.
    pub fn check_cancelled(&self, operation: &'static str) -> PipelineResult<()> {
        if self.is_cancelled() {
            return Err(PipelineError::OperatorAbort { operation });
        }
        Ok(())
    }
}

/// Pure per-stage business logic over an adapter interface: download,
/// decode, chunk, call AI, emit artifact.
///
/// All handlers are idempotent on `record_id`: re-running overwrites the
/// prior artifact for that stage.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Which stage/queue this handler services.
    fn stage(&self) -> StageKind;

    /// Execute the stage against `job`, reporting progress and honoring
    /// cancellation via `ctx`.
    async fn handle(&self, job: &Job, ctx: &StageContext) -> PipelineResult<()>;
}

/// External speech-to-text collaborator, fixed interface with a swappable
/// implementation (single-engine or multi-engine fan-out is an
/// implementation detail behind this trait).
#[async_trait]
pub trait SpeechAdapter: Send + Sync {
    /// Transcribe one audio chunk. `prompt` carries the honest-refusal and
    /// anti-confabulation instructions.
    async fn transcribe(&self, chunk_path: &Path, prompt: &str) -> PipelineResult<String>;
}

/// External summarization/article-generation LLM collaborator.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Run one completion call against `model` with `prompt`, returning the
    /// raw text response.
    async fn complete(&self, model: &str, prompt: &str) -> PipelineResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_bands_match_size_thresholds() {
        assert_eq!(Job::priority_for_size(Some(1024)), 1);
        assert_eq!(Job::priority_for_size(Some(9 * 1024 * 1024)), 1);
        assert_eq!(Job::priority_for_size(Some(10 * 1024 * 1024)), 2);
        assert_eq!(Job::priority_for_size(Some(99 * 1024 * 1024)), 2);
        assert_eq!(Job::priority_for_size(Some(100 * 1024 * 1024)), 3);
        assert_eq!(Job::priority_for_size(None), 3);
    }

    #[test]
    fn job_ids_are_unique_and_prefixed() {
        let a = Job::new_id();
        let b = Job::new_id();
        assert_ne!(a, b);
        assert!(a.starts_with("job-"));
    }

    #[test]
    fn synthesized_progress_follows_status_table() {
        let mut record = sample_record();
        record.status = RecordStatus::Uploaded;
        assert_eq!(record.synthesized_progress(), 0);

        record.status = RecordStatus::Processing;
        record.processing_progress = None;
        assert_eq!(record.synthesized_progress(), 25);

        record.status = RecordStatus::Transcribed;
        record.processing_progress = Some(60);
        assert_eq!(record.synthesized_progress(), 60);

        record.status = RecordStatus::Done;
        assert_eq!(record.synthesized_progress(), 100);
    }

    #[test]
    fn queue_depth_total_active_sums_three_lists() {
        let depth = QueueDepth {
            waiting: 2,
            processing: 1,
            delayed: 3,
        };
        assert_eq!(depth.total_active(), 6);
    }

    #[test]
    fn stage_context_reports_cancellation() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let bus = Arc::new(EventBus::with_capacity(4));
        let metrics = Metrics::new().expect("metrics register");
        let reporter = ProgressReporter::new(bus, metrics, "job-1".to_string(), Uuid::nil());
        let ctx = StageContext::new(cancelled.clone(), reporter);
        assert!(ctx.check_cancelled("test").is_ok());
        cancelled.store(true, Ordering::Relaxed);
        assert!(ctx.check_cancelled("test").is_err());
    }

    fn sample_record() -> Record {
        Record {
            id: Uuid::new_v4(),
            file_name: "demo.wav".to_string(),
            file_key: Some("uploads/demo.wav".to_string()),
            bucket: Some("media".to_string()),
            file_url: None,
            status: RecordStatus::Uploaded,
            processing_step: None,
            processing_progress: None,
            transcript_text: None,
            timestamps_json: None,
            summary_text: None,
            article_text: None,
            error: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }
}
