//! In-memory [`RecordStore`]/[`JobQueue`]/[`BlobBroker`] doubles and fixture
//! builders, so handler and worker tests can run without Postgres, Redis, or
//! object storage, mirroring the predicate-gated semantics of the real
//! `sqlx`/`redis`/`aws-sdk-s3`-backed implementations closely enough to
//! exercise the same invariants.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pipeline_core::{
    Job, JobQueue, JobSnapshot, JobState, JobType, PipelineError, PipelineResult, ProcessingStep,
    QueueDepth, Record, RecordPage, RecordStatus, RecordStore,
};
use uuid::Uuid;

/// Build a fresh `Uploaded` record with placeholder fields, for tests that
/// need a realistic starting point without going through a real store.
#[must_use]
pub fn sample_record() -> Record {
    Record {
        id: Uuid::new_v4(),
        file_name: "sample.wav".to_string(),
        file_key: Some("uploads/sample.wav".to_string()),
        bucket: Some("media".to_string()),
        file_url: None,
        status: RecordStatus::Uploaded,
        processing_step: None,
        processing_progress: Some(0),
        transcript_text: None,
        timestamps_json: None,
        summary_text: None,
        article_text: None,
        error: None,
        created_at: Utc::now(),
        deleted_at: None,
    }
}

/// Build a fresh job for `stage` targeting `record_id`, with a 30 minute
/// deadline and default priority.
#[must_use]
pub fn sample_job(stage: JobType, record_id: Uuid) -> Job {
    Job {
        id: Job::new_id(),
        job_type: stage,
        record_id,
        file_key: None,
        attempt: 0,
        created_at: Utc::now(),
        processing_deadline: Utc::now() + Duration::minutes(30),
        priority: 2,
    }
}

/// An in-memory [`RecordStore`] enforcing the same status predicates as the
/// Postgres-backed implementation.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<Uuid, Record>>,
}

impl InMemoryRecordStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a record, returning its id.
    pub fn insert(&self, record: Record) -> Uuid {
        let id = record.id;
        self.records.lock().unwrap_or_else(|e| e.into_inner()).insert(id, record);
        id
    }

    fn with_record<T>(
        &self,
        id: Uuid,
        predicate: impl FnOnce(&RecordStatus) -> bool,
        mutate: impl FnOnce(&mut Record) -> T,
    ) -> PipelineResult<T> {
        let mut guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        match guard.get_mut(&id) {
            Some(record) if record.deleted_at.is_none() && predicate(&record.status) => {
                Ok(mutate(record))
            }
            Some(record) if record.deleted_at.is_none() => {
                Err(PipelineError::StaleState { record_id: record.id })
            }
            _ => Err(PipelineError::NotFound { record_id: id }),
        }
    }
}

fn allowed_prior_for_stage(stage: JobType, status: &RecordStatus) -> bool {
    let prior_ok = match stage {
        JobType::Transcription => matches!(status, RecordStatus::Uploaded),
        JobType::Summary => matches!(status, RecordStatus::Transcribed),
        JobType::Article => matches!(status, RecordStatus::Summarized),
    };
    prior_ok || matches!(status, RecordStatus::Error | RecordStatus::Processing)
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_uploaded(
        &self,
        file_name: &str,
        file_key: Option<&str>,
        bucket: Option<&str>,
        file_url: Option<&str>,
    ) -> PipelineResult<Record> {
        let record = Record {
            id: Uuid::new_v4(),
            file_name: file_name.to_string(),
            file_key: file_key.map(str::to_string),
            bucket: bucket.map(str::to_string),
            file_url: file_url.map(str::to_string),
            status: RecordStatus::Uploaded,
            processing_step: None,
            processing_progress: Some(0),
            transcript_text: None,
            timestamps_json: None,
            summary_text: None,
            article_text: None,
            error: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.insert(record.clone());
        Ok(record)
    }

    async fn start_processing(&self, id: Uuid) -> PipelineResult<Record> {
        self.with_record(
            id,
            |status| matches!(status, RecordStatus::Uploaded | RecordStatus::Error),
            |record| {
                record.status = RecordStatus::Processing;
                record.processing_step = None;
                record.processing_progress = Some(0);
                record.error = None;
                record.clone()
            },
        )
    }

    async fn begin_stage(&self, id: Uuid, stage: JobType) -> PipelineResult<Record> {
        self.with_record(
            id,
            |status| allowed_prior_for_stage(stage, status),
            |record| {
                record.status = RecordStatus::Processing;
                record.processing_step = None;
                record.processing_progress = Some(5);
                record.error = None;
                record.clone()
            },
        )
    }

    async fn set_source(
        &self,
        id: Uuid,
        file_key: Option<&str>,
        file_url: Option<&str>,
    ) -> PipelineResult<Record> {
        self.with_record(id, |_| true, |record| {
            if let Some(file_key) = file_key {
                record.file_key = Some(file_key.to_string());
            }
            if let Some(file_url) = file_url {
                record.file_url = Some(file_url.to_string());
            }
            record.clone()
        })
    }

    async fn set_step(&self, id: Uuid, step: ProcessingStep, progress: u8) -> PipelineResult<()> {
        self.with_record(
            id,
            |status| matches!(status, RecordStatus::Processing),
            |record| {
                record.processing_step = Some(step);
                record.processing_progress = Some(progress);
            },
        )
    }

    async fn save_transcript(
        &self,
        id: Uuid,
        text: &str,
        timestamps_json: Option<serde_json::Value>,
    ) -> PipelineResult<()> {
        self.with_record(
            id,
            |status| matches!(status, RecordStatus::Processing),
            |record| {
                record.status = RecordStatus::Transcribed;
                record.transcript_text = Some(text.to_string());
                record.timestamps_json = timestamps_json;
                record.processing_step = None;
                record.processing_progress = Some(100);
            },
        )
    }

    async fn save_summary(&self, id: Uuid, text: &str) -> PipelineResult<()> {
        self.with_record(
            id,
            |status| matches!(status, RecordStatus::Processing),
            |record| {
                record.status = RecordStatus::Summarized;
                record.summary_text = Some(text.to_string());
                record.processing_step = None;
                record.processing_progress = Some(100);
            },
        )
    }

    async fn save_article(&self, id: Uuid, text: &str) -> PipelineResult<()> {
        self.with_record(
            id,
            |status| matches!(status, RecordStatus::Processing),
            |record| {
                record.status = RecordStatus::Done;
                record.article_text = Some(text.to_string());
                record.processing_step = None;
                record.processing_progress = Some(100);
            },
        )
    }

    async fn record_error(
        &self,
        id: Uuid,
        message: &str,
        step: Option<ProcessingStep>,
    ) -> PipelineResult<()> {
        self.with_record(
            id,
            |status| matches!(status, RecordStatus::Processing),
            |record| {
                record.status = RecordStatus::Error;
                record.error = Some(message.to_string());
                record.processing_step = step;
            },
        )
    }

    async fn gc_stale_uploads(&self, older_than: Duration) -> PipelineResult<u64> {
        let cutoff = Utc::now() - older_than;
        let mut guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        guard.retain(|_, record| {
            let stale = matches!(
                record.status,
                RecordStatus::Uploaded | RecordStatus::Processing
            ) && record.created_at < cutoff;
            !stale
        });
        Ok((before - guard.len()) as u64)
    }

    async fn get(&self, id: Uuid) -> PipelineResult<Option<Record>> {
        let guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard
            .get(&id)
            .filter(|record| record.deleted_at.is_none())
            .cloned())
    }

    async fn list(&self, page: u32, page_size: u32) -> PipelineResult<RecordPage> {
        let guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<Record> = guard
            .values()
            .filter(|record| record.deleted_at.is_none())
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = records.len() as u64;
        let start = (page as usize) * (page_size.max(1) as usize);
        let page_records = records
            .into_iter()
            .skip(start)
            .take(page_size.max(1) as usize)
            .collect();
        Ok(RecordPage {
            records: page_records,
            total,
        })
    }

    async fn count(&self) -> PipelineResult<u64> {
        let guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.values().filter(|r| r.deleted_at.is_none()).count() as u64)
    }
}

#[derive(Default)]
struct QueueLists {
    waiting: Vec<Job>,
    processing: HashMap<String, Job>,
    delayed: Vec<(DateTime<Utc>, Job)>,
    completed: Vec<Job>,
    failed: Vec<Job>,
}

/// An in-memory [`JobQueue`] with the same five-list shape and retry/backoff
/// semantics as the Redis-backed implementation, minus real persistence.
#[derive(Default)]
pub struct InMemoryJobQueue {
    queues: Mutex<HashMap<String, QueueLists>>,
}

impl InMemoryJobQueue {
    /// Construct an empty in-memory queue set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn promote_due_delayed(lists: &mut QueueLists) {
        let now = Utc::now();
        let (due, pending): (Vec<_>, Vec<_>) =
            lists.delayed.drain(..).partition(|(at, _)| *at <= now);
        lists.delayed = pending;
        for (_, job) in due {
            lists.waiting.push(job);
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, queue: &str, job: Job, delay: Option<Duration>) -> PipelineResult<()> {
        let mut guard = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let lists = guard.entry(queue.to_string()).or_default();
        match delay {
            Some(delay) if delay > Duration::zero() => {
                lists.delayed.push((Utc::now() + delay, job));
            }
            _ => lists.waiting.push(job),
        }
        Ok(())
    }

    async fn claim(&self, queue: &str, _worker_id: &str) -> PipelineResult<Option<Job>> {
        let mut guard = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let lists = guard.entry(queue.to_string()).or_default();
        Self::promote_due_delayed(lists);
        if lists.waiting.is_empty() {
            return Ok(None);
        }
        let mut best_idx = 0usize;
        for idx in 1..lists.waiting.len() {
            let candidate = &lists.waiting[idx];
            let current_best = &lists.waiting[best_idx];
            let better = candidate
                .priority
                .cmp(&current_best.priority)
                .then(candidate.created_at.cmp(&current_best.created_at))
                == std::cmp::Ordering::Less;
            if better {
                best_idx = idx;
            }
        }
        let job = lists.waiting.remove(best_idx);
        lists.processing.insert(job.id.clone(), job.clone());
        Ok(Some(job))
    }

    async fn complete(&self, queue: &str, job_id: &str) -> PipelineResult<()> {
        let mut guard = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let lists = guard.entry(queue.to_string()).or_default();
        if let Some(job) = lists.processing.remove(job_id) {
            lists.completed.push(job);
            if lists.completed.len() > 100 {
                lists.completed.remove(0);
            }
        }
        Ok(())
    }

    async fn fail(&self, queue: &str, job_id: &str, max_attempts: u32) -> PipelineResult<()> {
        let mut guard = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let lists = guard.entry(queue.to_string()).or_default();
        let Some(mut job) = lists.processing.remove(job_id) else {
            return Ok(());
        };
        if job.attempt + 1 <= max_attempts {
            let backoff = Duration::seconds(2i64.saturating_pow(job.attempt).min(300));
            job.attempt += 1;
            lists.delayed.push((Utc::now() + backoff, job));
        } else {
            lists.failed.push(job);
        }
        Ok(())
    }

    async fn sweep(&self, queue: &str, grace: Duration) -> PipelineResult<u64> {
        let mut guard = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let lists = guard.entry(queue.to_string()).or_default();
        let now = Utc::now();
        let mut reclaimed = 0u64;
        let mut stuck: Vec<String> = Vec::new();
        for (id, job) in &lists.processing {
            if job.processing_deadline + grace < now {
                stuck.push(id.clone());
            }
        }
        for id in stuck {
            if let Some(mut job) = lists.processing.remove(&id) {
                job.attempt += 1;
                lists.waiting.push(job);
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn depth(&self, queue: &str) -> PipelineResult<QueueDepth> {
        let mut guard = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let lists = guard.entry(queue.to_string()).or_default();
        Ok(QueueDepth {
            waiting: lists.waiting.len() as u64,
            processing: lists.processing.len() as u64,
            delayed: lists.delayed.len() as u64,
        })
    }

    async fn find_job(&self, queue: &str, job_id: &str) -> PipelineResult<Option<JobSnapshot>> {
        let guard = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let Some(lists) = guard.get(queue) else {
            return Ok(None);
        };
        if let Some(job) = lists.processing.get(job_id) {
            return Ok(Some(JobSnapshot {
                job: job.clone(),
                state: JobState::Processing,
            }));
        }
        if let Some(job) = lists.waiting.iter().find(|job| job.id == job_id) {
            return Ok(Some(JobSnapshot {
                job: job.clone(),
                state: JobState::Waiting,
            }));
        }
        if let Some((_, job)) = lists.delayed.iter().find(|(_, job)| job.id == job_id) {
            return Ok(Some(JobSnapshot {
                job: job.clone(),
                state: JobState::Delayed,
            }));
        }
        if let Some(job) = lists.completed.iter().find(|job| job.id == job_id) {
            return Ok(Some(JobSnapshot {
                job: job.clone(),
                state: JobState::Completed,
            }));
        }
        if let Some(job) = lists.failed.iter().find(|job| job.id == job_id) {
            return Ok(Some(JobSnapshot {
                job: job.clone(),
                state: JobState::Failed,
            }));
        }
        Ok(None)
    }
}

/// An in-memory [`BlobBroker`] returning deterministic fake URLs, for
/// handler/API tests that need a broker but never touch real object
/// storage.
#[derive(Default)]
pub struct InMemoryBlobBroker {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobBroker {
    /// Construct an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object's bytes under `key`, for tests that exercise fetch.
    pub fn seed(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.objects
            .lock()
            .expect("object map mutex poisoned")
            .insert(key.into(), bytes);
    }
}

#[async_trait]
impl pipeline_core::BlobBroker for InMemoryBlobBroker {
    async fn mint_upload(
        &self,
        file_name: &str,
        _content_type: &str,
        _size: Option<u64>,
    ) -> PipelineResult<pipeline_core::UploadTicket> {
        let key = format!("uploads/{}-{file_name}", Uuid::new_v4());
        Ok(pipeline_core::UploadTicket::Single {
            put_url: format!("https://test-storage.invalid/put/{key}"),
            key,
            public_url: None,
        })
    }

    async fn get_download_url(&self, key: &str, _ttl: Duration) -> PipelineResult<String> {
        Ok(format!("https://test-storage.invalid/get/{key}"))
    }

    async fn fetch(&self, key: &str) -> PipelineResult<Vec<u8>> {
        self.objects
            .lock()
            .expect("object map mutex poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound {
                record_id: Uuid::nil(),
            })
    }

    async fn fetch_to_file(
        &self,
        key: &str,
        _public_url: Option<&str>,
        path: &std::path::Path,
    ) -> PipelineResult<()> {
        let bytes = self.fetch(key).await?;
        std::fs::write(path, bytes)
            .map_err(|err| PipelineError::transient("blob_broker.fetch_to_file", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_processing_rejects_from_transcribed() {
        let store = InMemoryRecordStore::new();
        let mut record = sample_record();
        record.status = RecordStatus::Transcribed;
        let id = store.insert(record);
        assert!(store.start_processing(id).await.is_err());
    }

    #[tokio::test]
    async fn begin_stage_allows_prior_terminal_status() {
        let store = InMemoryRecordStore::new();
        let mut record = sample_record();
        record.status = RecordStatus::Transcribed;
        let id = store.insert(record);
        let resumed = store.begin_stage(id, JobType::Summary).await.unwrap();
        assert_eq!(resumed.status, RecordStatus::Processing);
    }

    #[tokio::test]
    async fn claim_pops_highest_priority_first() {
        let queue = InMemoryJobQueue::new();
        let record_id = Uuid::new_v4();
        let mut low = sample_job(JobType::Transcription, record_id);
        low.priority = 3;
        let mut high = sample_job(JobType::Transcription, record_id);
        high.priority = 1;
        queue.enqueue("transcription", low, None).await.unwrap();
        queue.enqueue("transcription", high.clone(), None).await.unwrap();

        let claimed = queue.claim("transcription", "w1").await.unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
    }

    #[tokio::test]
    async fn sweep_reclaims_past_deadline_jobs() {
        let queue = InMemoryJobQueue::new();
        let record_id = Uuid::new_v4();
        let mut job = sample_job(JobType::Transcription, record_id);
        job.processing_deadline = Utc::now() - Duration::hours(3);
        queue.enqueue("transcription", job.clone(), None).await.unwrap();
        queue.claim("transcription", "w1").await.unwrap();

        let reclaimed = queue.sweep("transcription", Duration::hours(2)).await.unwrap();
        assert_eq!(reclaimed, 1);
        let depth = queue.depth("transcription").await.unwrap();
        assert_eq!(depth.waiting, 1);
        assert_eq!(depth.processing, 0);
    }
}
