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

//! Redis-backed durable queue implementing [`pipeline_core::JobQueue`].
//!
//! Each named queue is five Redis keys under a `pipeline:<queue>:` prefix:
//!
//! - `jobs` — a hash of `job_id -> Job` JSON, the source of truth for payload
//!   while a job is waiting, processing, or delayed.
//! - `waiting` — a sorted set of `job_id` scored by `(priority, enqueued_at)`
//!   so lower priority numbers and older jobs pop first. [`RedisQueue::claim`]
//!   pops an entry here and moves it onto `processing` via a single
//!   `redis::Script` (Lua `EVAL`), so the pop and the move are one atomic
//!   Redis operation — a crash between them can never orphan a job that
//!   left `waiting` but never reached `processing`.
//! - `processing` — a sorted set of `job_id` scored by `processing_deadline`,
//!   scanned by [`RedisQueue::sweep`].
//! - `delayed` — a sorted set of `job_id` scored by the epoch second a
//!   scheduled retry becomes eligible; promoted into `waiting` lazily, at the
//!   start of every `claim`.
//! - `completed` / `failed` — bounded lists of archived job snapshots.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pipeline_core::{Job, JobQueue, JobSnapshot, JobState, PipelineError, PipelineResult, QueueDepth};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

/// Redis key prefix for every queue this crate manages.
const NAMESPACE: &str = "pipeline";
/// Number of completed jobs retained per queue.
const COMPLETED_ARCHIVE_SIZE: isize = 100;
/// Number of failed jobs retained per queue before the oldest is evicted.
const FAILED_ARCHIVE_SIZE: isize = 1000;
/// Retry backoff is capped at this many seconds regardless of attempt count.
const MAX_BACKOFF_SECONDS: i64 = 300;
/// Stage timeout applied to a job's `processing_deadline` each time it is
/// claimed from `waiting`.
const DEFAULT_STAGE_TIMEOUT_SECONDS: i64 = 30 * 60;

/// Atomically pops the lowest-scored member of `waiting` (KEYS[1]), rewrites
/// its stored payload's `processing_deadline` to ARGV[1] and re-encodes it,
/// then indexes it into `processing` (KEYS[3]) scored by ARGV[2]. Returns
/// `false` if `waiting` was empty, or `{job_id, false}` if the popped id had
/// no payload in `jobs` (KEYS[2]) — an orphaned index entry with nothing to
/// claim, dropped rather than retried.
const CLAIM_SCRIPT: &str = r"
local waiting_key = KEYS[1]
local jobs_key = KEYS[2]
local processing_key = KEYS[3]
local new_deadline = ARGV[1]
local new_deadline_epoch = ARGV[2]

local popped = redis.call('ZPOPMIN', waiting_key, 1)
if #popped == 0 then
    return false
end
local job_id = popped[1]

local payload = redis.call('HGET', jobs_key, job_id)
if not payload then
    return {job_id, false}
end

local job = cjson.decode(payload)
job.processing_deadline = new_deadline
local new_payload = cjson.encode(job)

redis.call('HSET', jobs_key, job_id, new_payload)
redis.call('ZADD', processing_key, new_deadline_epoch, job_id)

return {job_id, new_payload}
";

/// Durable per-stage job queue backed by Redis.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    /// Connect to Redis at `url` and wrap the connection in an
    /// auto-reconnecting [`ConnectionManager`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed or the initial connection
    /// fails.
    pub async fn connect(url: &str) -> PipelineResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|err| PipelineError::transient("job_queue.connect", err))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|err| PipelineError::transient("job_queue.connect", err))?;
        Ok(Self { conn })
    }

    fn jobs_key(queue: &str) -> String {
        format!("{NAMESPACE}:{queue}:jobs")
    }

    fn waiting_key(queue: &str) -> String {
        format!("{NAMESPACE}:{queue}:waiting")
    }

    fn processing_key(queue: &str) -> String {
        format!("{NAMESPACE}:{queue}:processing")
    }

    fn delayed_key(queue: &str) -> String {
        format!("{NAMESPACE}:{queue}:delayed")
    }

    fn completed_key(queue: &str) -> String {
        format!("{NAMESPACE}:{queue}:completed")
    }

    fn failed_key(queue: &str) -> String {
        format!("{NAMESPACE}:{queue}:failed")
    }

    /// Score a job for the `waiting` set: lower priority numbers sort first,
    /// and within a priority band older jobs (smaller timestamp) sort first.
    fn waiting_score(job: &Job) -> f64 {
        let enqueued_ms = job.created_at.timestamp_millis().max(0);
        f64::from(job.priority) * 1e13 + enqueued_ms as f64 / 1e5
    }

    async fn store_job(&mut self, queue: &str, job: &Job) -> PipelineResult<()> {
        let payload = serde_json::to_string(job)
            .map_err(|err| PipelineError::transient("job_queue.serialize", err))?;
        let _: () = self
            .conn
            .hset(Self::jobs_key(queue), &job.id, payload)
            .await
            .map_err(|err| PipelineError::transient("job_queue.store_job", err))?;
        Ok(())
    }

    async fn load_job(&mut self, queue: &str, job_id: &str) -> PipelineResult<Option<Job>> {
        let payload: Option<String> = self
            .conn
            .hget(Self::jobs_key(queue), job_id)
            .await
            .map_err(|err| PipelineError::transient("job_queue.load_job", err))?;
        payload
            .map(|raw| {
                serde_json::from_str(&raw)
                    .map_err(|err| PipelineError::transient("job_queue.deserialize", err))
            })
            .transpose()
    }

    /// Move any `delayed` entries whose scheduled time has elapsed into
    /// `waiting`. Best-effort: a `ZREM` that returns zero means another
    /// worker already promoted that entry, so it is skipped rather than
    /// double-enqueued.
    async fn promote_ready_delayed(&mut self, queue: &str) -> PipelineResult<()> {
        let now = now_epoch_seconds();
        let ready: Vec<String> = self
            .conn
            .zrangebyscore(Self::delayed_key(queue), f64::MIN, now as f64)
            .await
            .map_err(|err| PipelineError::transient("job_queue.scan_delayed", err))?;

        for job_id in ready {
            let removed: i64 = self
                .conn
                .zrem(Self::delayed_key(queue), &job_id)
                .await
                .map_err(|err| PipelineError::transient("job_queue.promote_delayed", err))?;
            if removed == 0 {
                continue;
            }
            let Some(job) = self.load_job(queue, &job_id).await? else {
                continue;
            };
            let _: () = self
                .conn
                .zadd(Self::waiting_key(queue), &job_id, Self::waiting_score(&job))
                .await
                .map_err(|err| PipelineError::transient("job_queue.promote_delayed", err))?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, queue: &str, job: Job, delay: Option<Duration>) -> PipelineResult<()> {
        let mut this = Self {
            conn: self.conn.clone(),
        };
        this.store_job(queue, &job).await?;

        match delay.filter(|delay| *delay > Duration::zero()) {
            Some(delay) => {
                let ready_at = now_epoch_seconds() + delay.num_seconds();
                let _: () = this
                    .conn
                    .zadd(Self::delayed_key(queue), &job.id, ready_at as f64)
                    .await
                    .map_err(|err| PipelineError::transient("job_queue.enqueue_delayed", err))?;
            }
            None => {
                let score = Self::waiting_score(&job);
                let _: () = this
                    .conn
                    .zadd(Self::waiting_key(queue), &job.id, score)
                    .await
                    .map_err(|err| PipelineError::transient("job_queue.enqueue", err))?;
            }
        }
        Ok(())
    }

    async fn claim(&self, queue: &str, _worker_id: &str) -> PipelineResult<Option<Job>> {
        let mut this = Self {
            conn: self.conn.clone(),
        };
        this.promote_ready_delayed(queue).await?;

        let new_deadline = Utc::now() + Duration::seconds(DEFAULT_STAGE_TIMEOUT_SECONDS);
        let script = redis::Script::new(CLAIM_SCRIPT);
        let result: Option<(String, redis::Value)> = script
            .key(Self::waiting_key(queue))
            .key(Self::jobs_key(queue))
            .key(Self::processing_key(queue))
            .arg(new_deadline.to_rfc3339())
            .arg(new_deadline.timestamp())
            .invoke_async(&mut this.conn)
            .await
            .map_err(|err| PipelineError::transient("job_queue.claim", err))?;

        let Some((job_id, payload)) = result else {
            return Ok(None);
        };
        let redis::Value::BulkString(payload) = payload else {
            warn!(%queue, %job_id, "claimed job id with no payload; dropping");
            return Ok(None);
        };

        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|err| PipelineError::transient("job_queue.deserialize", err))
    }

    async fn complete(&self, queue: &str, job_id: &str) -> PipelineResult<()> {
        let mut this = Self {
            conn: self.conn.clone(),
        };
        let job = this.load_job(queue, job_id).await?;
        let _: i64 = this
            .conn
            .zrem(Self::processing_key(queue), job_id)
            .await
            .map_err(|err| PipelineError::transient("job_queue.complete", err))?;

        if let Some(job) = job {
            let payload = serde_json::to_string(&JobSnapshot {
                job,
                state: JobState::Completed,
            })
            .map_err(|err| PipelineError::transient("job_queue.serialize", err))?;
            let _: () = this
                .conn
                .lpush(Self::completed_key(queue), payload)
                .await
                .map_err(|err| PipelineError::transient("job_queue.complete", err))?;
            let _: () = this
                .conn
                .ltrim(Self::completed_key(queue), 0, COMPLETED_ARCHIVE_SIZE - 1)
                .await
                .map_err(|err| PipelineError::transient("job_queue.complete", err))?;
        }
        let _: i64 = this
            .conn
            .hdel(Self::jobs_key(queue), job_id)
            .await
            .map_err(|err| PipelineError::transient("job_queue.complete", err))?;
        Ok(())
    }

    async fn fail(&self, queue: &str, job_id: &str, max_attempts: u32) -> PipelineResult<()> {
        let mut this = Self {
            conn: self.conn.clone(),
        };
        let _: i64 = this
            .conn
            .zrem(Self::processing_key(queue), job_id)
            .await
            .map_err(|err| PipelineError::transient("job_queue.fail", err))?;

        let Some(mut job) = this.load_job(queue, job_id).await? else {
            return Ok(());
        };

        if job.attempt + 1 <= max_attempts {
            let backoff = 2i64.saturating_pow(job.attempt).min(MAX_BACKOFF_SECONDS);
            job.attempt += 1;
            this.store_job(queue, &job).await?;
            let ready_at = now_epoch_seconds() + backoff;
            let _: () = this
                .conn
                .zadd(Self::delayed_key(queue), job_id, ready_at as f64)
                .await
                .map_err(|err| PipelineError::transient("job_queue.fail", err))?;
        } else {
            let payload = serde_json::to_string(&JobSnapshot {
                job,
                state: JobState::Failed,
            })
            .map_err(|err| PipelineError::transient("job_queue.serialize", err))?;
            let _: () = this
                .conn
                .lpush(Self::failed_key(queue), payload)
                .await
                .map_err(|err| PipelineError::transient("job_queue.fail", err))?;
            let _: () = this
                .conn
                .ltrim(Self::failed_key(queue), 0, FAILED_ARCHIVE_SIZE - 1)
                .await
                .map_err(|err| PipelineError::transient("job_queue.fail", err))?;
            let _: i64 = this
                .conn
                .hdel(Self::jobs_key(queue), job_id)
                .await
                .map_err(|err| PipelineError::transient("job_queue.fail", err))?;
        }
        Ok(())
    }

    async fn sweep(&self, queue: &str, grace: Duration) -> PipelineResult<u64> {
        let mut this = Self {
            conn: self.conn.clone(),
        };
        let cutoff = now_epoch_seconds() - grace.num_seconds();
        let stuck: Vec<String> = this
            .conn
            .zrangebyscore(Self::processing_key(queue), f64::MIN, cutoff as f64)
            .await
            .map_err(|err| PipelineError::transient("job_queue.sweep", err))?;

        let mut reclaimed = 0u64;
        for job_id in stuck {
            let removed: i64 = this
                .conn
                .zrem(Self::processing_key(queue), &job_id)
                .await
                .map_err(|err| PipelineError::transient("job_queue.sweep", err))?;
            if removed == 0 {
                continue;
            }
            let Some(mut job) = this.load_job(queue, &job_id).await? else {
                continue;
            };
            job.attempt += 1;
            this.store_job(queue, &job).await?;
            let _: () = this
                .conn
                .zadd(Self::waiting_key(queue), &job_id, Self::waiting_score(&job))
                .await
                .map_err(|err| PipelineError::transient("job_queue.sweep", err))?;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    async fn depth(&self, queue: &str) -> PipelineResult<QueueDepth> {
        let mut this = Self {
            conn: self.conn.clone(),
        };
        let waiting: u64 = this
            .conn
            .zcard(Self::waiting_key(queue))
            .await
            .map_err(|err| PipelineError::transient("job_queue.depth", err))?;
        let processing: u64 = this
            .conn
            .zcard(Self::processing_key(queue))
            .await
            .map_err(|err| PipelineError::transient("job_queue.depth", err))?;
        let delayed: u64 = this
            .conn
            .zcard(Self::delayed_key(queue))
            .await
            .map_err(|err| PipelineError::transient("job_queue.depth", err))?;
        Ok(QueueDepth {
            waiting,
            processing,
            delayed,
        })
    }

    async fn find_job(&self, queue: &str, job_id: &str) -> PipelineResult<Option<JobSnapshot>> {
        let mut this = Self {
            conn: self.conn.clone(),
        };

        let waiting_score: Option<f64> = this
            .conn
            .zscore(Self::waiting_key(queue), job_id)
            .await
            .map_err(|err| PipelineError::transient("job_queue.find_job", err))?;
        if waiting_score.is_some() {
            return Ok(this
                .load_job(queue, job_id)
                .await?
                .map(|job| JobSnapshot { job, state: JobState::Waiting }));
        }

        let processing_score: Option<f64> = this
            .conn
            .zscore(Self::processing_key(queue), job_id)
            .await
            .map_err(|err| PipelineError::transient("job_queue.find_job", err))?;
        if processing_score.is_some() {
            return Ok(this
                .load_job(queue, job_id)
                .await?
                .map(|job| JobSnapshot { job, state: JobState::Processing }));
        }

        let delayed_score: Option<f64> = this
            .conn
            .zscore(Self::delayed_key(queue), job_id)
            .await
            .map_err(|err| PipelineError::transient("job_queue.find_job", err))?;
        if delayed_score.is_some() {
            return Ok(this
                .load_job(queue, job_id)
                .await?
                .map(|job| JobSnapshot { job, state: JobState::Delayed }));
        }

        if let Some(snapshot) = this
            .find_in_archive(Self::completed_key(queue), job_id)
            .await?
        {
            return Ok(Some(snapshot));
        }
        this.find_in_archive(Self::failed_key(queue), job_id).await
    }
}

impl RedisQueue {
    async fn find_in_archive(
        &mut self,
        key: String,
        job_id: &str,
    ) -> PipelineResult<Option<JobSnapshot>> {
        let entries: Vec<String> = self
            .conn
            .lrange(key, 0, -1)
            .await
            .map_err(|err| PipelineError::transient("job_queue.find_job", err))?;
        for entry in entries {
            let snapshot: JobSnapshot = serde_json::from_str(&entry)
                .map_err(|err| PipelineError::transient("job_queue.deserialize", err))?;
            if snapshot.job.id == job_id {
                return Ok(Some(snapshot));
            }
        }
        Ok(None)
    }
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::JobType;
    use uuid::Uuid;

    fn sample_job(priority: u8) -> Job {
        Job {
            id: Job::new_id(),
            job_type: JobType::Transcription,
            record_id: Uuid::new_v4(),
            file_key: Some("uploads/demo.wav".to_string()),
            attempt: 0,
            created_at: Utc::now(),
            processing_deadline: Utc::now() + Duration::minutes(30),
            priority,
        }
    }

    #[test]
    fn waiting_score_orders_by_priority_then_age() {
        let high_priority = sample_job(1);
        let low_priority = sample_job(3);
        assert!(RedisQueue::waiting_score(&high_priority) < RedisQueue::waiting_score(&low_priority));
    }

    #[test]
    fn waiting_score_breaks_ties_by_enqueue_time() {
        let mut older = sample_job(1);
        older.created_at = Utc::now() - Duration::seconds(10);
        let newer = sample_job(1);
        assert!(RedisQueue::waiting_score(&older) < RedisQueue::waiting_score(&newer));
    }
}
