//! Postgres-backed repository implementing [`pipeline_core::RecordStore`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pipeline_core::{
    JobType, PipelineResult, ProcessingStep, Record, RecordPage, RecordStatus, RecordStore,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Database-backed repository for `Record` entities.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Initialise the store, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail or the database is unreachable.
    pub async fn new(pool: PgPool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| StoreError::MigrationFailed { source })?;
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn exists(&self, id: Uuid) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM records WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn fail_predicate(&self, id: Uuid) -> StoreError {
        match self.exists(id).await {
            Ok(true) => StoreError::PredicateFailed { record_id: id },
            Ok(false) => StoreError::NotFound { record_id: id },
            Err(err) => err,
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_uploaded(
        &self,
        file_name: &str,
        file_key: Option<&str>,
        bucket: Option<&str>,
        file_url: Option<&str>,
    ) -> PipelineResult<Record> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r"
            INSERT INTO records (id, file_name, file_key, bucket, file_url, status, processing_progress)
            VALUES ($1, $2, $3, $4, $5, 'UPLOADED', 0)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(file_name)
        .bind(file_key)
        .bind(bucket)
        .bind(file_url)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(row_to_record(&row)?)
    }

    async fn start_processing(&self, id: Uuid) -> PipelineResult<Record> {
        let row = sqlx::query(
            r"
            UPDATE records
            SET status = 'PROCESSING',
                processing_step = NULL,
                processing_progress = 0,
                error = NULL
            WHERE id = $1 AND deleted_at IS NULL AND status IN ('UPLOADED', 'ERROR')
            RETURNING *
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        match row {
            Some(row) => Ok(row_to_record(&row)?),
            None => Err(self.fail_predicate(id).await.into()),
        }
    }

    async fn begin_stage(&self, id: Uuid, stage: JobType) -> PipelineResult<Record> {
        let allowed = allowed_prior_statuses(stage);
        let row = sqlx::query(
            r"
            UPDATE records
            SET status = 'PROCESSING',
                processing_step = NULL,
                processing_progress = 5,
                error = NULL
            WHERE id = $1 AND deleted_at IS NULL AND status = ANY($2)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(allowed)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        match row {
            Some(row) => Ok(row_to_record(&row)?),
            None => Err(self.fail_predicate(id).await.into()),
        }
    }

    async fn set_source(
        &self,
        id: Uuid,
        file_key: Option<&str>,
        file_url: Option<&str>,
    ) -> PipelineResult<Record> {
        let row = sqlx::query(
            r"
            UPDATE records
            SET file_key = COALESCE($2, file_key),
                file_url = COALESCE($3, file_url)
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            ",
        )
        .bind(id)
        .bind(file_key)
        .bind(file_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        match row {
            Some(row) => Ok(row_to_record(&row)?),
            None => Err(self.fail_predicate(id).await.into()),
        }
    }

    async fn set_step(&self, id: Uuid, step: ProcessingStep, progress: u8) -> PipelineResult<()> {
        let result = sqlx::query(
            r"
            UPDATE records
            SET processing_step = $2, processing_progress = $3
            WHERE id = $1 AND deleted_at IS NULL AND status = 'PROCESSING'
            ",
        )
        .bind(id)
        .bind(step_to_str(step))
        .bind(i16::from(progress))
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(self.fail_predicate(id).await.into());
        }
        Ok(())
    }

    async fn save_transcript(
        &self,
        id: Uuid,
        text: &str,
        timestamps_json: Option<serde_json::Value>,
    ) -> PipelineResult<()> {
        let result = sqlx::query(
            r"
            UPDATE records
            SET status = 'TRANSCRIBED',
                transcript_text = $2,
                timestamps_json = $3,
                processing_step = NULL,
                processing_progress = 100
            WHERE id = $1 AND deleted_at IS NULL AND status = 'PROCESSING'
            ",
        )
        .bind(id)
        .bind(text)
        .bind(timestamps_json)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(self.fail_predicate(id).await.into());
        }
        Ok(())
    }

    async fn save_summary(&self, id: Uuid, text: &str) -> PipelineResult<()> {
        let result = sqlx::query(
            r"
            UPDATE records
            SET status = 'SUMMARIZED',
                summary_text = $2,
                processing_step = NULL,
                processing_progress = 100
            WHERE id = $1 AND deleted_at IS NULL AND status = 'PROCESSING'
            ",
        )
        .bind(id)
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(self.fail_predicate(id).await.into());
        }
        Ok(())
    }

    async fn save_article(&self, id: Uuid, text: &str) -> PipelineResult<()> {
        let result = sqlx::query(
            r"
            UPDATE records
            SET status = 'DONE',
                article_text = $2,
                processing_step = NULL,
                processing_progress = 100
            WHERE id = $1 AND deleted_at IS NULL AND status = 'PROCESSING'
            ",
        )
        .bind(id)
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(self.fail_predicate(id).await.into());
        }
        Ok(())
    }

    async fn record_error(
        &self,
        id: Uuid,
        message: &str,
        step: Option<ProcessingStep>,
    ) -> PipelineResult<()> {
        let result = sqlx::query(
            r"
            UPDATE records
            SET status = 'ERROR',
                error = $2,
                processing_step = $3
            WHERE id = $1 AND deleted_at IS NULL AND status = 'PROCESSING'
            ",
        )
        .bind(id)
        .bind(message)
        .bind(step.map(step_to_str))
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(self.fail_predicate(id).await.into());
        }
        Ok(())
    }

    async fn gc_stale_uploads(&self, older_than: Duration) -> PipelineResult<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - older_than;
        let result = sqlx::query(
            r"
            DELETE FROM records
            WHERE deleted_at IS NULL
              AND status IN ('UPLOADED', 'PROCESSING')
              AND created_at < $1
            ",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: Uuid) -> PipelineResult<Option<Record>> {
        let row = sqlx::query("SELECT * FROM records WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        row.as_ref()
            .map(row_to_record)
            .transpose()
            .map_err(Into::into)
    }

    async fn list(&self, page: u32, page_size: u32) -> PipelineResult<RecordPage> {
        let page_size = i64::from(page_size.max(1));
        let offset = i64::from(page) * page_size;
        let rows = sqlx::query(
            r"
            SELECT * FROM records
            WHERE deleted_at IS NULL
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            ",
        )
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let records = rows
            .iter()
            .map(row_to_record)
            .collect::<StoreResult<Vec<_>>>()?;
        let total = self.count().await?;
        Ok(RecordPage { records, total })
    }

    async fn count(&self) -> PipelineResult<u64> {
        let row = sqlx::query("SELECT count(*) AS total FROM records WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        let total: i64 = row
            .try_get("total")
            .map_err(|source| StoreError::QueryFailed {
                operation: "count",
                source,
            })?;
        Ok(u64::try_from(total).unwrap_or_default())
    }
}

/// Statuses from which entering `Processing` for `stage` is valid: the prior
/// stage's terminal status, `Error` (step-targeted retry), and `Processing`
/// itself (sweeper-reclaimed job, or transcription's normal no-op since the
/// API already made this transition).
fn allowed_prior_statuses(stage: JobType) -> Vec<String> {
    let prior = match stage {
        JobType::Transcription => "UPLOADED",
        JobType::Summary => "TRANSCRIBED",
        JobType::Article => "SUMMARIZED",
    };
    vec![
        prior.to_string(),
        "ERROR".to_string(),
        "PROCESSING".to_string(),
    ]
}

fn step_to_str(step: ProcessingStep) -> &'static str {
    match step {
        ProcessingStep::Download => "DOWNLOAD",
        ProcessingStep::Transcription => "TRANSCRIPTION",
        ProcessingStep::Timestamps => "TIMESTAMPS",
        ProcessingStep::Summary => "SUMMARY",
        ProcessingStep::Article => "ARTICLE",
    }
}

fn step_from_str(step: &str) -> StoreResult<ProcessingStep> {
    Ok(match step {
        "DOWNLOAD" => ProcessingStep::Download,
        "TRANSCRIPTION" => ProcessingStep::Transcription,
        "TIMESTAMPS" => ProcessingStep::Timestamps,
        "SUMMARY" => ProcessingStep::Summary,
        "ARTICLE" => ProcessingStep::Article,
        other => {
            return Err(StoreError::QueryFailed {
                operation: "decode processing_step",
                source: sqlx::Error::Decode(format!("unknown processing_step {other}").into()),
            });
        }
    })
}

fn status_from_str(status: &str) -> StoreResult<RecordStatus> {
    Ok(match status {
        "UPLOADED" => RecordStatus::Uploaded,
        "PROCESSING" => RecordStatus::Processing,
        "TRANSCRIBED" => RecordStatus::Transcribed,
        "SUMMARIZED" => RecordStatus::Summarized,
        "DONE" => RecordStatus::Done,
        "ERROR" => RecordStatus::Error,
        other => {
            return Err(StoreError::QueryFailed {
                operation: "decode status",
                source: sqlx::Error::Decode(format!("unknown status {other}").into()),
            });
        }
    })
}

fn row_to_record(row: &PgRow) -> StoreResult<Record> {
    let status_raw: String = row.try_get("status")?;
    let step_raw: Option<String> = row.try_get("processing_step")?;
    let progress_raw: Option<i16> = row.try_get("processing_progress")?;

    Ok(Record {
        id: row.try_get("id")?,
        file_name: row.try_get("file_name")?,
        file_key: row.try_get("file_key")?,
        bucket: row.try_get("bucket")?,
        file_url: row.try_get("file_url")?,
        status: status_from_str(&status_raw)?,
        processing_step: step_raw.map(|s| step_from_str(&s)).transpose()?,
        processing_progress: progress_raw.map(|p| p.clamp(0, 100) as u8),
        transcript_text: row.try_get("transcript_text")?,
        timestamps_json: row.try_get("timestamps_json")?,
        summary_text: row.try_get("summary_text")?,
        article_text: row.try_get("article_text")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_round_trips_through_str() {
        for step in [
            ProcessingStep::Download,
            ProcessingStep::Transcription,
            ProcessingStep::Timestamps,
            ProcessingStep::Summary,
            ProcessingStep::Article,
        ] {
            assert_eq!(step_from_str(step_to_str(step)).unwrap(), step);
        }
    }

    #[test]
    fn status_from_str_rejects_unknown_values() {
        assert!(status_from_str("BOGUS").is_err());
    }
}
