//! Transcription stage handler: fetch source media, extract/normalize
//! audio, transcribe in chunks, derive a timestamp outline, and hand off to
//! the summary stage.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use pipeline_core::{
    BlobBroker, Job, JobQueue, PipelineError, PipelineResult, ProcessingStep, RecordStore,
    SpeechAdapter, StageContext, StageHandler, JobType,
};
use tracing::warn;
use uuid::Uuid;

use crate::audio;
use crate::hallucination::{is_wholly_hallucinated, sanitize_chunk};
use crate::prompts::{TIMESTAMP_PROMPT, TRANSCRIPTION_PROMPT};
use crate::source::{resolve_source, Source};
use crate::timestamps::parse_cascade;

/// Delimiter joining per-chunk transcripts into the full transcript text.
const CHUNK_DELIMITER: &str = "\n\n";

/// Drives the transcription stage end to end for one job.
pub struct TranscriptionHandler {
    store: Arc<dyn RecordStore>,
    blob: Arc<dyn BlobBroker>,
    speech: Arc<dyn SpeechAdapter>,
    timestamp_llm: Arc<dyn pipeline_core::LlmAdapter>,
    timestamp_model: String,
    queue: Arc<dyn JobQueue>,
    hallucination_tokens: Vec<String>,
}

impl TranscriptionHandler {
    /// Construct a handler wired to its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        blob: Arc<dyn BlobBroker>,
        speech: Arc<dyn SpeechAdapter>,
        timestamp_llm: Arc<dyn pipeline_core::LlmAdapter>,
        timestamp_model: String,
        queue: Arc<dyn JobQueue>,
        hallucination_tokens: Vec<String>,
    ) -> Self {
        Self {
            store,
            blob,
            speech,
            timestamp_llm,
            timestamp_model,
            queue,
            hallucination_tokens,
        }
    }

    async fn fetch_source(&self, record: &pipeline_core::Record, dest: &Path) -> PipelineResult<()> {
        match resolve_source(record)? {
            Source::Key(key) => {
                self.blob
                    .fetch_to_file(key, record.file_url.as_deref(), dest)
                    .await
            }
            Source::Url(url) => self.blob.fetch_to_file(url, Some(url), dest).await,
        }
    }

    async fn transcribe_chunks(
        &self,
        chunk_paths: &[std::path::PathBuf],
        ctx: &StageContext,
    ) -> PipelineResult<Vec<String>> {
        let mut transcripts = Vec::with_capacity(chunk_paths.len());
        let total = chunk_paths.len().max(1);

        for (index, chunk) in chunk_paths.iter().enumerate() {
            ctx.check_cancelled("handler.transcribe_chunk")?;
            let raw = self.speech.transcribe(chunk, TRANSCRIPTION_PROMPT).await?;
            transcripts.push(sanitize_chunk(&raw, &self.hallucination_tokens));

            #[allow(clippy::cast_possible_truncation)]
            let progress = (10 + (index + 1) * 70 / total) as u8;
            ctx.progress.report(progress, "transcribing", None);
        }

        if is_wholly_hallucinated(&transcripts) {
            return Err(PipelineError::Hallucination {
                detail: "every transcribed chunk was discarded as confabulated".to_string(),
            });
        }

        Ok(transcripts)
    }

    async fn derive_timestamps(&self, transcript: &str) -> Option<serde_json::Value> {
        let prompt = format!("{TIMESTAMP_PROMPT}{transcript}");
        let response = self
            .timestamp_llm
            .complete(&self.timestamp_model, &prompt)
            .await
            .ok()?;
        let entries = parse_cascade(&response)?;
        serde_json::to_value(entries).ok()
    }
}

#[async_trait]
impl StageHandler for TranscriptionHandler {
    fn stage(&self) -> JobType {
        JobType::Transcription
    }

    async fn handle(&self, job: &Job, ctx: &StageContext) -> PipelineResult<()> {
        let record = self
            .store
            .get(job.record_id)
            .await?
            .ok_or(PipelineError::NotFound {
                record_id: job.record_id,
            })?;

        ctx.progress.report(5, "downloading", None);
        self.store
            .set_step(job.record_id, ProcessingStep::Download, 5)
            .await?;

        let work_dir = tempfile::Builder::new()
            .prefix(&format!("pipeline-transcribe-{}-", Uuid::new_v4()))
            .tempdir()
            .map_err(|err| PipelineError::transient("handler.create_work_dir", err))?;

        let result = self.run_in_work_dir(job, &record, work_dir.path(), ctx).await;

        if let Err(err) = work_dir.close() {
            warn!(error = %err, "failed to remove transcription work directory");
        }

        result
    }
}

impl TranscriptionHandler {
    async fn run_in_work_dir(
        &self,
        job: &Job,
        record: &pipeline_core::Record,
        work_dir: &Path,
        ctx: &StageContext,
    ) -> PipelineResult<()> {
        let source_ext = Path::new(&record.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("bin");
        let source_path = work_dir.join(format!("source.{source_ext}"));
        self.fetch_source(record, &source_path).await?;
        ctx.check_cancelled("handler.fetch_source")?;

        ctx.progress.report(10, "optimizing", None);
        self.store
            .set_step(job.record_id, ProcessingStep::Transcription, 10)
            .await?;
        let optimized = audio::optimize(&source_path, work_dir).await;
        ctx.check_cancelled("handler.optimize_audio")?;

        let chunk_paths = audio::chunk_paths_for(&optimized, work_dir).await?;
        let transcripts = self.transcribe_chunks(&chunk_paths, ctx).await?;
        let transcript_text = transcripts.join(CHUNK_DELIMITER);

        ctx.progress.report(85, "deriving_timestamps", None);
        self.store
            .set_step(job.record_id, ProcessingStep::Timestamps, 85)
            .await?;
        let timestamps_json = self.derive_timestamps(&transcript_text).await;

        self.store
            .save_transcript(job.record_id, &transcript_text, timestamps_json)
            .await?;
        ctx.progress.report(100, "transcribed", None);

        self.queue
            .enqueue(
                JobType::Summary.queue_name(),
                Job {
                    id: Job::new_id(),
                    job_type: JobType::Summary,
                    record_id: job.record_id,
                    file_key: None,
                    attempt: 0,
                    created_at: chrono::Utc::now(),
                    processing_deadline: chrono::Utc::now() + default_stage_window(),
                    priority: job.priority,
                },
                None,
            )
            .await?;

        Ok(())
    }
}

fn default_stage_window() -> ChronoDuration {
    ChronoDuration::minutes(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_delimiter_is_double_newline() {
        let joined = vec!["a".to_string(), "b".to_string()].join(CHUNK_DELIMITER);
        assert_eq!(joined, "a\n\nb");
    }
}
