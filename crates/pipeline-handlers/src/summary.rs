//! Summary stage handler: condense the transcript into a paragraph-style
//! summary and hand off to the article stage.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::{
    Job, JobQueue, LlmAdapter, PipelineError, PipelineResult, RecordStore, StageContext,
    StageHandler, JobType,
};

use crate::prompts::summary_prompt;

/// Drives the summary stage end to end for one job.
pub struct SummaryHandler {
    store: Arc<dyn RecordStore>,
    llm: Arc<dyn LlmAdapter>,
    model: String,
    queue: Arc<dyn JobQueue>,
}

impl SummaryHandler {
    /// Construct a handler wired to its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        llm: Arc<dyn LlmAdapter>,
        model: String,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            store,
            llm,
            model,
            queue,
        }
    }
}

#[async_trait]
impl StageHandler for SummaryHandler {
    fn stage(&self) -> JobType {
        JobType::Summary
    }

    async fn handle(&self, job: &Job, ctx: &StageContext) -> PipelineResult<()> {
        let record = self
            .store
            .get(job.record_id)
            .await?
            .ok_or(PipelineError::NotFound {
                record_id: job.record_id,
            })?;

        let transcript = record
            .transcript_text
            .as_deref()
            .ok_or(PipelineError::MissingPrerequisite {
                artifact: "transcript_text",
            })?;

        ctx.progress.report(20, "summarizing", None);
        ctx.check_cancelled("handler.summarize")?;

        let summary = self
            .llm
            .complete(&self.model, &summary_prompt(transcript))
            .await?;

        self.store.save_summary(job.record_id, &summary).await?;
        ctx.progress.report(100, "summarized", None);

        self.queue
            .enqueue(
                JobType::Article.queue_name(),
                Job {
                    id: Job::new_id(),
                    job_type: JobType::Article,
                    record_id: job.record_id,
                    file_key: None,
                    attempt: 0,
                    created_at: chrono::Utc::now(),
                    processing_deadline: chrono::Utc::now() + chrono::Duration::minutes(30),
                    priority: job.priority,
                },
                None,
            )
            .await?;

        Ok(())
    }
}
