//! Article stage handler: produce a long-form Markdown article from the
//! transcript and summary. Terminal stage; on success the record reaches
//! `DONE`.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::{
    Job, LlmAdapter, PipelineError, PipelineResult, RecordStore, StageContext, StageHandler,
    JobType,
};

use crate::prompts::article_prompt;

/// Drives the article stage end to end for one job.
pub struct ArticleHandler {
    store: Arc<dyn RecordStore>,
    llm: Arc<dyn LlmAdapter>,
    model: String,
}

impl ArticleHandler {
    /// Construct a handler wired to its collaborators. `model` should name a
    /// higher-capacity model than the one used for summarization.
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, llm: Arc<dyn LlmAdapter>, model: String) -> Self {
        Self { store, llm, model }
    }
}

#[async_trait]
impl StageHandler for ArticleHandler {
    fn stage(&self) -> JobType {
        JobType::Article
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
        let summary = record
            .summary_text
            .as_deref()
            .ok_or(PipelineError::MissingPrerequisite {
                artifact: "summary_text",
            })?;

        ctx.progress.report(30, "drafting_article", None);
        ctx.check_cancelled("handler.draft_article")?;

        let article = self
            .llm
            .complete(&self.model, &article_prompt(transcript, summary))
            .await?;

        self.store.save_article(job.record_id, &article).await?;
        ctx.progress.report(100, "done", None);

        Ok(())
    }
}
