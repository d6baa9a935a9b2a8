//! Resolves which object-store key or public URL a handler should fetch a
//! record's source media from.

use pipeline_core::{PipelineError, PipelineResult, Record};

/// Where to fetch a record's source media from: the object-store key (via
/// the blob broker) or a public URL (via plain HTTP), treated as disjoint
/// fallbacks rather than a merged path.
pub enum Source<'a> {
    /// Fetch through the blob broker using this key.
    Key(&'a str),
    /// Fetch directly from this public URL.
    Url(&'a str),
}

/// Prefer `file_key`, falling back to `file_url`. Neither present is a
/// poisoned record: no source handler can ever satisfy it.
pub fn resolve_source(record: &Record) -> PipelineResult<Source<'_>> {
    if let Some(key) = record.file_key.as_deref() {
        return Ok(Source::Key(key));
    }
    if let Some(url) = record.file_url.as_deref() {
        return Ok(Source::Url(url));
    }
    Err(PipelineError::poison(
        "record has neither file_key nor file_url",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::RecordStatus;
    use uuid::Uuid;

    fn blank_record() -> Record {
        Record {
            id: Uuid::new_v4(),
            file_name: "clip.wav".to_string(),
            file_key: None,
            bucket: None,
            file_url: None,
            status: RecordStatus::Uploaded,
            processing_step: None,
            processing_progress: None,
            transcript_text: None,
            timestamps_json: None,
            summary_text: None,
            article_text: None,
            error: None,
            created_at: chrono::Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn prefers_file_key_over_file_url() {
        let mut record = blank_record();
        record.file_key = Some("uploads/a.wav".to_string());
        record.file_url = Some("https://example.com/a.wav".to_string());
        assert!(matches!(resolve_source(&record), Ok(Source::Key("uploads/a.wav"))));
    }

    #[test]
    fn falls_back_to_file_url() {
        let mut record = blank_record();
        record.file_url = Some("https://example.com/a.wav".to_string());
        assert!(matches!(resolve_source(&record), Ok(Source::Url(_))));
    }

    #[test]
    fn neither_present_is_poison() {
        let record = blank_record();
        assert!(matches!(resolve_source(&record), Err(PipelineError::PoisonInput { .. })));
    }
}
