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

//! Shared HTTP DTOs for the pipeline control plane.
//!
//! These types are re-used by the CLI for request/response encoding so the
//! wire contract has a single source of truth. Conversions from domain
//! objects (`Record`, `Job`, `UploadTicket`) live here, close to the shapes
//! they produce.

use chrono::{DateTime, Utc};
use pipeline_core::{JobState, JobSnapshot, JobType, ProcessingStep, Record, RecordStatus, UploadTicket};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RFC9457-compatible problem document surfaced on validation/runtime errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "error")]
    /// Short, human-readable summary of the issue.
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Detailed diagnostic context, when available.
    pub details: Option<String>,
}

impl ProblemDetails {
    /// Construct a problem document with no extra detail.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    /// Attach a detail string to an existing problem document.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Invalid-field pointer, used when a request fails validation on a specific
/// JSON field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemInvalidParam {
    /// Name of the offending request field.
    pub field: String,
    /// Human-readable description of the validation failure.
    pub message: String,
}

/// Body accepted by `POST /api/upload-url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadUrlRequest {
    /// Original file name, used to derive the object-store extension.
    pub file_name: String,
    /// MIME type of the upload.
    pub content_type: String,
    /// Size in bytes, when known up front; governs single vs multipart.
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// Response returned by `POST /api/upload-url`.
///
/// Serializes as a flat object matching either the single-PUT or multipart
/// shape, with `record_id`/`file_key`/`file_url` common to both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UploadUrlResponse {
    /// A single presigned `PUT` is sufficient for the whole object.
    Single {
        /// Presigned PUT URL.
        upload_url: String,
        /// Record created in `UPLOADED` status to track this upload.
        record_id: Uuid,
        /// Object-store key assigned to the upload.
        file_key: String,
        /// Public URL, when the bucket exposes one.
        file_url: Option<String>,
    },
    /// The object must be uploaded in parts via the S3 multipart API.
    Multipart {
        /// Discriminator clients use to pick the multipart flow.
        is_multipart: bool,
        /// Multipart upload identifier returned by the object store.
        upload_id: String,
        /// Presigned PUT URL per part, 1-indexed by position.
        part_urls: Vec<String>,
        /// Presigned `CompleteMultipartUpload` URL.
        complete_url: String,
        /// Presigned `AbortMultipartUpload` URL.
        abort_url: String,
        /// Size in bytes of each part except possibly the last.
        part_size: u64,
        /// Record created in `UPLOADED` status to track this upload.
        record_id: Uuid,
        /// Object-store key assigned to the upload.
        file_key: String,
        /// Public URL, when the bucket exposes one.
        file_url: Option<String>,
    },
}

impl UploadUrlResponse {
    /// Build the response from a broker-minted ticket and the record it was
    /// created alongside.
    #[must_use]
    pub fn from_ticket(ticket: UploadTicket, record_id: Uuid) -> Self {
        match ticket {
            UploadTicket::Single {
                put_url,
                key,
                public_url,
            } => Self::Single {
                upload_url: put_url,
                record_id,
                file_key: key,
                file_url: public_url,
            },
            UploadTicket::Multipart {
                key,
                upload_id,
                part_urls,
                complete_url,
                abort_url,
                part_size,
                public_url,
            } => Self::Multipart {
                is_multipart: true,
                upload_id,
                part_urls,
                complete_url,
                abort_url,
                part_size,
                record_id,
                file_key: key,
                file_url: public_url,
            },
        }
    }
}

/// Body accepted by `POST /api/process`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessRequest {
    /// Record to begin processing.
    pub record_id: Uuid,
    /// Object-store key, when the caller already knows it.
    #[serde(default)]
    pub file_key: Option<String>,
    /// Fallback public URL, when the caller already knows it.
    #[serde(default)]
    pub file_url: Option<String>,
}

/// Response returned by `POST /api/process`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessResponse {
    /// Record now in `PROCESSING`.
    pub record_id: Uuid,
    /// Identifier of the transcription job that was enqueued.
    pub job_id: String,
}

/// Maps a retry `step` ordinal onto the stage it targets, per the `§6`
/// external-interface table (`1|2` transcription, `3` summary, `4` article).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub struct RetryStep(JobType);

impl RetryStep {
    /// The stage this step ordinal resolves to.
    #[must_use]
    pub const fn stage(self) -> JobType {
        self.0
    }
}

impl TryFrom<u8> for RetryStep {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 | 2 => Ok(Self(JobType::Transcription)),
            3 => Ok(Self(JobType::Summary)),
            4 => Ok(Self(JobType::Article)),
            other => Err(format!("step must be one of 1, 2, 3, 4; got {other}")),
        }
    }
}

impl From<RetryStep> for u8 {
    fn from(value: RetryStep) -> Self {
        match value.0 {
            JobType::Transcription => 1,
            JobType::Summary => 3,
            JobType::Article => 4,
        }
    }
}

/// Body accepted by `POST /api/records/:id/retry`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RetryRequest {
    /// Step to resume from; required unless the record is already `ERROR`.
    #[serde(default)]
    pub step: Option<RetryStep>,
}

/// Response returned by `POST /api/records/:id/retry`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryResponse {
    /// Record returned to `PROCESSING`.
    pub record_id: Uuid,
    /// Identifier of the job enqueued on the target stage's queue.
    pub job_id: String,
}

/// Record projection returned by `GET /api/records/:id` and embedded in list
/// responses, including a freshly minted download URL when a `file_key` is
/// present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordView {
    /// Stable identifier.
    pub id: Uuid,
    /// Original uploaded file name.
    pub file_name: String,
    /// Current lifecycle status.
    pub status: RecordStatus,
    /// Current processing step, when `status == PROCESSING`.
    pub processing_step: Option<ProcessingStep>,
    /// Completion percentage in `0..=100`.
    pub processing_progress: Option<u8>,
    /// Full transcript text, once transcription succeeds.
    pub transcript_text: Option<String>,
    /// Timestamped outline, as a JSON array.
    pub timestamps_json: Option<serde_json::Value>,
    /// Paragraph-style summary, once summarization succeeds.
    pub summary_text: Option<String>,
    /// Long-form Markdown article, once article generation succeeds.
    pub article_text: Option<String>,
    /// Last error message, if any.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Presigned download URL for `file_key`, minted fresh on each request.
    pub download_url: Option<String>,
}

impl RecordView {
    /// Project a domain [`Record`] into the wire view, attaching a
    /// freshly-minted `download_url`.
    #[must_use]
    pub fn from_record(record: Record, download_url: Option<String>) -> Self {
        Self {
            id: record.id,
            file_name: record.file_name,
            status: record.status,
            processing_step: record.processing_step,
            processing_progress: record.processing_progress,
            transcript_text: record.transcript_text,
            timestamps_json: record.timestamps_json,
            summary_text: record.summary_text,
            article_text: record.article_text,
            error: record.error,
            created_at: record.created_at,
            download_url,
        }
    }
}

/// Pagination metadata accompanying a page of records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationView {
    /// 1-based page number returned.
    pub page: u32,
    /// Requested page size.
    pub page_size: u32,
    /// Total count of non-deleted records.
    pub total: u64,
}

/// Response returned by `GET /api/records`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordListResponse {
    /// Records on this page, most recent first.
    pub records: Vec<RecordView>,
    /// Pagination metadata for this page.
    pub pagination: PaginationView,
}

/// Response returned by `GET /api/job-status/:id`.
///
/// The `job` variant reflects a live queue entry; the `record` variant is
/// synthesized from the record store when no queue entry exists for the id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum JobStatusResponse {
    /// A live job was found in one of the three durable queues.
    Job {
        /// Job identifier.
        id: String,
        /// Which list the job currently occupies.
        state: JobState,
        /// Stage the job drives.
        stage: JobType,
        /// Record the job operates on.
        record_id: Uuid,
        /// 0-based attempt counter.
        attempt: u32,
    },
    /// No live job existed; state was synthesized from the record store.
    Record {
        /// Record identifier.
        id: Uuid,
        /// Current lifecycle status.
        status: RecordStatus,
        /// Synthesized completion percentage, per the status/progress table.
        progress: u8,
    },
}

impl JobStatusResponse {
    /// Build the response from a live [`JobSnapshot`].
    #[must_use]
    pub fn from_snapshot(snapshot: JobSnapshot) -> Self {
        Self::Job {
            id: snapshot.job.id,
            state: snapshot.state,
            stage: snapshot.job.job_type,
            record_id: snapshot.job.record_id,
            attempt: snapshot.job.attempt,
        }
    }

    /// Build the response by synthesizing state from a [`Record`].
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self::Record {
            id: record.id,
            status: record.status,
            progress: record.synthesized_progress(),
        }
    }
}

/// Response returned by `GET /api/health` and `GET /api/healthcheck`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always `"ok"` when the process can answer the request at all.
    pub status: String,
    /// Timestamp the health check was evaluated.
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    /// Build a healthy response stamped with the current time.
    #[must_use]
    pub fn ok_now() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_step_maps_ordinals_to_stages() {
        assert_eq!(RetryStep::try_from(1).unwrap().stage(), JobType::Transcription);
        assert_eq!(RetryStep::try_from(2).unwrap().stage(), JobType::Transcription);
        assert_eq!(RetryStep::try_from(3).unwrap().stage(), JobType::Summary);
        assert_eq!(RetryStep::try_from(4).unwrap().stage(), JobType::Article);
        assert!(RetryStep::try_from(5).is_err());
        assert!(RetryStep::try_from(0).is_err());
    }

    #[test]
    fn retry_step_round_trips_through_u8() {
        let step = RetryStep::try_from(2).unwrap();
        assert_eq!(u8::from(step), 1);
    }

    #[test]
    fn upload_url_response_single_serializes_flat() {
        let ticket = UploadTicket::Single {
            put_url: "https://example.com/put".to_string(),
            key: "uploads/a.wav".to_string(),
            public_url: None,
        };
        let response = UploadUrlResponse::from_ticket(ticket, Uuid::nil());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["upload_url"], "https://example.com/put");
        assert_eq!(json["file_key"], "uploads/a.wav");
        assert!(json.get("is_multipart").is_none());
    }

    #[test]
    fn upload_url_response_multipart_carries_discriminator() {
        let ticket = UploadTicket::Multipart {
            key: "uploads/b.mp4".to_string(),
            upload_id: "upload-1".to_string(),
            part_urls: vec!["https://example.com/part/1".to_string()],
            complete_url: "https://example.com/complete".to_string(),
            abort_url: "https://example.com/abort".to_string(),
            part_size: 5 * 1024 * 1024,
            public_url: None,
        };
        let response = UploadUrlResponse::from_ticket(ticket, Uuid::nil());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["is_multipart"], true);
        assert_eq!(json["part_urls"][0], "https://example.com/part/1");
    }

    #[test]
    fn problem_details_serializes_with_details_omitted_when_absent() {
        let problem = ProblemDetails::new("bad request");
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["error"], "bad request");
        assert!(json.get("details").is_none());
    }
}
