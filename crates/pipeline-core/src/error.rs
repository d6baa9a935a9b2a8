//! Error taxonomy shared by the pipeline's stage handlers, queue, and store.

use std::error::Error;

use thiserror::Error;
use uuid::Uuid;

/// Primary error type produced by handlers and propagated to the worker runtime.
///
/// Each variant maps to one of the recovery strategies the worker runtime and
/// queue understand: retry with backoff, fail the record outright, or treat
/// the process itself as unhealthy.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network blip, 5xx from an adapter, or a timed-out call. Eligible for
    /// queue-level retry with exponential backoff.
    #[error("transient downstream failure during {operation}")]
    TransientDownstream {
        /// Operation identifier, e.g. `"speech_adapter.transcribe"`.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A prerequisite artifact was missing, or an adapter response could not
    /// be parsed by any strategy in the cascade. Never retried automatically.
    #[error("poison input: {reason}")]
    PoisonInput {
        /// Human-readable explanation surfaced on the record.
        reason: String,
    },
    /// A prerequisite artifact for this stage was absent (e.g. summary
    /// handler invoked before a transcript exists).
    #[error("missing prerequisite artifact: {artifact}")]
    MissingPrerequisite {
        /// Name of the missing artifact field.
        artifact: &'static str,
    },
    /// An adapter response contained configured confabulation tokens and the
    /// affected span could not be safely narrowed to a single chunk.
    #[error("hallucinated output detected: {detail}")]
    Hallucination {
        /// Description of what was detected and where.
        detail: String,
    },
    /// A status-predicated transition lost the race to a concurrent writer.
    /// Handlers treat this as success-silently; the winning worker keeps the
    /// record.
    #[error("stale state: expected record {record_id} to satisfy a prior predicate")]
    StaleState {
        /// Record identifier whose predicate failed.
        record_id: Uuid,
    },
    /// The process received a shutdown signal mid-job. No status change is
    /// applied; the job is left in `processing` for the sweeper.
    #[error("operator abort during {operation}")]
    OperatorAbort {
        /// Operation that was interrupted.
        operation: &'static str,
    },
    /// An invariant was violated (e.g. `DONE` without artifacts, unknown
    /// queue name). Logged and the process exits; orchestration restarts it.
    #[error("fatal invariant violation: {detail}")]
    Fatal {
        /// Description of the violated invariant.
        detail: String,
    },
    /// The requested record does not exist.
    #[error("record not found")]
    NotFound {
        /// Missing record identifier.
        record_id: Uuid,
    },
}

impl PipelineError {
    /// Construct a [`PipelineError::TransientDownstream`] from any boxable error.
    pub fn transient(
        operation: &'static str,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::TransientDownstream {
            operation,
            source: source.into(),
        }
    }

    /// Construct a [`PipelineError::PoisonInput`].
    #[must_use]
    pub fn poison(reason: impl Into<String>) -> Self {
        Self::PoisonInput {
            reason: reason.into(),
        }
    }

    /// Whether the queue should retry this error with backoff, versus
    /// surfacing it directly as a record error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientDownstream { .. })
    }
}

/// Convenience alias for pipeline operation results.
pub type PipelineResult<T> = Result<T, PipelineError>;
