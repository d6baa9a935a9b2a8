//! # Design
//!
//! - Structured, constant-message errors for the stage handlers.
//! - Capture operation context (paths, fields) to make failures reproducible.
//! - Preserve source errors without interpolating context into messages.

use std::io;
use std::path::PathBuf;

use pipeline_core::{PipelineError, ProcessingStep};
use thiserror::Error;

/// Result type for handler-internal operations, before mapping into
/// [`PipelineError`] at the `StageHandler::handle` boundary.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Errors produced while running a stage handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// IO failures against the per-job temp tree.
    #[error("handler io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// An `ffmpeg`/`ffprobe` child process exited non-zero or could not be
    /// spawned.
    #[error("ffmpeg subprocess failure")]
    Ffmpeg {
        /// Operation that invoked the subprocess.
        operation: &'static str,
        /// Exit status, when the process ran at all.
        status: Option<i32>,
        /// Captured stderr tail, for diagnostics.
        stderr: String,
    },
    /// A prerequisite artifact the handler expected on the record was
    /// absent (e.g. transcript missing when the summary handler runs).
    #[error("missing prerequisite artifact")]
    MissingPrerequisite {
        /// Name of the missing artifact field.
        artifact: &'static str,
    },
    /// The speech or LLM adapter returned output that failed the
    /// hallucination sanity check for every chunk.
    #[error("wholly hallucinated adapter output")]
    Hallucinated {
        /// Step whose adapter call produced the hallucinated output.
        step: ProcessingStep,
    },
    /// Adapter HTTP call failed or returned an unparseable response.
    #[error("adapter call failed")]
    Adapter {
        /// Adapter name (`gemini`, `openrouter`).
        adapter: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
    },
}

impl From<HandlerError> for PipelineError {
    fn from(error: HandlerError) -> Self {
        match error {
            HandlerError::Io { operation, source, .. } => {
                Self::transient(operation, source)
            }
            HandlerError::Ffmpeg { operation, stderr, .. } => {
                Self::transient(operation, stderr)
            }
            HandlerError::MissingPrerequisite { artifact } => {
                Self::MissingPrerequisite { artifact }
            }
            HandlerError::Hallucinated { step } => Self::Hallucination {
                detail: format!("all chunks discarded during {step:?}"),
            },
            HandlerError::Adapter { adapter, reason } => {
                Self::transient("handler.adapter_call", format!("{adapter}: {reason}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prerequisite_maps_to_pipeline_missing_prerequisite() {
        let error = HandlerError::MissingPrerequisite {
            artifact: "transcript_text",
        };
        let mapped: PipelineError = error.into();
        assert!(matches!(mapped, PipelineError::MissingPrerequisite { .. }));
    }
}
