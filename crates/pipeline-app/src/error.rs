//! # Design
//!
//! - Centralize application-level errors for bootstrap and orchestration.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Environment configuration was missing or malformed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: pipeline_config::ConfigError,
    },
    /// Postgres pool construction or migration failed.
    #[error("store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: pipeline_store::StoreError,
    },
    /// Redis queue connection failed.
    #[error("queue operation failed")]
    Queue {
        /// Operation identifier.
        operation: &'static str,
        /// Source pipeline error.
        source: pipeline_core::PipelineError,
    },
    /// Object storage broker construction failed.
    #[error("blob broker operation failed")]
    Blob {
        /// Operation identifier.
        operation: &'static str,
        /// Source pipeline error.
        source: pipeline_core::PipelineError,
    },
    /// Telemetry initialization failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source error.
        source: anyhow::Error,
    },
    /// HTTP control plane failed to bind or serve.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source error.
        source: anyhow::Error,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: pipeline_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn store(operation: &'static str, source: pipeline_store::StoreError) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) const fn queue(operation: &'static str, source: pipeline_core::PipelineError) -> Self {
        Self::Queue { operation, source }
    }

    pub(crate) const fn blob(operation: &'static str, source: pipeline_core::PipelineError) -> Self {
        Self::Blob { operation, source }
    }

    pub(crate) const fn telemetry(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn api_server(operation: &'static str, source: anyhow::Error) -> Self {
        Self::ApiServer { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "load",
            pipeline_config::ConfigError::Missing {
                variable: "DATABASE_URL",
            },
        );
        assert!(matches!(config, AppError::Config { .. }));

        let queue = AppError::queue(
            "connect",
            pipeline_core::PipelineError::Fatal {
                detail: "redis unreachable".to_string(),
            },
        );
        assert!(matches!(queue, AppError::Queue { .. }));
    }
}
