//! Error types for configuration loading.

use thiserror::Error;

/// Primary error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was absent.
    #[error("missing required environment variable '{variable}'")]
    Missing {
        /// Name of the missing variable.
        variable: &'static str,
    },
    /// An environment variable was present but failed to parse.
    #[error("invalid value for environment variable '{variable}': {reason}")]
    Invalid {
        /// Name of the offending variable.
        variable: &'static str,
        /// Human-readable reason the value was rejected.
        reason: String,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
