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
#![allow(clippy::module_name_repetitions)]
#![allow(unexpected_cfgs)]
#![allow(clippy::multiple_crate_versions)]

//! Environment-variable configuration loader for the media enrichment
//! pipeline. Fails fast with a descriptive error when a required variable is
//! absent or malformed; optional variables fall back to sane defaults.

pub mod error;

use std::time::Duration;

pub use error::{ConfigError, ConfigResult};

const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_WORKER_CONCURRENCY: u32 = 4;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_STAGE_DEADLINE: Duration = Duration::from_secs(30 * 60);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_SWEEP_GRACE: Duration = Duration::from_secs(2 * 60 * 60);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_HALLUCINATION_TOKENS: &[&str] = &[
    "Institute for Advanced Transcription Studies",
    "Annual Symposium on Synthetic Narration",
];

/// Object-store credentials and bucket layout, read from the `R2_*`
/// variables.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// S3-compatible endpoint URL.
    pub endpoint: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Bucket that uploads and derived artifacts live in.
    pub bucket_name: String,
    /// Optional public base URL for serving objects directly.
    pub public_url: Option<String>,
}

/// AI adapter credentials and model selection.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// API key for the speech/summary Gemini adapter.
    pub gemini_api_key: String,
    /// Model identifier for Gemini calls.
    pub gemini_model: String,
    /// API key for the article-generation `OpenRouter` adapter.
    pub openrouter_api_key: String,
    /// Optional model override for `OpenRouter` calls.
    pub openrouter_model: Option<String>,
}

/// Operational knobs governing worker concurrency, timeouts, and the HTTP
/// control plane.
#[derive(Debug, Clone)]
pub struct OpsConfig {
    /// TCP port the HTTP control plane binds to.
    pub port: u16,
    /// In-flight claims per worker process.
    pub worker_concurrency: u32,
    /// How long a worker waits with no queue activity before shutting down.
    pub idle_timeout: Duration,
    /// Directory used for per-job temp trees during transcription.
    pub tmp_dir: String,
    /// Origins allowed through CORS on the HTTP control plane.
    pub allowed_origins: Vec<String>,
    /// Per-stage handler deadline before cancellation.
    pub stage_deadline: Duration,
    /// Interval between deadline-sweeper passes.
    pub sweep_interval: Duration,
    /// Grace period added to a job's deadline before the sweeper reclaims it.
    pub sweep_grace: Duration,
    /// Maximum retry attempts before a job is archived as failed.
    pub max_attempts: u32,
    /// Confabulation tokens that mark adapter output as hallucinated.
    pub hallucination_tokens: Vec<String>,
}

/// Fully resolved pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Object storage settings.
    pub storage: StorageConfig,
    /// Redis connection string backing the durable queue.
    pub redis_url: String,
    /// Postgres connection string backing the record store.
    pub database_url: String,
    /// AI adapter settings.
    pub ai: AiConfig,
    /// Operational settings.
    pub ops: OpsConfig,
}

impl PipelineConfig {
    /// Load and validate configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when a required variable is absent,
    /// or [`ConfigError::Invalid`] when a present variable fails to parse.
    pub fn from_env() -> ConfigResult<Self> {
        let storage = StorageConfig {
            endpoint: require("R2_ENDPOINT")?,
            access_key_id: require("R2_ACCESS_KEY_ID")?,
            secret_access_key: require("R2_SECRET_ACCESS_KEY")?,
            bucket_name: require("R2_BUCKET_NAME")?,
            public_url: optional("R2_PUBLIC_URL"),
        };

        let ai = AiConfig {
            gemini_api_key: require("GEMINI_API_KEY")?,
            gemini_model: optional("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.into()),
            openrouter_api_key: require("OPENROUTER_API_KEY")?,
            openrouter_model: optional("OPENROUTER_MODEL"),
        };

        let port = match optional("PORT") {
            Some(raw) => parse_u16(&raw, "PORT")?,
            None => 8080,
        };

        let worker_concurrency = match optional("WORKER_CONCURRENCY") {
            Some(raw) => parse_u32(&raw, "WORKER_CONCURRENCY")?,
            None => DEFAULT_WORKER_CONCURRENCY,
        };
        if worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                variable: "WORKER_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }

        let idle_timeout = match optional("IDLE_TIMEOUT") {
            Some(raw) => Duration::from_millis(parse_u64(&raw, "IDLE_TIMEOUT")?),
            None => DEFAULT_IDLE_TIMEOUT,
        };

        let tmp_dir = optional("TMP_DIR").unwrap_or_else(|| std::env::temp_dir().display().to_string());

        let allowed_origins = optional("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let hallucination_tokens = optional("HALLUCINATION_TOKENS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| {
                DEFAULT_HALLUCINATION_TOKENS
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect()
            });

        let ops = OpsConfig {
            port,
            worker_concurrency,
            idle_timeout,
            tmp_dir,
            allowed_origins,
            stage_deadline: DEFAULT_STAGE_DEADLINE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_grace: DEFAULT_SWEEP_GRACE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            hallucination_tokens,
        };

        Ok(Self {
            storage,
            redis_url: require("REDIS_URL")?,
            database_url: require("DATABASE_URL")?,
            ai,
            ops,
        })
    }
}

fn require(variable: &'static str) -> ConfigResult<String> {
    std::env::var(variable)
        .map_err(|_| ConfigError::Missing { variable })
        .and_then(|value| {
            if value.trim().is_empty() {
                Err(ConfigError::Missing { variable })
            } else {
                Ok(value)
            }
        })
}

fn optional(variable: &'static str) -> Option<String> {
    std::env::var(variable)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_u16(raw: &str, variable: &'static str) -> ConfigResult<u16> {
    raw.parse::<u16>().map_err(|err| ConfigError::Invalid {
        variable,
        reason: err.to_string(),
    })
}

fn parse_u32(raw: &str, variable: &'static str) -> ConfigResult<u32> {
    raw.parse::<u32>().map_err(|err| ConfigError::Invalid {
        variable,
        reason: err.to_string(),
    })
}

fn parse_u64(raw: &str, variable: &'static str) -> ConfigResult<u64> {
    raw.parse::<u64>().map_err(|err| ConfigError::Invalid {
        variable,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "R2_ENDPOINT",
            "R2_ACCESS_KEY_ID",
            "R2_SECRET_ACCESS_KEY",
            "R2_BUCKET_NAME",
            "R2_PUBLIC_URL",
            "REDIS_URL",
            "DATABASE_URL",
            "GEMINI_API_KEY",
            "GEMINI_MODEL",
            "OPENROUTER_API_KEY",
            "OPENROUTER_MODEL",
            "PORT",
            "WORKER_CONCURRENCY",
            "IDLE_TIMEOUT",
            "TMP_DIR",
            "ALLOWED_ORIGINS",
            "HALLUCINATION_TOKENS",
        ] {
            // SAFETY: tests run serially via #[serial] and own the process env.
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    fn set_required() {
        // SAFETY: tests run serially via #[serial] and own the process env.
        unsafe {
            std::env::set_var("R2_ENDPOINT", "https://r2.example.com");
            std::env::set_var("R2_ACCESS_KEY_ID", "key");
            std::env::set_var("R2_SECRET_ACCESS_KEY", "secret");
            std::env::set_var("R2_BUCKET_NAME", "media");
            std::env::set_var("REDIS_URL", "redis://localhost:6379");
            std::env::set_var("DATABASE_URL", "postgres://localhost/pipeline");
            std::env::set_var("GEMINI_API_KEY", "gemini-key");
            std::env::set_var("OPENROUTER_API_KEY", "openrouter-key");
        }
    }

    #[test]
    #[serial]
    fn missing_required_variable_fails_fast() {
        clear_env();
        let err = PipelineConfig::from_env().expect_err("should fail without R2_ENDPOINT");
        assert!(matches!(err, ConfigError::Missing { variable: "R2_ENDPOINT" }));
    }

    #[test]
    #[serial]
    fn defaults_apply_when_optional_vars_absent() {
        clear_env();
        set_required();
        let config = PipelineConfig::from_env().expect("should load with defaults");
        assert_eq!(config.ai.gemini_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.ops.worker_concurrency, DEFAULT_WORKER_CONCURRENCY);
        assert_eq!(config.ops.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        assert_eq!(config.ops.port, 8080);
        assert!(config.ops.allowed_origins.is_empty());
        assert_eq!(
            config.ops.hallucination_tokens.len(),
            DEFAULT_HALLUCINATION_TOKENS.len()
        );
    }

    #[test]
    #[serial]
    fn invalid_worker_concurrency_is_rejected() {
        clear_env();
        set_required();
        // SAFETY: tests run serially via #[serial] and own the process env.
        unsafe {
            std::env::set_var("WORKER_CONCURRENCY", "0");
        }
        let err = PipelineConfig::from_env().expect_err("zero concurrency must be rejected");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                variable: "WORKER_CONCURRENCY",
                ..
            }
        ));
    }

    #[test]
    #[serial]
    fn allowed_origins_parsed_as_comma_separated_list() {
        clear_env();
        set_required();
        // SAFETY: tests run serially via #[serial] and own the process env.
        unsafe {
            std::env::set_var("ALLOWED_ORIGINS", "https://a.example, https://b.example");
        }
        let config = PipelineConfig::from_env().expect("should parse origins");
        assert_eq!(
            config.ops.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }
}
