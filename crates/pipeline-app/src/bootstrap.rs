//! Service wiring for the media pipeline binary.
//!
//! [`BootstrapDependencies::from_env`] constructs every collaborator from
//! process environment and CLI flags; [`run_app_with`] takes the assembled
//! dependencies and drives whichever subsystems `--role` selects until a
//! shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::time::Duration as StdDuration;

use chrono::Duration;
use clap::Parser;
use pipeline_api::{ApiServer, ApiState};
use pipeline_blob::S3Broker;
use pipeline_config::PipelineConfig;
use pipeline_core::{BlobBroker, JobQueue, LlmAdapter, RecordStore, SpeechAdapter, StageHandler};
use pipeline_events::EventBus;
use pipeline_handlers::{ArticleHandler, GeminiAdapter, OpenRouterAdapter, SummaryHandler, TranscriptionHandler};
use pipeline_queue::RedisQueue;
use pipeline_store::PgRecordStore;
use pipeline_telemetry::{GlobalContextGuard, LoggingConfig, Metrics};
use pipeline_worker::{DeadlineSweeper, IdleSupervisor, StageWorker, WorkerConfig};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

const DEFAULT_SUMMARY_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_ARTICLE_MODEL: &str = "openai/gpt-4o";
const WORKER_POLL_INTERVAL: StdDuration = StdDuration::from_secs(2);
const IDLE_CHECK_INTERVAL: StdDuration = StdDuration::from_secs(30);

/// Which subsystems a process instance should run.
///
/// Running every role in one process (`All`, the default) suits a small
/// deployment; splitting `Api`/`Worker`/`Sweeper` into separate processes
/// lets each scale independently behind the same Postgres/Redis/R2 backing
/// services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Serve the HTTP control plane and SSE progress bridge only.
    Api,
    /// Run the three stage-worker claim loops only.
    Worker,
    /// Run the deadline sweeper only.
    Sweeper,
    /// Run every subsystem in one process.
    All,
}

/// Command-line surface for the pipeline binary.
#[derive(Debug, Parser)]
#[command(name = "pipeline-app", about = "Media upload AI enrichment pipeline")]
struct Cli {
    /// Which subsystems this process instance should run.
    #[arg(long, value_enum, default_value = "all", env = "PIPELINE_ROLE")]
    role: Role,
}

/// Dependencies required to bootstrap the application.
pub(crate) struct BootstrapDependencies {
    role: Role,
    config: PipelineConfig,
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn JobQueue>,
    blob: Arc<dyn BlobBroker>,
    events: Arc<EventBus>,
    metrics: Metrics,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment and CLI flags.
    pub(crate) async fn from_env() -> AppResult<Self> {
        let cli = Cli::parse();
        let config = PipelineConfig::from_env().map_err(|err| AppError::config("pipeline_config.from_env", err))?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .map_err(|err| AppError::store("pg_pool.connect", pipeline_store::StoreError::QueryFailed {
                operation: "pg_pool.connect",
                source: err,
            }))?;
        let store = Arc::new(
            PgRecordStore::new(pool)
                .await
                .map_err(|err| AppError::store("pg_record_store.new", err))?,
        );

        let queue = Arc::new(
            RedisQueue::connect(&config.redis_url)
                .await
                .map_err(|err| AppError::queue("redis_queue.connect", err))?,
        );

        let blob = Arc::new(
            S3Broker::new(&config.storage)
                .await
                .map_err(|err| AppError::blob("s3_broker.new", err))?,
        );

        let events = Arc::new(EventBus::new());
        let metrics = Metrics::new().map_err(|err| AppError::telemetry("metrics.new", err))?;

        Ok(Self {
            role: cli.role,
            config,
            store,
            queue,
            blob,
            events,
            metrics,
        })
    }
}

/// Entry point for the application boot sequence.
///
/// # Errors
///
/// Returns an error if dependency construction or a subsystem fails to
/// start.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env().await?;
    Box::pin(run_app_with(dependencies)).await
}

/// Boot sequence that relies entirely on injected dependencies, for testing.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let logging = LoggingConfig::default();
    pipeline_telemetry::init_logging(&logging).map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("bootstrap");

    info!(role = ?dependencies.role, "pipeline application bootstrap starting");

    let BootstrapDependencies {
        role,
        config,
        store,
        queue,
        blob,
        events,
        metrics,
    } = dependencies;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_watcher(shutdown_tx.clone());

    let api_server = matches!(role, Role::Api | Role::All).then(|| {
        let state = Arc::new(ApiState::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&blob),
            Arc::clone(&events),
            metrics.clone(),
            config.ops.clone(),
            config.storage.bucket_name.clone(),
        ));
        ApiServer::new(state)
    });

    let worker_handles = if matches!(role, Role::Worker | Role::All) {
        spawn_stage_workers(&config, &store, &queue, &blob, &events, &metrics, shutdown_rx.clone())
    } else {
        Vec::new()
    };

    let sweeper_handle = matches!(role, Role::Sweeper | Role::All).then(|| {
        let sweeper = DeadlineSweeper::new(
            Arc::clone(&queue),
            metrics.clone(),
            config.ops.sweep_interval,
            Duration::from_std(config.ops.sweep_grace).unwrap_or(Duration::hours(2)),
        );
        tokio::spawn(sweeper.run(shutdown_rx.clone()))
    });

    let idle_supervisor_handle = matches!(role, Role::Worker | Role::All).then(|| {
        let supervisor = IdleSupervisor::new(
            Arc::clone(&queue),
            metrics.clone(),
            Arc::new(AtomicI64::new(chrono::Utc::now().timestamp_millis())),
            IDLE_CHECK_INTERVAL,
            config.ops.idle_timeout,
            shutdown_tx.clone(),
        );
        tokio::spawn(supervisor.run())
    });

    if let Some(server) = api_server {
        let port = config.ops.port;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        info!(%addr, "launching HTTP control plane");
        let mut shutdown_signal = shutdown_rx.clone();
        tokio::select! {
            result = server.serve(addr) => {
                result.map_err(|err| AppError::api_server("api_server.serve", err))?;
            }
            _ = shutdown_signal.changed() => {
                info!("shutdown signal received, dropping API listener");
            }
        }
    } else {
        shutdown_rx.clone().changed().await.ok();
    }

    let _ = shutdown_tx.send(true);

    for handle in worker_handles {
        if let Err(err) = handle.await {
            warn!(error = %err, "stage worker task panicked");
        }
    }
    if let Some(handle) = sweeper_handle
        && let Err(err) = handle.await
    {
        warn!(error = %err, "deadline sweeper task panicked");
    }
    if let Some(handle) = idle_supervisor_handle
        && let Err(err) = handle.await
    {
        warn!(error = %err, "idle supervisor task panicked");
    }

    info!("pipeline application shutdown complete");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn spawn_stage_workers(
    config: &PipelineConfig,
    store: &Arc<dyn RecordStore>,
    queue: &Arc<dyn JobQueue>,
    blob: &Arc<dyn BlobBroker>,
    events: &Arc<EventBus>,
    metrics: &Metrics,
    shutdown_rx: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let client = reqwest::Client::new();
    let gemini = Arc::new(GeminiAdapter::new(
        client.clone(),
        config.ai.gemini_api_key.clone(),
        config.ai.gemini_model.clone(),
    ));
    let openrouter = Arc::new(OpenRouterAdapter::new(client, config.ai.openrouter_api_key.clone()));

    let speech: Arc<dyn SpeechAdapter> = gemini.clone();
    let timestamp_llm: Arc<dyn LlmAdapter> = gemini;
    let summary_llm: Arc<dyn LlmAdapter> = openrouter.clone();
    let article_llm: Arc<dyn LlmAdapter> = openrouter;

    let summary_model = config
        .ai
        .openrouter_model
        .clone()
        .unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string());
    let article_model = DEFAULT_ARTICLE_MODEL.to_string();

    let last_activity = Arc::new(AtomicI64::new(chrono::Utc::now().timestamp_millis()));
    let worker_config = WorkerConfig {
        concurrency: config.ops.worker_concurrency,
        stage_deadline: Duration::from_std(config.ops.stage_deadline).unwrap_or(Duration::minutes(30)),
        poll_interval: WORKER_POLL_INTERVAL,
        max_attempts: config.ops.max_attempts,
    };

    let transcription: Arc<dyn StageHandler> = Arc::new(TranscriptionHandler::new(
        Arc::clone(store),
        Arc::clone(blob),
        speech,
        timestamp_llm,
        config.ai.gemini_model.clone(),
        Arc::clone(queue),
        config.ops.hallucination_tokens.clone(),
    ));
    let summary: Arc<dyn StageHandler> = Arc::new(SummaryHandler::new(
        Arc::clone(store),
        summary_llm,
        summary_model,
        Arc::clone(queue),
    ));
    let article: Arc<dyn StageHandler> = Arc::new(ArticleHandler::new(Arc::clone(store), article_llm, article_model));

    [transcription, summary, article]
        .into_iter()
        .map(|handler| {
            let worker = Arc::new(StageWorker::new(
                Arc::clone(queue),
                Arc::clone(store),
                handler,
                Arc::clone(events),
                metrics.clone(),
                worker_config.clone(),
                Arc::clone(&last_activity),
            ));
            tokio::spawn(worker.run(shutdown_rx.clone()))
        })
        .collect()
}

fn spawn_signal_watcher(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    let _ = shutdown_tx.send(true);
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT, shutting down"),
                _ = terminate.recv() => info!("received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received ctrl-c, shutting down");
        }
        let _ = shutdown_tx.send(true);
    });
}

#[cfg(test)]
mod tests {
    use pipeline_config::{AiConfig, OpsConfig, StorageConfig};
    use pipeline_test_support::{InMemoryBlobBroker, InMemoryJobQueue, InMemoryRecordStore};

    use super::*;

    #[test]
    fn role_default_is_all() {
        let cli = Cli::parse_from(["pipeline-app"]);
        assert_eq!(cli.role, Role::All);
    }

    #[test]
    fn role_parses_from_flag() {
        let cli = Cli::parse_from(["pipeline-app", "--role", "worker"]);
        assert_eq!(cli.role, Role::Worker);
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            storage: StorageConfig {
                endpoint: "https://storage.invalid".to_string(),
                access_key_id: "test".to_string(),
                secret_access_key: "test".to_string(),
                bucket_name: "test-bucket".to_string(),
                public_url: None,
            },
            redis_url: "redis://localhost".to_string(),
            database_url: "postgres://localhost".to_string(),
            ai: AiConfig {
                gemini_api_key: "test".to_string(),
                gemini_model: "gemini-2.0-flash".to_string(),
                openrouter_api_key: "test".to_string(),
                openrouter_model: None,
            },
            ops: OpsConfig {
                port: 0,
                worker_concurrency: 1,
                idle_timeout: StdDuration::from_secs(60),
                tmp_dir: std::env::temp_dir().display().to_string(),
                allowed_origins: vec![],
                stage_deadline: StdDuration::from_secs(60),
                sweep_interval: StdDuration::from_secs(60),
                sweep_grace: StdDuration::from_secs(60),
                max_attempts: 3,
                hallucination_tokens: vec![],
            },
        }
    }

    #[tokio::test]
    async fn spawn_stage_workers_starts_one_loop_per_stage_and_stops_on_shutdown() {
        let config = test_config();
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
        let blob: Arc<dyn BlobBroker> = Arc::new(InMemoryBlobBroker::new());
        let events = Arc::new(EventBus::new());
        let metrics = Metrics::new().expect("metrics registry");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = spawn_stage_workers(&config, &store, &queue, &blob, &events, &metrics, shutdown_rx);
        assert_eq!(handles.len(), 3);

        let _ = shutdown_tx.send(true);
        for handle in handles {
            handle.await.expect("stage worker task should join cleanly");
        }
    }
}
