//! Argument parsing and command dispatch for the operator CLI.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use pipeline_api_models::{HealthResponse, JobStatusResponse, RecordListResponse, RecordView, RetryRequest, RetryResponse};
use reqwest::Url;
use uuid::Uuid;

use crate::client::{AppContext, CliError, CliResult, classify_problem, parse_url};
use crate::output::{render_health, render_job_status, render_record, render_record_list, render_retry};

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Operator CLI fronting the pipeline control-plane HTTP API.
#[derive(Debug, Parser)]
#[command(name = "pipeline-cli", about = "Operate a media pipeline deployment")]
struct Cli {
    /// Base URL of the control-plane HTTP API.
    #[arg(long, env = "PIPELINE_API_URL", default_value = DEFAULT_BASE_URL, value_parser = parse_url)]
    base_url: Url,

    /// Request timeout, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Output rendering format.
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

/// Output rendering format shared by every subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Pretty-printed JSON.
    Json,
    /// Human-readable table/summary text.
    Table,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check the control plane's liveness.
    Health,
    /// Inspect or resume records.
    #[command(subcommand)]
    Records(RecordsCommand),
    /// Inspect queue/record job status.
    Jobs(JobsArgs),
}

#[derive(Debug, Subcommand)]
enum RecordsCommand {
    /// List records, most recent first.
    List(RecordsListArgs),
    /// Fetch a single record by id.
    Get(RecordIdArgs),
    /// Resume processing a record at a given stage.
    Retry(RecordsRetryArgs),
}

#[derive(Debug, clap::Args)]
struct RecordsListArgs {
    /// 1-based page number.
    #[arg(long, default_value_t = 1)]
    page: u32,
    /// Records per page.
    #[arg(long, default_value_t = 20)]
    page_size: u32,
}

#[derive(Debug, clap::Args)]
struct RecordIdArgs {
    /// Record identifier.
    id: Uuid,
}

#[derive(Debug, clap::Args)]
struct RecordsRetryArgs {
    /// Record identifier.
    id: Uuid,
    /// Stage to resume from (1|2 transcription, 3 summary, 4 article).
    /// Required unless the record is already in the `ERROR` status.
    #[arg(long)]
    step: Option<u8>,
}

#[derive(Debug, clap::Args)]
struct JobsArgs {
    #[command(subcommand)]
    command: JobsCommand,
}

#[derive(Debug, Subcommand)]
enum JobsCommand {
    /// Look up a job by id, falling back to the record store.
    Status(RecordIdArgs),
}

/// Parse arguments, run the selected command, and return the process exit
/// code (`0` success, `2` validation failure, `3` operational failure).
pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    let format = cli.format;

    let context = match AppContext::new(cli.base_url.clone(), Duration::from_secs(cli.timeout)) {
        Ok(context) => context,
        Err(err) => return report(&err),
    };

    let outcome = match cli.command {
        Command::Health => health(&context, format).await,
        Command::Records(RecordsCommand::List(args)) => records_list(&context, &args, format).await,
        Command::Records(RecordsCommand::Get(args)) => records_get(&context, &args, format).await,
        Command::Records(RecordsCommand::Retry(args)) => records_retry(&context, &args, format).await,
        Command::Jobs(JobsArgs {
            command: JobsCommand::Status(args),
        }) => jobs_status(&context, &args, format).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

fn report(err: &CliError) -> ExitCode {
    eprintln!("error: {}", err.display_message());
    ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
}

async fn health(context: &AppContext, format: OutputFormat) -> CliResult<()> {
    let response = context
        .client
        .get(context.url("/api/health"))
        .send()
        .await
        .map_err(CliError::failure)?;

    if !response.status().is_success() {
        return Err(classify_problem(response).await);
    }

    let body: HealthResponse = response.json().await.map_err(CliError::failure)?;
    render_health(&body, format)
}

async fn records_list(context: &AppContext, args: &RecordsListArgs, format: OutputFormat) -> CliResult<()> {
    let response = context
        .client
        .get(context.url("/api/records"))
        .query(&[("page", args.page), ("pageSize", args.page_size)])
        .send()
        .await
        .map_err(CliError::failure)?;

    if !response.status().is_success() {
        return Err(classify_problem(response).await);
    }

    let body: RecordListResponse = response.json().await.map_err(CliError::failure)?;
    render_record_list(&body, format)
}

async fn records_get(context: &AppContext, args: &RecordIdArgs, format: OutputFormat) -> CliResult<()> {
    let response = context
        .client
        .get(context.url(&format!("/api/records/{}", args.id)))
        .send()
        .await
        .map_err(CliError::failure)?;

    if !response.status().is_success() {
        return Err(classify_problem(response).await);
    }

    let body: RecordView = response.json().await.map_err(CliError::failure)?;
    render_record(&body, format)
}

async fn records_retry(context: &AppContext, args: &RecordsRetryArgs, format: OutputFormat) -> CliResult<()> {
    let step = args
        .step
        .map(pipeline_api_models::RetryStep::try_from)
        .transpose()
        .map_err(CliError::validation)?;

    let response = context
        .client
        .post(context.url(&format!("/api/records/{}/retry", args.id)))
        .json(&RetryRequest { step })
        .send()
        .await
        .map_err(CliError::failure)?;

    if !response.status().is_success() {
        return Err(classify_problem(response).await);
    }

    let body: RetryResponse = response.json().await.map_err(CliError::failure)?;
    render_retry(&body, format)
}

async fn jobs_status(context: &AppContext, args: &RecordIdArgs, format: OutputFormat) -> CliResult<()> {
    let response = context
        .client
        .get(context.url(&format!("/api/job-status/{}", args.id)))
        .send()
        .await
        .map_err(CliError::failure)?;

    if !response.status().is_success() {
        return Err(classify_problem(response).await);
    }

    let body: JobStatusResponse = response.json().await.map_err(CliError::failure)?;
    render_job_status(&body, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_default_role_and_format() {
        let cli = Cli::parse_from(["pipeline-cli", "health"]);
        assert_eq!(cli.format, OutputFormat::Table);
        assert_eq!(cli.base_url.as_str(), DEFAULT_BASE_URL);
        assert!(matches!(cli.command, Command::Health));
    }

    #[test]
    fn cli_parses_records_retry_with_step() {
        let cli = Cli::parse_from([
            "pipeline-cli",
            "records",
            "retry",
            "00000000-0000-0000-0000-000000000001",
            "--step",
            "3",
        ]);
        match cli.command {
            Command::Records(RecordsCommand::Retry(args)) => assert_eq!(args.step, Some(3)),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
