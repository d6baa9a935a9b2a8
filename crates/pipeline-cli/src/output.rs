//! Output renderers and formatting helpers for CLI commands.

use anyhow::anyhow;
use pipeline_api_models::{HealthResponse, JobStatusResponse, RecordListResponse, RecordView, RetryResponse};

use crate::cli::OutputFormat;
use crate::client::{CliError, CliResult};

pub(crate) fn render_health(health: &HealthResponse, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(health)?,
        OutputFormat::Table => println!("status: {}\ntimestamp: {}", health.status, health.timestamp),
    }
    Ok(())
}

pub(crate) fn render_record(record: &RecordView, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(record)?,
        OutputFormat::Table => {
            println!("id: {}", record.id);
            println!("file_name: {}", record.file_name);
            println!("status: {:?}", record.status);
            if let Some(step) = record.processing_step {
                println!("processing_step: {step:?}");
            }
            if let Some(progress) = record.processing_progress {
                println!("progress: {progress}%");
            }
            if let Some(error) = &record.error {
                println!("error: {error}");
            }
            println!("created_at: {}", record.created_at);
            if let Some(url) = &record.download_url {
                println!("download_url: {url}");
            }
        }
    }
    Ok(())
}

pub(crate) fn render_record_list(list: &RecordListResponse, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(list)?,
        OutputFormat::Table => {
            println!("{:<36} {:<12} {:>4} NAME", "ID", "STATUS", "PCT");
            for record in &list.records {
                let progress = record
                    .processing_progress
                    .map_or_else(String::new, |pct| format!("{pct}%"));
                println!(
                    "{:<36} {:<12} {:>4} {}",
                    record.id,
                    format!("{:?}", record.status),
                    progress,
                    record.file_name
                );
            }
            println!(
                "page {}/{} (page_size {}, total {})",
                list.pagination.page,
                list.pagination.total.div_ceil(u64::from(list.pagination.page_size)),
                list.pagination.page_size,
                list.pagination.total
            );
        }
    }
    Ok(())
}

pub(crate) fn render_retry(response: &RetryResponse, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(response)?,
        OutputFormat::Table => println!("record {} re-enqueued as job {}", response.record_id, response.job_id),
    }
    Ok(())
}

pub(crate) fn render_job_status(status: &JobStatusResponse, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(status)?,
        OutputFormat::Table => match status {
            JobStatusResponse::Job {
                id,
                state,
                stage,
                record_id,
                attempt,
            } => {
                println!("job: {id}");
                println!("state: {state:?}");
                println!("stage: {stage:?}");
                println!("record_id: {record_id}");
                println!("attempt: {attempt}");
            }
            JobStatusResponse::Record { id, status, progress } => {
                println!("no live job; synthesized from record {id}");
                println!("status: {status:?}");
                println!("progress: {progress}%");
            }
        },
    }
    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
    println!("{text}");
    Ok(())
}
