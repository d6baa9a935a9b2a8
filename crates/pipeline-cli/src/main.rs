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
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Thin entrypoint delegating to [`pipeline_cli::run`].

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    pipeline_cli::run().await
}
