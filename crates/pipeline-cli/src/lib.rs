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

//! Operator CLI for interacting with a deployed pipeline control plane.
//!
//! Layout: `cli.rs` (argument parsing, command dispatch), `client.rs`
//! (HTTP context and problem-response classification), `output.rs`
//! (JSON/table renderers), with a thin `main.rs` that delegates to `run()`.

mod cli;
mod client;
mod output;

pub use cli::run;
