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
#![allow(clippy::multiple_crate_versions)]

//! Binary entrypoint that wires the media pipeline's collaborators together
//! and launches whichever subsystems `--role` selects.
//!
//! Layout: `bootstrap.rs` (dependency construction and the `--role`
//! dispatch), `error.rs` (process-boundary error taxonomy).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Process-boundary error taxonomy.
pub mod error;

pub use bootstrap::run_app;
