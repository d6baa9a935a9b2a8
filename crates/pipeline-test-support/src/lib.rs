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
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]
#![allow(unexpected_cfgs)]

//! Shared test helpers used across integration suites: a Docker-daemon
//! availability probe, a disposable local Postgres spinner for tests that
//! exercise Postgres-backed repositories without a fixture database already
//! running, and in-memory `RecordStore`/`JobQueue`/`BlobBroker` doubles for
//! handler and worker unit tests that need none of the above.

pub mod doubles;
pub mod fixtures;
pub mod postgres;

pub use doubles::{
    InMemoryBlobBroker, InMemoryJobQueue, InMemoryRecordStore, sample_job, sample_record,
};
pub use fixtures::docker_available;
pub use postgres::{TestDatabase, start_postgres};
