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

//! Typed Postgres-backed persistence for `Record` entities: status-predicated
//! atomic transitions, soft delete, and stale-upload GC.

pub mod error;
pub mod runtime;

pub use error::{StoreError, StoreResult};
pub use runtime::PgRecordStore;
