//! Error types for the record store's Postgres access layer.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use pipeline_core::PipelineError;
use uuid::Uuid;

/// Result alias for record store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by the record store before being mapped onto
/// [`PipelineError`] at the [`pipeline_core::RecordStore`] trait boundary.
#[derive(Debug)]
pub enum StoreError {
    /// Migration execution failed.
    MigrationFailed {
        /// Underlying migration error.
        source: sqlx::migrate::MigrateError,
    },
    /// A database operation failed.
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// A status-predicated `UPDATE` matched zero rows: either the record
    /// does not exist, or a concurrent writer already moved it out of the
    /// expected prior status.
    PredicateFailed {
        /// Record the predicate was checked against.
        record_id: Uuid,
    },
    /// The requested record does not exist (or is soft-deleted).
    NotFound {
        /// Missing record identifier.
        record_id: Uuid,
    },
}

impl Display for StoreError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MigrationFailed { .. } => formatter.write_str("migration failed"),
            Self::QueryFailed { .. } => formatter.write_str("database operation failed"),
            Self::PredicateFailed { record_id } => {
                write!(formatter, "stale state for record {record_id}")
            }
            Self::NotFound { record_id } => write!(formatter, "record {record_id} not found"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MigrationFailed { source } => Some(source),
            Self::QueryFailed { source, .. } => Some(source),
            Self::PredicateFailed { .. } | Self::NotFound { .. } => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(source: sqlx::Error) -> Self {
        Self::QueryFailed {
            operation: "sqlx operation",
            source,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::PredicateFailed { record_id } => Self::StaleState { record_id },
            StoreError::NotFound { record_id } => Self::NotFound { record_id },
            other @ (StoreError::MigrationFailed { .. } | StoreError::QueryFailed { .. }) => {
                Self::transient("record_store.query", other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_and_source() {
        let migration = StoreError::MigrationFailed {
            source: sqlx::migrate::MigrateError::VersionMissing(1),
        };
        assert_eq!(migration.to_string(), "migration failed");
        assert!(migration.source().is_some());

        let query = StoreError::QueryFailed {
            operation: "fetch",
            source: sqlx::Error::RowNotFound,
        };
        assert_eq!(query.to_string(), "database operation failed");
        assert!(query.source().is_some());

        let record_id = Uuid::nil();
        let predicate = StoreError::PredicateFailed { record_id };
        assert!(predicate.source().is_none());
        assert!(matches!(
            PipelineError::from(predicate),
            PipelineError::StaleState { .. }
        ));

        let missing = StoreError::NotFound { record_id };
        assert!(matches!(
            PipelineError::from(missing),
            PipelineError::NotFound { .. }
        ));
    }
}
