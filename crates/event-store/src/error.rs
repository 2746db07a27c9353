use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with the event or snapshot store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The aggregate's persisted version did not match the caller's expected version.
    /// The caller should reload the aggregate and retry.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// A snapshot already exists for this aggregate at this version.
    #[error("Snapshot already exists for aggregate {aggregate_id} at version {version}")]
    DuplicateSnapshot {
        aggregate_id: AggregateId,
        version: Version,
    },

    /// An append was attempted with no events.
    #[error("Cannot append an empty batch to aggregate {0}")]
    EmptyAppend(AggregateId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl EventStoreError {
    /// Returns true for errors that callers are expected to handle by
    /// reloading and retrying, or by treating as a no-op.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventStoreError::ConcurrencyConflict { .. } | EventStoreError::DuplicateSnapshot { .. }
        )
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
