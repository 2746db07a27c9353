//! Domain error types.

use common::AggregateId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::cart::CartError;
use crate::codec::CodecError;

/// Errors that can occur while loading, changing or persisting aggregates.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event or snapshot store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Neither a snapshot nor any events exist for the identity.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: String,
        aggregate_id: AggregateId,
    },

    /// The stored history has a gap or a duplicate version.
    #[error(
        "Stream corruption in aggregate {aggregate_id}: expected version {expected}, found {found}"
    )]
    StreamCorruption {
        aggregate_id: AggregateId,
        expected: Version,
        found: Version,
    },

    /// A stored payload or snapshot state could not be decoded.
    #[error("Cannot decode record of aggregate {aggregate_id} at version {version}: {source}")]
    Deserialization {
        aggregate_id: AggregateId,
        version: Version,
        #[source]
        source: CodecError,
    },

    /// An event, metadata or state value could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[source] CodecError),

    /// No kind is registered for the aggregate type.
    #[error("Unknown aggregate type: {0}")]
    UnknownAggregateType(String),

    /// The aggregate type is registered with a different state or codec.
    #[error("Aggregate type {0} is registered with a different state or codec type")]
    AggregateTypeMismatch(String),

    /// The latest snapshot of the identity belongs to another aggregate type.
    #[error("Snapshot of aggregate {aggregate_id} has type {found}, expected {expected}")]
    SnapshotTypeMismatch {
        aggregate_id: AggregateId,
        expected: String,
        found: String,
    },

    /// The aggregate type has no transition for the event type.
    #[error("Aggregate type {aggregate_type} has no transition for event type {event_type}")]
    UnknownEventType {
        aggregate_type: String,
        event_type: String,
    },

    /// A cart command was rejected.
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),
}

impl DomainError {
    /// Returns true if another writer advanced the aggregate first.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::EventStore(EventStoreError::ConcurrencyConflict { .. })
        )
    }
}
