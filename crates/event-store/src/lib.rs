//! Append-only event log and snapshot store for event-sourced aggregates.
//!
//! Both stores are payload-agnostic: event payloads, metadata and snapshot
//! states are opaque bytes produced and interpreted by the domain layer.

pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use config::StoreConfig;
pub use error::{EventStoreError, Result};
pub use event::{EventCursor, EventId, EventRecord, NewEvent, Version};
pub use memory::{InMemoryEventStore, InMemorySnapshotStore};
pub use postgres::{PostgresEventStore, PostgresSnapshotStore};
pub use query::EventTypeQuery;
pub use snapshot::{Snapshot, SnapshotRetention, SnapshotStore};
pub use store::{EventStore, EventStoreExt, EventStream};
