use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AggregateId;

/// Unique identifier for a stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Version number of an aggregate stream, used for optimistic concurrency control.
///
/// Version 0 means nothing has been persisted. The first event of a stream
/// carries version 1 and every subsequent event increments it by exactly one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of an empty stream.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version (1) of the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the version reached after `count` more events.
    pub fn advance(&self, count: usize) -> Self {
        Self(self.0 + count as i64)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// An event produced by an aggregate that has not been persisted yet.
///
/// The store assigns `event_id`, `version` and `stored_at` when the event is
/// appended. Payload and metadata are opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// The kind of the event (e.g., "CartOpened").
    pub event_type: String,

    /// Serialized event-specific data.
    pub payload: Vec<u8>,

    /// Serialized side-channel data (causation, correlation, actor).
    pub metadata: Option<Vec<u8>>,

    /// When the domain produced the event.
    pub occurred_on: DateTime<Utc>,
}

impl NewEvent {
    /// Creates an uncommitted event that occurred now.
    pub fn new(event_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
            metadata: None,
            occurred_on: Utc::now(),
        }
    }

    /// Attaches serialized metadata.
    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Overrides the domain timestamp.
    pub fn occurred_on(mut self, occurred_on: DateTime<Utc>) -> Self {
        self.occurred_on = occurred_on;
        self
    }
}

/// Position of an event in storage order.
///
/// Events are ordered by `stored_at` and then by `position`, a store-wide
/// sequence number. Passing a cursor back to
/// [`EventStore::load_events_by_type`](crate::EventStore::load_events_by_type)
/// resumes strictly after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventCursor {
    pub stored_at: DateTime<Utc>,
    pub position: i64,
}

/// A persisted domain event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Globally unique identifier, assigned at append.
    pub event_id: EventId,

    /// The kind of the event (e.g., "CartOpened", "ItemAdded").
    pub event_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// The kind of aggregate (e.g., "Cart").
    pub aggregate_type: String,

    /// The version of the aggregate after this event.
    pub version: Version,

    /// Serialized event-specific data.
    pub payload: Vec<u8>,

    /// Serialized side-channel data.
    pub metadata: Option<Vec<u8>>,

    /// Domain timestamp set when the event was produced.
    pub occurred_on: DateTime<Utc>,

    /// Physical timestamp set by the store at persistence time.
    pub stored_at: DateTime<Utc>,

    /// Store-wide storage sequence number.
    pub position: i64,
}

impl EventRecord {
    /// Returns the storage-order cursor of this record.
    pub fn cursor(&self) -> EventCursor {
        EventCursor {
            stored_at: self.stored_at,
            position: self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_new_creates_unique_ids() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
    }

    #[test]
    fn version_initial_and_first() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::initial().next(), Version::first());
        assert_eq!(Version::initial().advance(3), Version::new(3));
    }

    #[test]
    fn new_event_builder() {
        let occurred_on = Utc::now() - chrono::Duration::seconds(10);
        let event = NewEvent::new("ItemAdded", b"{\"qty\":2}".to_vec())
            .with_metadata(b"{\"actor\":\"alice\"}".to_vec())
            .occurred_on(occurred_on);

        assert_eq!(event.event_type, "ItemAdded");
        assert_eq!(event.payload, b"{\"qty\":2}");
        assert_eq!(event.metadata.as_deref(), Some(&b"{\"actor\":\"alice\"}"[..]));
        assert_eq!(event.occurred_on, occurred_on);
    }

    #[test]
    fn cursors_order_by_stored_at_then_position() {
        let now = Utc::now();
        let a = EventCursor {
            stored_at: now,
            position: 7,
        };
        let b = EventCursor {
            stored_at: now,
            position: 8,
        };
        let c = EventCursor {
            stored_at: now + chrono::Duration::milliseconds(1),
            position: 1,
        };
        assert!(a < b);
        assert!(b < c);
    }
}
