//! The aggregate capability consumed by the persistence engine.

use std::sync::Arc;

use common::AggregateId;
use event_store::{EventRecord, NewEvent, Version};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::codec::{Codec, JsonCodec};
use crate::error::DomainError;
use crate::registry::{AggregateKind, TransitionError};

/// Trait for domain events.
///
/// Domain events are facts that have happened. Each event type carries a
/// constant tag that is stored as the record's `event_type` and used to look
/// up the matching state transition on replay.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The stored discriminator of this event type.
    const EVENT_TYPE: &'static str;
}

/// Side-channel data attached to recorded events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// A live aggregate: identity, persisted version, state, and the events
/// recorded since the last successful append.
///
/// State only changes by running events through the transition table of the
/// aggregate's [`AggregateKind`], both when recording new events and when
/// replaying history.
pub struct Aggregate<S, C = JsonCodec> {
    id: AggregateId,
    kind: Arc<AggregateKind<S, C>>,
    version: Version,
    state: S,
    uncommitted: Vec<NewEvent>,
}

impl<S, C> Aggregate<S, C>
where
    S: Send + Sync + 'static,
    C: Codec,
{
    /// Creates an empty aggregate at version 0.
    pub fn new(kind: Arc<AggregateKind<S, C>>, id: AggregateId) -> Self {
        let state = kind.empty_state();
        Self::restore(kind, id, Version::initial(), state)
    }

    /// Creates an aggregate from previously materialized state.
    pub(crate) fn restore(
        kind: Arc<AggregateKind<S, C>>,
        id: AggregateId,
        version: Version,
        state: S,
    ) -> Self {
        Self {
            id,
            kind,
            version,
            state,
            uncommitted: Vec::new(),
        }
    }

    /// Returns the aggregate's identity.
    pub fn id(&self) -> &AggregateId {
        &self.id
    }

    /// Returns the aggregate type name.
    pub fn aggregate_type(&self) -> &'static str {
        self.kind.aggregate_type()
    }

    /// Returns the kind descriptor this aggregate dispatches through.
    pub fn kind(&self) -> &AggregateKind<S, C> {
        &self.kind
    }

    /// Returns the version of the last persisted or replayed event.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the version the aggregate will have once its uncommitted
    /// events are appended.
    pub fn pending_version(&self) -> Version {
        self.version.advance(self.uncommitted.len())
    }

    /// Returns the current state, including the effect of uncommitted events.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Returns the events recorded since the last successful append, in order.
    pub fn uncommitted_events(&self) -> &[NewEvent] {
        &self.uncommitted
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Applies a new event to the state and buffers it for the next append.
    pub fn record<E: DomainEvent>(&mut self, event: E) -> Result<(), DomainError> {
        self.record_event(&event, None)
    }

    /// Like [`Aggregate::record`], attaching causation/correlation metadata.
    pub fn record_with_metadata<E: DomainEvent>(
        &mut self,
        event: E,
        metadata: &EventMetadata,
    ) -> Result<(), DomainError> {
        self.record_event(&event, Some(metadata))
    }

    fn record_event<E: DomainEvent>(
        &mut self,
        event: &E,
        metadata: Option<&EventMetadata>,
    ) -> Result<(), DomainError> {
        let codec = self.kind.codec();
        let payload = codec.encode(event).map_err(DomainError::Serialization)?;
        let metadata = metadata
            .map(|m| codec.encode(m))
            .transpose()
            .map_err(DomainError::Serialization)?;

        let result = self.kind.apply(&mut self.state, E::EVENT_TYPE, &payload);
        if let Err(e) = result {
            return Err(self.transition_failed(E::EVENT_TYPE, self.pending_version().next(), e));
        }

        let mut new_event = NewEvent::new(E::EVENT_TYPE, payload);
        new_event.metadata = metadata;
        self.uncommitted.push(new_event);
        Ok(())
    }

    /// Applies a stored event during reconstruction.
    ///
    /// The record must carry exactly the next version; anything else means
    /// the stream has a gap or a duplicate.
    pub(crate) fn replay(&mut self, record: &EventRecord) -> Result<(), DomainError> {
        self.expect_next(record.version)?;

        let result = self
            .kind
            .apply(&mut self.state, &record.event_type, &record.payload);
        if let Err(e) = result {
            return Err(self.transition_failed(&record.event_type, record.version, e));
        }

        self.version = record.version;
        Ok(())
    }

    pub(crate) fn expect_next(&self, found: Version) -> Result<(), DomainError> {
        let expected = self.version.next();
        if found != expected {
            return Err(DomainError::StreamCorruption {
                aggregate_id: self.id.clone(),
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Clears the uncommitted buffer after a successful append.
    pub(crate) fn mark_committed(&mut self, version: Version) {
        self.uncommitted.clear();
        self.version = version;
    }

    fn transition_failed(
        &self,
        event_type: &str,
        version: Version,
        error: TransitionError,
    ) -> DomainError {
        match error {
            TransitionError::Unhandled => DomainError::UnknownEventType {
                aggregate_type: self.aggregate_type().to_string(),
                event_type: event_type.to_string(),
            },
            TransitionError::Codec(source) => DomainError::Deserialization {
                aggregate_id: self.id.clone(),
                version,
                source,
            },
        }
    }
}

impl<S: Clone, C> Clone for Aggregate<S, C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            kind: Arc::clone(&self.kind),
            version: self.version,
            state: self.state.clone(),
            uncommitted: self.uncommitted.clone(),
        }
    }
}

impl<S: std::fmt::Debug, C> std::fmt::Debug for Aggregate<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregate")
            .field("id", &self.id)
            .field("aggregate_type", &self.kind.aggregate_type())
            .field("version", &self.version)
            .field("state", &self.state)
            .field("uncommitted", &self.uncommitted.len())
            .finish()
    }
}
