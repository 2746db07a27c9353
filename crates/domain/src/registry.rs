//! Aggregate-type registry: empty-state constructors and per-type transition tables.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::aggregate::DomainEvent;
use crate::codec::{Codec, CodecError, JsonCodec};
use crate::error::DomainError;

type Transition<S, C> = Box<dyn Fn(&C, &mut S, &[u8]) -> Result<(), CodecError> + Send + Sync>;

/// Why a stored or recorded event could not be applied.
#[derive(Debug)]
pub(crate) enum TransitionError {
    /// No transition is registered for the event type.
    Unhandled,
    /// The payload did not decode into the registered event type.
    Codec(CodecError),
}

/// Describes one aggregate type: its name, how to build its empty state, the
/// codec for its payloads and snapshots, and the table mapping each event
/// type tag to a pure state transition.
///
/// ```ignore
/// let kind = AggregateKind::new("Cart", Cart::default)
///     .on(Cart::opened)
///     .on(Cart::item_added);
/// ```
pub struct AggregateKind<S, C = JsonCodec> {
    aggregate_type: &'static str,
    empty: fn() -> S,
    codec: C,
    transitions: HashMap<&'static str, Transition<S, C>>,
}

impl<S> AggregateKind<S, JsonCodec>
where
    S: Send + Sync + 'static,
{
    /// Creates a kind that encodes payloads and state as JSON.
    pub fn new(aggregate_type: &'static str, empty: fn() -> S) -> Self {
        Self::with_codec(aggregate_type, empty, JsonCodec)
    }
}

impl<S, C> AggregateKind<S, C> {
    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Builds the state of an aggregate that has no history.
    pub fn empty_state(&self) -> S {
        (self.empty)()
    }

    /// Returns true if a transition is registered for the event type.
    pub fn handles(&self, event_type: &str) -> bool {
        self.transitions.contains_key(event_type)
    }
}

impl<S, C> AggregateKind<S, C>
where
    S: Send + Sync + 'static,
    C: Codec,
{
    /// Creates a kind with an explicit codec.
    pub fn with_codec(aggregate_type: &'static str, empty: fn() -> S, codec: C) -> Self {
        Self {
            aggregate_type,
            empty,
            codec,
            transitions: HashMap::new(),
        }
    }

    /// Registers the transition for event type `E`, replacing any previous one.
    pub fn on<E: DomainEvent>(mut self, transition: fn(&mut S, E)) -> Self {
        self.transitions.insert(
            E::EVENT_TYPE,
            Box::new(move |codec: &C, state: &mut S, payload: &[u8]| {
                let event: E = codec.decode(payload)?;
                transition(state, event);
                Ok(())
            }),
        );
        self
    }

    /// Looks up the transition for `event_type` and applies the decoded payload.
    pub(crate) fn apply(
        &self,
        state: &mut S,
        event_type: &str,
        payload: &[u8],
    ) -> Result<(), TransitionError> {
        let transition = self
            .transitions
            .get(event_type)
            .ok_or(TransitionError::Unhandled)?;
        transition(&self.codec, state, payload).map_err(TransitionError::Codec)
    }
}

/// Maps aggregate type names to their [`AggregateKind`].
///
/// Built once by the domain layer and handed to the reconstructor and
/// repository at construction.
#[derive(Default)]
pub struct AggregateRegistry {
    kinds: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl AggregateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kind under its aggregate type name, replacing any previous one.
    pub fn register<S, C>(&mut self, kind: AggregateKind<S, C>) -> &mut Self
    where
        S: Send + Sync + 'static,
        C: Codec,
    {
        tracing::debug!(aggregate_type = kind.aggregate_type(), "registering aggregate kind");
        self.kinds.insert(kind.aggregate_type(), Arc::new(kind));
        self
    }

    /// Builder-style variant of [`AggregateRegistry::register`].
    pub fn with<S, C>(mut self, kind: AggregateKind<S, C>) -> Self
    where
        S: Send + Sync + 'static,
        C: Codec,
    {
        self.register(kind);
        self
    }

    pub fn contains(&self, aggregate_type: &str) -> bool {
        self.kinds.contains_key(aggregate_type)
    }

    /// Returns the kind registered for `aggregate_type`.
    ///
    /// Fails with `UnknownAggregateType` if nothing is registered under that
    /// name, or `AggregateTypeMismatch` if it was registered with a different
    /// state or codec type.
    pub fn kind<S, C>(&self, aggregate_type: &str) -> Result<Arc<AggregateKind<S, C>>, DomainError>
    where
        S: Send + Sync + 'static,
        C: Codec,
    {
        let kind = self
            .kinds
            .get(aggregate_type)
            .ok_or_else(|| DomainError::UnknownAggregateType(aggregate_type.to_string()))?;
        Arc::clone(kind)
            .downcast::<AggregateKind<S, C>>()
            .map_err(|_| DomainError::AggregateTypeMismatch(aggregate_type.to_string()))
    }
}
