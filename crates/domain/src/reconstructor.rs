//! Read path: rebuild live aggregates from the latest snapshot plus later events.

use std::sync::Arc;

use common::AggregateId;
use event_store::{EventStore, Snapshot, SnapshotStore, Version};
use serde::de::DeserializeOwned;

use crate::aggregate::Aggregate;
use crate::codec::Codec;
use crate::error::DomainError;
use crate::registry::{AggregateKind, AggregateRegistry};

/// Loads aggregates by replaying the events that follow their latest
/// snapshot.
///
/// With a snapshot every K events, a load replays at most K events no matter
/// how long the history is. The reconstructor only reads: persisting a fresh
/// snapshot after a load is a separate, explicit caller action.
pub struct Reconstructor<ES, SS> {
    events: ES,
    snapshots: SS,
    registry: Arc<AggregateRegistry>,
}

impl<ES, SS> Reconstructor<ES, SS>
where
    ES: EventStore,
    SS: SnapshotStore,
{
    pub fn new(events: ES, snapshots: SS, registry: Arc<AggregateRegistry>) -> Self {
        Self {
            events,
            snapshots,
            registry,
        }
    }

    pub fn registry(&self) -> &AggregateRegistry {
        &self.registry
    }

    /// Rebuilds the current state of an aggregate.
    ///
    /// Fails with `AggregateNotFound` if the identity has neither a snapshot
    /// nor events, and with `StreamCorruption` if the stored versions do not
    /// continue the snapshot without gaps.
    #[tracing::instrument(skip(self))]
    pub async fn reconstruct<S, C>(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
    ) -> Result<Aggregate<S, C>, DomainError>
    where
        S: DeserializeOwned + Send + Sync + 'static,
        C: Codec,
    {
        let kind = self.registry.kind::<S, C>(aggregate_type)?;
        let snapshot = self.snapshots.load_latest(aggregate_id).await?;
        self.replay(kind, aggregate_id, snapshot, None).await
    }

    /// Rebuilds the state an aggregate had at `version`.
    ///
    /// Starts from the greatest snapshot not newer than `version`. Asking for
    /// a version past the end of the stream yields the current state.
    #[tracing::instrument(skip(self))]
    pub async fn reconstruct_at<S, C>(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
        version: Version,
    ) -> Result<Aggregate<S, C>, DomainError>
    where
        S: DeserializeOwned + Send + Sync + 'static,
        C: Codec,
    {
        let kind = self.registry.kind::<S, C>(aggregate_type)?;
        let snapshot = self
            .snapshots
            .load_at_or_before(aggregate_id, version)
            .await?;
        self.replay(kind, aggregate_id, snapshot, Some(version))
            .await
    }

    /// Rebuilds several aggregates of the same type.
    ///
    /// Each identity gets its own result, so a corrupt or undecodable record
    /// only fails the aggregate it belongs to.
    pub async fn reconstruct_many<S, C>(
        &self,
        aggregate_ids: &[AggregateId],
        aggregate_type: &str,
    ) -> Vec<(AggregateId, Result<Aggregate<S, C>, DomainError>)>
    where
        S: DeserializeOwned + Send + Sync + 'static,
        C: Codec,
    {
        let mut results = Vec::with_capacity(aggregate_ids.len());
        for aggregate_id in aggregate_ids {
            let result = self.reconstruct(aggregate_id, aggregate_type).await;
            results.push((aggregate_id.clone(), result));
        }
        results
    }

    async fn replay<S, C>(
        &self,
        kind: Arc<AggregateKind<S, C>>,
        aggregate_id: &AggregateId,
        snapshot: Option<Snapshot>,
        until: Option<Version>,
    ) -> Result<Aggregate<S, C>, DomainError>
    where
        S: DeserializeOwned + Send + Sync + 'static,
        C: Codec,
    {
        let aggregate_type = kind.aggregate_type();
        let mut aggregate = match snapshot {
            Some(snapshot) => {
                if snapshot.aggregate_type != aggregate_type {
                    tracing::error!(
                        %aggregate_id,
                        expected = aggregate_type,
                        found = %snapshot.aggregate_type,
                        "snapshot belongs to another aggregate type"
                    );
                    return Err(DomainError::SnapshotTypeMismatch {
                        aggregate_id: aggregate_id.clone(),
                        expected: aggregate_type.to_string(),
                        found: snapshot.aggregate_type,
                    });
                }
                let state = kind.codec().decode::<S>(&snapshot.state).map_err(|source| {
                    DomainError::Deserialization {
                        aggregate_id: aggregate_id.clone(),
                        version: snapshot.version,
                        source,
                    }
                })?;
                metrics::counter!("reconstruct_snapshot_hits_total").increment(1);
                tracing::debug!(snapshot_version = %snapshot.version, "restored from snapshot");
                Aggregate::restore(kind, aggregate_id.clone(), snapshot.version, state)
            }
            None => Aggregate::new(kind, aggregate_id.clone()),
        };

        let records = self
            .events
            .load_events(aggregate_id, aggregate.version())
            .await?;

        let mut replayed: u64 = 0;
        for record in &records {
            let past_target = until.is_some_and(|target| record.version > target);
            let applied = if past_target {
                aggregate.expect_next(record.version)
            } else {
                aggregate.replay(record)
            };

            if let Err(e) = applied {
                if matches!(e, DomainError::StreamCorruption { .. }) {
                    tracing::error!(%aggregate_id, error = %e, "event stream is corrupt");
                }
                return Err(e);
            }
            if past_target {
                break;
            }
            replayed += 1;
        }
        metrics::histogram!("reconstruct_events_replayed").record(replayed as f64);

        if aggregate.version() == Version::initial() {
            return Err(DomainError::AggregateNotFound {
                aggregate_type: aggregate_type.to_string(),
                aggregate_id: aggregate_id.clone(),
            });
        }

        tracing::debug!(version = %aggregate.version(), replayed, "aggregate reconstructed");
        Ok(aggregate)
    }
}
