//! Write path: persist recorded events, checkpoint state, run commands.

use std::sync::Arc;

use common::AggregateId;
use event_store::{EventStore, EventStoreError, Snapshot, SnapshotStore, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::Aggregate;
use crate::codec::{Codec, JsonCodec};
use crate::config::RepositoryConfig;
use crate::error::DomainError;
use crate::reconstructor::Reconstructor;
use crate::registry::AggregateRegistry;

/// Outcome of a successful [`Repository::save`].
///
/// The append is durable once this is returned, whatever happened to the
/// snapshot that followed it.
#[derive(Debug)]
pub struct Saved {
    /// Version of the aggregate after the append.
    pub version: Version,

    /// Result of the automatic snapshot, or `None` if the save did not cross
    /// a snapshot boundary.
    pub snapshot: Option<Result<bool, DomainError>>,
}

impl Saved {
    /// Returns the snapshot error, if the automatic snapshot failed.
    pub fn snapshot_error(&self) -> Option<&DomainError> {
        self.snapshot.as_ref().and_then(|result| result.as_ref().err())
    }
}

/// Result of [`Repository::execute`].
#[derive(Debug)]
pub struct CommandResult<S, C = JsonCodec> {
    /// The aggregate after the command's events were persisted.
    pub aggregate: Aggregate<S, C>,

    /// Version and snapshot outcome of the final save.
    pub saved: Saved,
}

/// Loads and saves aggregates against an event store and a snapshot store.
///
/// The repository is the only place that clears an aggregate's uncommitted
/// buffer, and it does so only after the append succeeded.
pub struct Repository<ES, SS> {
    events: ES,
    snapshots: SS,
    reconstructor: Reconstructor<ES, SS>,
    config: RepositoryConfig,
}

impl<ES, SS> Repository<ES, SS>
where
    ES: EventStore + Clone,
    SS: SnapshotStore + Clone,
{
    pub fn new(
        events: ES,
        snapshots: SS,
        registry: Arc<AggregateRegistry>,
        config: RepositoryConfig,
    ) -> Self {
        let reconstructor = Reconstructor::new(events.clone(), snapshots.clone(), registry);
        Self {
            events,
            snapshots,
            reconstructor,
            config,
        }
    }

    pub fn reconstructor(&self) -> &Reconstructor<ES, SS> {
        &self.reconstructor
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Creates an empty, unsaved aggregate of a registered type.
    pub fn create<S, C>(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Aggregate<S, C>, DomainError>
    where
        S: Send + Sync + 'static,
        C: Codec,
    {
        let kind = self.reconstructor.registry().kind::<S, C>(aggregate_type)?;
        Ok(Aggregate::new(kind, aggregate_id))
    }

    /// Loads the current state of an existing aggregate.
    pub async fn load<S, C>(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
    ) -> Result<Aggregate<S, C>, DomainError>
    where
        S: DeserializeOwned + Send + Sync + 'static,
        C: Codec,
    {
        self.reconstructor
            .reconstruct(aggregate_id, aggregate_type)
            .await
    }

    /// Appends the aggregate's uncommitted events.
    ///
    /// On success the buffer is cleared and a snapshot is taken if the save
    /// crossed the configured boundary. A failed snapshot is reported in
    /// [`Saved::snapshot`], never as a failed save. On failure the aggregate
    /// is left untouched so the caller can inspect or discard it.
    #[tracing::instrument(skip(self, aggregate), fields(aggregate_id = %aggregate.id(), version = %aggregate.version()))]
    pub async fn save<S, C>(&self, aggregate: &mut Aggregate<S, C>) -> Result<Saved, DomainError>
    where
        S: Serialize + Send + Sync + 'static,
        C: Codec,
    {
        if !aggregate.has_uncommitted_events() {
            return Ok(Saved {
                version: aggregate.version(),
                snapshot: None,
            });
        }

        let previous = aggregate.version();
        let new_version = self
            .events
            .append(
                aggregate.id(),
                aggregate.aggregate_type(),
                previous,
                aggregate.uncommitted_events().to_vec(),
            )
            .await?;
        aggregate.mark_committed(new_version);

        tracing::debug!(%new_version, "aggregate saved");

        let snapshot = if self
            .config
            .snapshot_policy
            .should_snapshot(previous, new_version)
        {
            let result = self.take_snapshot(aggregate).await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, "events committed but snapshot failed");
            }
            Some(result)
        } else {
            None
        };

        Ok(Saved {
            version: new_version,
            snapshot,
        })
    }

    /// Persists the aggregate's state as a snapshot at its current version.
    ///
    /// Returns `false` without writing when the aggregate has nothing
    /// persisted, still has uncommitted events, or a snapshot at that version
    /// already exists.
    #[tracing::instrument(skip(self, aggregate), fields(aggregate_id = %aggregate.id(), version = %aggregate.version()))]
    pub async fn take_snapshot<S, C>(&self, aggregate: &Aggregate<S, C>) -> Result<bool, DomainError>
    where
        S: Serialize + Send + Sync + 'static,
        C: Codec,
    {
        if aggregate.version() == Version::initial() || aggregate.has_uncommitted_events() {
            return Ok(false);
        }

        let state = aggregate
            .kind()
            .codec()
            .encode(aggregate.state())
            .map_err(DomainError::Serialization)?;
        let snapshot = Snapshot::new(
            aggregate.id().clone(),
            aggregate.aggregate_type(),
            aggregate.version(),
            state,
        );

        match self.snapshots.save(snapshot).await {
            Ok(()) => Ok(true),
            Err(EventStoreError::DuplicateSnapshot { .. }) => {
                tracing::debug!("snapshot already exists");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Loads an aggregate (or starts a new one), runs `command` on it and
    /// saves the result.
    ///
    /// A concurrency conflict reloads and reruns the command, at most
    /// `max_retries` times. Any other error, including one returned by the
    /// command, is returned immediately and nothing is persisted. Once the
    /// events are appended the command has succeeded; a failed snapshot only
    /// shows up in the returned [`Saved`].
    #[tracing::instrument(skip(self, command))]
    pub async fn execute<S, C, F, E>(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
        mut command: F,
    ) -> Result<CommandResult<S, C>, DomainError>
    where
        S: Serialize + DeserializeOwned + Send + Sync + 'static,
        C: Codec,
        F: FnMut(&mut Aggregate<S, C>) -> Result<(), E>,
        DomainError: From<E>,
    {
        let mut attempt: u32 = 0;
        loop {
            let mut aggregate = match self.load(aggregate_id, aggregate_type).await {
                Ok(aggregate) => aggregate,
                Err(DomainError::AggregateNotFound { .. }) => {
                    self.create(aggregate_type, aggregate_id.clone())?
                }
                Err(e) => return Err(e),
            };

            command(&mut aggregate)?;

            match self.save(&mut aggregate).await {
                Ok(saved) => return Ok(CommandResult { aggregate, saved }),
                Err(e) if e.is_concurrency_conflict() && attempt < self.config.max_retries => {
                    attempt += 1;
                    metrics::counter!("repository_command_retries_total").increment(1);
                    tracing::warn!(attempt, "concurrency conflict, retrying command");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
