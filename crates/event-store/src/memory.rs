use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventId, EventRecord, EventStoreError, EventTypeQuery, NewEvent, Result,
    Snapshot, SnapshotRetention, Version,
    snapshot::SnapshotStore,
    store::{EventStore, EventStream, paginate},
};

type StreamHandle = Arc<RwLock<Vec<EventRecord>>>;

/// In-memory event store.
///
/// Each aggregate stream sits behind its own lock, so appends to different
/// aggregates proceed independently. Storage positions come from a shared
/// atomic counter.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<AggregateId, StreamHandle>>>,
    last_position: Arc<AtomicI64>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        let handles = self.handles().await;
        let mut count = 0;
        for handle in handles {
            count += handle.read().await.len();
        }
        count
    }

    async fn stream(&self, aggregate_id: &AggregateId) -> Option<StreamHandle> {
        self.streams.read().await.get(aggregate_id).cloned()
    }

    async fn stream_or_create(&self, aggregate_id: &AggregateId) -> StreamHandle {
        if let Some(handle) = self.stream(aggregate_id).await {
            return handle;
        }
        self.streams
            .write()
            .await
            .entry(aggregate_id.clone())
            .or_default()
            .clone()
    }

    async fn handles(&self) -> Vec<StreamHandle> {
        self.streams.read().await.values().cloned().collect()
    }

    async fn page_by_type(&self, query: EventTypeQuery) -> Result<Vec<EventRecord>> {
        let mut matching = Vec::new();
        for handle in self.handles().await {
            let stream = handle.read().await;
            matching.extend(stream.iter().filter(|e| query.matches(e)).cloned());
        }
        matching.sort_by_key(EventRecord::cursor);
        matching.truncate(query.page_size);
        Ok(matching)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
        expected_version: Version,
        events: Vec<NewEvent>,
    ) -> Result<Version> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyAppend(aggregate_id.clone()));
        }

        let handle = self.stream_or_create(aggregate_id).await;
        let mut stream = handle.write().await;

        let actual = stream
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial());
        if actual != expected_version {
            metrics::counter!("event_store_concurrency_conflicts_total").increment(1);
            tracing::warn!(%aggregate_id, %expected_version, %actual, "concurrency conflict");
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: aggregate_id.clone(),
                expected: expected_version,
                actual,
            });
        }

        let count = events.len();
        let stored_at = Utc::now();
        let records = events.into_iter().enumerate().map(|(i, event)| EventRecord {
            event_id: EventId::new(),
            event_type: event.event_type,
            aggregate_id: aggregate_id.clone(),
            aggregate_type: aggregate_type.to_string(),
            version: expected_version.advance(i + 1),
            payload: event.payload,
            metadata: event.metadata,
            occurred_on: event.occurred_on,
            stored_at,
            position: self.last_position.fetch_add(1, Ordering::SeqCst) + 1,
        });
        stream.extend(records);

        let new_version = expected_version.advance(count);
        metrics::counter!("event_store_events_appended_total").increment(count as u64);
        tracing::debug!(%aggregate_id, %new_version, "events appended");
        Ok(new_version)
    }

    async fn load_events(
        &self,
        aggregate_id: &AggregateId,
        from_version_exclusive: Version,
    ) -> Result<Vec<EventRecord>> {
        let Some(handle) = self.stream(aggregate_id).await else {
            return Ok(Vec::new());
        };
        let stream = handle.read().await;
        // Streams are kept in version order by append.
        Ok(stream
            .iter()
            .filter(|e| e.version > from_version_exclusive)
            .cloned()
            .collect())
    }

    async fn load_events_by_type(&self, query: EventTypeQuery) -> Result<EventStream> {
        let store = self.clone();
        Ok(paginate(query, move |page_query| {
            let store = store.clone();
            async move { store.page_by_type(page_query).await }
        }))
    }

    async fn current_version(&self, aggregate_id: &AggregateId) -> Result<Version> {
        let Some(handle) = self.stream(aggregate_id).await else {
            return Ok(Version::initial());
        };
        let stream = handle.read().await;
        Ok(stream
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial()))
    }
}

/// In-memory snapshot store.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<AggregateId, BTreeMap<Version, Snapshot>>>>,
    retention: SnapshotRetention,
}

impl InMemorySnapshotStore {
    /// Creates a store that keeps only the latest snapshot per aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with the given retention policy.
    pub fn with_retention(retention: SnapshotRetention) -> Self {
        Self {
            snapshots: Arc::default(),
            retention,
        }
    }

    /// Returns the number of snapshots currently retained for an aggregate.
    pub async fn snapshot_count(&self, aggregate_id: &AggregateId) -> usize {
        self.snapshots
            .read()
            .await
            .get(aggregate_id)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    #[tracing::instrument(skip(self, snapshot), fields(aggregate_id = %snapshot.aggregate_id, version = %snapshot.version))]
    async fn save(&self, snapshot: Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        let history = snapshots.entry(snapshot.aggregate_id.clone()).or_default();

        if history.contains_key(&snapshot.version) {
            return Err(EventStoreError::DuplicateSnapshot {
                aggregate_id: snapshot.aggregate_id,
                version: snapshot.version,
            });
        }

        history.insert(snapshot.version, snapshot);
        if self.retention == SnapshotRetention::LatestOnly
            && let Some(latest) = history.keys().next_back().copied()
        {
            history.retain(|version, _| *version == latest);
        }

        metrics::counter!("snapshot_store_saved_total").increment(1);
        Ok(())
    }

    async fn load_latest(&self, aggregate_id: &AggregateId) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(aggregate_id)
            .and_then(|history| history.values().next_back().cloned()))
    }

    async fn load_at_or_before(
        &self,
        aggregate_id: &AggregateId,
        version: Version,
    ) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(aggregate_id).and_then(|history| {
            history
                .range(..=version)
                .next_back()
                .map(|(_, snapshot)| snapshot.clone())
        }))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::TryStreamExt;

    use super::*;
    use crate::EventStoreExt;

    fn new_event(event_type: &str) -> NewEvent {
        NewEvent::new(event_type, br#"{"test":true}"#.to_vec())
    }

    fn versions(events: &[EventRecord]) -> Vec<i64> {
        events.iter().map(|e| e.version.as_i64()).collect()
    }

    #[tokio::test]
    async fn append_single_event() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        let version = store
            .append(
                &aggregate_id,
                "TestAggregate",
                Version::initial(),
                vec![new_event("TestEvent")],
            )
            .await
            .unwrap();
        assert_eq!(version, Version::first());

        let events = store
            .load_events(&aggregate_id, Version::initial())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].aggregate_type, "TestAggregate");
        assert_eq!(events[0].payload, br#"{"test":true}"#);
    }

    #[tokio::test]
    async fn appended_versions_are_contiguous_across_batches() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        let mut version = Version::initial();
        for batch in [1usize, 3, 2] {
            let events = (0..batch).map(|_| new_event("Event")).collect();
            version = store
                .append(&aggregate_id, "TestAggregate", version, events)
                .await
                .unwrap();
        }

        assert_eq!(version, Version::new(6));
        let stored = store
            .load_events(&aggregate_id, Version::initial())
            .await
            .unwrap();
        assert_eq!(versions(&stored), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts_without_partial_write() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        store
            .append(
                &aggregate_id,
                "TestAggregate",
                Version::initial(),
                vec![new_event("Event1"), new_event("Event2")],
            )
            .await
            .unwrap();

        let result = store
            .append(
                &aggregate_id,
                "TestAggregate",
                Version::first(),
                vec![new_event("Event3"), new_event("Event4")],
            )
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { expected, actual, .. })
                if expected == Version::first() && actual == Version::new(2)
        ));
        assert_eq!(store.event_count().await, 2);
        assert_eq!(
            store.current_version(&aggregate_id).await.unwrap(),
            Version::new(2)
        );
    }

    #[tokio::test]
    async fn empty_append_is_rejected() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        let result = store
            .append(&aggregate_id, "TestAggregate", Version::initial(), vec![])
            .await;

        assert!(matches!(result, Err(EventStoreError::EmptyAppend(_))));
        assert!(!store.aggregate_exists(&aggregate_id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_with_same_expected_version() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::from("contended");

        store
            .append_one(
                &aggregate_id,
                "TestAggregate",
                Version::initial(),
                new_event("Opened"),
            )
            .await
            .unwrap();

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                let aggregate_id = aggregate_id.clone();
                tokio::spawn(async move {
                    store
                        .append_one(
                            &aggregate_id,
                            "TestAggregate",
                            Version::first(),
                            new_event("Changed"),
                        )
                        .await
                })
            })
            .collect();

        let mut successes = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(version) => {
                    assert_eq!(version, Version::new(2));
                    successes += 1;
                }
                Err(EventStoreError::ConcurrencyConflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!((successes, conflicts), (1, 1));
        let stored = store.load_all_events(&aggregate_id).await.unwrap();
        assert_eq!(versions(&stored), vec![1, 2]);
    }

    #[tokio::test]
    async fn different_aggregates_are_independent() {
        let store = InMemoryEventStore::new();
        let cart = AggregateId::from("cart-1");
        let other = AggregateId::from("cart-2");

        store
            .append_one(&cart, "Cart", Version::initial(), new_event("CartOpened"))
            .await
            .unwrap();
        store
            .append_one(&other, "Cart", Version::initial(), new_event("CartOpened"))
            .await
            .unwrap();

        assert_eq!(store.current_version(&cart).await.unwrap(), Version::first());
        assert_eq!(store.current_version(&other).await.unwrap(), Version::first());
    }

    #[tokio::test]
    async fn load_events_after_version() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        store
            .append(
                &aggregate_id,
                "TestAggregate",
                Version::initial(),
                vec![new_event("Event1"), new_event("Event2"), new_event("Event3")],
            )
            .await
            .unwrap();

        let after_v1 = store
            .load_events(&aggregate_id, Version::first())
            .await
            .unwrap();
        assert_eq!(versions(&after_v1), vec![2, 3]);

        let beyond = store
            .load_events(&aggregate_id, Version::new(3))
            .await
            .unwrap();
        assert!(beyond.is_empty());

        let far_beyond = store
            .load_events(&aggregate_id, Version::new(99))
            .await
            .unwrap();
        assert!(far_beyond.is_empty());

        let unknown = store
            .load_events(&AggregateId::new(), Version::initial())
            .await
            .unwrap();
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn appended_records_get_store_assigned_fields() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        store
            .append(
                &aggregate_id,
                "TestAggregate",
                Version::initial(),
                vec![new_event("Event1"), new_event("Event2")],
            )
            .await
            .unwrap();

        let stored = store.load_all_events(&aggregate_id).await.unwrap();
        assert_ne!(stored[0].event_id, stored[1].event_id);
        assert!(stored[0].position < stored[1].position);
        assert!(stored[0].stored_at >= stored[0].occurred_on);
    }

    #[tokio::test]
    async fn load_events_by_type_in_storage_order() {
        let store = InMemoryEventStore::new();
        let id1 = AggregateId::new();
        let id2 = AggregateId::new();

        store
            .append_one(&id1, "Cart", Version::initial(), new_event("ItemAdded"))
            .await
            .unwrap();
        store
            .append_one(&id2, "Cart", Version::initial(), new_event("CartOpened"))
            .await
            .unwrap();
        store
            .append_one(&id2, "Cart", Version::first(), new_event("ItemAdded"))
            .await
            .unwrap();
        store
            .append_one(&id1, "Cart", Version::first(), new_event("ItemAdded"))
            .await
            .unwrap();

        let added: Vec<EventRecord> = store
            .load_events_by_type(EventTypeQuery::new("ItemAdded").page_size(2))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(added.len(), 3);
        assert_eq!(added[0].aggregate_id, id1);
        assert_eq!(added[1].aggregate_id, id2);
        assert_eq!(added[2].aggregate_id, id1);
        assert!(added.windows(2).all(|w| w[0].cursor() < w[1].cursor()));
    }

    #[tokio::test]
    async fn load_events_by_type_restarts_from_cursor() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        store
            .append(
                &aggregate_id,
                "Cart",
                Version::initial(),
                vec![
                    new_event("ItemAdded"),
                    new_event("ItemAdded"),
                    new_event("ItemAdded"),
                ],
            )
            .await
            .unwrap();

        let first: Vec<EventRecord> = store
            .load_events_by_type(EventTypeQuery::new("ItemAdded"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let resumed: Vec<EventRecord> = store
            .load_events_by_type(EventTypeQuery::new("ItemAdded").after(first[0].cursor()))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(versions(&resumed), vec![2, 3]);
    }

    #[tokio::test]
    async fn load_events_by_type_filters_occurred_after() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();
        let cutoff = Utc::now();

        store
            .append(
                &aggregate_id,
                "Cart",
                Version::initial(),
                vec![
                    new_event("ItemAdded").occurred_on(cutoff - chrono::Duration::hours(1)),
                    new_event("ItemAdded").occurred_on(cutoff + chrono::Duration::hours(1)),
                ],
            )
            .await
            .unwrap();

        let recent: Vec<EventRecord> = store
            .load_events_by_type(EventTypeQuery::new("ItemAdded").occurred_after(cutoff))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(versions(&recent), vec![2]);
    }

    #[tokio::test]
    async fn snapshot_save_and_load_latest() {
        let store = InMemorySnapshotStore::new();
        let aggregate_id = AggregateId::new();

        store
            .save(Snapshot::new(
                aggregate_id.clone(),
                "TestAggregate",
                Version::new(5),
                b"saved".to_vec(),
            ))
            .await
            .unwrap();

        let retrieved = store.load_latest(&aggregate_id).await.unwrap().unwrap();
        assert_eq!(retrieved.aggregate_id, aggregate_id);
        assert_eq!(retrieved.version, Version::new(5));
        assert_eq!(retrieved.state, b"saved");
    }

    #[tokio::test]
    async fn snapshot_not_found() {
        let store = InMemorySnapshotStore::new();
        let result = store.load_latest(&AggregateId::new()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn duplicate_snapshot_is_rejected_and_original_kept() {
        let store = InMemorySnapshotStore::new();
        let aggregate_id = AggregateId::new();

        store
            .save(Snapshot::new(
                aggregate_id.clone(),
                "TestAggregate",
                Version::new(3),
                b"first".to_vec(),
            ))
            .await
            .unwrap();
        let result = store
            .save(Snapshot::new(
                aggregate_id.clone(),
                "TestAggregate",
                Version::new(3),
                b"second".to_vec(),
            ))
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::DuplicateSnapshot { version, .. }) if version == Version::new(3)
        ));
        let kept = store.load_latest(&aggregate_id).await.unwrap().unwrap();
        assert_eq!(kept.state, b"first");
    }

    #[tokio::test]
    async fn latest_only_retention_prunes_older_snapshots() {
        let store = InMemorySnapshotStore::new();
        let aggregate_id = AggregateId::new();

        for version in [3, 6, 9] {
            store
                .save(Snapshot::new(
                    aggregate_id.clone(),
                    "TestAggregate",
                    Version::new(version),
                    Vec::new(),
                ))
                .await
                .unwrap();
        }

        assert_eq!(store.snapshot_count(&aggregate_id).await, 1);
        let latest = store.load_latest(&aggregate_id).await.unwrap().unwrap();
        assert_eq!(latest.version, Version::new(9));
    }

    #[tokio::test]
    async fn keep_all_retention_selects_greatest_at_or_before() {
        let store = InMemorySnapshotStore::with_retention(SnapshotRetention::KeepAll);
        let aggregate_id = AggregateId::new();

        for version in [3, 6, 9] {
            store
                .save(Snapshot::new(
                    aggregate_id.clone(),
                    "TestAggregate",
                    Version::new(version),
                    Vec::new(),
                ))
                .await
                .unwrap();
        }

        assert_eq!(store.snapshot_count(&aggregate_id).await, 3);
        let at_7 = store
            .load_at_or_before(&aggregate_id, Version::new(7))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at_7.version, Version::new(6));
        let at_2 = store
            .load_at_or_before(&aggregate_id, Version::new(2))
            .await
            .unwrap();
        assert!(at_2.is_none());
        let latest = store.load_latest(&aggregate_id).await.unwrap().unwrap();
        assert_eq!(latest.version, Version::new(9));
    }
}
