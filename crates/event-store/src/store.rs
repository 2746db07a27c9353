use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::{TryStreamExt, stream};

use crate::{
    AggregateId, EventRecord, EventStoreError, EventTypeQuery, NewEvent, Result, Version,
};

/// A lazily fetched stream of stored events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventRecord>> + Send>>;

/// Append-only log of domain events keyed by aggregate.
///
/// Implementations must be thread-safe and must make the version check of
/// [`EventStore::append`] atomic with respect to concurrent appends for the
/// same aggregate. Appends to different aggregates never serialize on each
/// other.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events to an aggregate stream.
    ///
    /// The events receive versions `expected_version + 1 ..=
    /// expected_version + events.len()` in the order given. The batch becomes
    /// visible as a unit or not at all.
    ///
    /// Fails with `ConcurrencyConflict` when the persisted version differs
    /// from `expected_version`, leaving the stream unchanged.
    ///
    /// Returns the new version of the aggregate.
    async fn append(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
        expected_version: Version,
        events: Vec<NewEvent>,
    ) -> Result<Version>;

    /// Loads the events of an aggregate with a version strictly greater than
    /// `from_version_exclusive`, in ascending version order.
    ///
    /// Returns an empty list when there are none.
    async fn load_events(
        &self,
        aggregate_id: &AggregateId,
        from_version_exclusive: Version,
    ) -> Result<Vec<EventRecord>>;

    /// Streams every event of one type in storage order (`stored_at`, then
    /// position), fetching pages lazily.
    async fn load_events_by_type(&self, query: EventTypeQuery) -> Result<EventStream>;

    /// Returns the persisted version of an aggregate, or `Version::initial()`
    /// if it has no events.
    async fn current_version(&self, aggregate_id: &AggregateId) -> Result<Version>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event.
    async fn append_one(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
        expected_version: Version,
        event: NewEvent,
    ) -> Result<Version> {
        self.append(aggregate_id, aggregate_type, expected_version, vec![event])
            .await
    }

    /// Loads the complete history of an aggregate.
    async fn load_all_events(&self, aggregate_id: &AggregateId) -> Result<Vec<EventRecord>> {
        self.load_events(aggregate_id, Version::initial()).await
    }

    /// Checks if an aggregate has any events.
    async fn aggregate_exists(&self, aggregate_id: &AggregateId) -> Result<bool> {
        Ok(self.current_version(aggregate_id).await? > Version::initial())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Turns a page fetcher into a lazy [`EventStream`].
///
/// Each page is requested with the query's cursor advanced past the last
/// record of the previous page. The stream ends after the first short page.
pub(crate) fn paginate<F, Fut>(query: EventTypeQuery, fetch_page: F) -> EventStream
where
    F: Fn(EventTypeQuery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<EventRecord>>> + Send + 'static,
{
    let pages = stream::try_unfold(
        (Some(query), fetch_page),
        |(query, fetch_page)| async move {
            let Some(query) = query else {
                return Ok::<_, EventStoreError>(None);
            };
            let page = fetch_page(query.clone()).await?;
            let Some(cursor) = page.last().map(EventRecord::cursor) else {
                return Ok(None);
            };
            let next = (page.len() >= query.page_size).then(|| query.after(cursor));
            Ok(Some((page, (next, fetch_page))))
        },
    );

    Box::pin(
        pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, EventStoreError>)))
            .try_flatten(),
    )
}
