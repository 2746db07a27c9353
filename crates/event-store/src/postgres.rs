use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventId, EventRecord, EventStoreError, EventTypeQuery, NewEvent, Result,
    Snapshot, SnapshotRetention, Version,
    snapshot::SnapshotStore,
    store::{EventStore, EventStream, paginate},
};

const EVENT_COLUMNS: &str = "position, event_id, event_type, aggregate_id, aggregate_type, \
     version, payload, metadata, occurred_on, stored_at";

const SNAPSHOT_COLUMNS: &str = "aggregate_id, aggregate_type, version, state, created_at";

/// PostgreSQL-backed event store.
///
/// The `unique_aggregate_version` index makes the version check atomic: of two
/// transactions inserting the same `(aggregate_id, version)`, the second one
/// fails and is reported as a concurrency conflict.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations for both events and snapshots.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventRecord> {
        Ok(EventRecord {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from(row.try_get::<String, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            payload: row.try_get("payload")?,
            metadata: row.try_get("metadata")?,
            occurred_on: row.try_get("occurred_on")?,
            stored_at: row.try_get("stored_at")?,
            position: row.try_get("position")?,
        })
    }

    async fn page_by_type(pool: PgPool, query: EventTypeQuery) -> Result<Vec<EventRecord>> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE event_type = $1
              AND ($2::timestamptz IS NULL OR occurred_on > $2)
              AND ($3::timestamptz IS NULL OR (stored_at, position) > ($3, $4))
            ORDER BY stored_at ASC, position ASC
            LIMIT $5
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(&query.event_type)
            .bind(query.occurred_after)
            .bind(query.after.map(|c| c.stored_at))
            .bind(query.after.map_or(0, |c| c.position))
            .bind(query.page_size as i64)
            .fetch_all(&pool)
            .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn current_version_in<'e, E>(executor: E, aggregate_id: &AggregateId) -> Result<Version>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_str())
                .fetch_one(executor)
                .await?;
        Ok(Version::new(version.unwrap_or(0)))
    }
}

fn is_version_conflict(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db_err) if db_err.constraint() == Some("unique_aggregate_version")
    )
}

#[async_trait]
impl EventStore for PostgresEventStore {
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

        let mut tx = self.pool.begin().await?;

        let actual = Self::current_version_in(&mut *tx, aggregate_id).await?;
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
        for (i, event) in events.into_iter().enumerate() {
            let version = expected_version.advance(i + 1);

            let inserted = sqlx::query(
                r#"
                INSERT INTO events (event_id, event_type, aggregate_id, aggregate_type, version, payload, metadata, occurred_on, stored_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(EventId::new().as_uuid())
            .bind(&event.event_type)
            .bind(aggregate_id.as_str())
            .bind(aggregate_type)
            .bind(version.as_i64())
            .bind(&event.payload)
            .bind(&event.metadata)
            .bind(event.occurred_on)
            .bind(stored_at)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(e) if is_version_conflict(&e) => {
                    // A concurrent writer committed the same version first
                    tx.rollback().await?;
                    let actual = Self::current_version_in(&self.pool, aggregate_id).await?;
                    metrics::counter!("event_store_concurrency_conflicts_total").increment(1);
                    tracing::warn!(%aggregate_id, %expected_version, %actual, "concurrency conflict");
                    return Err(EventStoreError::ConcurrencyConflict {
                        aggregate_id: aggregate_id.clone(),
                        expected: expected_version,
                        actual,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;

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
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE aggregate_id = $1 AND version > $2
            ORDER BY version ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(aggregate_id.as_str())
            .bind(from_version_exclusive.as_i64())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn load_events_by_type(&self, query: EventTypeQuery) -> Result<EventStream> {
        let pool = self.pool.clone();
        Ok(paginate(query, move |page_query| {
            Self::page_by_type(pool.clone(), page_query)
        }))
    }

    async fn current_version(&self, aggregate_id: &AggregateId) -> Result<Version> {
        Self::current_version_in(&self.pool, aggregate_id).await
    }
}

/// PostgreSQL-backed snapshot store.
#[derive(Clone)]
pub struct PostgresSnapshotStore {
    pool: PgPool,
    retention: SnapshotRetention,
}

impl PostgresSnapshotStore {
    /// Creates a snapshot store that keeps only the latest snapshot per aggregate.
    pub fn new(pool: PgPool) -> Self {
        Self::with_retention(pool, SnapshotRetention::LatestOnly)
    }

    /// Creates a snapshot store with the given retention policy.
    pub fn with_retention(pool: PgPool, retention: SnapshotRetention) -> Self {
        Self { pool, retention }
    }

    fn row_to_snapshot(row: PgRow) -> Result<Snapshot> {
        Ok(Snapshot {
            aggregate_id: AggregateId::from(row.try_get::<String, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            state: row.try_get("state")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    #[tracing::instrument(skip(self, snapshot), fields(aggregate_id = %snapshot.aggregate_id, version = %snapshot.version))]
    async fn save(&self, snapshot: Snapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, state, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(snapshot.aggregate_id.as_str())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version.as_i64())
        .bind(&snapshot.state)
        .bind(snapshot.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_snapshot_version")
            {
                return EventStoreError::DuplicateSnapshot {
                    aggregate_id: snapshot.aggregate_id.clone(),
                    version: snapshot.version,
                };
            }
            EventStoreError::Database(e)
        })?;

        if self.retention == SnapshotRetention::LatestOnly {
            sqlx::query(
                r#"
                DELETE FROM snapshots
                WHERE aggregate_id = $1
                  AND version < (SELECT MAX(version) FROM snapshots WHERE aggregate_id = $1)
                "#,
            )
            .bind(snapshot.aggregate_id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        metrics::counter!("snapshot_store_saved_total").increment(1);
        Ok(())
    }

    async fn load_latest(&self, aggregate_id: &AggregateId) -> Result<Option<Snapshot>> {
        let sql = format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS}
            FROM snapshots
            WHERE aggregate_id = $1
            ORDER BY version DESC
            LIMIT 1
            "#
        );

        let row = sqlx::query(&sql)
            .bind(aggregate_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_snapshot).transpose()
    }

    async fn load_at_or_before(
        &self,
        aggregate_id: &AggregateId,
        version: Version,
    ) -> Result<Option<Snapshot>> {
        let sql = format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS}
            FROM snapshots
            WHERE aggregate_id = $1 AND version <= $2
            ORDER BY version DESC
            LIMIT 1
            "#
        );

        let row = sqlx::query(&sql)
            .bind(aggregate_id.as_str())
            .bind(version.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_snapshot).transpose()
    }
}
