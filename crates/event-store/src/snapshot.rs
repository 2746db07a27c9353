use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{AggregateId, Result, Version};

/// A materialized aggregate state at a specific version.
///
/// Snapshots bound the cost of reconstruction: only the events after
/// `version` need to be replayed on top of `state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub aggregate_id: AggregateId,

    /// The kind of aggregate (e.g., "Cart").
    pub aggregate_type: String,

    /// The aggregate version the state represents.
    pub version: Version,

    /// The serialized aggregate state. Opaque to the store.
    pub state: Vec<u8>,

    /// When the snapshot was created.
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Creates a new snapshot stamped with the current time.
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            state: state.into(),
            created_at: Utc::now(),
        }
    }
}

/// How many checkpoints a snapshot store keeps per aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotRetention {
    /// Only the snapshot with the greatest version survives a save.
    #[default]
    LatestOnly,

    /// Every saved snapshot is retained.
    KeepAll,
}

impl std::str::FromStr for SnapshotRetention {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" | "latest_only" => Ok(SnapshotRetention::LatestOnly),
            "all" | "keep_all" => Ok(SnapshotRetention::KeepAll),
            other => Err(format!("unknown snapshot retention: {other}")),
        }
    }
}

/// Keyed store of materialized aggregate states.
///
/// At most one snapshot exists per `(aggregate_id, version)`. Deciding when to
/// take a snapshot is the caller's business.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persists a snapshot.
    ///
    /// Fails with `DuplicateSnapshot` if one already exists for the same
    /// aggregate and version; the existing snapshot is left untouched.
    async fn save(&self, snapshot: Snapshot) -> Result<()>;

    /// Returns the snapshot with the greatest version, or `None`.
    async fn load_latest(&self, aggregate_id: &AggregateId) -> Result<Option<Snapshot>>;

    /// Returns the snapshot with the greatest version not exceeding `version`.
    async fn load_at_or_before(
        &self,
        aggregate_id: &AggregateId,
        version: Version,
    ) -> Result<Option<Snapshot>>;
}
