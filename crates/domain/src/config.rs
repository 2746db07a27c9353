//! Write-path configuration loaded from environment variables.

use event_store::Version;

/// When the repository takes a snapshot after a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// Never snapshot automatically.
    Never,

    /// Snapshot whenever an append crosses a multiple of this many events.
    EveryEvents(u64),
}

impl SnapshotPolicy {
    /// Returns whether advancing from `previous` to `current` crosses a
    /// snapshot boundary.
    pub fn should_snapshot(&self, previous: Version, current: Version) -> bool {
        match *self {
            SnapshotPolicy::Never | SnapshotPolicy::EveryEvents(0) => false,
            SnapshotPolicy::EveryEvents(interval) => {
                let interval = interval as i64;
                current.as_i64() / interval > previous.as_i64() / interval
            }
        }
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        SnapshotPolicy::EveryEvents(50)
    }
}

/// Repository settings.
///
/// Reads from environment variables:
/// - `SNAPSHOT_EVERY`: snapshot interval in events, `0` disables (default: `50`)
/// - `COMMAND_MAX_RETRIES`: retries after a concurrency conflict (default: `3`)
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub snapshot_policy: SnapshotPolicy,
    pub max_retries: u32,
}

impl RepositoryConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            snapshot_policy: std::env::var("SNAPSHOT_EVERY")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|every| match every {
                    0 => SnapshotPolicy::Never,
                    n => SnapshotPolicy::EveryEvents(n),
                })
                .unwrap_or(defaults.snapshot_policy),
            max_retries: std::env::var("COMMAND_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
        }
    }

    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            snapshot_policy: SnapshotPolicy::default(),
            max_retries: 3,
        }
    }
}
