use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for the status engine.
///
/// The defaults reproduce the behavior the engine was profiled with:
/// one shard per 512 index entries and a one-minute shard-plan refresh.
/// Tests shrink both to exercise the resharding machinery quickly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Target number of index entries per scan shard. Default: 512.
    pub entries_per_shard: usize,
    /// Age, in seconds, after which a successful query schedules a
    /// background shard-plan rebuild. Default: 60.
    pub shard_refresh_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entries_per_shard: 512,
            shard_refresh_secs: 60,
        }
    }
}

impl EngineConfig {
    /// The shard-plan refresh period as a [`Duration`].
    #[must_use]
    pub const fn shard_refresh(&self) -> Duration {
        Duration::from_secs(self.shard_refresh_secs)
    }
}
