//! Tracing conventions for repoline.
//!
//! The engine emits structured events under a common target prefix so that
//! a daemon embedding it can filter them with `RUST_LOG=repoline=debug`.
//! Subscriber installation is left to the consumer; this module only fixes
//! the names.

use tracing::Level;

/// Target prefix used by all repoline tracing events.
pub const TARGET_PREFIX: &str = "repoline";

/// Standard span names used across the engine.
pub mod span_names {
    /// Root span for one status query.
    pub const INDEX_STATS: &str = "repoline::index_stats";
    /// HEAD-tree-to-index scan over one shard.
    pub const STAGED_SCAN: &str = "repoline::staged_scan";
    /// Index-to-worktree scan over one shard.
    pub const DIRTY_SCAN: &str = "repoline::dirty_scan";
    /// Shard-plan (re)computation.
    pub const SHARD_PLAN: &str = "repoline::shard_plan";
    /// Known-file fast path.
    pub const KNOWN_FILES: &str = "repoline::known_files";
    /// Deferred tag search.
    pub const TAG_SEARCH: &str = "repoline::tag_search";
}

/// Parse a log level string (case-insensitive).
///
/// Recognized values: `trace`, `debug`, `info`, `warn`, `error`.
#[must_use]
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Level from `REPOLINE_LOG_LEVEL`, falling back to `default`.
#[must_use]
pub fn level_from_env(default: Level) -> Level {
    std::env::var("REPOLINE_LOG_LEVEL")
        .ok()
        .and_then(|s| parse_level(&s))
        .unwrap_or(default)
}
