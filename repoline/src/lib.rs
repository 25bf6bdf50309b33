//! repoline — a Git working-tree status engine for interactive shell
//! prompts.
//!
//! Given an opened repository, the engine answers "what would the prompt
//! show?" within tens of milliseconds even on very large indices: current
//! branch and upstream, commit, ahead/behind and stash counts, a tag
//! pointing at HEAD, and the presence of staged, unstaged, and untracked
//! changes.
//!
//! The interesting part is how the presence bits are computed. The index
//! path space is partitioned into shards along directory boundaries
//! ([`shard`]), and a query fans one range-restricted scan per shard out
//! over a fixed worker pool ([`repoline_pool::ThreadPool`]). Each scan
//! reports path-level deltas to a callback that publishes into
//! publish-once slots ([`slot::FileSlot`]) and stops the scan as soon as
//! it has nothing left to prove. Repeated queries usually skip the scans
//! entirely: the paths found last time are re-checked with a point query
//! first ([`Repo::index_stats`]).
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use repoline::{EngineConfig, Repo};
//! use repoline_pool::ThreadPool;
//!
//! # fn main() -> repoline::StatusResult<()> {
//! let pool = Arc::new(ThreadPool::new(8));
//! let repo = repoline::open_repo(std::path::Path::new("."))?.expect("not a repository");
//! let head = repoline::head(&repo)?.and_then(|r| r.target());
//! let mut engine = Repo::new(repo, pool, EngineConfig::default())?;
//! let stats = engine.index_stats(head, 1 << 20)?;
//! println!("staged: {}", stats.has_staged);
//! # Ok(())
//! # }
//! ```
//!
//! The engine is read-only; it never mutates repository state.

pub mod config;
mod coordinator;
pub mod error;
pub mod git;
pub mod repo;
pub mod shard;
pub mod slot;
pub mod tracing_config;

pub use config::EngineConfig;
pub use error::{StatusError, StatusResult};
pub use git::open_repo;
pub use git::refs::{
    branch_remote, count_range, head, local_branch_name, num_stashes, remote_branch_name,
    remote_url, repo_state, upstream,
};
pub use git::tags::TagHandle;
pub use repo::{IndexStats, Presence, Repo};
