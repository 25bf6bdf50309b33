//! The status engine: scan driver, known-file fast path, and aggregator.
//!
//! One [`Repo`] owns an opened repository and its index and answers the
//! question a prompt needs answered: are there staged, unstaged, or
//! untracked changes right now? A query reloads the index, re-checks the
//! paths discovered by the previous query (most keystrokes change
//! nothing), and only then fans scans out across the shard plan, stopping
//! the moment every slot it can still fill is filled.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use git2::{Index, Oid, Repository, Status};
use repoline_pool::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::error::{StatusError, StatusResult};
use crate::git::diff::{self, DeltaAction, DeltaKind};
use crate::git::tags::{self, TagHandle};
use crate::git::{self, HandlePool};
use crate::shard::{self, PathRange, ShardPlan};
use crate::slot::FileSlot;

/// Three-valued presence of a change class.
///
/// `Unknown` appears only for the dirty classes, when the index exceeded
/// the caller's ceiling and no worktree scan ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
    /// At least one such change exists.
    Yes,
    /// A completed scan found none.
    No,
    /// The class was not scanned.
    Unknown,
}

/// Result of one status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Whether the index differs from the HEAD tree. An empty repository
    /// with a non-empty index always reports `true`: with nothing
    /// committed, every index entry is a staged change.
    pub has_staged: bool,
    /// Whether a tracked path differs in the working tree.
    pub has_unstaged: Presence,
    /// Whether an untracked, unignored file exists.
    pub has_untracked: Presence,
}

fn staged_mask() -> Status {
    Status::INDEX_NEW
        | Status::INDEX_MODIFIED
        | Status::INDEX_DELETED
        | Status::INDEX_RENAMED
        | Status::INDEX_TYPECHANGE
}

fn unstaged_mask() -> Status {
    Status::WT_MODIFIED
        | Status::WT_DELETED
        | Status::WT_TYPECHANGE
        | Status::WT_RENAMED
        | Status::CONFLICTED
}

fn untracked_mask() -> Status {
    Status::WT_NEW
}

fn presence(slot: &FileSlot, scanned: bool) -> Presence {
    if !slot.is_empty() {
        Presence::Yes
    } else if scanned {
        Presence::No
    } else {
        Presence::Unknown
    }
}

struct PlanState {
    plan: Option<ShardPlan>,
    computed_at: Instant,
}

/// State shared with scan tasks and the background reshard.
struct Shared {
    coord: Coordinator,
    staged: FileSlot,
    unstaged: FileSlot,
    untracked: FileSlot,
    plan: Mutex<PlanState>,
}

/// A repository status engine.
///
/// Owns the repository handle and its index; scan workers use their own
/// handles from an internal pool. Dropping the engine drains outstanding
/// work first.
pub struct Repo {
    repo: Repository,
    index: Index,
    pool: Arc<ThreadPool>,
    handles: Arc<HandlePool>,
    config: EngineConfig,
    shared: Arc<Shared>,
}

impl Repo {
    /// Take ownership of `repo` and its index.
    ///
    /// The worker `pool` is the process-wide one; it must outlive the
    /// engine, which holding an [`Arc`] guarantees.
    ///
    /// # Errors
    ///
    /// Failure to open the repository's index.
    pub fn new(repo: Repository, pool: Arc<ThreadPool>, config: EngineConfig) -> StatusResult<Self> {
        let index = repo.index()?;
        let handles = Arc::new(HandlePool::new(&repo));
        Ok(Self {
            repo,
            index,
            pool,
            handles,
            config,
            shared: Arc::new(Shared {
                coord: Coordinator::new(),
                staged: FileSlot::new(),
                unstaged: FileSlot::new(),
                untracked: FileSlot::new(),
                plan: Mutex::new(PlanState {
                    plan: None,
                    computed_at: Instant::now(),
                }),
            }),
        })
    }

    /// The owned repository handle, for auxiliary queries on the caller's
    /// thread.
    #[must_use]
    pub const fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Path most recently discovered as staged, if any.
    #[must_use]
    pub fn staged_file(&self) -> Option<String> {
        self.shared.staged.get()
    }

    /// Path most recently discovered as unstaged, if any.
    #[must_use]
    pub fn unstaged_file(&self) -> Option<String> {
        self.shared.unstaged.get()
    }

    /// Path most recently discovered as untracked, if any.
    #[must_use]
    pub fn untracked_file(&self) -> Option<String> {
        self.shared.untracked.get()
    }

    /// Kick off the deferred search for a tag pointing at `target`.
    #[must_use]
    pub fn tag_name(&self, target: Option<Oid>) -> TagHandle {
        tags::tag_name(&self.pool, Arc::clone(&self.handles), target)
    }

    /// Answer one status query.
    ///
    /// `head` is the commit HEAD currently resolves to, or `None` for an
    /// unborn branch. Dirty and untracked state is only scanned while the
    /// index holds at most `dirty_max_index_size` entries; beyond that the
    /// result reports [`Presence::Unknown`] for both.
    ///
    /// # Errors
    ///
    /// Index reload failures, pool submission failures, or any git failure
    /// a scan worker observed (surfaced after the scans drain).
    pub fn index_stats(
        &mut self,
        head: Option<Oid>,
        dirty_max_index_size: usize,
    ) -> StatusResult<IndexStats> {
        self.shared.coord.wait(0);
        self.index.read(false)?;
        self.ensure_plan();
        self.shared.coord.clear_error();
        self.refresh_known_files();

        let index_size = self.index.len();
        let scan_dirty = index_size <= dirty_max_index_size;
        debug!(target: "repoline.engine", index_size, scan_dirty, "status query");

        let done = || {
            (head.is_none() || !self.shared.staged.is_empty())
                && (!scan_dirty
                    || (!self.shared.unstaged.is_empty() && !self.shared.untracked.is_empty()))
        };

        if !done() {
            debug_assert_eq!(self.shared.coord.inflight(), 0);
            let ranges = {
                let state = self.shared.plan.lock().expect("plan lock poisoned");
                state.plan.as_ref().expect("plan just ensured").ranges()
            };
            if scan_dirty {
                self.start_dirty_scan(&ranges)?;
            }
            if let Some(head) = head {
                self.start_staged_scan(head, &ranges)?;
            }
            self.shared.coord.wait_scan(&done);
        }

        let plan_age = {
            let state = self.shared.plan.lock().expect("plan lock poisoned");
            state.computed_at.elapsed()
        };
        if plan_age >= self.config.shard_refresh() {
            self.schedule_reshard()?;
        }

        if self.shared.coord.has_error() {
            return Err(StatusError::WorkerFailed);
        }

        Ok(IndexStats {
            has_staged: !self.shared.staged.is_empty() || (head.is_none() && index_size > 0),
            has_unstaged: presence(&self.shared.unstaged, scan_dirty),
            has_untracked: presence(&self.shared.untracked, scan_dirty),
        })
    }

    /// Re-check the paths the previous query discovered. A path whose
    /// point status still shows a relevant flag is re-published into the
    /// first slot whose mask matches, in staged → unstaged → untracked
    /// order; a path that went quiet is dropped and the scans will look
    /// afresh. Runs on the caller's thread with nothing inflight.
    fn refresh_known_files(&self) {
        struct KnownFile {
            flags: Status,
            path: Option<String>,
        }

        let fetch = |slot: &FileSlot| match slot.clear() {
            Some(path) => {
                let flags = git::file_status(&self.repo, &path);
                KnownFile {
                    flags,
                    path: Some(path),
                }
            }
            None => KnownFile {
                flags: Status::empty(),
                path: None,
            },
        };
        let mut known = [
            fetch(&self.shared.staged),
            fetch(&self.shared.unstaged),
            fetch(&self.shared.untracked),
        ];

        let mut snatch = |mask: Status, slot: &FileSlot, label: &'static str| {
            for file in &mut known {
                if file.flags.intersects(mask) {
                    file.flags = Status::empty();
                    if let Some(path) = file.path.take() {
                        debug!(target: "repoline.engine", kind = label, path = %path, "known-file fast path");
                        let published = slot.try_set(&path);
                        debug_assert!(published);
                    }
                    return;
                }
            }
        };
        snatch(staged_mask(), &self.shared.staged, "staged");
        snatch(unstaged_mask(), &self.shared.unstaged, "unstaged");
        snatch(untracked_mask(), &self.shared.untracked, "untracked");
    }

    /// Launch the index→worktree scan across all shards. Untracked
    /// inclusion is decided once, up front: a filled untracked slot means
    /// the scans only look for tracked changes.
    fn start_dirty_scan(&self, ranges: &[PathRange]) -> StatusResult<()> {
        if !self.shared.unstaged.is_empty() && !self.shared.untracked.is_empty() {
            return Ok(());
        }
        let include_untracked = self.shared.untracked.is_empty();
        for range in ranges {
            let shared = Arc::clone(&self.shared);
            let handles = Arc::clone(&self.handles);
            let range = range.clone();
            self.run_async(move || {
                let repo = handles.checkout()?;
                diff::dirty_in_range(&repo, &range, include_untracked, &mut |delta| {
                    if shared.coord.has_error() {
                        return DeltaAction::Stop;
                    }
                    if delta.kind == DeltaKind::Untracked {
                        let path = String::from_utf8_lossy(delta.path);
                        shared.coord.publish(&shared.untracked, "untracked", &path);
                        if shared.unstaged.is_empty() {
                            DeltaAction::Skip
                        } else {
                            DeltaAction::Stop
                        }
                    } else {
                        let path = String::from_utf8_lossy(delta.path);
                        shared.coord.publish(&shared.unstaged, "unstaged", &path);
                        if shared.untracked.is_empty() {
                            DeltaAction::Skip
                        } else {
                            DeltaAction::Stop
                        }
                    }
                })
            })?;
        }
        Ok(())
    }

    /// Launch the HEAD-tree→index scan across all shards. A single delta
    /// proves staged changes, so every callback stops its shard.
    fn start_staged_scan(&self, head: Oid, ranges: &[PathRange]) -> StatusResult<()> {
        if !self.shared.staged.is_empty() {
            return Ok(());
        }
        for range in ranges {
            let shared = Arc::clone(&self.shared);
            let handles = Arc::clone(&self.handles);
            let range = range.clone();
            self.run_async(move || {
                let repo = handles.checkout()?;
                diff::staged_in_range(&repo, head, &range, &mut |delta| {
                    let path = String::from_utf8_lossy(delta.path);
                    shared.coord.publish(&shared.staged, "staged", &path);
                    DeltaAction::Stop
                })
            })?;
        }
        Ok(())
    }

    /// Compute the shard plan synchronously if there is none yet.
    fn ensure_plan(&self) {
        let mut state = self.shared.plan.lock().expect("plan lock poisoned");
        if state.plan.is_none() {
            let plan = compute_plan_for_index(
                &self.index,
                self.pool.num_threads(),
                self.config.entries_per_shard,
            );
            state.plan = Some(plan);
            state.computed_at = Instant::now();
        }
    }

    /// Schedule one background task that waits for everything else to
    /// drain and rebuilds the shard plan from a fresh index read.
    fn schedule_reshard(&self) -> StatusResult<()> {
        let shared = Arc::clone(&self.shared);
        let handles = Arc::clone(&self.handles);
        let workers = self.pool.num_threads();
        let entries_per_shard = self.config.entries_per_shard;
        info!(target: "repoline.engine", "scheduling shard-plan rebuild");
        self.run_async(move || {
            shared.coord.wait(1);
            let repo = handles.checkout()?;
            let mut index = repo.index()?;
            index.read(false)?;
            let plan = compute_plan_for_index(&index, workers, entries_per_shard);
            let mut state = shared.plan.lock().expect("plan lock poisoned");
            state.plan = Some(plan);
            state.computed_at = Instant::now();
            Ok(())
        })
    }

    /// Submit a task, keeping the inflight count honest: the increment
    /// strictly precedes the enqueue, the decrement runs however the task
    /// ends, and a failed enqueue rolls the increment back and surfaces
    /// synchronously.
    fn run_async<F>(&self, task: F) -> StatusResult<()>
    where
        F: FnOnce() -> StatusResult<()> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.shared.coord.begin_task();
        let submitted = self.pool.schedule(move || {
            if let Err(e) = task() {
                error!(target: "repoline.engine", %e, "scan task failed");
                shared.coord.flag_error();
            }
            shared.coord.finish_task();
        });
        if let Err(e) = submitted {
            self.shared.coord.finish_task();
            return Err(e.into());
        }
        Ok(())
    }

    /// Current shard count, for diagnostics and tests.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shared
            .plan
            .lock()
            .expect("plan lock poisoned")
            .plan
            .as_ref()
            .map_or(0, ShardPlan::shard_count)
    }
}

impl Drop for Repo {
    fn drop(&mut self) {
        self.shared.coord.wait(0);
    }
}

fn compute_plan_for_index(index: &Index, workers: usize, entries_per_shard: usize) -> ShardPlan {
    let mut paths: Vec<Box<[u8]>> = (0..index.len())
        .filter_map(|i| index.get(i))
        .map(|entry| entry.path.into_boxed_slice())
        .collect();
    let plan = shard::compute_plan(&mut paths, workers, entries_per_shard);
    info!(
        target: "repoline.engine",
        entries = paths.len(),
        shards = plan.shard_count(),
        "shard plan ready"
    );
    plan
}
