//! The Git collaborator layer: everything the engine asks of libgit2.
//!
//! The engine core consumes a narrow contract — open a repository, read its
//! index, run range-restricted scans with a per-delta verdict callback,
//! point-query one path, and a handful of read-only reference queries.
//! Stock libgit2 exposes no range pathspecs and `git2` no notify callback,
//! so [`diff`] realizes the scan contract directly on index, tree, and stat
//! primitives.

pub mod diff;
pub mod refs;
pub mod tags;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use git2::{ErrorCode, Repository, RepositoryOpenFlags, Status};
use tracing::error;

use crate::error::StatusResult;

/// Open the repository containing `dir`, honoring `$GIT_DIR` and friends.
///
/// Returns `Ok(None)` when `dir` is not inside a repository.
///
/// # Errors
///
/// Any libgit2 failure other than "not found".
pub fn open_repo(dir: &Path) -> StatusResult<Option<Repository>> {
    match Repository::open_ext(dir, RepositoryOpenFlags::FROM_ENV, std::iter::empty::<&OsStr>()) {
        Ok(repo) => Ok(Some(repo)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => {
            error!(target: "repoline.git", dir = %dir.display(), %e, "repository open failed");
            Err(e.into())
        }
    }
}

/// Point status query for a single path; any failure reads as "no flags".
#[must_use]
pub fn file_status(repo: &Repository, path: &str) -> Status {
    repo.status_file(Path::new(path)).unwrap_or(Status::empty())
}

/// A reusable set of repository handles for scan workers.
///
/// `git2::Repository` is `Send` but not `Sync`, so concurrent shard scans
/// cannot share the engine's primary handle. Each task checks a handle out
/// (opening a fresh one on a dry pool) and returns it when the guard drops.
/// The pool holds only the repository location, so it may outlive the
/// engine that created it — the deferred tag search relies on that.
pub struct HandlePool {
    root: PathBuf,
    handles: Mutex<Vec<Repository>>,
}

impl std::fmt::Debug for HandlePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlePool")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl HandlePool {
    /// Build a pool cloning handles of `repo`.
    #[must_use]
    pub fn new(repo: &Repository) -> Self {
        let root = repo
            .workdir()
            .map_or_else(|| repo.path().to_path_buf(), Path::to_path_buf);
        Self {
            root,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Check out a handle, reusing a pooled one when available.
    ///
    /// # Errors
    ///
    /// Opening a fresh handle can fail if the repository vanished.
    pub fn checkout(&self) -> StatusResult<HandleGuard<'_>> {
        let cached = self.handles.lock().expect("handle pool lock poisoned").pop();
        let repo = match cached {
            Some(repo) => repo,
            None => Repository::open(&self.root)?,
        };
        Ok(HandleGuard {
            pool: self,
            repo: Some(repo),
        })
    }
}

/// Checked-out repository handle; returns itself to the pool on drop.
pub struct HandleGuard<'a> {
    pool: &'a HandlePool,
    repo: Option<Repository>,
}

impl std::ops::Deref for HandleGuard<'_> {
    type Target = Repository;

    fn deref(&self) -> &Repository {
        self.repo.as_ref().expect("handle taken")
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        if let Some(repo) = self.repo.take() {
            self.pool
                .handles
                .lock()
                .expect("handle pool lock poisoned")
                .push(repo);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_repo_on_plain_directory_is_none() {
        let dir = tempfile::tempdir().unwrap();
        // Block upward discovery past the temp dir.
        let prev = std::env::var_os("GIT_CEILING_DIRECTORIES");
        unsafe { std::env::set_var("GIT_CEILING_DIRECTORIES", dir.path()) };
        let inner = dir.path().join("plain");
        std::fs::create_dir(&inner).unwrap();
        let opened = open_repo(&inner).unwrap();
        match prev {
            Some(v) => unsafe { std::env::set_var("GIT_CEILING_DIRECTORIES", v) },
            None => unsafe { std::env::remove_var("GIT_CEILING_DIRECTORIES") },
        }
        assert!(opened.is_none());
    }

    #[test]
    fn open_repo_finds_initialized_repository() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        assert!(open_repo(dir.path()).unwrap().is_some());
    }

    #[test]
    fn handle_pool_reuses_returned_handles() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let pool = HandlePool::new(&repo);
        {
            let guard = pool.checkout().unwrap();
            assert!(guard.path().exists());
        }
        assert_eq!(pool.handles.lock().unwrap().len(), 1);
        let _first = pool.checkout().unwrap();
        assert_eq!(pool.handles.lock().unwrap().len(), 0);
    }

    #[test]
    fn file_status_of_unknown_path_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert_eq!(file_status(&repo, "no/such/file"), Status::empty());
    }
}
