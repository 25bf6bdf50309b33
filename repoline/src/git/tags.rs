//! Deferred tag lookup.
//!
//! Finding a tag that points at HEAD means walking every `refs/tags/*`
//! reference, so the search runs on the worker pool while the caller
//! assembles the rest of the status, then collects the result through a
//! one-shot handle.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, sync_channel};

use git2::{ObjectType, Oid, ReferenceType, Repository};
use repoline_pool::ThreadPool;
use tracing::{debug, error};

use crate::error::{StatusError, StatusResult};
use crate::git::HandlePool;

const TAG_PREFIX: &str = "refs/tags/";

/// Symbolic references are chased at most this many hops; tag chains deeper
/// than that (or cyclic ones) read as "no target".
const MAX_SYMBOLIC_HOPS: usize = 10;

/// One-shot handle to a deferred tag search.
#[derive(Debug)]
pub struct TagHandle {
    rx: Receiver<StatusResult<Option<String>>>,
}

impl TagHandle {
    /// Block until the search finishes; `None` when no tag points at the
    /// requested commit.
    ///
    /// # Errors
    ///
    /// A libgit2 failure inside the search, or a dropped worker.
    pub fn wait(self) -> StatusResult<Option<String>> {
        self.rx.recv().unwrap_or(Err(StatusError::WorkerFailed))
    }
}

/// Kick off a search for a tag whose (peeled) target is `target`.
///
/// A `None` target — an unborn HEAD — resolves immediately without
/// touching the pool.
#[must_use]
pub fn tag_name(pool: &ThreadPool, handles: Arc<HandlePool>, target: Option<Oid>) -> TagHandle {
    let (tx, rx) = sync_channel(1);
    let Some(target) = target else {
        let _ = tx.send(Ok(None));
        return TagHandle { rx };
    };
    let submitted = pool.schedule(move || {
        let result = find_tag(&handles, target);
        if let Err(e) = &result {
            error!(target: "repoline.git", %e, "tag search failed");
        }
        let _ = tx.send(result);
    });
    if let Err(e) = submitted {
        // The channel pair lives in this scope, so deliver the failure
        // through it rather than racing the caller.
        let (tx, rx) = sync_channel(1);
        let _ = tx.send(Err(e.into()));
        return TagHandle { rx };
    }
    TagHandle { rx }
}

fn find_tag(handles: &HandlePool, target: Oid) -> StatusResult<Option<String>> {
    let repo = handles.checkout()?;
    let mut refs = repo.references_glob("refs/tags/*")?;
    for name in refs.names() {
        // Broken individual references are skipped, not fatal.
        let Ok(name) = name else { continue };
        if tag_has_target(&repo, name, target) {
            debug!(target: "repoline.git", tag = name, "tag matches HEAD");
            return Ok(name.strip_prefix(TAG_PREFIX).map(str::to_owned));
        }
    }
    Ok(None)
}

/// Whether the reference `name` ultimately points at `target`, either
/// directly or through its peeled annotated tag.
fn tag_has_target(repo: &Repository, name: &str, target: Oid) -> bool {
    let Ok(mut reference) = repo.find_reference(name) else {
        return false;
    };
    for _ in 0..MAX_SYMBOLIC_HOPS {
        if reference.kind() != Some(ReferenceType::Symbolic) {
            break;
        }
        let Some(next) = reference.symbolic_target() else {
            return false;
        };
        let Ok(next) = repo.find_reference(next) else {
            return false;
        };
        reference = next;
    }
    if reference.kind() == Some(ReferenceType::Symbolic) {
        return false;
    }
    if reference.target() == Some(target) {
        return true;
    }
    let Ok(object) = reference.peel(ObjectType::Tag) else {
        return false;
    };
    object
        .as_tag()
        .is_some_and(|tag| tag.target_id() == target)
}
