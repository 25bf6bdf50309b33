//! Read-only reference and history queries surrounding a status.
//!
//! Everything here maps known-absence conditions — unborn HEAD, no
//! upstream, no remote — to `None` rather than errors, per the engine's
//! contract. Only unexpected libgit2 failures propagate.

use git2::{ErrorClass, ErrorCode, Reference, ReferenceType, Repository, RepositoryState};
use tracing::{debug, error};

use crate::error::{StatusError, StatusResult};

const HEAD_PREFIX: &str = "refs/heads/";

/// Resolve HEAD. `None` when the repository has no HEAD reference at all;
/// for an unborn branch the symbolic reference itself is returned.
///
/// # Errors
///
/// Unexpected libgit2 failures during lookup.
pub fn head(repo: &Repository) -> StatusResult<Option<Reference<'_>>> {
    let symbolic = match repo.find_reference("HEAD") {
        Ok(r) => r,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
        Err(e) => {
            error!(target: "repoline.git", %e, "HEAD lookup failed");
            return Err(e.into());
        }
    };
    match symbolic.resolve() {
        Ok(direct) => Ok(Some(direct)),
        Err(_) => {
            debug!(target: "repoline.git", "empty repository (unborn HEAD)");
            Ok(Some(symbolic))
        }
    }
}

/// The upstream reference of a local branch, if configured and existing.
///
/// # Errors
///
/// Unexpected libgit2 failures; a missing or invalid upstream is `None`.
pub fn upstream<'r>(
    repo: &'r Repository,
    local: &Reference<'_>,
) -> StatusResult<Option<Reference<'r>>> {
    let Some(name) = local.name() else {
        return Ok(None);
    };
    let upstream_name = match repo.branch_upstream_name(name) {
        Ok(buf) => buf,
        Err(e) if e.code() == ErrorCode::NotFound || e.class() == ErrorClass::Invalid => {
            return Ok(None);
        }
        Err(e) => {
            error!(target: "repoline.git", %e, "upstream name lookup failed");
            return Err(e.into());
        }
    };
    let Some(upstream_name) = upstream_name.as_str() else {
        return Ok(None);
    };
    match repo.find_reference(upstream_name) {
        Ok(r) => Ok(Some(r)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Local branch name of a HEAD reference.
///
/// Direct references name a branch only when they *are* one; symbolic
/// references (unborn HEAD) name the branch they point at under
/// `refs/heads/`. Anything else is `None`.
///
/// # Errors
///
/// [`StatusError::InvalidReference`] when the reference type is unknown.
pub fn local_branch_name(reference: &Reference<'_>) -> StatusResult<Option<String>> {
    match reference.kind() {
        Some(ReferenceType::Direct) => Ok(reference
            .is_branch()
            .then(|| reference.shorthand().map(str::to_owned))
            .flatten()),
        Some(ReferenceType::Symbolic) => Ok(reference
            .symbolic_target()
            .and_then(|target| target.strip_prefix(HEAD_PREFIX))
            .map(str::to_owned)),
        None => {
            let name = String::from_utf8_lossy(reference.name_bytes()).into_owned();
            error!(target: "repoline.git", name = %name, "invalid reference type");
            Err(StatusError::InvalidReference { name })
        }
    }
}

/// Name of the remote a remote-tracking reference belongs to, resolved by
/// libgit2 against the configured `remote.*.fetch` refspecs. A reference
/// no remote maps to, or an unnameable one, is `None`.
#[must_use]
pub fn branch_remote(repo: &Repository, reference: &Reference<'_>) -> Option<String> {
    repo.branch_remote_name(reference.name()?)
        .ok()
        .and_then(|buf| buf.as_str().map(str::to_owned))
}

/// Branch name of an upstream reference with its remote prefix stripped,
/// e.g. `main` for `refs/remotes/origin/main`.
#[must_use]
pub fn remote_branch_name(repo: &Repository, reference: &Reference<'_>) -> Option<String> {
    let shorthand = reference.shorthand()?;
    let remote = branch_remote(repo, reference)?;
    shorthand
        .strip_prefix(remote.as_str())?
        .strip_prefix('/')
        .map(str::to_owned)
}

/// URL of the remote the given branch reference belongs to.
///
/// # Errors
///
/// Unexpected libgit2 failures; a missing or misconfigured remote is `None`.
pub fn remote_url(repo: &Repository, reference: &Reference<'_>) -> StatusResult<Option<String>> {
    let Some(remote_name) = branch_remote(repo, reference) else {
        return Ok(None);
    };
    match repo.find_remote(&remote_name) {
        Ok(remote) => Ok(remote.url().map(str::to_owned)),
        Err(e) if e.code() == ErrorCode::NotFound || e.code() == ErrorCode::InvalidSpec => Ok(None),
        Err(e) => {
            error!(target: "repoline.git", %e, "remote lookup failed");
            Err(e.into())
        }
    }
}

/// Number of commits reachable through a `A..B` range spec.
///
/// # Errors
///
/// Range parse failures or revwalk failures.
pub fn count_range(repo: &Repository, range: &str) -> StatusResult<usize> {
    let mut walk = repo.revwalk()?;
    walk.push_range(range)?;
    let mut count = 0;
    for oid in walk {
        if let Err(e) = oid {
            error!(target: "repoline.git", range, %e, "revwalk failed");
            return Err(e.into());
        }
        count += 1;
    }
    Ok(count)
}

/// Number of stashed states.
///
/// # Errors
///
/// Stash enumeration failures.
pub fn num_stashes(repo: &mut Repository) -> StatusResult<usize> {
    let mut count = 0;
    repo.stash_foreach(|_, _, _| {
        count += 1;
        true
    })?;
    Ok(count)
}

/// Short name of the in-progress operation, vcs_info style: `merge`,
/// `rebase-i`, `cherry-seq`, …, or the empty string for a quiet repository.
#[must_use]
pub fn repo_state(repo: &Repository) -> &'static str {
    match repo.state() {
        RepositoryState::Clean => "",
        RepositoryState::Merge => "merge",
        RepositoryState::Revert => "revert",
        RepositoryState::RevertSequence => "revert-seq",
        RepositoryState::CherryPick => "cherry",
        RepositoryState::CherryPickSequence => "cherry-seq",
        RepositoryState::Bisect => "bisect",
        RepositoryState::Rebase => "rebase",
        RepositoryState::RebaseInteractive => "rebase-i",
        RepositoryState::RebaseMerge => "rebase-m",
        RepositoryState::ApplyMailbox => "am",
        RepositoryState::ApplyMailboxOrRebase => "am/rebase",
    }
}
