//! Range-restricted status scans with per-delta verdict callbacks.
//!
//! Two scan families, both over a half-open path range so the engine can
//! fan one scan out per shard:
//!
//! - [`staged_in_range`] — HEAD tree vs. index: a lockstep merge of the
//!   index entries inside the range against the tree entries under it
//!   (pruned descent, byte-sorted before merging, since trees order a
//!   directory as if its name ended in `/`).
//! - [`dirty_in_range`] — index vs. working tree: stat-cache comparison for
//!   tracked entries, re-hashing only when the cached stat is inconclusive,
//!   plus an optional walk of the untracked portion of the working tree.
//!
//! Every delta goes to the callback *before* the scan advances; a
//! [`DeltaAction::Stop`] verdict aborts the range scan immediately. The
//! callbacks never see content, only path-level classification.

use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use git2::{Index, IndexEntry, ObjectType, Oid, Repository, Tree};

use crate::error::{StatusError, StatusResult};
use crate::shard::PathRange;

/// Path-level classification of one observed difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// In the index but not in the HEAD tree.
    Added,
    /// Content or mode differs between the two sides.
    Modified,
    /// Present on the old side, missing on the new side.
    Deleted,
    /// The path changed its object type (file vs. symlink).
    TypeChange,
    /// The index carries conflict stages for the path.
    Conflicted,
    /// In the working tree but not in the index and not ignored.
    Untracked,
}

/// One observed difference, borrowed from the scan's working state.
#[derive(Debug, Clone, Copy)]
pub struct Delta<'a> {
    /// What changed.
    pub kind: DeltaKind,
    /// Repository-relative path, `/`-separated bytes.
    pub path: &'a [u8],
}

/// Verdict returned by a delta callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaAction {
    /// Keep scanning; the delta counts.
    Continue,
    /// Keep scanning; drop the delta.
    Skip,
    /// Abort this range scan.
    Stop,
}

/// Per-delta callback: observes a delta, returns the verdict.
pub type DeltaCallback<'a> = dyn FnMut(Delta<'_>) -> DeltaAction + 'a;

/// Stage bits inside `IndexEntry::flags` (`GIT_INDEX_ENTRY_STAGEMASK`).
const STAGE_MASK: u16 = 0x3000;
const STAGE_SHIFT: u16 = 12;

fn stage_of(entry: &IndexEntry) -> u16 {
    (entry.flags & STAGE_MASK) >> STAGE_SHIFT
}

/// File-type bits of a git mode (regular / symlink / gitlink / tree).
const fn mode_class(mode: u32) -> u32 {
    mode & 0o17_0000
}

const CLASS_REGULAR: u32 = 0o10_0000;
const CLASS_SYMLINK: u32 = 0o12_0000;
const CLASS_GITLINK: u32 = 0o16_0000;

fn bytes_to_path(bytes: &[u8]) -> &Path {
    Path::new(std::ffi::OsStr::from_bytes(bytes))
}

/// Hand one delta to the callback; `false` means the scan must stop.
fn deliver(cb: &mut DeltaCallback<'_>, kind: DeltaKind, path: &[u8]) -> bool {
    !matches!(cb(Delta { kind, path }), DeltaAction::Stop)
}

// ─── Index range helpers ────────────────────────────────────────────────────

/// First index position whose path is not less than `key`.
fn lower_bound(index: &Index, key: &[u8]) -> usize {
    let mut lo = 0;
    let mut hi = index.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match index.get(mid) {
            Some(entry) if entry.path.as_slice() < key => lo = mid + 1,
            _ => hi = mid,
        }
    }
    lo
}

/// Index positions covered by `range`.
fn range_bounds(index: &Index, range: &PathRange) -> (usize, usize) {
    let lo = if range.start.is_empty() {
        0
    } else {
        lower_bound(index, &range.start)
    };
    let hi = if range.end.is_empty() {
        index.len()
    } else {
        lower_bound(index, &range.end)
    };
    (lo, hi.max(lo))
}

fn index_has_path(index: &Index, path: &[u8]) -> bool {
    let pos = lower_bound(index, path);
    index.get(pos).is_some_and(|e| e.path == path)
}

// ─── Staged scan: HEAD tree vs. index ───────────────────────────────────────

/// Scan `[range.start, range.end)` for differences between the tree of
/// `head` and the index.
///
/// # Errors
///
/// Any libgit2 failure while reading the index or walking the tree.
pub fn staged_in_range(
    repo: &Repository,
    head: Oid,
    range: &PathRange,
    cb: &mut DeltaCallback<'_>,
) -> StatusResult<()> {
    let mut index = repo.index()?;
    index.read(false)?;
    let tree = repo.find_commit(head)?.tree()?;

    let mut tree_side: Vec<(Vec<u8>, Oid, u32)> = Vec::new();
    collect_tree_in_range(repo, &tree, &[], range, &mut tree_side)?;
    tree_side.sort();

    let (lo, hi) = range_bounds(&index, range);
    let mut ti = 0;
    let mut last_conflict: Option<Vec<u8>> = None;
    for pos in lo..hi {
        let Some(entry) = index.get(pos) else { break };
        let stage = stage_of(&entry);
        let (entry_id, entry_mode) = (entry.id, entry.mode);
        let path = entry.path;

        // Everything the tree has before this path is gone from the index.
        while ti < tree_side.len() && tree_side[ti].0.as_slice() < path.as_slice() {
            if !deliver(cb, DeltaKind::Deleted, &tree_side[ti].0) {
                return Ok(());
            }
            ti += 1;
        }
        let tree_match = ti < tree_side.len() && tree_side[ti].0 == path;

        if stage != 0 {
            if tree_match {
                ti += 1;
            }
            if last_conflict.as_deref() != Some(path.as_slice()) {
                if !deliver(cb, DeltaKind::Conflicted, &path) {
                    return Ok(());
                }
                last_conflict = Some(path);
            }
            continue;
        }

        if tree_match {
            let (_, tree_oid, tree_mode) = &tree_side[ti];
            let (tree_oid, tree_mode) = (*tree_oid, *tree_mode);
            ti += 1;
            if tree_oid != entry_id || tree_mode != entry_mode {
                let kind = if mode_class(tree_mode) == mode_class(entry_mode) {
                    DeltaKind::Modified
                } else {
                    DeltaKind::TypeChange
                };
                if !deliver(cb, kind, &path) {
                    return Ok(());
                }
            }
        } else if !deliver(cb, DeltaKind::Added, &path) {
            return Ok(());
        }
    }
    while ti < tree_side.len() {
        if !deliver(cb, DeltaKind::Deleted, &tree_side[ti].0) {
            return Ok(());
        }
        ti += 1;
    }
    Ok(())
}

/// Collect `(path, oid, mode)` for every non-tree entry under `tree` whose
/// path falls inside `range`, descending only into subtrees that can
/// intersect it.
fn collect_tree_in_range(
    repo: &Repository,
    tree: &Tree<'_>,
    prefix: &[u8],
    range: &PathRange,
    out: &mut Vec<(Vec<u8>, Oid, u32)>,
) -> StatusResult<()> {
    for entry in tree.iter() {
        let name = entry.name_bytes();
        let mut full = Vec::with_capacity(prefix.len() + name.len() + 1);
        if !prefix.is_empty() {
            full.extend_from_slice(prefix);
            full.push(b'/');
        }
        full.extend_from_slice(name);

        if entry.kind() == Some(ObjectType::Tree) {
            if range.intersects_dir(&full) {
                let subtree = repo.find_tree(entry.id())?;
                collect_tree_in_range(repo, &subtree, &full, range, out)?;
            }
        } else if range.contains(&full) {
            #[allow(clippy::cast_sign_loss)]
            out.push((full, entry.id(), entry.filemode() as u32));
        }
    }
    Ok(())
}

// ─── Dirty scan: index vs. working tree ─────────────────────────────────────

/// Scan `[range.start, range.end)` for working-tree changes to tracked
/// paths, and — when `include_untracked` — for untracked files, recursing
/// into untracked directories.
///
/// Submodule (gitlink) entries are skipped: their dirtiness is ignored.
/// Bare repositories scan nothing.
///
/// # Errors
///
/// Index access failures, ignore-rule evaluation failures, or worktree
/// I/O errors other than a missing file (which is a `Deleted` delta).
pub fn dirty_in_range(
    repo: &Repository,
    range: &PathRange,
    include_untracked: bool,
    cb: &mut DeltaCallback<'_>,
) -> StatusResult<()> {
    let Some(workdir) = repo.workdir() else {
        return Ok(());
    };
    let mut index = repo.index()?;
    index.read(false)?;

    let (lo, hi) = range_bounds(&index, range);
    let mut last_conflict: Option<Vec<u8>> = None;
    for pos in lo..hi {
        let Some(entry) = index.get(pos) else { break };
        if stage_of(&entry) != 0 {
            if last_conflict.as_deref() != Some(entry.path.as_slice()) {
                if !deliver(cb, DeltaKind::Conflicted, &entry.path) {
                    return Ok(());
                }
                last_conflict = Some(entry.path);
            }
            continue;
        }
        if mode_class(entry.mode) == CLASS_GITLINK {
            continue;
        }
        if let Some(kind) = worktree_delta(workdir, &entry)?
            && !deliver(cb, kind, &entry.path)
        {
            return Ok(());
        }
    }

    if include_untracked {
        walk_untracked(repo, workdir, &[], range, &index, cb)?;
    }
    Ok(())
}

/// Compare one tracked index entry against the working tree.
///
/// Follows git's stat-cache discipline: a mismatched type, mode, or size is
/// a change outright; a matching stat (mtime to the index's granularity) is
/// clean; anything in between re-hashes the file. The rehash applies no
/// content filters.
fn worktree_delta(workdir: &Path, entry: &IndexEntry) -> StatusResult<Option<DeltaKind>> {
    let abs = workdir.join(bytes_to_path(&entry.path));
    let meta = match std::fs::symlink_metadata(&abs) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Some(DeltaKind::Deleted));
        }
        Err(e) => return Err(worktree_error(&entry.path, e)),
    };

    let file_type = meta.file_type();
    if file_type.is_dir() {
        // A tracked file replaced by a directory; its contents show up as
        // untracked separately.
        return Ok(Some(DeltaKind::Deleted));
    }
    let wt_class = if file_type.is_symlink() {
        CLASS_SYMLINK
    } else if file_type.is_file() {
        CLASS_REGULAR
    } else {
        return Ok(Some(DeltaKind::TypeChange));
    };
    if wt_class != mode_class(entry.mode) {
        return Ok(Some(DeltaKind::TypeChange));
    }
    if wt_class == CLASS_REGULAR && ((entry.mode & 0o111) != 0) != ((meta.mode() & 0o111) != 0) {
        return Ok(Some(DeltaKind::Modified));
    }

    #[allow(clippy::cast_possible_truncation)]
    if meta.len() as u32 != entry.file_size {
        return Ok(Some(DeltaKind::Modified));
    }
    if stat_matches(&meta, entry) {
        return Ok(None);
    }

    // Stat is inconclusive (e.g. touched but unchanged): hash and compare.
    let oid = if file_type.is_symlink() {
        let target = std::fs::read_link(&abs).map_err(|e| worktree_error(&entry.path, e))?;
        Oid::hash_object(ObjectType::Blob, target.as_os_str().as_bytes())?
    } else {
        let data = std::fs::read(&abs).map_err(|e| worktree_error(&entry.path, e))?;
        Oid::hash_object(ObjectType::Blob, &data)?
    };
    Ok((oid != entry.id).then_some(DeltaKind::Modified))
}

fn stat_matches(meta: &std::fs::Metadata, entry: &IndexEntry) -> bool {
    if meta.mtime() != i64::from(entry.mtime.seconds()) {
        return false;
    }
    // Indices written on coarse-grained filesystems store zero nanoseconds.
    let nsec = entry.mtime.nanoseconds();
    nsec == 0 || i64::from(nsec) == meta.mtime_nsec()
}

fn worktree_error(path: &[u8], source: std::io::Error) -> StatusError {
    StatusError::Worktree {
        path: String::from_utf8_lossy(path).into_owned(),
        source,
    }
}

/// Walk the working tree under `rel_dir` reporting untracked files inside
/// `range`. Returns `false` if the callback stopped the scan.
fn walk_untracked(
    repo: &Repository,
    workdir: &Path,
    rel_dir: &[u8],
    range: &PathRange,
    index: &Index,
    cb: &mut DeltaCallback<'_>,
) -> StatusResult<bool> {
    let abs_dir = if rel_dir.is_empty() {
        workdir.to_path_buf()
    } else {
        workdir.join(bytes_to_path(rel_dir))
    };

    let mut children: Vec<(Vec<u8>, std::fs::FileType)> = Vec::new();
    let read = std::fs::read_dir(&abs_dir).map_err(|e| worktree_error(rel_dir, e))?;
    for child in read {
        let child = child.map_err(|e| worktree_error(rel_dir, e))?;
        let file_type = child.file_type().map_err(|e| worktree_error(rel_dir, e))?;
        children.push((child.file_name().as_bytes().to_vec(), file_type));
    }
    children.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, file_type) in children {
        if name == b".git" {
            continue;
        }
        let mut full = Vec::with_capacity(rel_dir.len() + name.len() + 1);
        if !rel_dir.is_empty() {
            full.extend_from_slice(rel_dir);
            full.push(b'/');
        }
        full.extend_from_slice(&name);

        if file_type.is_dir() {
            if !range.intersects_dir(&full) {
                continue;
            }
            if repo.is_path_ignored(bytes_to_path(&full))? {
                continue;
            }
            if abs_dir.join(bytes_to_path(&name)).join(".git").exists() {
                // A nested repository is one untracked entry; never descend.
                if range.contains(&full) && !deliver(cb, DeltaKind::Untracked, &full) {
                    return Ok(false);
                }
                continue;
            }
            if !walk_untracked(repo, workdir, &full, range, index, cb)? {
                return Ok(false);
            }
        } else if file_type.is_file() || file_type.is_symlink() {
            if !range.contains(&full)
                || index_has_path(index, &full)
                || repo.is_path_ignored(bytes_to_path(&full))?
            {
                continue;
            }
            if !deliver(cb, DeltaKind::Untracked, &full) {
                return Ok(false);
            }
        }
        // Sockets, FIFOs and other special files are not status material.
    }
    Ok(true)
}
