//! Shard plan computation over the index path space.
//!
//! A status query fans its scans out across disjoint half-open path ranges.
//! The plan is an ordered list of boundary strings; adjacent pairs form the
//! ranges, the empty string meaning "unbounded" at either end. Boundaries
//! are trimmed to directory edges so no scan sees a pathname straddling a
//! shard edge, and per-path setup inside the scans is not duplicated across
//! workers sharing a directory.
//!
//! # Ordering trick
//!
//! Git sorts index entries by raw path bytes, but a tree walk yields
//! directories ordered as if their name ended in `/`. To pick boundaries
//! that are quantiles in *traversal* order, every `/` byte is temporarily
//! replaced with `0x01` (which sorts before all printable bytes), the paths
//! are sorted, and a monotone-repair pass reconciles the two orderings so
//! the chosen boundaries are non-decreasing in both. The byte swap is held
//! by an RAII guard and restored on every exit path, including panics.
//! Paths that already contain a `0x01` byte are unsupported; the plan
//! degrades to a single unbounded shard.

use tracing::debug;

/// A half-open range of repository paths, `[start, end)`.
///
/// An empty `start` means "from the beginning"; an empty `end` means
/// "to the end". Both empty is the full, unbounded path space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRange {
    /// Inclusive lower bound, empty meaning unbounded.
    pub start: Box<[u8]>,
    /// Exclusive upper bound, empty meaning unbounded.
    pub end: Box<[u8]>,
}

impl PathRange {
    /// Whether `path` falls inside the range.
    #[must_use]
    pub fn contains(&self, path: &[u8]) -> bool {
        path >= &self.start[..] && (self.end.is_empty() || path < &self.end[..])
    }

    /// Whether the subtree rooted at directory `dir` can contain paths
    /// inside the range. The subtree spans `[dir + "/", dir + "0")` since
    /// `b'0'` is the successor byte of `b'/'`.
    #[must_use]
    pub fn intersects_dir(&self, dir: &[u8]) -> bool {
        if !self.end.is_empty() {
            // Lowest path in the subtree must precede the range end.
            let mut low = Vec::with_capacity(dir.len() + 1);
            low.extend_from_slice(dir);
            low.push(b'/');
            if low.as_slice() >= &self.end[..] {
                return false;
            }
        }
        if !self.start.is_empty() {
            // Highest path in the subtree must not precede the range start.
            let mut high = Vec::with_capacity(dir.len() + 1);
            high.extend_from_slice(dir);
            high.push(b'0');
            if high.as_slice() <= &self.start[..] {
                return false;
            }
        }
        true
    }
}

/// Ordered boundary list partitioning the index path space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    bounds: Vec<Box<[u8]>>,
}

impl ShardPlan {
    /// The trivial plan: one unbounded shard.
    #[must_use]
    pub fn single() -> Self {
        Self {
            bounds: vec![Box::default(), Box::default()],
        }
    }

    /// Number of ranges in the plan.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.bounds.len() - 1
    }

    /// The boundary strings, for diagnostics.
    #[must_use]
    pub fn boundaries(&self) -> &[Box<[u8]>] {
        &self.bounds
    }

    /// Materialize the ranges fed to per-shard scans.
    #[must_use]
    pub fn ranges(&self) -> Vec<PathRange> {
        self.bounds
            .windows(2)
            .map(|pair| PathRange {
                start: pair[0].clone(),
                end: pair[1].clone(),
            })
            .collect()
    }
}

// ─── Separator swap guard ───────────────────────────────────────────────────

/// Holds the `/` → `0x01` byte swap over a path set and restores it on drop.
struct SeparatorSwap<'a> {
    paths: &'a mut [Box<[u8]>],
}

impl<'a> SeparatorSwap<'a> {
    fn apply(paths: &'a mut [Box<[u8]>]) -> Self {
        for path in paths.iter_mut() {
            for byte in path.iter_mut() {
                if *byte == b'/' {
                    *byte = 1;
                }
            }
        }
        Self { paths }
    }

    fn paths(&self) -> &[Box<[u8]>] {
        self.paths
    }
}

impl Drop for SeparatorSwap<'_> {
    fn drop(&mut self) {
        for path in self.paths.iter_mut() {
            for byte in path.iter_mut() {
                if *byte == 1 {
                    *byte = b'/';
                }
            }
        }
    }
}

// ─── Plan computation ───────────────────────────────────────────────────────

/// Compute a shard plan for `paths`, the index entries in index order.
///
/// Produces at most `min(n / entries_per_shard + 1, worker_count)` ranges.
/// Small indices, single-worker pools, and paths containing the reserved
/// `0x01` byte all collapse to the single unbounded shard.
///
/// The paths are temporarily mutated in place (see the module docs) and are
/// byte-identical on return.
#[must_use]
pub fn compute_plan(
    paths: &mut [Box<[u8]>],
    worker_count: usize,
    entries_per_shard: usize,
) -> ShardPlan {
    let n = paths.len();
    let entries_per_shard = entries_per_shard.max(1);
    if n <= entries_per_shard || worker_count < 2 {
        return ShardPlan::single();
    }
    if paths.iter().any(|p| p.contains(&1)) {
        debug!(target: "repoline.shard", "index path contains 0x01; using a single shard");
        return ShardPlan::single();
    }

    // Sorted-order indices plus the monotone repair, all under the swap.
    let repaired = {
        let swap = SeparatorSwap::apply(paths);
        let p = swap.paths();

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| p[a].cmp(&p[b]));

        // Repair: `repaired[i]` is a boundary candidate at sorted position
        // `i` that is guaranteed not to precede any index-order path seen
        // so far. `None` stands for the empty string.
        let bytes = |x: Option<usize>| x.map_or(&[][..], |i| &p[i][..]);
        let mut repaired: Vec<Option<usize>> = order.into_iter().map(Some).collect();
        let mut last: Option<usize> = None;
        let mut max: Option<usize> = None;
        for i in 0..n {
            let in_place = repaired[i] == Some(i);
            if in_place && max.is_none() {
                last = Some(i);
            } else {
                if bytes(Some(i)) > bytes(max) {
                    max = Some(i);
                }
                if in_place && bytes(repaired[i]) >= bytes(max) {
                    last = Some(i);
                    max = None;
                } else {
                    repaired[i] = last;
                }
            }
        }
        repaired
        // Swap drops here: boundary text must carry real separators.
    };

    let shards = (n / entries_per_shard + 1).min(worker_count);
    let mut bounds: Vec<Box<[u8]>> = Vec::with_capacity(shards + 1);
    bounds.push(Box::default());
    for i in 0..shards - 1 {
        let Some(idx) = repaired[(i + 1) * n / shards] else {
            continue;
        };
        let path = &paths[idx];
        let Some(cut) = path.iter().rposition(|&b| b == b'/') else {
            continue;
        };
        let dir = &path[..cut];
        if dir > &bounds[bounds.len() - 1][..] {
            bounds.push(dir.into());
        }
    }
    debug_assert!(bounds.len() <= shards);
    debug_assert!(bounds.windows(2).all(|w| w[0] < w[1]));
    bounds.push(Box::default());

    debug!(
        target: "repoline.shard",
        entries = n,
        shards = bounds.len() - 1,
        "computed shard plan"
    );
    ShardPlan { bounds }
}
