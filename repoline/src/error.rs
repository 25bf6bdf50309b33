use repoline_pool::PoolClosed;

/// Unified error type for the repoline status engine.
///
/// Known-absence conditions — no HEAD, no upstream, no remote, no tag
/// pointing at HEAD — are *not* errors; the corresponding queries return
/// `None` or empty values. An error here means the current query failed and
/// should be reported to the caller; the engine stays usable for the next
/// query.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    /// A libgit2 call failed during synchronous work.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    /// The worker pool refused a task submission (pool shut down).
    #[error("status scan could not be scheduled: {0}")]
    Pool(#[from] PoolClosed),

    /// A worktree file could not be inspected during a dirty scan.
    #[error("worktree inspection failed for {path}: {source}")]
    Worktree {
        /// Repository-relative path of the file.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A scan worker hit a git failure; the underlying error was logged by
    /// the worker that observed it.
    #[error("a status scan worker failed; the query result is unusable")]
    WorkerFailed,

    /// A reference had a type the engine cannot interpret.
    #[error("reference {name:?} has an invalid type")]
    InvalidReference {
        /// Name of the offending reference.
        name: String,
    },
}

/// Convenience alias used across the crate.
pub type StatusResult<T> = Result<T, StatusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_closed_converts() {
        let err: StatusError = PoolClosed.into();
        assert!(matches!(err, StatusError::Pool(_)));
    }

    #[test]
    fn messages_are_actionable() {
        let err = StatusError::WorkerFailed;
        assert!(err.to_string().contains("scan worker"));
        let err = StatusError::InvalidReference {
            name: "HEAD".into(),
        };
        assert!(err.to_string().contains("HEAD"));
    }
}
