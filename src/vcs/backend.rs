//! Version control trait and shared types.
//!
//! The [`VersionControl`] trait is the only way the pipeline talks to the
//! repository. The production implementation is [`GitCli`](super::git::GitCli);
//! tests use the in-memory [`MockVcs`](tests::MockVcs).

use crate::types::RevisionId;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VcsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("git {command} failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("unexpected git output: {0}")]
    Parse(String),
}

/// One commit in a history listing: full hash and subject line.
pub type HistoryEntry = (RevisionId, String);

/// Operations the pipeline needs from version control.
///
/// Read-only queries (`current_ref`, `resolve`, `history`, `dirty_paths`) are
/// used by the enumerator and by tree verification. The mutating operations
/// (`force_checkout`, `clean`) are only ever called through
/// [`WorkingTree`](crate::tree::WorkingTree).
pub trait VersionControl {
    /// Root of the working tree.
    fn root(&self) -> &Path;

    /// The ref currently checked out: the branch name when on a branch,
    /// otherwise the full commit hash.
    fn current_ref(&self) -> Result<String, VcsError>;

    /// Resolve a revision expression to a commit. `Ok(None)` when it names
    /// nothing in this repository.
    fn resolve(&self, rev: &str) -> Result<Option<RevisionId>, VcsError>;

    /// All commits reachable from `tip`, oldest first (topological order).
    fn history(&self, tip: &RevisionId, first_parent: bool)
    -> Result<Vec<HistoryEntry>, VcsError>;

    /// Check out `rev`, discarding modifications to tracked files.
    fn force_checkout(&self, rev: &str) -> Result<(), VcsError>;

    /// Delete every untracked and ignored file.
    fn clean(&self) -> Result<(), VcsError>;

    /// Paths that differ from the checked-out commit, including untracked
    /// and ignored files. Empty means the tree is pristine.
    fn dirty_paths(&self) -> Result<Vec<String>, VcsError>;
}
