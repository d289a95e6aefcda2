//! Resuming a walk that was killed mid-run.
//!
//! A run that ends normally puts the working tree back on the ref it
//! started from. A hard abort (a second Ctrl-C, SIGKILL, a crash) leaves
//! `HEAD` detached at whatever revision was being built. Taken at face value
//! that state would make the next run walk only up to that revision and
//! "restore" to it.
//!
//! To prevent this, a [`WalkMarker`] is written into the cache directory
//! before the walk starts and removed once the tree is restored. It records
//! the resolved end of the walk and the ref to return to. When the next run
//! finds `HEAD` detached at a commit in the history of the marker's end, it
//! takes both over from the marker. A detached `HEAD` that no marker
//! explains is refused unless the end of the range is given explicitly.

use crate::cache::write_replacing;
use crate::revisions::RevisionRange;
use crate::types::RevisionId;
use crate::vcs::{VcsError, VersionControl};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the marker file within the cache directory.
const MARKER_FILENAME: &str = ".walk-in-progress.json";

#[derive(Error, Debug)]
pub enum ResumeError {
    #[error("version control error: {0}")]
    Vcs(#[from] VcsError),
    #[error(
        "HEAD is detached at {head}, possibly left there by an aborted run; \
         check out the branch to walk or pass --endhash"
    )]
    DetachedHead { head: String },
}

/// A walk in progress, as recorded on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkMarker {
    /// Absolute path of the repository being walked.
    pub repository: PathBuf,
    /// Ref checked out before the walk started.
    pub original_ref: String,
    /// Resolved last revision of the walk.
    pub end: RevisionId,
}

impl WalkMarker {
    pub fn new(repository: &Path, original_ref: impl Into<String>, end: RevisionId) -> Self {
        Self {
            repository: absolute(repository),
            original_ref: original_ref.into(),
            end,
        }
    }

    /// The marker in `dir` left by a walk of `repository`, if any.
    pub fn load(dir: &Path, repository: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(marker_path(dir)).ok()?;
        let marker: Self = serde_json::from_str(&content).ok()?;
        (marker.repository == absolute(repository)).then_some(marker)
    }

    pub fn save(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;
        write_replacing(&marker_path(dir), json.as_bytes())
    }

    /// Remove the marker. A missing marker is not an error.
    pub fn clear(dir: &Path) -> io::Result<()> {
        match std::fs::remove_file(marker_path(dir)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

fn marker_path(dir: &Path) -> PathBuf {
    dir.join(MARKER_FILENAME)
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Whether `reference` (as returned by `current_ref`) is a bare commit hash.
fn is_detached(reference: &str) -> bool {
    reference.len() >= 40 && reference.chars().all(|c| c.is_ascii_hexdigit())
}

/// The range to walk and the ref to return to, after accounting for an
/// aborted earlier run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkStart {
    pub range: RevisionRange,
    /// Ref to restore instead of the one checked out now.
    pub original_ref: Option<String>,
}

impl WalkStart {
    pub fn is_resumed(&self) -> bool {
        self.original_ref.is_some()
    }
}

/// Decide where a walk over `range` starts from, given the marker (if any)
/// of an earlier run.
pub fn walk_start<V: VersionControl + ?Sized>(
    vcs: &V,
    range: &RevisionRange,
    marker: Option<WalkMarker>,
) -> Result<WalkStart, ResumeError> {
    let fresh = WalkStart {
        range: range.clone(),
        original_ref: None,
    };
    let head = vcs.current_ref()?;
    if !is_detached(&head) || range.end.is_some() {
        return Ok(fresh);
    }

    if let Some(marker) = marker {
        let head_id = RevisionId::new(head.as_str());
        let history = vcs.history(&marker.end, range.first_parent)?;
        if history.iter().any(|(id, _)| *id == head_id) {
            tracing::warn!(
                head = %head_id.short(),
                end = %marker.end.short(),
                original_ref = %marker.original_ref,
                "resuming an aborted walk"
            );
            return Ok(WalkStart {
                range: RevisionRange {
                    end: Some(marker.end.to_string()),
                    ..range.clone()
                },
                original_ref: Some(marker.original_ref),
            });
        }
    }
    Err(ResumeError::DetachedHead { head })
}
