//! Revision enumeration: stage 1 of the pipeline.
//!
//! Turns a `[start, end]` range into the ordered list of revisions to visit.
//! The walk is **chronological, oldest first** (topological order, so parents
//! always precede their children) and is deterministic for a fixed repository
//! state. Both ends are inclusive:
//!
//! - `end` defaults to `HEAD` as it is before the walk starts.
//! - `start` defaults to the first commit in the history of `end`.
//!
//! When `start` is given, the walk is the suffix of `end`'s history that
//! begins at `start`. With merges in the history that suffix can contain
//! side-branch commits ordered after `start`; pass `first_parent` to restrict
//! the walk to the mainline.
//!
//! Enumeration never touches the working tree.

use crate::types::Revision;
use crate::vcs::{VcsError, VersionControl};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnumerateError {
    #[error("invalid revision '{revision}': {reason}")]
    InvalidRevision {
        revision: String,
        reason: &'static str,
    },
    #[error("version control error: {0}")]
    Vcs(#[from] VcsError),
}

/// The slice of history to walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionRange {
    pub start: Option<String>,
    pub end: Option<String>,
    pub first_parent: bool,
}

/// List the revisions in `range`, oldest first, indexed from 0.
pub fn enumerate<V: VersionControl + ?Sized>(
    vcs: &V,
    range: &RevisionRange,
) -> Result<Vec<Revision>, EnumerateError> {
    let end_name = range.end.as_deref().unwrap_or("HEAD");
    let end = vcs
        .resolve(end_name)?
        .ok_or_else(|| EnumerateError::InvalidRevision {
            revision: end_name.to_string(),
            reason: "does not name a commit in this repository",
        })?;

    let start = match range.start.as_deref() {
        Some(name) => Some((
            name,
            vcs.resolve(name)?
                .ok_or_else(|| EnumerateError::InvalidRevision {
                    revision: name.to_string(),
                    reason: "does not name a commit in this repository",
                })?,
        )),
        None => None,
    };

    let history = vcs.history(&end, range.first_parent)?;

    let offset = match start {
        Some((name, id)) => history
            .iter()
            .position(|(h, _)| *h == id)
            .ok_or_else(|| EnumerateError::InvalidRevision {
                revision: name.to_string(),
                reason: "is not in the history of the end revision",
            })?,
        None => 0,
    };

    let revisions: Vec<Revision> = history
        .into_iter()
        .skip(offset)
        .enumerate()
        .map(|(index, (id, summary))| Revision { index, id, summary })
        .collect();

    tracing::info!(
        count = revisions.len(),
        end = %end.short(),
        "enumerated revisions"
    );
    Ok(revisions)
}
