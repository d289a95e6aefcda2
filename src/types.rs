//! Shared types used across all pipeline stages.
//!
//! A [`Revision`] is created once by the enumerator and is read-only for the
//! rest of the run. [`FrameKey`] is the ordering key every frame carries from
//! capture through to encoding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Full commit hash identifying a revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display (first 8 characters).
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One commit in the walk, in walk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// 0-based position in the walk. Defines animation order.
    pub index: usize,
    pub id: RevisionId,
    /// Commit subject line.
    pub summary: String,
}

/// Ordering key of a frame: walk position first, then page position.
///
/// The derived `Ord` compares `revision_index` before `page_index`, which is
/// exactly the order frames appear in the final animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameKey {
    pub revision_index: usize,
    pub page_index: usize,
}

impl FrameKey {
    pub fn new(revision_index: usize, page_index: usize) -> Self {
        Self {
            revision_index,
            page_index,
        }
    }
}

/// How the pages of one revision map onto frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One frame per page, each page fitted onto the full canvas.
    #[default]
    Pages,
    /// One frame per revision, pages tiled row-wise onto the canvas.
    Sheet,
}
