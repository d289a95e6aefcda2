//! The working tree: the single mutable resource of a run.
//!
//! [`WorkingTree`] owns the version-control handle. Moving the tree to a
//! revision ([`step_to`](WorkingTree::step_to)) and putting it back
//! ([`restore`](WorkingTree::restore)) take `&mut self`; the capture stage only
//! ever sees `&WorkingTree`, so nothing can mutate the tree while a build or a
//! rasterization is reading it.
//!
//! **Stepping is destructive.** Every step discards modifications to tracked
//! files and deletes every untracked and ignored file, including build
//! byproducts of the previous revision. Do not point this at a checkout that
//! holds work you want to keep. [`open`](WorkingTree::open) refuses a dirty
//! tree unless told otherwise.
//!
//! After a successful step the tree holds exactly the content of one
//! revision. The build may add byproducts; the next step removes them.

use crate::types::{Revision, RevisionId};
use crate::vcs::{VcsError, VersionControl};
use std::path::Path;
use thiserror::Error;

/// Number of offending paths quoted in error messages.
const SAMPLE_PATHS: usize = 5;

/// Errors opening or restoring the tree. Fatal to the run.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("version control error: {0}")]
    Vcs(#[from] VcsError),
    #[error("repository path is not a directory: {0}")]
    NotADirectory(String),
    #[error(
        "working tree has {count} uncommitted or untracked paths (e.g. {sample}); \
         every step deletes them, pass --force to proceed anyway"
    )]
    Dirty { count: usize, sample: String },
    #[error("could not return to '{reference}': {source}")]
    Restore {
        reference: String,
        #[source]
        source: VcsError,
    },
}

/// Failure to move the tree to a revision. Skips that revision only.
#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("checkout of {revision} failed: {source}")]
    Checkout {
        revision: RevisionId,
        #[source]
        source: VcsError,
    },
    #[error("clean after checkout of {revision} failed: {source}")]
    Clean {
        revision: RevisionId,
        #[source]
        source: VcsError,
    },
    #[error("tree not pristine after checkout of {revision}: {} leftover paths", .paths.len())]
    Residue {
        revision: RevisionId,
        paths: Vec<String>,
    },
}

pub struct WorkingTree<V: VersionControl> {
    vcs: V,
    original_ref: String,
    current: Option<RevisionId>,
}

impl<V: VersionControl> WorkingTree<V> {
    /// Take ownership of the checkout at `vcs.root()`.
    ///
    /// Records the ref that is checked out now so [`restore`](Self::restore)
    /// can return to it. Unless `allow_dirty` is set, a tree with local
    /// modifications, untracked or ignored files is rejected.
    pub fn open(vcs: V, allow_dirty: bool) -> Result<Self, TreeError> {
        if !vcs.root().is_dir() {
            return Err(TreeError::NotADirectory(
                vcs.root().display().to_string(),
            ));
        }
        let original_ref = vcs.current_ref()?;
        if !allow_dirty {
            let dirty = vcs.dirty_paths()?;
            if !dirty.is_empty() {
                return Err(TreeError::Dirty {
                    count: dirty.len(),
                    sample: sample(&dirty),
                });
            }
        }
        tracing::debug!(root = %vcs.root().display(), %original_ref, "opened working tree");
        Ok(Self {
            vcs,
            original_ref,
            current: None,
        })
    }

    /// Return to `reference` on [`restore`](Self::restore) instead of the
    /// ref that was checked out at [`open`](Self::open).
    pub fn with_original_ref(mut self, reference: impl Into<String>) -> Self {
        self.original_ref = reference.into();
        self
    }

    pub fn root(&self) -> &Path {
        self.vcs.root()
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    /// Revision the tree was last stepped to successfully.
    pub fn current(&self) -> Option<&RevisionId> {
        self.current.as_ref()
    }

    pub fn original_ref(&self) -> &str {
        &self.original_ref
    }

    /// Force the tree to exactly `revision`: checkout, clean, verify.
    ///
    /// On error the tree is in an unknown state and `current()` is `None`;
    /// the next step starts from scratch anyway.
    pub fn step_to(&mut self, revision: &Revision) -> Result<(), CheckoutError> {
        self.current = None;
        let id = &revision.id;

        self.vcs
            .force_checkout(id.as_str())
            .map_err(|source| CheckoutError::Checkout {
                revision: id.clone(),
                source,
            })?;
        self.vcs.clean().map_err(|source| CheckoutError::Clean {
            revision: id.clone(),
            source,
        })?;

        let residue = self
            .vcs
            .dirty_paths()
            .map_err(|source| CheckoutError::Clean {
                revision: id.clone(),
                source,
            })?;
        if !residue.is_empty() {
            tracing::debug!(revision = %id, paths = %sample(&residue), "residue after clean");
            return Err(CheckoutError::Residue {
                revision: id.clone(),
                paths: residue,
            });
        }

        tracing::debug!(revision = %id.short(), "stepped working tree");
        self.current = Some(id.clone());
        Ok(())
    }

    /// Return to the ref that was checked out when the tree was opened,
    /// removing build byproducts of the last revision.
    pub fn restore(&mut self) -> Result<(), TreeError> {
        let reference = self.original_ref.clone();
        let restore_err = |source| TreeError::Restore {
            reference: reference.clone(),
            source,
        };
        self.vcs.force_checkout(&reference).map_err(restore_err)?;
        self.vcs.clean().map_err(restore_err)?;
        self.current = None;
        tracing::info!(reference = %reference, "restored working tree");
        Ok(())
    }
}

fn sample(paths: &[String]) -> String {
    let mut s = paths
        .iter()
        .take(SAMPLE_PATHS)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if paths.len() > SAMPLE_PATHS {
        s.push_str(", ...");
    }
    s
}
