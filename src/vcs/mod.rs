//! Version control access.
//!
//! | Operation | git command |
//! |---|---|
//! | **Current ref** | `git symbolic-ref -q --short HEAD`, falling back to `git rev-parse HEAD` |
//! | **Resolve** | `git rev-parse --verify --quiet <rev>^{commit}` |
//! | **History** | `git log --reverse --topo-order --format=%H%x1f%s <tip>` |
//! | **Force checkout** | `git checkout --force --recurse-submodules --quiet <rev> --` |
//! | **Clean** | `git clean -ffdxq`, then the same inside every initialized submodule |
//! | **Dirty paths** | `git status --porcelain --ignored --untracked-files=all` |
//!
//! The module is split into:
//! - **Backend**: [`VersionControl`] trait + [`VcsError`]
//! - **Git**: [`GitCli`], the implementation that shells out to `git`

pub mod backend;
pub mod git;

pub use backend::{HistoryEntry, VcsError, VersionControl};
pub use git::GitCli;
