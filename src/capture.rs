//! Build-and-capture: turn the currently checked-out revision into frames.
//!
//! ```text
//! &WorkingTree ──build──▶ BuildArtifact (PDF) ──page_count──▶ select pages
//!                                             ──render_page (parallel)──▶ fit ──▶ Vec<Frame>
//! ```
//!
//! Capture only reads the tree (the build writes its byproducts into it,
//! which the next step removes). The outcome is all-or-nothing: if any
//! selected page fails to render the revision contributes no frames at all.
//! Failures are returned as a tagged [`RevisionOutcome`], never raised.

use crate::build::{BuildFailure, Builder};
use crate::frame::Frame;
use crate::raster::{Dimensions, RasterError, Rasterizer, fit_to_canvas, layout_sheet};
use crate::tree::{CheckoutError, WorkingTree};
use crate::types::{FrameKey, Layout, Revision};
use crate::vcs::VersionControl;
use image::Rgba;
use rayon::prelude::*;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 1-based inclusive page selection. Unset ends mean first/last page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PageRange {
    pub first: Option<usize>,
    pub last: Option<usize>,
}

impl PageRange {
    /// 0-based page indices selected from a document with `count` pages.
    /// `last` beyond the end is clamped.
    pub fn select(&self, count: usize) -> Result<Range<usize>, RasterError> {
        let first = self.first.unwrap_or(1).max(1);
        let last = self.last.unwrap_or(count).min(count);
        if first > last {
            return Err(RasterError::NoPagesSelected { first, last, count });
        }
        Ok(first - 1..last)
    }
}

/// Everything that shapes how a revision is built and rendered. Fixed for
/// the whole run.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Build directory relative to the tree root. Empty for the root.
    pub subdirectory: PathBuf,
    /// PDF location: absolute, relative to the invoking directory (when that
    /// lands inside the repository), or relative to the build directory.
    pub pdf_path: PathBuf,
    pub canvas: Dimensions,
    /// Cell size of one page in [`Layout::Sheet`].
    pub page_cell: Dimensions,
    pub layout: Layout,
    pub pages: PageRange,
    pub background: Rgba<u8>,
}

impl CaptureSettings {
    pub fn build_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.subdirectory)
    }

    pub fn pdf_in(&self, build_dir: &Path) -> PathBuf {
        if self.pdf_path.is_absolute() {
            self.pdf_path.clone()
        } else {
            build_dir.join(&self.pdf_path)
        }
    }

    /// The PDF a build in the tree at `root` left behind, if any.
    ///
    /// A relative `pdf_path` is first taken relative to `cwd`, but only a
    /// file inside the repository counts; a stale copy elsewhere must not
    /// stand in for every revision. Then it is taken relative to the build
    /// directory.
    pub fn locate_pdf(&self, root: &Path, cwd: &Path) -> Option<PathBuf> {
        if !self.pdf_path.is_absolute() {
            let from_cwd = cwd.join(&self.pdf_path);
            if from_cwd.is_file() && lies_within(&from_cwd, root) {
                return Some(from_cwd);
            }
        }
        let pdf = self.pdf_in(&self.build_dir(root));
        pdf.is_file().then_some(pdf)
    }
}

/// Whether the existing `path` is inside the existing directory `root`.
fn lies_within(path: &Path, root: &Path) -> bool {
    match (path.canonicalize(), root.canonicalize()) {
        (Ok(path), Ok(root)) => path.starts_with(root),
        _ => false,
    }
}

/// The PDF a successful build left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub pdf: PathBuf,
}

/// Why a revision contributed no frames.
#[derive(Error, Debug)]
pub enum SkipReason {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),
    #[error(transparent)]
    Build(#[from] BuildFailure),
    #[error(transparent)]
    Raster(#[from] RasterError),
}

impl SkipReason {
    /// Short stage name for summaries.
    pub fn stage(&self) -> &'static str {
        match self {
            SkipReason::Checkout(_) => "checkout",
            SkipReason::Build(_) => "build",
            SkipReason::Raster(_) => "rasterize",
        }
    }
}

#[derive(Debug)]
pub enum RevisionOutcome {
    Captured(Vec<Frame>),
    Skipped(SkipReason),
}

/// Build the checked-out revision and render its pages.
#[tracing::instrument(
    name = "capture",
    skip_all,
    fields(revision = %revision.id.short(), index = revision.index)
)]
pub fn capture_revision<V: VersionControl>(
    tree: &WorkingTree<V>,
    builder: &dyn Builder,
    rasterizer: &dyn Rasterizer,
    settings: &CaptureSettings,
    revision: &Revision,
) -> RevisionOutcome {
    let artifact = match run_build(tree.root(), builder, settings) {
        Ok(a) => a,
        Err(e) => return RevisionOutcome::Skipped(e.into()),
    };
    match rasterize(&artifact, rasterizer, settings, revision) {
        Ok(frames) => {
            tracing::debug!(frames = frames.len(), "captured");
            RevisionOutcome::Captured(frames)
        }
        Err(e) => RevisionOutcome::Skipped(e.into()),
    }
}

/// Run the build command in the build directory and locate the PDF.
pub fn run_build(
    root: &Path,
    builder: &dyn Builder,
    settings: &CaptureSettings,
) -> Result<BuildArtifact, BuildFailure> {
    let dir = settings.build_dir(root);
    if !dir.is_dir() {
        return Err(BuildFailure::MissingDirectory(dir));
    }
    let exit = builder.build(&dir)?;
    if !exit.success {
        return Err(BuildFailure::NonZeroExit {
            code: exit.code,
            stderr_tail: exit.stderr_tail,
        });
    }
    let cwd = std::env::current_dir().unwrap_or_default();
    let Some(pdf) = settings.locate_pdf(root, &cwd) else {
        return Err(BuildFailure::MissingOutput(settings.pdf_in(&dir)));
    };
    tracing::debug!(pdf = %pdf.display(), elapsed_ms = exit.duration.as_millis() as u64, "built");
    Ok(BuildArtifact { pdf })
}

/// Render the selected pages of `artifact` into frames for `revision`.
pub fn rasterize(
    artifact: &BuildArtifact,
    rasterizer: &dyn Rasterizer,
    settings: &CaptureSettings,
    revision: &Revision,
) -> Result<Vec<Frame>, RasterError> {
    let count = rasterizer.page_count(&artifact.pdf)?;
    let selected = settings.pages.select(count)?;

    let target = match settings.layout {
        Layout::Pages => settings.canvas,
        Layout::Sheet => settings.page_cell,
    };
    let pages = selected
        .into_par_iter()
        .map(|i| rasterizer.render_page(&artifact.pdf, i, target))
        .collect::<Result<Vec<_>, _>>()?;

    let frame = |page_index: usize, image| {
        Frame::new(
            FrameKey::new(revision.index, page_index),
            revision.id.clone(),
            image,
        )
    };
    Ok(match settings.layout {
        Layout::Pages => pages
            .iter()
            .enumerate()
            .map(|(i, page)| frame(i, fit_to_canvas(page, settings.canvas, settings.background)))
            .collect(),
        Layout::Sheet => vec![frame(
            0,
            layout_sheet(
                &pages,
                settings.page_cell,
                settings.canvas,
                settings.background,
            ),
        )],
    })
}
