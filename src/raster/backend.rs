//! Rasterizer trait and shared types.
//!
//! The [`Rasterizer`] trait defines the two operations the capture stage
//! needs from a PDF renderer: count pages, and render one page to pixels.
//!
//! The production implementation is
//! [`PopplerRasterizer`](super::poppler::PopplerRasterizer), which shells out
//! to `pdfinfo` and `pdftoppm`.

use image::RgbaImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{tool} failed ({status}): {stderr}")]
    Tool {
        tool: &'static str,
        status: String,
        stderr: String,
    },
    #[error("{tool} not found on PATH (install poppler-utils)")]
    ToolMissing { tool: &'static str },
    #[error("unreadable PDF {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },
    #[error("PDF has no pages: {}", .0.display())]
    NoPages(PathBuf),
    #[error("page {page} out of range, document has {count}")]
    PageOutOfRange { page: usize, count: usize },
    #[error("page range {first}..={last} selects nothing from {count} pages")]
    NoPagesSelected {
        first: usize,
        last: usize,
        count: usize,
    },
    #[error("could not decode rendered page: {0}")]
    Decode(#[from] image::ImageError),
}

/// Pixel size of a rendered page or a target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A PDF renderer.
///
/// `Sync` so pages of one document can be rendered in parallel.
pub trait Rasterizer: Sync {
    /// Number of pages in the document. Zero pages is an error.
    fn page_count(&self, pdf: &Path) -> Result<usize, RasterError>;

    /// Render the page at 0-based `page_index` so that it fits within
    /// `target`, preserving aspect ratio. The result may be smaller than
    /// `target` in one dimension.
    fn render_page(
        &self,
        pdf: &Path,
        page_index: usize,
        target: Dimensions,
    ) -> Result<RgbaImage, RasterError>;
}
