//! Page rasterization.
//!
//! | Operation | Tool / function |
//! |---|---|
//! | **Page count** | `pdfinfo <pdf>`, `Pages:` line |
//! | **Render page** | `pdftoppm -png -f N -l N -scale-to PX <pdf>` to stdout |
//! | **Fit to canvas** | `imageops::resize` (Lanczos3) + `imageops::overlay` |
//! | **Sheet** | row-wise tiling of page cells onto one canvas |
//!
//! The module is split into:
//! - **Calculations**: pure functions for fit and tiling geometry (unit testable)
//! - **Backend**: [`Rasterizer`] trait + [`RasterError`]
//! - **Poppler**: [`PopplerRasterizer`], the implementation that shells out to poppler-utils
//! - **Compose**: placing rendered pages onto fixed-size frame canvases

pub mod backend;
mod calculations;
pub mod compose;
pub mod poppler;

pub use backend::{Dimensions, RasterError, Rasterizer};
pub use compose::{fit_to_canvas, layout_sheet};
pub use poppler::PopplerRasterizer;
