//! Placing rendered pages onto fixed-size frames.
//!
//! Every frame of a run has the same canvas size. A page is scaled to fit
//! the canvas (or its sheet cell) preserving aspect ratio, centered, and the
//! remaining area is filled with the background colour.

use super::backend::Dimensions;
use super::calculations::{center_offset, fit_within, sheet_positions};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

fn dims(img: &RgbaImage) -> Dimensions {
    Dimensions::new(img.width(), img.height())
}

/// Scale `page` to fit `bounds` unless it already has the fitted size.
fn scaled(page: &RgbaImage, bounds: Dimensions) -> Option<RgbaImage> {
    let fitted = fit_within(dims(page), bounds);
    if fitted == dims(page) || fitted.width == 0 {
        None
    } else {
        Some(imageops::resize(
            page,
            fitted.width,
            fitted.height,
            FilterType::Lanczos3,
        ))
    }
}

/// Letterbox `page` onto a `canvas`-sized frame.
pub fn fit_to_canvas(page: &RgbaImage, canvas: Dimensions, background: Rgba<u8>) -> RgbaImage {
    let mut frame = RgbaImage::from_pixel(canvas.width, canvas.height, background);
    place(&mut frame, page, (0, 0), canvas);
    frame
}

/// Tile `pages` row-wise onto one `canvas`-sized frame, each page fitted
/// into a `cell`. Pages past the bottom edge are clipped.
pub fn layout_sheet(
    pages: &[RgbaImage],
    cell: Dimensions,
    canvas: Dimensions,
    background: Rgba<u8>,
) -> RgbaImage {
    let mut frame = RgbaImage::from_pixel(canvas.width, canvas.height, background);
    for (page, origin) in pages.iter().zip(sheet_positions(pages.len(), cell, canvas)) {
        place(&mut frame, page, origin, cell);
    }
    frame
}

/// Draw `page` fitted and centered inside the box at `origin` of size `bounds`.
fn place(frame: &mut RgbaImage, page: &RgbaImage, origin: (i64, i64), bounds: Dimensions) {
    let resized = scaled(page, bounds);
    let page = resized.as_ref().unwrap_or(page);
    let (dx, dy) = center_offset(dims(page), bounds);
    imageops::overlay(frame, page, origin.0 + dx as i64, origin.1 + dy as i64);
}
