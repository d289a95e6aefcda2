//! Pure geometry for placing pages on frames.
//!
//! All functions here are pure and testable without any I/O or images.

use super::backend::Dimensions;

/// Largest size with the aspect ratio of `source` that fits inside `bounds`.
///
/// Never returns a zero dimension for non-empty input.
///
/// ```text
/// source 1000×1414 (A4 portrait), bounds 800×600  →  424×600
/// source 1600×900 (16:9),         bounds 800×600  →  800×450
/// ```
pub fn fit_within(source: Dimensions, bounds: Dimensions) -> Dimensions {
    if source.width == 0 || source.height == 0 {
        return Dimensions::new(0, 0);
    }
    let scale_w = bounds.width as f64 / source.width as f64;
    let scale_h = bounds.height as f64 / source.height as f64;
    let scale = scale_w.min(scale_h);
    let width = ((source.width as f64 * scale).round() as u32).clamp(1, bounds.width.max(1));
    let height = ((source.height as f64 * scale).round() as u32).clamp(1, bounds.height.max(1));
    Dimensions::new(width, height)
}

/// Offset that centers `inner` inside `outer` (floor of the free space halves).
pub fn center_offset(inner: Dimensions, outer: Dimensions) -> (u32, u32) {
    (
        outer.width.saturating_sub(inner.width) / 2,
        outer.height.saturating_sub(inner.height) / 2,
    )
}

/// Top-left corners of `count` cells tiled row-wise on `canvas`.
///
/// As many cells as fit go on each row; the leftover width is split evenly
/// between the two sides. Rows that do not fit vertically are still
/// returned and end up clipped by the canvas. A canvas narrower than one
/// cell still gets one cell per row.
pub fn sheet_positions(count: usize, cell: Dimensions, canvas: Dimensions) -> Vec<(i64, i64)> {
    let per_row = (canvas.width / cell.width.max(1)).max(1);
    let margin = canvas.width.saturating_sub(per_row * cell.width) / 2;
    (0..count)
        .map(|i| {
            let i = i as u32;
            let x = margin + cell.width * (i % per_row);
            let y = cell.height * (i / per_row);
            (x as i64, y as i64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(w: u32, h: u32) -> Dimensions {
        Dimensions::new(w, h)
    }

    // =========================================================================
    // fit_within
    // =========================================================================

    #[test]
    fn fit_portrait_into_landscape() {
        assert_eq!(fit_within(d(1000, 1414), d(800, 600)), d(424, 600));
    }

    #[test]
    fn fit_landscape_into_landscape() {
        assert_eq!(fit_within(d(1600, 900), d(800, 600)), d(800, 450));
    }

    #[test]
    fn fit_upscales_small_source() {
        assert_eq!(fit_within(d(40, 50), d(80, 100)), d(80, 100));
    }

    #[test]
    fn fit_never_exceeds_bounds() {
        for (w, h) in [(1, 1000), (1000, 1), (333, 777), (800, 600)] {
            let f = fit_within(d(w, h), d(800, 600));
            assert!(f.width <= 800 && f.height <= 600, "{w}x{h} -> {f:?}");
            assert!(f.width >= 1 && f.height >= 1);
        }
    }

    #[test]
    fn fit_empty_source() {
        assert_eq!(fit_within(d(0, 10), d(800, 600)), d(0, 0));
    }

    // =========================================================================
    // center_offset
    // =========================================================================

    #[test]
    fn center_offset_splits_free_space() {
        assert_eq!(center_offset(d(424, 600), d(800, 600)), (188, 0));
        assert_eq!(center_offset(d(800, 450), d(800, 600)), (0, 75));
    }

    #[test]
    fn center_offset_oversized_is_zero() {
        assert_eq!(center_offset(d(900, 700), d(800, 600)), (0, 0));
    }

    // =========================================================================
    // sheet_positions
    // =========================================================================

    #[test]
    fn sheet_default_sizes() {
        // 800 / 80 = 10 per row, no margin
        let pos = sheet_positions(12, d(80, 100), d(800, 600));
        assert_eq!(pos[0], (0, 0));
        assert_eq!(pos[9], (720, 0));
        assert_eq!(pos[10], (0, 100));
        assert_eq!(pos[11], (80, 100));
    }

    #[test]
    fn sheet_margin_centers_rows() {
        // 250 / 80 = 3 per row, 10px free → 5px margin
        let pos = sheet_positions(4, d(80, 100), d(250, 400));
        assert_eq!(pos, vec![(5, 0), (85, 0), (165, 0), (5, 100)]);
    }

    #[test]
    fn sheet_cell_wider_than_canvas() {
        let pos = sheet_positions(2, d(300, 100), d(200, 400));
        assert_eq!(pos, vec![(0, 0), (0, 100)]);
    }

    #[test]
    fn sheet_empty() {
        assert!(sheet_positions(0, d(80, 100), d(800, 600)).is_empty());
    }
}
