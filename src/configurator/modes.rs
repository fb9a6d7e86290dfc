// SPDX-License-Identifier: GPL-3.0-only

use crate::backend::DisplayMode;

const MM_PER_INCH: f64 = 25.4;

/// Finds a mode both outputs can display with identical dimensions.
///
/// Both lists must be sorted by width and then height, largest first, which
/// lets the search co-walk them once: the cursor on the larger mode can never
/// match anything further down the other list, so it is the one to advance.
pub fn find_mirror_mode<M: DisplayMode>(one: &[M], two: &[M]) -> Option<(M, M)> {
    let (mut i, mut j) = (0, 0);
    while i < one.len() && j < two.len() {
        let (a, b) = (one[i].dimensions(), two[j].dimensions());
        if a == b {
            return Some((one[i], two[j]));
        }
        if a > b {
            i += 1;
        } else {
            j += 1;
        }
    }
    None
}

/// Integer scale factor of an output: 2 above the density threshold, else 1.
pub fn device_scale_factor(mm_width: u32, pixel_width: u32, dpi_threshold: f64) -> u32 {
    if mm_width == 0 {
        // projectors and broken EDIDs report no size
        return 1;
    }
    let dpi = pixel_width as f64 / (mm_width as f64 / MM_PER_INCH);
    if dpi > dpi_threshold {
        2
    } else {
        1
    }
}

/// Geometry of two outputs stacked vertically in one framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackedLayout {
    pub framebuffer: (u32, u32),
    /// Vertical offset of the lower output, the upper one sits at (0, 0).
    pub bottom_y: u32,
}

/// Places `top` at the origin and `bottom` below it, separated by `gap` pixels
/// so the cursor cannot be drawn across the edge of the visible output.
pub fn stacked_layout(top: (u32, u32), bottom: (u32, u32), gap: u32) -> StackedLayout {
    StackedLayout {
        framebuffer: (top.0.max(bottom.0), top.1 + bottom.1 + gap),
        bottom_y: top.1 + gap,
    }
}
