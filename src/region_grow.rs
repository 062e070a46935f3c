// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Isolates individual events by growing a region from each seed pixel of the
//! strict mask into the loose mask, one 8-connected ring at a time, within a
//! window sized to the largest plausible event.

use image::Luma;
use imageproc::rect::Rect;
use log::warn;

use crate::frame::Mask;
use crate::image_funcs::{mask_to_float, nonzero_to_mask, smooth_filter};

/// Upper bound on growth iterations for a single event.
pub const MAX_GROWTH_ITERATIONS: u32 = 500;

/// Half width of the growth window, in um.
pub const WINDOW_HALF_WIDTH_UM: f32 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthOutcome {
    /// The frontier became empty after this many iterations.
    Grown(u32),
    MaxIterationsReached,
}

/// Working copies of the frame-wide masks for one interval.
pub struct WorkingMasks {
    pub primary: Mask,
    pub secondary: Mask,
    /// Seeds not yet claimed: the primary mask restricted to the interval's
    /// search sub-window.
    pub claims: Mask,
}

impl WorkingMasks {
    pub fn new(primary: &Mask, secondary: &Mask, search_roi: &Rect) -> Self {
        let claims = Mask::from_fn(primary.width(), primary.height(), |x, y| {
            let inside = x as i32 >= search_roi.left() && x as i32 <= search_roi.right()
                && y as i32 >= search_roi.top() && y as i32 <= search_roi.bottom();
            if inside { *primary.get_pixel(x, y) } else { Luma([0]) }
        });
        WorkingMasks{primary: primary.clone(), secondary: secondary.clone(), claims}
    }

    /// First unclaimed seed in row-major order.
    pub fn next_seed(&self) -> Option<(u32, u32)> {
        let width = self.claims.width() as usize;
        self.claims.as_raw().iter().position(|&v| v > 0)
            .map(|i| ((i % width) as u32, (i / width) as u32))
    }

    /// Clears every mask wherever `window`'s region is set.
    pub fn subtract_region(&mut self, window: &GrowthWindow) {
        for (x, y, p) in window.region.enumerate_pixels() {
            if p.0[0] == 0 {
                continue;
            }
            let (fx, fy) = (window.left + x, window.top + y);
            self.primary.put_pixel(fx, fy, Luma([0]));
            self.secondary.put_pixel(fx, fy, Luma([0]));
            self.claims.put_pixel(fx, fy, Luma([0]));
        }
    }
}

/// Local rectangle around a seed together with the region claimed in it.
#[derive(Debug, Clone)]
pub struct GrowthWindow {
    pub left: u32,
    pub top: u32,
    /// Region grown so far, in window coordinates.
    pub region: Mask,
}

impl GrowthWindow {
    /// Window around (`seed_x`, `seed_y`) reaching up to `half_x` columns and
    /// `half_t` rows on each side, clipped independently on each side to the
    /// `frame_width` x `frame_height` frame. The region holds only the seed.
    pub fn clip(seed_x: u32, seed_y: u32, half_x: u32, half_t: u32,
                frame_width: u32, frame_height: u32) -> GrowthWindow {
        let left_extent = half_x.min(seed_x);
        let right_extent = half_x.min(frame_width - seed_x - 1);
        let top_extent = half_t.min(seed_y);
        let bottom_extent = half_t.min(frame_height - seed_y - 1);
        let width = left_extent + right_extent + 1;
        let height = top_extent + bottom_extent + 1;
        let mut region = Mask::new(width, height);
        region.put_pixel(left_extent, top_extent, Luma([1]));
        GrowthWindow{left: seed_x - left_extent, top: seed_y - top_extent, region}
    }

    pub fn width(&self) -> u32 {
        self.region.width()
    }

    pub fn height(&self) -> u32 {
        self.region.height()
    }

    pub fn rect(&self) -> Rect {
        Rect::at(self.left as i32, self.top as i32).of_size(self.width(), self.height())
    }
}

/// Window half extents for the given calibration.
///
/// # Arguments
/// * `pixel_size` - um per pixel.
/// * `scan_interval` - ms per line.
/// * `max_duration` - Longest allowed event, in ms.
pub fn window_half_extents(pixel_size: f32, scan_interval: f32, max_duration: f32)
                           -> (u32, u32) {
    ((WINDOW_HALF_WIDTH_UM / pixel_size) as u32,
     (max_duration / scan_interval) as u32)
}

// Pixels of the region's 3x3 dilation (window border excepted) that are still
// set in the loose mask.
fn frontier(window: &GrowthWindow, secondary: &Mask) -> Mask {
    let dilated = nonzero_to_mask(&smooth_filter(&mask_to_float(&window.region), 3, 3));
    Mask::from_fn(window.width(), window.height(), |x, y| {
        let s = secondary.get_pixel(window.left + x, window.top + y).0[0];
        Luma([dilated.get_pixel(x, y).0[0] & s])
    })
}

/// Grows the window's region until no loose-mask pixel adjoins it, consuming
/// the grown pixels from `masks`. On return the whole region, seed included,
/// has been removed from every working mask.
pub fn grow(window: &mut GrowthWindow, masks: &mut WorkingMasks) -> GrowthOutcome {
    let mut outcome = GrowthOutcome::MaxIterationsReached;
    for iteration in 0..MAX_GROWTH_ITERATIONS {
        let front = frontier(window, &masks.secondary);
        if front.iter().all(|&v| v == 0) {
            outcome = GrowthOutcome::Grown(iteration);
            break;
        }
        for (r, f) in window.region.iter_mut().zip(front.iter()) {
            *r |= f;
        }
        masks.subtract_region(window);
    }
    if outcome == GrowthOutcome::MaxIterationsReached {
        warn!("Region growth at window ({}, {}) stopped after {} iterations",
              window.left, window.top, MAX_GROWTH_ITERATIONS);
    }
    masks.subtract_region(window);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_funcs::mask_total;
    use imageproc::gray_image;

    #[test]
    fn test_clip() {
        let window = GrowthWindow::clip(20, 30, 7, 25, 64, 64);
        assert_eq!(window.rect(), Rect::at(13, 5).of_size(15, 51));
        assert_eq!(window.region.get_pixel(7, 25).0[0], 1);
        assert_eq!(mask_total(&window.region), 1);

        // Clipped on the left and bottom only.
        let window = GrowthWindow::clip(2, 60, 7, 25, 64, 64);
        assert_eq!(window.rect(), Rect::at(0, 35).of_size(10, 29));
        assert_eq!(window.region.get_pixel(2, 25).0[0], 1);

        // Single pixel frame.
        let window = GrowthWindow::clip(0, 0, 7, 25, 1, 1);
        assert_eq!(window.rect(), Rect::at(0, 0).of_size(1, 1));
    }

    #[test]
    fn test_window_half_extents() {
        assert_eq!(window_half_extents(0.5, 10.0, 250.0), (12, 25));
        assert_eq!(window_half_extents(0.829, 1000.0 / 345.0, 250.0), (7, 86));
        assert_eq!(window_half_extents(0.829, 1000.0 / 345.0, 2500.0), (7, 862));
    }

    #[test]
    fn test_next_seed_row_major() {
        let primary = gray_image!(
            0, 0, 0, 0;
            0, 0, 1, 0;
            0, 1, 1, 0;
            0, 0, 0, 0);
        let masks = WorkingMasks::new(&primary, &primary, &Rect::at(0, 0).of_size(4, 4));
        assert_eq!(masks.next_seed(), Some((2, 1)));

        // Restricting the search window drops the first candidate.
        let masks = WorkingMasks::new(&primary, &primary, &Rect::at(0, 2).of_size(4, 2));
        assert_eq!(masks.next_seed(), Some((1, 2)));
        assert_eq!(mask_total(&masks.primary), 3);
    }

    #[test]
    fn test_grow_connected_blob() {
        let secondary = gray_image!(
            0, 0, 0, 0, 0, 0, 0, 0;
            0, 1, 1, 0, 0, 0, 0, 0;
            0, 1, 1, 1, 0, 0, 1, 0;
            0, 0, 0, 1, 0, 0, 1, 0;
            0, 0, 0, 0, 0, 0, 0, 0;
            0, 0, 0, 0, 0, 0, 0, 0);
        let primary = gray_image!(
            0, 0, 0, 0, 0, 0, 0, 0;
            0, 1, 0, 0, 0, 0, 0, 0;
            0, 0, 0, 0, 0, 0, 1, 0;
            0, 0, 0, 0, 0, 0, 0, 0;
            0, 0, 0, 0, 0, 0, 0, 0;
            0, 0, 0, 0, 0, 0, 0, 0);
        let mut masks = WorkingMasks::new(&primary, &secondary,
                                          &Rect::at(0, 0).of_size(8, 6));
        let (sx, sy) = masks.next_seed().unwrap();
        assert_eq!((sx, sy), (1, 1));
        let mut window = GrowthWindow::clip(sx, sy, 10, 10, 8, 6);
        let outcome = grow(&mut window, &mut masks);
        assert!(matches!(outcome, GrowthOutcome::Grown(_)));
        // The left blob (6 pixels) is claimed, the right one is not.
        assert_eq!(mask_total(&window.region), 6);
        assert_eq!(window.region.get_pixel(3, 3).0[0], 1);
        assert_eq!(window.region.get_pixel(6, 2).0[0], 0);
        assert_eq!(mask_total(&masks.secondary), 2);
        assert_eq!(masks.next_seed(), Some((6, 2)));
    }

    #[test]
    fn test_seed_always_removed() {
        // Seed without support in the loose mask.
        let primary = gray_image!(
            0, 0, 0;
            0, 1, 0;
            0, 0, 0);
        let secondary = Mask::new(3, 3);
        let mut masks = WorkingMasks::new(&primary, &secondary,
                                          &Rect::at(0, 0).of_size(3, 3));
        let mut window = GrowthWindow::clip(1, 1, 1, 1, 3, 3);
        assert_eq!(grow(&mut window, &mut masks), GrowthOutcome::Grown(0));
        assert_eq!(mask_total(&window.region), 1);
        assert_eq!(masks.next_seed(), None);
    }

    #[test]
    fn test_growth_terminates_within_window() {
        // Solid loose mask; growth is bounded by the window.
        let secondary = Mask::from_pixel(30, 30, Luma([1]));
        let mut masks = WorkingMasks::new(&secondary, &secondary,
                                          &Rect::at(0, 0).of_size(30, 30));
        let mut window = GrowthWindow::clip(15, 15, 4, 4, 30, 30);
        let outcome = grow(&mut window, &mut masks);
        // The 3x3 dilation never reaches the window's outer ring.
        assert_eq!(outcome, GrowthOutcome::Grown(3));
        assert_eq!(mask_total(&window.region), 7 * 7);
        assert_eq!(masks.secondary.get_pixel(11, 15).0[0], 1);
        assert_eq!(masks.secondary.get_pixel(12, 15).0[0], 0);
    }

    #[test]
    fn test_growth_stops_at_iteration_cap() {
        // Tall loose mask with a long time window: the region gains one row per
        // iteration and cannot finish in time.
        let secondary = Mask::from_pixel(5, 1200, Luma([1]));
        let mut masks = WorkingMasks::new(&secondary, &secondary,
                                          &Rect::at(0, 0).of_size(5, 1200));
        let mut window = GrowthWindow::clip(2, 1, 2, 1100, 5, 1200);
        assert_eq!(window.rect(), Rect::at(0, 0).of_size(5, 1102));
        let outcome = grow(&mut window, &mut masks);
        assert_eq!(outcome, GrowthOutcome::MaxIterationsReached);
        // Rows 1..=501 of the three inner columns; the region is kept.
        assert_eq!(mask_total(&window.region), 3 * 501);
        assert_eq!(window.region.get_pixel(2, 501).0[0], 1);
        assert_eq!(window.region.get_pixel(2, 502).0[0], 0);
        assert_eq!(window.region.get_pixel(0, 10).0[0], 0);
        assert_eq!(masks.secondary.get_pixel(2, 501).0[0], 0);
        assert_eq!(masks.secondary.get_pixel(2, 502).0[0], 1);
    }
}  // mod tests.
