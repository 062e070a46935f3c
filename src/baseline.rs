// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Active-cell edge detection and per-column baseline (F0) estimation.

use std::time::Instant;

use image::Luma;
use imageproc::rect::Rect;
use log::{debug, info};

use crate::error::AnalysisError;
use crate::frame::FloatImage;
use crate::image_funcs::{
    column_means, copy_region, density_filter, fill_borders, full_rect, smooth_filter,
};
use crate::stats_funcs::stats_for_samples;

/// Minimum separation of the left and right cell edges, in pixels.
pub const MIN_CELL_WIDTH: u32 = 10;

/// Columns on each side of the active-cell region excluded from noise
/// statistics.
pub const EDGE_INSET: u32 = 4;

/// Column range deemed to be inside the cell, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellEdges {
    pub left: u32,
    pub right: u32,
}

impl CellEdges {
    /// The columns [left+4, right-4] over all rows `top..=bottom`.
    pub fn inset_rect(&self, top: u32, bottom: u32) -> Rect {
        let left = self.left + EDGE_INSET;
        let right = self.right - EDGE_INSET;
        Rect::at(left as i32, top as i32).of_size(right - left + 1, bottom - top + 1)
    }

    pub fn contains(&self, x: u32) -> bool {
        x >= self.left && x <= self.right
    }
}

/// Finds the first and last column whose time-averaged intensity exceeds
/// `background`. An edge on the frame boundary is pulled in by one pixel.
pub fn find_cell_edges(filtered: &FloatImage, background: i32)
                       -> Result<CellEdges, AnalysisError> {
    let width = filtered.width();
    let profile = column_means(filtered, &full_rect(filtered));
    let background = background as f32;
    let left = profile.iter().position(|&m| m > background);
    let right = profile.iter().rposition(|&m| m > background);
    let (Some(left), Some(right)) = (left, right) else {
        return Err(AnalysisError::CellTooNarrow{left: 0, right: 0});
    };
    let mut left = left as u32;
    let mut right = right as u32;
    if left == 0 {
        left = 1;
    }
    if right == width - 1 {
        right = width - 2;
    }
    if right < left || right - left < MIN_CELL_WIDTH {
        return Err(AnalysisError::CellTooNarrow{left, right});
    }
    Ok(CellEdges{left, right})
}

/// Marks pixels that are too bright to be background. The filtered frame is
/// first flattened by its column means; pixels above mean +
/// `outlier_sigma`*sigma (statistics taken over the inset cell region) are
/// marked, as are non-finite pixels. The mark is then cleaned up with a 5x5
/// density filter and its 1-pixel border cleared.
pub fn outlier_mask(filtered: &FloatImage, edges: &CellEdges, outlier_sigma: f32)
                    -> FloatImage {
    let (width, height) = filtered.dimensions();
    let col_means = column_means(filtered, &full_rect(filtered));
    let flattened = FloatImage::from_fn(width, height, |x, y| {
        Luma([filtered.get_pixel(x, y).0[0] / col_means[x as usize]])
    });
    let roi = edges.inset_rect(0, height - 1);
    let stats = stats_for_samples(
        copy_region(&flattened, &roi).iter().copied().filter(|v| v.is_finite()));
    let cutoff = stats.mean + outlier_sigma * stats.stddev;
    let marked = FloatImage::from_fn(width, height, |x, y| {
        let v = flattened.get_pixel(x, y).0[0];
        Luma([if v.is_nan() || v > cutoff { 1.0 } else { 0.0 }])
    });
    let mut mask = density_filter(&marked, 5, 13.0);
    fill_borders(&mut mask, 1, 1, 1, 1, Luma([0.0]));
    mask
}

// Replaces unusable divisors within the cell by the mean of the usable ones.
fn guard_divisors(profile: &mut [f32], edges: &CellEdges) {
    let range = edges.left as usize ..= edges.right as usize;
    let valid: Vec<f32> = profile[range.clone()].iter().copied()
        .filter(|&b| b.is_finite() && b > 0.0)
        .collect();
    let fallback = if valid.is_empty() {
        1.0
    } else {
        valid.iter().sum::<f32>() / valid.len() as f32
    };
    for b in &mut profile[range] {
        if !(b.is_finite() && *b > 0.0) {
            *b = fallback;
        }
    }
}

/// Per-column mean of the unmasked pixels, smoothed with a 3-tap box filter.
/// Within the cell every value is finite and positive.
pub fn baseline_profile(filtered: &FloatImage, mask: &FloatImage, edges: &CellEdges)
                        -> Vec<f32> {
    let (width, height) = filtered.dimensions();
    let mut profile = vec![0.0_f32; width as usize];
    for (x, baseline) in profile.iter_mut().enumerate() {
        let mut sum = 0.0_f32;
        let mut weight = 0.0_f32;
        for y in 0..height {
            let keep = 1.0 - mask.get_pixel(x as u32, y).0[0];
            sum += filtered.get_pixel(x as u32, y).0[0] * keep;
            weight += keep;
        }
        *baseline = if weight > 0.0 { sum / weight } else { f32::NAN };
    }
    guard_divisors(&mut profile, edges);
    for b in profile.iter_mut() {
        if !b.is_finite() {
            *b = 0.0;
        }
    }
    let profile_image = FloatImage::from_raw(width, 1, profile.clone())
        .map(|p| smooth_filter(&p, 3, 1));
    if let Some(smoothed) = profile_image {
        profile = smoothed.into_raw();
    }
    guard_divisors(&mut profile, edges);
    profile
}

/// F/F0: each pixel inside the cell divided by its column's baseline; pixels
/// outside the cell are 1.
pub fn normalize(filtered: &FloatImage, profile: &[f32], edges: &CellEdges)
                 -> FloatImage {
    let (width, height) = filtered.dimensions();
    let mut normalized = FloatImage::from_fn(width, height, |x, y| {
        if edges.contains(x) {
            Luma([filtered.get_pixel(x, y).0[0] / profile[x as usize]])
        } else {
            Luma([1.0])
        }
    });
    fill_borders(&mut normalized, edges.left, width - edges.right - 1, 0, 0, Luma([1.0]));
    normalized
}

pub struct Baseline {
    pub edges: CellEdges,
    /// F0 per column.
    pub profile: Vec<f32>,
    /// F/F0.
    pub normalized: FloatImage,
}

/// Runs edge detection, outlier masking, baseline estimation and
/// normalization on a filtered frame.
pub fn estimate_baseline(filtered: &FloatImage, background: i32, outlier_sigma: f32)
                         -> Result<Baseline, AnalysisError> {
    let start = Instant::now();
    let edges = find_cell_edges(filtered, background)?;
    debug!("Cell edges: {:?}", edges);
    let mask = outlier_mask(filtered, &edges, outlier_sigma);
    let profile = baseline_profile(filtered, &mask, &edges);
    let normalized = normalize(filtered, &profile, &edges);
    info!("Baseline for cell columns {}..={} in {:?}",
          edges.left, edges.right, start.elapsed());
    Ok(Baseline{edges, profile, normalized})
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // Dark background with a bright cell covering columns `left..=right`.
    fn cell_image(width: u32, height: u32, left: u32, right: u32, value: f32)
                  -> FloatImage {
        FloatImage::from_fn(width, height, |x, _y| {
            Luma([if x >= left && x <= right { value } else { 1.0 }])
        })
    }

    #[test]
    fn test_find_cell_edges() {
        let image = cell_image(40, 20, 5, 30, 50.0);
        assert_eq!(find_cell_edges(&image, 2).unwrap(), CellEdges{left: 5, right: 30});

        // Cell touching the frame boundary.
        let image = cell_image(40, 20, 0, 39, 50.0);
        assert_eq!(find_cell_edges(&image, 2).unwrap(), CellEdges{left: 1, right: 38});
    }

    #[test]
    fn test_find_cell_edges_too_narrow() {
        let image = cell_image(40, 20, 5, 14, 50.0);
        assert_eq!(find_cell_edges(&image, 2),
                   Err(AnalysisError::CellTooNarrow{left: 5, right: 14}));
        // Background above every column.
        let image = cell_image(40, 20, 5, 30, 50.0);
        assert!(matches!(find_cell_edges(&image, 60),
                         Err(AnalysisError::CellTooNarrow{..})));
    }

    #[test]
    fn test_constant_cell_normalizes_to_one() {
        let image = cell_image(40, 30, 5, 30, 50.0);
        let baseline = estimate_baseline(&image, 2, 1.5).unwrap();
        // The edge columns' smoothed baseline also sees the dark background.
        assert_abs_diff_eq!(baseline.profile[5], 101.0 / 3.0, epsilon = 1e-3);
        for x in 6..=29 {
            assert_abs_diff_eq!(baseline.profile[x], 50.0, epsilon = 1e-3);
        }
        for y in 0..30 {
            for x in (0..5).chain(6..30).chain(31..40) {
                assert_abs_diff_eq!(baseline.normalized.get_pixel(x, y).0[0], 1.0,
                                    epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_outliers_excluded_from_baseline() {
        let mut image = cell_image(40, 40, 2, 37, 50.0);
        // Bright 7x7 blob.
        for y in 15..22 {
            for x in 15..22 {
                image.put_pixel(x, y, Luma([200.0]));
            }
        }
        let edges = find_cell_edges(&image, 2).unwrap();
        let mask = outlier_mask(&image, &edges, 1.5);
        assert_eq!(mask.get_pixel(18, 18).0[0], 1.0);
        assert_eq!(mask.get_pixel(5, 5).0[0], 0.0);
        let profile = baseline_profile(&image, &mask, &edges);
        // Blob columns away from the blob's edges see only background.
        assert_abs_diff_eq!(profile[18], 50.0, epsilon = 1.0);
    }

    #[test]
    fn test_baseline_divisor_never_zero() {
        // Column 12 is black inside an otherwise bright cell.
        let mut image = cell_image(40, 30, 3, 35, 50.0);
        for y in 0..30 {
            image.put_pixel(12, y, Luma([0.0]));
        }
        let baseline = estimate_baseline(&image, 2, 1.5).unwrap();
        let edges = baseline.edges;
        for x in edges.left..=edges.right {
            let b = baseline.profile[x as usize];
            assert!(b.is_finite() && b > 0.0, "column {} baseline {}", x, b);
        }
        assert!(baseline.normalized.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_guard_divisors() {
        let edges = CellEdges{left: 1, right: 4};
        let mut profile = vec![0.0, 2.0, f32::NAN, 4.0, -1.0, 0.0];
        guard_divisors(&mut profile, &edges);
        assert_eq!(profile, vec![0.0, 2.0, 3.0, 4.0, 3.0, 0.0]);

        let mut profile = vec![0.0; 6];
        guard_divisors(&mut profile, &edges);
        assert_eq!(profile, vec![0.0, 1.0, 1.0, 1.0, 1.0, 0.0]);
    }
}  // mod tests.
