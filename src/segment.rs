// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Adaptive threshold segmentation of the F/F0 frame, one time interval at a
//! time.

use image::Luma;
use imageproc::rect::Rect;
use log::debug;

use crate::baseline::CellEdges;
use crate::frame::{FloatImage, Mask};
use crate::image_funcs::{copy_region, density_filter, truncate_to_mask, zero_mask_borders};
use crate::stats_funcs::stats_for_samples;

/// Criterion of the loose (secondary) mask.
pub const SECONDARY_CRITERION: f32 = 2.0;

/// Cleared border around both masks: half the cross filter extent plus one.
pub const MASK_BORDER: u32 = 3;

// Gain applied before clamping so that anything measurably above the threshold
// saturates to 1.
const THRESHOLD_GAIN: f32 = 100000.0;

/// Rows `top..=bottom` of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub index: usize,
    pub top: u32,
    pub bottom: u32,
}

/// Splits `height` rows into `count` consecutive intervals of
/// ceil(height/count) rows; the last one may be shorter. Intervals that would
/// start past the last row are omitted.
pub fn partition_intervals(height: u32, count: u32) -> Vec<Interval> {
    let count = count.max(1);
    let chunk = height.div_ceil(count);
    let mut intervals = Vec::with_capacity(count as usize);
    for index in 0..count {
        let top = index * chunk;
        if top >= height {
            break;
        }
        let bottom = ((index + 1) * chunk).min(height) - 1;
        intervals.push(Interval{index: index as usize, top, bottom});
    }
    intervals
}

/// Background statistics of an interval with bright pixels excluded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalStats {
    pub mean: f32,
    pub stddev: f32,
}

/// Two-pass statistics over `roi` of the F/F0 frame. The first pass marks
/// pixels above mean + 2 sigma; after a 5x5 density filter of that mark, the
/// second pass uses the unmarked, positive pixels.
pub fn interval_stats(normalized: &FloatImage, roi: &Rect) -> IntervalStats {
    let region = copy_region(normalized, roi);
    let first = stats_for_samples(region.iter().copied());
    let cutoff = first.mean + 2.0 * first.stddev;
    let marked = FloatImage::from_fn(region.width(), region.height(), |x, y| {
        Luma([if region.get_pixel(x, y).0[0] > cutoff { 1.0 } else { 0.0 }])
    });
    let marked = density_filter(&marked, 5, 13.0);
    let second = stats_for_samples(
        region.iter().zip(marked.iter())
            .filter(|(&v, &m)| m == 0.0 && v > 0.0)
            .map(|(&v, _)| v));
    if second.count < 2 {
        return IntervalStats{mean: first.mean, stddev: first.stddev};
    }
    IntervalStats{mean: second.mean, stddev: second.stddev}
}

/// Frame-sized 0/1 mask of pixels above mean + `criterion`*sigma, cleaned up
/// with a 5x5 density filter and with a [MASK_BORDER] pixel border cleared.
pub fn threshold_mask(normalized: &FloatImage, stats: &IntervalStats, criterion: f32)
                      -> Mask {
    let cutoff = stats.mean + criterion * stats.stddev;
    let (width, height) = normalized.dimensions();
    let scaled = FloatImage::from_fn(width, height, |x, y| {
        let v = (normalized.get_pixel(x, y).0[0] - cutoff) * THRESHOLD_GAIN;
        Luma([v.clamp(0.0, 1.0)])
    });
    let mut mask = truncate_to_mask(&density_filter(&scaled, 5, 13.0));
    zero_mask_borders(&mut mask, MASK_BORDER, MASK_BORDER);
    mask
}

pub struct Segmentation {
    pub interval: Interval,
    pub stats: IntervalStats,
    /// Sub-window of the interval searched for seeds.
    pub roi: Rect,
    /// Strict mask; seeds come from here.
    pub primary: Mask,
    /// Loose mask; regions grow into it.
    pub secondary: Mask,
}

pub fn segment_interval(normalized: &FloatImage, edges: &CellEdges,
                        interval: &Interval, criterion: f32) -> Segmentation {
    let roi = edges.inset_rect(interval.top, interval.bottom);
    let stats = interval_stats(normalized, &roi);
    let primary = threshold_mask(normalized, &stats, criterion);
    let secondary = threshold_mask(normalized, &stats, SECONDARY_CRITERION);
    debug!("Interval {} rows {}..={}: mean {:.4} sigma {:.4}",
           interval.index, interval.top, interval.bottom, stats.mean, stats.stddev);
    Segmentation{interval: *interval, stats, roi, primary, secondary}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_funcs::mask_total;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_partition_intervals() {
        assert_eq!(partition_intervals(100, 1),
                   vec![Interval{index: 0, top: 0, bottom: 99}]);
        assert_eq!(partition_intervals(10, 3),
                   vec![Interval{index: 0, top: 0, bottom: 3},
                        Interval{index: 1, top: 4, bottom: 7},
                        Interval{index: 2, top: 8, bottom: 9}]);
        // ceil(6/5) = 2 rows each; the last two intervals would be empty.
        let intervals = partition_intervals(6, 5);
        assert_eq!(intervals.len(), 3);
        assert_eq!(intervals[2], Interval{index: 2, top: 4, bottom: 5});
    }

    #[test]
    fn test_partition_is_exact() {
        for height in 1..40 {
            for count in 1..=5 {
                let intervals = partition_intervals(height, count);
                assert_eq!(intervals[0].top, 0);
                assert_eq!(intervals.last().unwrap().bottom, height - 1);
                for pair in intervals.windows(2) {
                    assert_eq!(pair[0].bottom + 1, pair[1].top);
                }
            }
        }
    }

    fn test_frame() -> FloatImage {
        // Alternating 0.9/1.1 background with a bright 6x6 block.
        FloatImage::from_fn(40, 40, |x, y| {
            if (16..22).contains(&x) && (16..22).contains(&y) {
                Luma([3.0])
            } else if (x + y) % 2 == 0 {
                Luma([0.9])
            } else {
                Luma([1.1])
            }
        })
    }

    #[test]
    fn test_interval_stats_excludes_bright_block() {
        let frame = test_frame();
        let roi = Rect::at(4, 0).of_size(32, 40);
        let first = stats_for_samples(copy_region(&frame, &roi).iter().copied());
        assert!(first.stddev > 0.3);
        let stats = interval_stats(&frame, &roi);
        // The density filter leaves three block pixels unmarked at each corner.
        assert_abs_diff_eq!(stats.mean, 1.019, epsilon = 5e-3);
        assert!(stats.stddev < 0.25, "{:?}", stats);
    }

    #[test]
    fn test_masks() {
        let frame = test_frame();
        let edges = CellEdges{left: 1, right: 38};
        let interval = partition_intervals(40, 1)[0];
        let segmentation = segment_interval(&frame, &edges, &interval, 2.5);
        let primary = &segmentation.primary;
        let secondary = &segmentation.secondary;
        assert!(primary.iter().all(|&v| v <= 1));
        assert_eq!(primary.get_pixel(18, 18).0[0], 1);
        assert_eq!(primary.get_pixel(5, 5).0[0], 0);
        // Primary is a subset of secondary.
        for (p, s) in primary.iter().zip(secondary.iter()) {
            assert!(p <= s);
        }
        assert!(mask_total(primary) > 0);
        assert_eq!(segmentation.roi, Rect::at(5, 0).of_size(30, 40));
    }

    #[test]
    fn test_mask_border_cleared() {
        let frame = FloatImage::from_pixel(20, 20, Luma([5.0]));
        let stats = IntervalStats{mean: 1.0, stddev: 0.1};
        let mask = threshold_mask(&frame, &stats, 2.5);
        assert_eq!(mask_total(&mask), 14 * 14);
        assert_eq!(mask.get_pixel(2, 10).0[0], 0);
        assert_eq!(mask.get_pixel(3, 10).0[0], 1);
    }
}  // mod tests.
