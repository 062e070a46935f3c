// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use crate::frame::FloatImage;
use crate::image_funcs::median_filter;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    pub mean: f32,
    /// Sample standard deviation (n-1 denominator). Zero when fewer than two
    /// samples were seen.
    pub stddev: f32,
    pub count: usize,
}

/// Mean and sample standard deviation of `samples`. Accumulates in f64.
pub fn stats_for_samples<I>(samples: I) -> SampleStats
where I: IntoIterator<Item = f32>
{
    let mut count = 0_usize;
    let mut first_moment = 0.0_f64;
    let mut second_moment = 0.0_f64;
    for v in samples {
        count += 1;
        first_moment += v as f64;
        second_moment += v as f64 * v as f64;
    }
    if count == 0 {
        return SampleStats{mean: 0.0, stddev: 0.0, count};
    }
    let mean = first_moment / count as f64;
    let stddev = if count > 1 {
        let variance = (second_moment - count as f64 * mean * mean) / (count - 1) as f64;
        variance.max(0.0).sqrt()
    } else {
        0.0
    };
    SampleStats{mean: mean as f32, stddev: stddev as f32, count}
}

/// Population standard deviation of `samples`.
pub fn population_stddev(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = samples.iter()
        .map(|&v| (v as f64 - mean) * (v as f64 - mean))
        .sum::<f64>() / n;
    variance.sqrt() as f32
}

/// Residuals of the noise estimate are clamped to the 8-bit range, whatever
/// the frame's bit depth.
pub const NOISE_RESIDUAL_MAX: f32 = 255.0;

/// Estimates the frame's shot/read noise as the sample standard deviation of
/// the residual between the frame and its 3x3 median. Residuals are clamped to
/// [0, [NOISE_RESIDUAL_MAX]].
pub fn estimate_noise(image: &FloatImage) -> f32 {
    let smoothed = median_filter(image, 3);
    let residuals = image.as_raw().iter().zip(smoothed.as_raw().iter())
        .map(|(&raw, &med)| (raw - med).clamp(0.0, NOISE_RESIDUAL_MAX));
    stats_for_samples(residuals).stddev
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::Luma;
    use imageproc::gray_image;

    #[test]
    fn test_stats_for_samples() {
        let stats = stats_for_samples(Vec::<f32>::new());
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 0.0);

        let stats = stats_for_samples([4.0]);
        assert_eq!(stats.mean, 4.0);
        assert_eq!(stats.stddev, 0.0);

        let stats = stats_for_samples([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.count, 8);
        assert_abs_diff_eq!(stats.mean, 5.0);
        // Sample variance is 32/7.
        assert_abs_diff_eq!(stats.stddev, (32.0_f32 / 7.0).sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_population_stddev() {
        assert_eq!(population_stddev(&[]), 0.0);
        assert_abs_diff_eq!(
            population_stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.0,
            epsilon = 1e-6);
    }

    #[test]
    fn test_estimate_noise_constant() {
        let image = FloatImage::from_pixel(10, 10, Luma([77.0]));
        assert_eq!(estimate_noise(&image), 0.0);
    }

    #[test]
    fn test_estimate_noise_single_spike() {
        let image = gray_image!(type: f32,
            0.0, 0.0, 0.0, 0.0;
            0.0, 9.0, 0.0, 0.0;
            0.0, 0.0, 0.0, 0.0;
            0.0, 0.0, 0.0, 0.0);
        // Only the spike leaves a residual of 9; 16 samples.
        let expected = stats_for_samples(
            std::iter::once(9.0).chain(std::iter::repeat(0.0).take(15))).stddev;
        assert_abs_diff_eq!(estimate_noise(&image), expected, epsilon = 1e-6);
    }

    #[test]
    fn test_estimate_noise_clamps_sixteen_bit_residual() {
        // 16-bit frame with one pixel 1000 above its neighborhood median.
        let mut image = FloatImage::from_pixel(6, 6, Luma([3000.0]));
        image.put_pixel(2, 3, Luma([4000.0]));
        let clamped = stats_for_samples(
            std::iter::once(255.0).chain(std::iter::repeat(0.0).take(35))).stddev;
        assert_abs_diff_eq!(estimate_noise(&image), clamped, epsilon = 1e-3);
    }
}  // mod tests.
