// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Undecimated ("a-trous") wavelet denoising with the separable B3-spline
//! kernel [1, 4, 6, 4, 1] / 16.
//!
//! The frame is decomposed into [LEVELS] detail planes plus a smooth residual.
//! Level `l` smooths the previous approximation with the kernel taps spaced
//! 2^l samples apart; the detail plane is the difference between successive
//! approximations, so summing the residual and all detail planes reproduces
//! the input exactly.
//!
//! To decide which coefficients are noise, a synthetic unit variance Gaussian
//! image of the same size is decomposed the same way. The population standard
//! deviation of each of its detail planes gives the per-level response to
//! unit noise; scaled by the frame's measured noise and a per-level
//! multiplier, this is the threshold below which a detail coefficient is
//! zeroed.

use std::time::Instant;

use image::Luma;
use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

use crate::frame::FloatImage;
use crate::stats_funcs::{estimate_noise, population_stddev};

/// Number of detail planes.
pub const LEVELS: usize = 5;

/// The synthetic noise image is always generated from this seed, making the
/// denoiser deterministic.
pub const NOISE_SEED: u64 = 20210220;

const B3_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

pub struct WaveletPlanes {
    /// Finest scale first.
    pub details: Vec<FloatImage>,
    pub residual: FloatImage,
}

impl WaveletPlanes {
    /// Sum of the residual and all detail planes.
    pub fn reconstruct(&self) -> FloatImage {
        let mut result = self.residual.clone();
        for plane in &self.details {
            for (r, d) in result.iter_mut().zip(plane.iter()) {
                *r += d;
            }
        }
        result
    }
}

/// Maps a possibly out of range index into 0..n by mirror reflection about the
/// first and last sample (e.g. -1 -> 1, n -> n-2). Reflection repeats as often
/// as needed, so even the coarsest dilation (offsets up to 32) is defined on
/// frames narrower than that.
fn reflect_index(i: i64, n: i64) -> i64 {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let m = i.rem_euclid(period);
    if m < n { m } else { period - m }
}

// One separable B3 smoothing pass with taps `step` samples apart.
fn smooth_b3(image: &FloatImage, step: i64) -> FloatImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width as i64, height as i64);
    let horizontal = FloatImage::from_fn(width, height, |x, y| {
        let mut sum = 0.0;
        for (k, coef) in B3_KERNEL.iter().enumerate() {
            let xx = reflect_index(x as i64 + (k as i64 - 2) * step, w);
            sum += coef * image.get_pixel(xx as u32, y).0[0];
        }
        Luma([sum])
    });
    FloatImage::from_fn(width, height, |x, y| {
        let mut sum = 0.0;
        for (k, coef) in B3_KERNEL.iter().enumerate() {
            let yy = reflect_index(y as i64 + (k as i64 - 2) * step, h);
            sum += coef * horizontal.get_pixel(x, yy as u32).0[0];
        }
        Luma([sum])
    })
}

/// Decomposes `image` into `levels` detail planes and a residual.
pub fn decompose(image: &FloatImage, levels: usize) -> WaveletPlanes {
    let mut details = Vec::with_capacity(levels);
    let mut approximation = image.clone();
    for level in 0..levels {
        let smoothed = smooth_b3(&approximation, 1_i64 << level);
        let mut detail = approximation;
        for (d, s) in detail.iter_mut().zip(smoothed.iter()) {
            *d -= s;
        }
        details.push(detail);
        approximation = smoothed;
    }
    WaveletPlanes{details, residual: approximation}
}

/// Per-level standard deviation of the detail planes of a seeded unit
/// Gaussian noise image of the given size.
pub fn noise_scale_factors(width: u32, height: u32) -> [f32; LEVELS] {
    let mut rng = StdRng::seed_from_u64(NOISE_SEED);
    let noise = FloatImage::from_fn(width, height, |_, _| {
        Luma([StandardNormal.sample(&mut rng)])
    });
    let planes = decompose(&noise, LEVELS);
    let mut factors = [0.0_f32; LEVELS];
    for (factor, plane) in factors.iter_mut().zip(planes.details.iter()) {
        *factor = population_stddev(plane.as_raw());
    }
    factors
}

/// Returns a denoised copy of `image`, clipped to [0, `max_value`].
///
/// # Arguments
/// * `image` - Raw frame samples.
/// * `thresholds` - Per-level multipliers; level 0 is the finest scale. A zero
///   multiplier keeps every coefficient of that level.
/// * `max_value` - 255 for 8-bit frames, 65535 for 16-bit frames.
pub fn denoise(image: &FloatImage, thresholds: &[f32; LEVELS], max_value: f32)
               -> FloatImage {
    let start = Instant::now();
    let frame_noise = estimate_noise(image);
    let factors = noise_scale_factors(image.width(), image.height());
    let mut planes = decompose(image, LEVELS);
    for (level, plane) in planes.details.iter_mut().enumerate() {
        let cutoff = thresholds[level] * frame_noise * factors[level];
        for coef in plane.iter_mut() {
            if coef.abs() < cutoff {
                *coef = 0.0;
            }
        }
    }
    let mut result = planes.reconstruct();
    for v in result.iter_mut() {
        *v = v.clamp(0.0, max_value);
    }
    debug!("Wavelet denoise: noise {:.3} factors {:?} in {:?}",
           frame_noise, factors, start.elapsed());
    result
}

// mod tests.
