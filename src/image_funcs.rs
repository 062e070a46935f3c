// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Stateless transforms over 2D sample arrays. Unless noted otherwise, the
//! windowed filters only compute "interior" pixels, i.e. pixels whose whole
//! kernel lies inside the image; the remaining border pixels keep their
//! original values.

use image::{ImageBuffer, Luma, Pixel, Primitive};
use image::imageops;
use imageproc::rect::Rect;

use crate::frame::{FloatImage, Mask};

/// Applies a `kernel` x `kernel` median filter. `kernel` must be odd.
pub fn median_filter(image: &FloatImage, kernel: u32) -> FloatImage {
    debug_assert!(kernel % 2 == 1);
    let (width, height) = image.dimensions();
    let mut filtered = image.clone();
    if width < kernel || height < kernel {
        return filtered;
    }
    let half = kernel / 2;
    let pixels = image.as_raw();
    let mut neighborhood = Vec::<f32>::with_capacity((kernel * kernel) as usize);
    for y in 0..=(height - kernel) {
        for x in 0..=(width - kernel) {
            neighborhood.clear();
            for ky in 0..kernel {
                let row_start = ((y + ky) * width + x) as usize;
                neighborhood.extend_from_slice(
                    &pixels[row_start .. row_start + kernel as usize]);
            }
            let mid = neighborhood.len() / 2;
            let (_, median, _) =
                neighborhood.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
            filtered.put_pixel(x + half, y + half, Luma([*median]));
        }
    }
    filtered
}

/// Box (mean) filter with a `kernel_x` wide, `kernel_t` tall kernel. Both sizes
/// must be odd. A 3x1 kernel smooths a single-row profile.
pub fn smooth_filter(image: &FloatImage, kernel_x: u32, kernel_t: u32) -> FloatImage {
    debug_assert!(kernel_x % 2 == 1 && kernel_t % 2 == 1);
    let (width, height) = image.dimensions();
    let mut filtered = image.clone();
    if width < kernel_x || height < kernel_t {
        return filtered;
    }
    let kernel_area = (kernel_x * kernel_t) as f32;
    let pixels = image.as_raw();
    for y in 0..=(height - kernel_t) {
        for x in 0..=(width - kernel_x) {
            let mut sum = 0.0_f32;
            for ky in 0..kernel_t {
                let row_start = ((y + ky) * width + x) as usize;
                sum += pixels[row_start .. row_start + kernel_x as usize]
                    .iter().sum::<f32>();
            }
            filtered.put_pixel(x + kernel_x / 2, y + kernel_t / 2,
                               Luma([sum / kernel_area]));
        }
    }
    filtered
}

/// The "live-or-die" density filter. An interior pixel becomes 1 if the sum of
/// its `size` x `size` neighborhood is at least `live`, otherwise 0. This
/// fills small holes of a thresholded mask and removes isolated islets.
pub fn density_filter(image: &FloatImage, size: u32, live: f32) -> FloatImage {
    let (width, height) = image.dimensions();
    let mut filtered = image.clone();
    if width < size || height < size {
        return filtered;
    }
    let pixels = image.as_raw();
    for y in 0..=(height - size) {
        for x in 0..=(width - size) {
            let mut sum = 0.0_f32;
            for ky in 0..size {
                let row_start = ((y + ky) * width + x) as usize;
                sum += pixels[row_start .. row_start + size as usize]
                    .iter().sum::<f32>();
            }
            let value = if sum >= live { 1.0 } else { 0.0 };
            filtered.put_pixel(x + size / 2, y + size / 2, Luma([value]));
        }
    }
    filtered
}

/// Spatio-temporal cross smoothing. Each pixel becomes the mean of the
/// 2*`half_x`+1 samples of its row segment and the 2*`half_t`+1 samples of its
/// column segment; the center sample contributes to both. Indices wrap around
/// at the row ends and at the top/bottom of the image.
pub fn cross_filter(image: &FloatImage, half_x: u32, half_t: u32) -> FloatImage {
    let (width, height) = image.dimensions();
    let count = ((2 * half_x + 1) + (2 * half_t + 1)) as f32;
    let (w, h) = (width as i64, height as i64);
    FloatImage::from_fn(width, height, |x, y| {
        let mut sum = 0.0_f32;
        for dx in -(half_x as i64)..=(half_x as i64) {
            let xx = (x as i64 + dx).rem_euclid(w) as u32;
            sum += image.get_pixel(xx, y).0[0];
        }
        for dt in -(half_t as i64)..=(half_t as i64) {
            let yy = (y as i64 + dt).rem_euclid(h) as u32;
            sum += image.get_pixel(x, yy).0[0];
        }
        Luma([sum / count])
    })
}

/// Sets `left` columns at the left edge, `right` columns at the right edge,
/// `top` rows at the top and `bottom` rows at the bottom to `value`.
pub fn fill_borders<P: Pixel>(image: &mut ImageBuffer<P, Vec<P::Subpixel>>,
                              left: u32, right: u32, top: u32, bottom: u32,
                              value: P) {
    let (width, height) = image.dimensions();
    let left = left.min(width);
    let right = right.min(width);
    let top = top.min(height);
    let bottom = bottom.min(height);
    for y in 0..height {
        for x in (0..left).chain(width - right .. width) {
            image.put_pixel(x, y, value);
        }
    }
    for y in (0..top).chain(height - bottom .. height) {
        for x in 0..width {
            image.put_pixel(x, y, value);
        }
    }
}

/// Zeroes `ss` columns on the left and right and `st` rows on the top and
/// bottom of a mask.
pub fn zero_mask_borders(mask: &mut Mask, ss: u32, st: u32) {
    fill_borders(mask, ss, ss, st, st, Luma([0_u8]));
}

/// Mean of each column of `roi`. Result length is the ROI width.
pub fn column_means<T>(image: &ImageBuffer<Luma<T>, Vec<T>>, roi: &Rect) -> Vec<f32>
where T: Primitive + Into<f32>
{
    let mut sums = vec![0.0_f32; roi.width() as usize];
    for y in roi.top()..=roi.bottom() {
        for x in roi.left()..=roi.right() {
            let v: f32 = image.get_pixel(x as u32, y as u32).0[0].into();
            sums[(x - roi.left()) as usize] += v;
        }
    }
    sums.iter().map(|s| s / roi.height() as f32).collect()
}

/// Mean of each row of `roi`. Result length is the ROI height.
pub fn row_means<T>(image: &ImageBuffer<Luma<T>, Vec<T>>, roi: &Rect) -> Vec<f32>
where T: Primitive + Into<f32>
{
    let mut sums = vec![0.0_f32; roi.height() as usize];
    for y in roi.top()..=roi.bottom() {
        for x in roi.left()..=roi.right() {
            let v: f32 = image.get_pixel(x as u32, y as u32).0[0].into();
            sums[(y - roi.top()) as usize] += v;
        }
    }
    sums.iter().map(|s| s / roi.width() as f32).collect()
}

/// Rect covering the whole of an image.
pub fn full_rect<P: Pixel>(image: &ImageBuffer<P, Vec<P::Subpixel>>) -> Rect {
    Rect::at(0, 0).of_size(image.width(), image.height())
}

/// Copies the `roi` portion of an image into a new image.
pub fn copy_region<P: Pixel + 'static>(image: &ImageBuffer<P, Vec<P::Subpixel>>, roi: &Rect)
                             -> ImageBuffer<P, Vec<P::Subpixel>> {
    imageops::crop_imm(image, roi.left() as u32, roi.top() as u32,
                       roi.width(), roi.height()).to_image()
}

/// Converts a 0/1 mask to float samples.
pub fn mask_to_float(mask: &Mask) -> FloatImage {
    let (width, height) = mask.dimensions();
    FloatImage::from_fn(width, height, |x, y| Luma([mask.get_pixel(x, y).0[0] as f32]))
}

/// Truncates float samples in [0, 1] to a 0/1 mask: only values of at least 1
/// become 1.
pub fn truncate_to_mask(image: &FloatImage) -> Mask {
    let (width, height) = image.dimensions();
    Mask::from_fn(width, height, |x, y| {
        Luma([if image.get_pixel(x, y).0[0] >= 1.0 { 1 } else { 0 }])
    })
}

/// Any non-zero (or NaN) sample becomes 1.
pub fn nonzero_to_mask(image: &FloatImage) -> Mask {
    let (width, height) = image.dimensions();
    Mask::from_fn(width, height, |x, y| {
        Luma([if image.get_pixel(x, y).0[0] != 0.0 { 1 } else { 0 }])
    })
}

pub fn mask_total(mask: &Mask) -> u32 {
    mask.as_raw().iter().map(|&v| v as u32).sum()
}

/// Predicate used by [indices_where] and [count_where].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
    GreaterOrEqual,
    GreaterThan,
}

impl Comparison {
    pub fn test(&self, a: f32, b: f32) -> bool {
        match self {
            Comparison::Equal => a == b,
            Comparison::NotEqual => a != b,
            Comparison::GreaterOrEqual => a >= b,
            Comparison::GreaterThan => a > b,
        }
    }
}

/// Indices of `values` whose element satisfies `comparison` against `value`,
/// in increasing order.
pub fn indices_where(values: &[f32], comparison: Comparison, value: f32) -> Vec<usize> {
    values.iter().enumerate()
        .filter(|(_, &v)| comparison.test(v, value))
        .map(|(i, _)| i)
        .collect()
}

pub fn count_where(values: &[f32], comparison: Comparison, value: f32) -> usize {
    values.iter().filter(|&&v| comparison.test(v, value)).count()
}

// mod tests.
