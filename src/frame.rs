// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use image::{GrayImage, ImageBuffer, Luma};

/// 2D array of f32 samples. Column index (x) is the spatial axis, row index
/// (y) is the time axis.
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 2D array whose values are constrained to 0 and 1.
pub type Mask = GrayImage;

pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Eight,
    Sixteen,
}

impl BitDepth {
    /// Largest representable sample value.
    pub fn max_value(&self) -> f32 {
        match self {
            BitDepth::Eight => u8::MAX as f32,
            BitDepth::Sixteen => u16::MAX as f32,
        }
    }
}

/// One line-scan image. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: FloatImage,
    bit_depth: BitDepth,
    title: String,
}

impl Frame {
    pub fn from_gray8(image: &GrayImage, title: &str) -> Frame {
        let (width, height) = image.dimensions();
        let pixels = FloatImage::from_fn(width, height, |x, y| {
            Luma([image.get_pixel(x, y).0[0] as f32])
        });
        Frame{pixels, bit_depth: BitDepth::Eight, title: title.to_string()}
    }

    pub fn from_gray16(image: &Gray16Image, title: &str) -> Frame {
        let (width, height) = image.dimensions();
        let pixels = FloatImage::from_fn(width, height, |x, y| {
            Luma([image.get_pixel(x, y).0[0] as f32])
        });
        Frame{pixels, bit_depth: BitDepth::Sixteen, title: title.to_string()}
    }

    /// Samples are clamped into the range of `bit_depth`.
    pub fn from_samples(pixels: FloatImage, bit_depth: BitDepth, title: &str) -> Frame {
        let max_value = bit_depth.max_value();
        let mut pixels = pixels;
        for value in pixels.iter_mut() {
            *value = value.clamp(0.0, max_value);
        }
        Frame{pixels, bit_depth, title: title.to_string()}
    }

    pub fn pixels(&self) -> &FloatImage {
        &self.pixels
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::gray_image;

    #[test]
    fn test_from_gray8() {
        let image = gray_image!(
            1, 2, 3;
            4, 5, 255);
        let frame = Frame::from_gray8(&image, "test");
        assert_eq!(frame.width(), 3);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.bit_depth(), BitDepth::Eight);
        assert_eq!(frame.pixels().get_pixel(2, 1).0[0], 255.0);
        assert_eq!(frame.pixels().get_pixel(1, 0).0[0], 2.0);
        assert_eq!(frame.title(), "test");
    }

    #[test]
    fn test_from_samples_clamps() {
        let samples = FloatImage::from_raw(2, 1, vec![-3.0, 70000.0]).unwrap();
        let frame = Frame::from_samples(samples, BitDepth::Sixteen, "");
        assert_eq!(frame.pixels().as_raw(), &vec![0.0, 65535.0]);
    }
}  // mod tests.
