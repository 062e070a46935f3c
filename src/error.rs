// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use thiserror::Error;

/// Rejection reasons for an [crate::config::AnalysisConfig]. These are
/// reported before any frame is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("scan speed must exceed 10 lines/s, got {0}")]
    ScanSpeedTooLow(f32),

    #[error("pixel size must exceed 0.001 um, got {0}")]
    PixelSizeTooSmall(f32),

    #[error("background must be >= 0, got {0}")]
    NegativeBackground(i32),

    #[error("criterion must be >= 2, got {0}")]
    CriterionTooLow(f32),

    #[error("interval count must be within 1..=5, got {0}")]
    IntervalCountOutOfRange(u32),

    #[error("wavelet threshold for level {level} must be >= 0, got {value}")]
    NegativeWaveletThreshold { level: usize, value: f32 },
}

/// Conditions that abort the analysis of a single frame. In batch mode the
/// next frame is still processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("frame {width}x{height} is too small; need at least {min}x{min}")]
    FrameTooSmall { width: u32, height: u32, min: u32 },

    #[error("active cell region too narrow (left edge {left}, right edge {right}); \
             the background value is probably too high")]
    CellTooNarrow { left: u32, right: u32 },

    #[error("analysis cancelled")]
    Cancelled,
}
