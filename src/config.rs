// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Run configuration. An [AnalysisConfig] is captured once per run, validated,
//! and then passed by reference to every stage of the pipeline.

use crate::error::ConfigError;

/// Maximum duration of a single event in normal mode.
pub const MAX_EVENT_DURATION_MS: f32 = 250.0;

/// Maximum duration of a single event in Ember mode.
pub const MAX_EMBER_DURATION_MS: f32 = 2500.0;

/// Noise filtering applied to the raw frame before baseline estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreFilter {
    Median3x3,
    #[default]
    Median5x5,
    Median7x7,
    /// a-trous wavelet denoising followed by a 5x5 median filter.
    WaveletThenMedian5x5,
}

impl PreFilter {
    /// Kernel size of the median filter stage.
    pub fn median_kernel(&self) -> u32 {
        match self {
            PreFilter::Median3x3 => 3,
            PreFilter::Median5x5 => 5,
            PreFilter::Median7x7 => 7,
            PreFilter::WaveletThenMedian5x5 => 5,
        }
    }

    pub fn uses_wavelet(&self) -> bool {
        *self == PreFilter::WaveletThenMedian5x5
    }
}

/// Which image the pipeline renders alongside its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputImageMode {
    #[default]
    Raw,
    RawWithEvents,
    Filtered,
    FilteredWithEvents,
    /// F/F0, scaled into the integer range of the frame.
    Normalized,
    NormalizedWithEvents,
}

impl OutputImageMode {
    /// Whether the caller is asked to draw event boxes onto the image.
    pub fn draws_events(&self) -> bool {
        matches!(self,
                 OutputImageMode::RawWithEvents |
                 OutputImageMode::FilteredWithEvents |
                 OutputImageMode::NormalizedWithEvents)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Line scan rate in lines per second. Must exceed 10.
    pub scan_speed: f32,

    /// Spatial sampling in um per pixel. Must exceed 0.001.
    pub pixel_size: f32,

    /// Column mean intensity at or below which a column is deemed to be
    /// outside of the cell.
    pub background: i32,

    /// Detection threshold, as a multiple of the interval noise, for seed
    /// pixels. Must be at least 2.
    pub criterion: f32,

    /// Number of time intervals (1-5) analyzed with separate statistics.
    pub interval_count: u32,

    pub output_image_mode: OutputImageMode,

    /// Fit decay time constants and upstroke rates.
    pub extended_kinetics: bool,

    /// Allow events up to 2500ms long instead of 250ms.
    pub ember_mode: bool,

    /// Process every supplied frame rather than only the first one.
    pub batch_mode: bool,

    pub pre_filter: PreFilter,

    /// Per-level multipliers of the wavelet denoiser. Level 0 is the finest
    /// scale.
    pub wavelet_thresholds: [f32; 5],

    /// Multiple of the frame noise above which a pixel is excluded from the
    /// baseline estimate.
    pub outlier_sigma: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            scan_speed: 345.0,
            pixel_size: 0.829,
            background: 2,
            criterion: 2.5,
            interval_count: 1,
            output_image_mode: OutputImageMode::default(),
            extended_kinetics: true,
            ember_mode: false,
            batch_mode: false,
            pre_filter: PreFilter::default(),
            wavelet_thresholds: [10.0, 5.0, 1.0, 0.0, 0.0],
            outlier_sigma: 1.5,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Negated comparisons so that NaN is rejected too.
        if !(self.scan_speed > 10.0) {
            return Err(ConfigError::ScanSpeedTooLow(self.scan_speed));
        }
        if !(self.pixel_size > 0.001) {
            return Err(ConfigError::PixelSizeTooSmall(self.pixel_size));
        }
        if self.background < 0 {
            return Err(ConfigError::NegativeBackground(self.background));
        }
        if !(self.criterion >= 2.0) {
            return Err(ConfigError::CriterionTooLow(self.criterion));
        }
        if !(1..=5).contains(&self.interval_count) {
            return Err(ConfigError::IntervalCountOutOfRange(self.interval_count));
        }
        for (level, &value) in self.wavelet_thresholds.iter().enumerate() {
            if !(value >= 0.0) {
                return Err(ConfigError::NegativeWaveletThreshold{level, value});
            }
        }
        Ok(())
    }

    /// Milliseconds per scan line.
    pub fn scan_interval_ms(&self) -> f32 {
        1000.0 / self.scan_speed
    }

    pub fn max_event_duration_ms(&self) -> f32 {
        if self.ember_mode { MAX_EMBER_DURATION_MS } else { MAX_EVENT_DURATION_MS }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(AnalysisConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = AnalysisConfig::default();
        config.scan_speed = 10.0;
        assert_eq!(config.validate(), Err(ConfigError::ScanSpeedTooLow(10.0)));

        config = AnalysisConfig::default();
        config.pixel_size = 0.0005;
        assert_eq!(config.validate(), Err(ConfigError::PixelSizeTooSmall(0.0005)));

        config = AnalysisConfig::default();
        config.background = -1;
        assert_eq!(config.validate(), Err(ConfigError::NegativeBackground(-1)));

        config = AnalysisConfig::default();
        config.criterion = 1.9;
        assert_eq!(config.validate(), Err(ConfigError::CriterionTooLow(1.9)));

        config = AnalysisConfig::default();
        config.interval_count = 0;
        assert_eq!(config.validate(), Err(ConfigError::IntervalCountOutOfRange(0)));
        config.interval_count = 6;
        assert_eq!(config.validate(), Err(ConfigError::IntervalCountOutOfRange(6)));

        config = AnalysisConfig::default();
        config.wavelet_thresholds[3] = -1.0;
        assert_eq!(config.validate(),
                   Err(ConfigError::NegativeWaveletThreshold{level: 3, value: -1.0}));

        config = AnalysisConfig::default();
        config.scan_speed = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_timing() {
        let mut config = AnalysisConfig::default();
        config.scan_speed = 100.0;
        assert_eq!(config.scan_interval_ms(), 10.0);
        assert_eq!(config.max_event_duration_ms(), 250.0);
        config.ember_mode = true;
        assert_eq!(config.max_event_duration_ms(), 2500.0);
    }
}  // mod tests.
