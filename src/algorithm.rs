// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! SparkDetect finds localized, transient fluorescence elevations ("sparks")
//! in line-scan microscopy images and measures each one. A line-scan frame has
//! one spatial axis (image columns) and one time axis (image rows).
//!
//! Features:
//!
//! * Normalizes each column by its own resting fluorescence (F0), so uneven dye
//!   loading across the cell does not bias detection.
//! * Derives detection thresholds from robust per-interval statistics, so a
//!   slowly drifting background is tolerated when several time intervals are
//!   used.
//! * Separates neighboring events by growing each one from a strict seed into
//!   a looser mask within a window sized to the largest plausible event.
//! * Reports amplitude, FWHM, FDHM, full extents, position and time to peak
//!   for each event, plus optional decay time constant and upstroke rate.
//! * Discards events that merely restate part of an earlier detection.
//!
//! # Algorithm
//!
//! The raw frame is optionally wavelet denoised, median filtered, and then
//! smoothed with a small spatio-temporal cross kernel. Columns brighter than
//! the configured background delimit the cell; within it each column's F0 is
//! the mean of its pixels that are not outliers, and the frame is divided by
//! it.
//!
//! The time axis is split into intervals. Each interval gets its own mean and
//! noise estimate, taken after excluding bright pixels, and these define a
//! strict mask (mean + criterion*sigma) and a loose mask (mean + 2 sigma).
//! Seeds are taken from the strict mask in raster order; each one grows a
//! region until it no longer touches the loose mask, and the region's pixels
//! are then unavailable to later seeds. Each region becomes one event.
//!
//! # Caveats
//!
//! * Thresholds and growth windows are tuned to small, roughly round
//!   space-time events. Waves and other long or wide release events will be
//!   split into multiple detections or clipped.
//! * The cell edge detection assumes a dark background outside of the cell on
//!   at least one side. If `background` is too high no cell is found and the
//!   frame is rejected.
//! * The event width and duration at half maximum are sample counts, so they
//!   are quantized to the pixel size and scan interval respectively.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{info, warn};

use crate::baseline::{estimate_baseline, CellEdges};
use crate::config::{AnalysisConfig, OutputImageMode};
use crate::dedup::{compact, deduplicate};
use crate::error::AnalysisError;
use crate::features::{extract_features, SparkRecord};
use crate::frame::{BitDepth, FloatImage, Frame};
use crate::image_funcs::{cross_filter, median_filter};
use crate::region_grow::{grow, window_half_extents, GrowthWindow, WorkingMasks};
use crate::segment::{partition_intervals, segment_interval, Interval};
use crate::stats_funcs::estimate_noise;
use crate::wavelet::denoise;

/// Smallest accepted frame width and height.
pub const MIN_FRAME_SIZE: u32 = 16;

/// Half extents of the spatio-temporal cross filter.
const CROSS_HALF_X: u32 = 2;
const CROSS_HALF_T: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSummary {
    pub event_count: usize,

    /// Events per 100um of cell per second.
    pub frequency: f32,

    /// Analyzed cell width times frame duration, in um*s.
    pub analyzed_area: f32,
}

/// Everything produced for one frame.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub title: String,

    /// Surviving events, numbered from 1 in detection order.
    pub records: Vec<SparkRecord>,

    pub summary: FrameSummary,

    pub edges: CellEdges,

    /// Noise of the raw frame; see [estimate_noise()].
    pub noise_estimate: f32,

    /// Image selected by the configured [OutputImageMode], in the sample range
    /// of the input frame.
    pub output_image: FloatImage,

    /// Whether the caller should draw each record's bounding box onto
    /// `output_image`.
    pub draw_events: bool,
}

/// Noise filtering ahead of baseline estimation.
pub fn prefilter(frame: &Frame, config: &AnalysisConfig) -> FloatImage {
    let start = Instant::now();
    let median_input = if config.pre_filter.uses_wavelet() {
        denoise(frame.pixels(), &config.wavelet_thresholds, frame.bit_depth().max_value())
    } else {
        frame.pixels().clone()
    };
    let median = median_filter(&median_input, config.pre_filter.median_kernel());
    let filtered = cross_filter(&median, CROSS_HALF_X, CROSS_HALF_T);
    info!("Pre-filter {:?} in {:?}", config.pre_filter, start.elapsed());
    filtered
}

/// F/F0 is scaled by this much to fill the integer sample range.
pub fn normalized_scale_factor(max_ratio: f32, bit_depth: BitDepth) -> f32 {
    if bit_depth == BitDepth::Sixteen || max_ratio < 2.5 {
        100.0
    } else if max_ratio < 5.0 {
        50.0
    } else if max_ratio < 10.0 {
        25.0
    } else {
        12.0
    }
}

/// Produces the image requested by `mode`.
pub fn render_output_image(frame: &Frame, filtered: &FloatImage, normalized: &FloatImage,
                           mode: OutputImageMode) -> FloatImage {
    match mode {
        OutputImageMode::Raw | OutputImageMode::RawWithEvents => frame.pixels().clone(),
        OutputImageMode::Filtered | OutputImageMode::FilteredWithEvents => filtered.clone(),
        OutputImageMode::Normalized | OutputImageMode::NormalizedWithEvents => {
            let max_ratio = normalized.iter().copied().fold(f32::MIN, f32::max);
            let scale = normalized_scale_factor(max_ratio, frame.bit_depth());
            let max_value = frame.bit_depth().max_value();
            let mut scaled = normalized.clone();
            for v in scaled.iter_mut() {
                *v = (*v * scale).clamp(0.0, max_value);
            }
            scaled
        }
    }
}

fn summarize(event_count: usize, edges: &CellEdges, height: u32,
             config: &AnalysisConfig) -> FrameSummary {
    let duration_s = height as f32 * config.scan_interval_ms() / 1000.0;
    let cell_width_um = (edges.right - edges.left) as f32 * config.pixel_size;
    let analyzed_area = duration_s * cell_width_um;
    let frequency = if analyzed_area > 0.0 {
        event_count as f32 / analyzed_area * 100.0
    } else {
        0.0
    };
    FrameSummary{event_count, frequency, analyzed_area}
}

/// Segments each time interval of the F/F0 frame and grows and measures its
/// events, in detection order. `cancelled` is consulted before each interval;
/// returning true abandons the frame.
fn detect_events<F>(normalized: &FloatImage, edges: &CellEdges, config: &AnalysisConfig,
                    mut cancelled: F) -> Result<Vec<SparkRecord>, AnalysisError>
where F: FnMut(&Interval) -> bool
{
    let (width, height) = normalized.dimensions();
    let (half_x, half_t) = window_half_extents(
        config.pixel_size, config.scan_interval_ms(), config.max_event_duration_ms());
    let mut records = Vec::<SparkRecord>::new();
    for interval in partition_intervals(height, config.interval_count) {
        if cancelled(&interval) {
            return Err(AnalysisError::Cancelled);
        }
        let interval_start = Instant::now();
        let segmentation = segment_interval(normalized, edges, &interval, config.criterion);
        let mut masks = WorkingMasks::new(&segmentation.primary, &segmentation.secondary,
                                          &segmentation.roi);
        let found_before = records.len();
        while let Some((seed_x, seed_y)) = masks.next_seed() {
            let mut window = GrowthWindow::clip(seed_x, seed_y, half_x, half_t, width, height);
            grow(&mut window, &mut masks);
            if let Some(record) = extract_features(&window, normalized, &segmentation.stats,
                                                   interval.index, config) {
                records.push(record);
            }
        }
        info!("Interval {} yielded {} events in {:?}",
              interval.index, records.len() - found_before, interval_start.elapsed());
    }
    Ok(records)
}

/// Detects and measures the events of one frame.
///
/// # Arguments
/// * `frame` - The line-scan image.
/// * `config` - Run configuration; must have passed
///   [AnalysisConfig::validate()].
/// * `cancel` - Checked before each time interval; when set, the frame is
///   abandoned with [AnalysisError::Cancelled].
///
/// # Returns
/// The frame's [ResultSet], or the reason the frame could not be analyzed.
pub fn analyze_frame(frame: &Frame, config: &AnalysisConfig, cancel: &AtomicBool)
                     -> Result<ResultSet, AnalysisError> {
    let analyze_start = Instant::now();
    let (width, height) = (frame.width(), frame.height());
    if width < MIN_FRAME_SIZE || height < MIN_FRAME_SIZE {
        return Err(AnalysisError::FrameTooSmall{width, height, min: MIN_FRAME_SIZE});
    }
    let noise_estimate = estimate_noise(frame.pixels());
    let filtered = prefilter(frame, config);
    let baseline = estimate_baseline(&filtered, config.background, config.outlier_sigma)?;
    let normalized = &baseline.normalized;

    let mut records = detect_events(normalized, &baseline.edges, config,
                                    |_| cancel.load(Ordering::Relaxed))?;

    let detected = records.len();
    deduplicate(&mut records);
    let records = compact(records);
    let summary = summarize(records.len(), &baseline.edges, height, config);
    let output_image = render_output_image(frame, &filtered, normalized,
                                           config.output_image_mode);
    info!("Frame '{}': {} events ({} before deduplication) in {:?}",
          frame.title(), records.len(), detected, analyze_start.elapsed());
    Ok(ResultSet{
        title: frame.title().to_string(),
        records,
        summary,
        edges: baseline.edges,
        noise_estimate,
        output_image,
        draw_events: config.output_image_mode.draws_events(),
    })
}

/// Analyzes a sequence of frames, one after another. Without `batch_mode` only
/// the first frame is analyzed. A frame that fails does not stop the batch;
/// once `cancel` is set, every remaining frame reports
/// [AnalysisError::Cancelled].
///
/// The configuration is validated first; an invalid configuration rejects the
/// whole batch.
pub fn analyze_frames(frames: &[Frame], config: &AnalysisConfig, cancel: &AtomicBool)
                      -> Result<Vec<Result<ResultSet, AnalysisError>>, AnalysisError> {
    config.validate()?;
    let frame_count = if config.batch_mode { frames.len() } else { frames.len().min(1) };
    let mut results = Vec::with_capacity(frame_count);
    for frame in &frames[..frame_count] {
        if cancel.load(Ordering::Relaxed) {
            results.push(Err(AnalysisError::Cancelled));
            continue;
        }
        let result = analyze_frame(frame, config, cancel);
        if let Err(e) = &result {
            warn!("Skipping frame '{}': {}", frame.title(), e);
        }
        results.push(result);
    }
    Ok(results)
}

/// Convenience for the common single frame case.
pub fn analyze(frame: &Frame, config: &AnalysisConfig) -> Result<ResultSet, AnalysisError> {
    config.validate()?;
    analyze_frame(frame, config, &AtomicBool::new(false))
}

// mod tests.
