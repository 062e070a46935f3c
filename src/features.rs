// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use imageproc::rect::Rect;
use log::debug;

use crate::config::AnalysisConfig;
use crate::frame::FloatImage;
use crate::image_funcs::{
    column_means, count_where, indices_where, row_means, Comparison,
};
use crate::kinetics::{fit_exponential_decay, max_rise_rate, FitConfig};
use crate::region_grow::GrowthWindow;
use crate::segment::IntervalStats;

/// Half width of the column band about the peak used for the FDHM and the
/// kinetics profile, in um.
pub const PEAK_COLUMN_SPAN_UM: f32 = 0.4;

/// Measurements of one detected event.
#[derive(Debug, Clone, PartialEq)]
pub struct SparkRecord {
    /// 1-based sequence number within the frame's result set. Zero until the
    /// result set is compacted.
    pub number: u32,

    /// Which time interval the event was found in.
    pub interval: usize,

    /// Peak F/F0 above the baseline of 1.
    pub amplitude: f32,

    /// FWHM, in um.
    pub half_width_um: f32,

    /// FDHM, in ms.
    pub half_duration_ms: f32,

    pub full_width_um: f32,
    pub full_duration_ms: f32,

    /// Spatial center of the event, in um from the left edge of the frame.
    pub x_position_um: f32,

    /// Start of the event, in ms from the first line of the frame.
    pub time_position_ms: f32,

    pub time_to_peak_ms: f32,

    /// Decay time constant. None when kinetics are disabled or the fit failed.
    pub tau_ms: Option<f32>,

    /// Steepest upstroke, in (F/F0)/s.
    pub max_rise_rate: Option<f32>,

    /// Frame pixels spanned by the event.
    pub bounding_box: Rect,

    /// Cleared when a deduplication rule discards this event.
    pub valid: bool,
}

// Span [first, last] of the non-zero entries of a profile.
fn nonzero_span(profile: &[f32]) -> Option<(usize, usize)> {
    let indices = indices_where(profile, Comparison::NotEqual, 0.0);
    Some((*indices.first()?, *indices.last()?))
}

/// Measures the event claimed in `window`. Returns None for an empty region.
///
/// # Arguments
/// * `window` - Growth window holding the event's region.
/// * `normalized` - F/F0 frame.
/// * `stats` - Statistics of the interval the event was found in.
/// * `interval` - Index of that interval.
/// * `config` - Calibration and kinetics settings.
pub fn extract_features(window: &GrowthWindow, normalized: &FloatImage,
                        stats: &IntervalStats, interval: usize,
                        config: &AnalysisConfig) -> Option<SparkRecord> {
    let scan_interval = config.scan_interval_ms();
    let pixel_size = config.pixel_size;
    let (frame_width, frame_height) = normalized.dimensions();
    let region_rect = Rect::at(0, 0).of_size(window.width(), window.height());

    let (min_row, max_row) = nonzero_span(&row_means(&window.region, &region_rect))?;
    let (min_col, max_col) = nonzero_span(&column_means(&window.region, &region_rect))?;
    let (min_row, max_row) = (min_row as u32, max_row as u32);
    let (min_col, max_col) = (min_col as u32, max_col as u32);
    let duration_rows = max_row - min_row + 1;
    let time_position_ms = (window.top + min_row) as f32 * scan_interval;
    let full_duration_ms = duration_rows as f32 * scan_interval;
    let x_position_um =
        (window.left as f32 + (min_col + max_col) as f32 / 2.0) * pixel_size;
    let full_width_um = (max_col - min_col + 1) as f32 * pixel_size;

    // Peak of F/F0 within the region; the first occurrence in row-major order
    // wins ties.
    let mut peak = (0_u32, 0_u32);
    let mut peak_value = f32::MIN;
    for (x, y, p) in window.region.enumerate_pixels() {
        if p.0[0] == 0 {
            continue;
        }
        let v = normalized.get_pixel(window.left + x, window.top + y).0[0];
        if v > peak_value {
            peak_value = v;
            peak = (x, y);
        }
    }
    let (peak_x, peak_y) = (window.left + peak.0, window.top + peak.1);

    // 3x3 neighborhood mean around the peak, clipped to the frame.
    let nx0 = peak_x.saturating_sub(1);
    let ny0 = peak_y.saturating_sub(1);
    let nx1 = (peak_x + 1).min(frame_width - 1);
    let ny1 = (peak_y + 1).min(frame_height - 1);
    let neighborhood = Rect::at(nx0 as i32, ny0 as i32)
        .of_size(nx1 - nx0 + 1, ny1 - ny0 + 1);
    let neighborhood_mean = row_means(normalized, &neighborhood).iter().sum::<f32>()
        / neighborhood.height() as f32;
    let amplitude = neighborhood_mean - stats.mean;
    let half_max = (amplitude + 2.0) / 2.0;

    let event_left = window.left + min_col;
    let event_width = max_col - min_col + 1;
    let event_top = window.top + min_row;

    // FWHM is taken across the event's columns on the rows adjoining the peak.
    let width_rect = Rect::at(event_left as i32, ny0 as i32)
        .of_size(event_width, ny1 - ny0 + 1);
    let width_profile = column_means(normalized, &width_rect);
    let half_width_um =
        count_where(&width_profile, Comparison::GreaterOrEqual, half_max) as f32 * pixel_size;

    // FDHM is taken along the columns within 0.4um of the peak.
    let span = (PEAK_COLUMN_SPAN_UM / pixel_size) as u32;
    let dx0 = peak_x.saturating_sub(span).max(event_left);
    let dx1 = (peak_x + span).min(event_left + event_width - 1);
    let duration_bottom = (event_top + duration_rows).min(frame_height - 1);
    let duration_rect = Rect::at(dx0 as i32, event_top as i32)
        .of_size(dx1 - dx0 + 1, duration_bottom - event_top + 1);
    let duration_profile = row_means(normalized, &duration_rect);
    let half_duration_ms = count_where(&duration_profile, Comparison::GreaterOrEqual, half_max)
        as f32 * scan_interval;

    let peak_offset = peak.1.saturating_sub(min_row).min(max_row - min_row) as usize;
    let time_to_peak_ms = peak_offset as f32 * scan_interval;

    let (tau_ms, rise_rate) = if config.extended_kinetics {
        let upstroke = &duration_profile[..=peak_offset];
        let decline_end = (max_row - min_row) as usize;
        let decline: Vec<f32> = duration_profile[peak_offset..=decline_end]
            .iter().map(|v| v - 1.0).collect();
        let times: Vec<f32> =
            (0..decline.len()).map(|i| i as f32 * scan_interval).collect();
        let tau = fit_exponential_decay(&times, &decline, &FitConfig::default())
            .map(|fit| fit.time_constant() as f32)
            .filter(|tau| tau.is_finite());
        // Kinetics are reported together or not at all.
        let rise = tau.and(max_rise_rate(upstroke, scan_interval));
        (tau, rise)
    } else {
        (None, None)
    };

    let bounding_box = Rect::at(event_left as i32, event_top as i32)
        .of_size(event_width, duration_rows);
    debug!("Event at ({}, {}): peak ({}, {}) amplitude {:.3}",
           event_left, event_top, peak_x, peak_y, amplitude);
    Some(SparkRecord{
        number: 0,
        interval,
        amplitude,
        half_width_um,
        half_duration_ms,
        full_width_um,
        full_duration_ms,
        x_position_um,
        time_position_ms,
        time_to_peak_ms,
        tau_ms,
        max_rise_rate: rise_rate,
        bounding_box,
        valid: true,
    })
}

// mod tests.
