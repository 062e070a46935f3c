// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use clap::{ArgAction, Parser, ValueEnum};
use env_logger;
use image::{DynamicImage, GrayImage, ImageReader, Luma, Rgb};
use imageproc::drawing;
use log::{info, warn};

use spark_detect::algorithm::analyze_frames;
use spark_detect::frame::{BitDepth, FloatImage, Gray16Image};
use spark_detect::wavelet::LEVELS;
use spark_detect::{AnalysisConfig, Frame, OutputImageMode, PreFilter, ResultSet};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputImageArg {
    Raw,
    RawEvents,
    Filtered,
    FilteredEvents,
    Normalized,
    NormalizedEvents,
}

impl From<OutputImageArg> for OutputImageMode {
    fn from(arg: OutputImageArg) -> Self {
        match arg {
            OutputImageArg::Raw => OutputImageMode::Raw,
            OutputImageArg::RawEvents => OutputImageMode::RawWithEvents,
            OutputImageArg::Filtered => OutputImageMode::Filtered,
            OutputImageArg::FilteredEvents => OutputImageMode::FilteredWithEvents,
            OutputImageArg::Normalized => OutputImageMode::Normalized,
            OutputImageArg::NormalizedEvents => OutputImageMode::NormalizedWithEvents,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum PreFilterArg {
    Median3,
    Median5,
    Median7,
    WaveletMedian5,
}

impl From<PreFilterArg> for PreFilter {
    fn from(arg: PreFilterArg) -> Self {
        match arg {
            PreFilterArg::Median3 => PreFilter::Median3x3,
            PreFilterArg::Median5 => PreFilter::Median5x5,
            PreFilterArg::Median7 => PreFilter::Median7x7,
            PreFilterArg::WaveletMedian5 => PreFilter::WaveletThenMedian5x5,
        }
    }
}

/// Example program for running SparkDetect on line-scan image(s).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Path of the file or directory to process. A directory requires
    /// --batch.
    #[arg(short, long)]
    input: String,

    /// Directory where output file(s) are written.
    #[arg(short, long)]
    output: String,

    /// Line scan rate, lines per second.
    #[arg(long, default_value_t = 345.0)]
    scan_speed: f32,

    /// Pixel size, um.
    #[arg(long, default_value_t = 0.829)]
    pixel_size: f32,

    /// Column intensity at or below which a column is outside the cell.
    #[arg(long, default_value_t = 2)]
    background: i32,

    /// Detection criterion, in multiples of the background noise.
    #[arg(long, default_value_t = 2.5)]
    criterion: f32,

    /// Number of time intervals, 1 to 5.
    #[arg(long, default_value_t = 1)]
    intervals: u32,

    #[arg(long, value_enum, default_value_t = OutputImageArg::RawEvents)]
    output_image: OutputImageArg,

    /// Fit decay time constants and upstroke rates; `--kinetics false`
    /// turns this off.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    kinetics: std::primitive::bool,

    /// Allow events up to 2500ms.
    #[arg(long, default_value_t = false)]
    ember: std::primitive::bool,

    /// Process every image of the input directory.
    #[arg(short, long, default_value_t = false)]
    batch: std::primitive::bool,

    #[arg(long, value_enum, default_value_t = PreFilterArg::Median5)]
    pre_filter: PreFilterArg,

    /// Comma separated wavelet threshold multipliers, one per level, finest
    /// level first.
    #[arg(long, value_delimiter = ',', default_values_t = [10.0, 5.0, 1.0, 0.0, 0.0])]
    wavelet_thresholds: Vec<f32>,

    /// Outlier cutoff for the baseline estimate, in standard deviations.
    #[arg(long, default_value_t = 1.5)]
    outlier_sigma: f32,

    /// Output the table of detected events.
    #[arg(short, long, default_value_t = false)]
    coords: std::primitive::bool,
}

fn config_from_args(args: &Args) -> Result<AnalysisConfig, String> {
    let wavelet_thresholds: [f32; LEVELS] = args.wavelet_thresholds.as_slice().try_into()
        .map_err(|_| format!("--wavelet-thresholds needs {} values, got {}",
                             LEVELS, args.wavelet_thresholds.len()))?;
    Ok(AnalysisConfig{
        scan_speed: args.scan_speed,
        pixel_size: args.pixel_size,
        background: args.background,
        criterion: args.criterion,
        interval_count: args.intervals,
        output_image_mode: args.output_image.into(),
        extended_kinetics: args.kinetics,
        ember_mode: args.ember,
        batch_mode: args.batch,
        pre_filter: args.pre_filter.into(),
        wavelet_thresholds,
        outlier_sigma: args.outlier_sigma,
    })
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = config_from_args(&args).unwrap_or_else(|e| {
        panic!("Invalid arguments: {}", e);
    });
    if let Err(e) = config.validate() {
        panic!("Invalid configuration: {}", e);
    }
    let input_metadata = fs::metadata(&args.input).unwrap_or_else(|e| {
        panic!("Input file/dir '{}' does not exist? {:?}", args.input, e);
    });
    let output_metadata = fs::metadata(&args.output).unwrap_or_else(|e| {
        panic!("Output dir '{}' does not exist? {:?}", args.output, e);
    });
    assert!(output_metadata.is_dir(),
            "Output '{}' must be a directory", args.output);

    let mut paths = Vec::<PathBuf>::new();
    if input_metadata.is_dir() {
        assert!(args.batch, "Input '{}' is a directory; use --batch", args.input);
        let entries = fs::read_dir(&args.input).unwrap_or_else(|e| {
            panic!("Cannot list '{}': {:?}", args.input, e);
        });
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
    } else {
        paths.push(PathBuf::from(&args.input));
    }

    let mut frames = Vec::<Frame>::new();
    for path in &paths {
        match load_frame(path) {
            Ok(frame) => frames.push(frame),
            Err(e) => warn!("Skipping {:?} due to: {:?}", path, e),
        }
    }

    let start = Instant::now();
    let cancel = AtomicBool::new(false);
    let results = match analyze_frames(&frames, &config, &cancel) {
        Ok(results) => results,
        Err(e) => panic!("Analysis failed: {}", e),
    };
    info!("Analyzed {} frame(s) in {:?}", results.len(), start.elapsed());
    for (frame, result) in frames.iter().zip(results) {
        match result {
            Ok(result_set) => {
                write_output(&result_set, frame.bit_depth(), &args.output);
                if args.coords {
                    log_results(&result_set);
                }
            },
            Err(e) => warn!("No results for '{}': {}", frame.title(), e),
        }
    }
}

fn load_frame(path: &Path) -> Result<Frame, image::ImageError> {
    let title = path.file_stem().map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let img = ImageReader::open(path)?.decode()?;
    let color = img.color();
    let bits_per_channel = color.bits_per_pixel() / color.channel_count() as u16;
    let frame = if bits_per_channel > 8 {
        Frame::from_gray16(&img.to_luma16(), &title)
    } else {
        Frame::from_gray8(&img.to_luma8(), &title)
    };
    info!("Loaded {} WxH {}x{} {:?}", title, frame.width(), frame.height(),
          frame.bit_depth());
    Ok(frame)
}

fn write_output(result_set: &ResultSet, bit_depth: BitDepth, output_dir: &str) {
    let mut output_path = PathBuf::from(output_dir);
    output_path.push(&result_set.title);
    output_path.set_extension("png");
    let image = &result_set.output_image;
    let saved = match bit_depth {
        BitDepth::Eight => {
            let gray = to_gray8(image);
            let mut img_color = DynamicImage::ImageLuma8(gray).into_rgb8();
            if result_set.draw_events {
                for record in &result_set.records {
                    drawing::draw_hollow_rect_mut(&mut img_color, record.bounding_box,
                                                  Rgb::<u8>([255, 0, 0]));
                }
            }
            img_color.save(&output_path)
        },
        BitDepth::Sixteen => {
            let gray = to_gray16(image);
            let mut img_color = DynamicImage::ImageLuma16(gray).into_rgb16();
            if result_set.draw_events {
                for record in &result_set.records {
                    drawing::draw_hollow_rect_mut(&mut img_color, record.bounding_box,
                                                  Rgb::<u16>([u16::MAX, 0, 0]));
                }
            }
            img_color.save(&output_path)
        },
    };
    if let Err(e) = saved {
        warn!("Could not write {:?}: {:?}", output_path, e);
    }
}

// Output samples are already within the frame's sample range.
fn to_gray8(image: &FloatImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        Luma([image.get_pixel(x, y).0[0].round() as u8])
    })
}

fn to_gray16(image: &FloatImage) -> Gray16Image {
    let (width, height) = image.dimensions();
    Gray16Image::from_fn(width, height, |x, y| {
        Luma([image.get_pixel(x, y).0[0].round() as u16])
    })
}

fn log_results(result_set: &ResultSet) {
    let summary = &result_set.summary;
    let mut table = String::new();
    table.push_str(format!("# {}: cell columns {}..={}, noise {:.3}\n",
                           result_set.title, result_set.edges.left,
                           result_set.edges.right, result_set.noise_estimate).as_str());
    table.push_str(format!("# {} events, {:.3} per 100um*s over {:.2} um*s\n",
                           summary.event_count, summary.frequency,
                           summary.analyzed_area).as_str());
    table.push_str("# n, amplitude, fwhm um, fdhm ms, width um, duration ms, \
                    x um, t ms, ttp ms, tau ms, max rise /s\n");
    for r in &result_set.records {
        let tau = r.tau_ms.map_or("-".to_string(), |v| format!("{:.2}", v));
        let rise = r.max_rise_rate.map_or("-".to_string(), |v| format!("{:.2}", v));
        table.push_str(format!(
            "{}, {:.3}, {:.2}, {:.2}, {:.2}, {:.2}, {:.2}, {:.2}, {:.2}, {}, {}\n",
            r.number, r.amplitude, r.half_width_um, r.half_duration_ms,
            r.full_width_um, r.full_duration_ms, r.x_position_um,
            r.time_position_ms, r.time_to_peak_ms, tau, rise).as_str());
    }
    info!("{}", table);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["spark-detect", "--input", "in.tif", "--output", "out"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_kinetics_flag() {
        assert!(config_from_args(&parse(&[])).unwrap().extended_kinetics);
        let config = config_from_args(&parse(&["--kinetics", "false"])).unwrap();
        assert!(!config.extended_kinetics);
    }

    #[test]
    fn test_wavelet_threshold_count() {
        let config = config_from_args(&parse(&[])).unwrap();
        assert_eq!(config.wavelet_thresholds, [10.0, 5.0, 1.0, 0.0, 0.0]);
        let config =
            config_from_args(&parse(&["--wavelet-thresholds", "8,4,2,1,0"])).unwrap();
        assert_eq!(config.wavelet_thresholds, [8.0, 4.0, 2.0, 1.0, 0.0]);
        assert!(config_from_args(&parse(&["--wavelet-thresholds", "8,4,2"])).is_err());
        assert!(config_from_args(&parse(&["--wavelet-thresholds", "1,1,1,1,1,1"]))
                .is_err());
    }
}  // mod tests.
