// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Detection and measurement of calcium sparks in line-scan images. See
//! [algorithm] for an overview; [analyze()] and [analyze_frames()] are the
//! entry points.

pub mod algorithm;
pub mod baseline;
pub mod config;
pub mod dedup;
pub mod error;
pub mod features;
pub mod frame;
pub mod image_funcs;
pub mod kinetics;
pub mod region_grow;
pub mod segment;
pub mod stats_funcs;
pub mod wavelet;

pub use algorithm::{analyze, analyze_frame, analyze_frames, FrameSummary, ResultSet};
pub use config::{AnalysisConfig, OutputImageMode, PreFilter};
pub use error::{AnalysisError, ConfigError};
pub use features::SparkRecord;
pub use frame::{BitDepth, Frame};
