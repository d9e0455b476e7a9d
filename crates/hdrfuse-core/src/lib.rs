//! HDRFuse Core Library
//!
//! Core functionality for merging bracketed RAW exposure series into
//! linear high-dynamic-range images: weighted HDR merging, adaptive
//! homogeneity-directed demosaicing, exposure-time recovery, color and
//! geometry operators, vignetting calibration, and separable resampling.

pub mod cfa;
pub mod config;
pub mod decoders;
pub mod diagnostics;
pub mod exporters;
pub mod models;
pub mod pipeline;
pub mod tables;

// Re-export commonly used types
pub use cfa::CfaPattern;
pub use models::{
    ColorMode, Exposure, ExposureSeries, FilterKind, ImageBuffer, OutputFormat, ResampleTarget,
    RotateFlip, VignettingMode, WhiteBalance,
};
pub use pipeline::{process_series, ProcessOptions};
pub use tables::SensorTables;
