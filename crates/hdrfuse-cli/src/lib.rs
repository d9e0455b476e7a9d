//! Shared utilities for hdrfuse-cli
//!
//! String parsing for flag values and output-path derivation, kept out
//! of main.rs so they can be unit tested.

pub mod output;
pub mod parsers;

pub use output::determine_output_path;
pub use parsers::{
    parse_colormode, parse_exptimes, parse_filter, parse_format, parse_rect,
    parse_resample_target, parse_rgb,
};
