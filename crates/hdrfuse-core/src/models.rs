//! Data model for exposure series
//!
//! An `ExposureSeries` owns the bracketed frames and the working image
//! buffer that the pipeline stages transform in place.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cfa::CfaPattern;

/// A single captured RAW frame.
#[derive(Debug)]
pub struct Exposure {
    /// Source file the frame was decoded from
    pub filename: PathBuf,

    /// Exposure time in seconds
    pub exposure: f32,

    /// Shutter time as reported by the camera, for user output only
    pub shown_exposure: String,

    /// 16-bit sensor plane, row-major over the active area.
    /// Empty once the frame has been merged and released.
    pub image: Vec<u16>,
}

impl Exposure {
    /// Drop the sensor plane and free its memory.
    pub fn release(&mut self) {
        self.image = Vec::new();
    }
}

/// Format an exposure time the way cameras display it ("1/250" below a second).
pub fn format_exposure_time(seconds: f32) -> String {
    if seconds > 0.0 && seconds < 1.0 {
        format!("1/{}", trim_decimal(1.0 / seconds))
    } else {
        trim_decimal(seconds)
    }
}

fn trim_decimal(value: f32) -> String {
    let s = format!("{:.4}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

/// Working buffer of the pipeline.
///
/// After the merge the series holds either the single-channel mosaic or
/// the demosaiced color image, never both; replacing one releases the
/// other.
#[derive(Debug)]
pub enum ImageBuffer {
    /// No buffer yet (before the merge)
    Empty,

    /// Single-channel mosaic radiance, length width * height
    Mosaic(Vec<f32>),

    /// Interleaved RGB radiance, length width * height * 3
    Color(Vec<f32>),
}

impl ImageBuffer {
    /// Number of channels, 0 when empty.
    pub fn channels(&self) -> usize {
        match self {
            ImageBuffer::Empty => 0,
            ImageBuffer::Mosaic(_) => 1,
            ImageBuffer::Color(_) => 3,
        }
    }

    /// Borrow the pixel data regardless of variant.
    pub fn data(&self) -> Option<&[f32]> {
        match self {
            ImageBuffer::Empty => None,
            ImageBuffer::Mosaic(data) | ImageBuffer::Color(data) => Some(data),
        }
    }

    /// Mutably borrow the pixel data regardless of variant.
    pub fn data_mut(&mut self) -> Option<&mut [f32]> {
        match self {
            ImageBuffer::Empty => None,
            ImageBuffer::Mosaic(data) | ImageBuffer::Color(data) => Some(data),
        }
    }
}

/// A bracketed series of exposures of the same static scene.
///
/// All frames share dimensions, CFA pattern, black level and whitepoint;
/// `decoders::load_series` enforces this before anything else runs.
#[derive(Debug)]
pub struct ExposureSeries {
    /// Frames sorted ascending by exposure time
    pub exposures: Vec<Exposure>,

    /// EXIF metadata pooled across the series, passed through to outputs
    pub metadata: BTreeMap<String, String>,

    /// Width of the active sensor area
    pub width: usize,

    /// Height of the active sensor area
    pub height: usize,

    /// Sensor code representing zero light
    pub blacklevel: u16,

    /// Sensor code at full scale
    pub whitepoint: u16,

    /// Bayer pattern shared by all frames
    pub cfa: CfaPattern,

    /// Fraction of the linear range above which samples are distrusted
    pub saturation: f32,

    /// Working buffer; `Empty` until the merge runs
    pub buffer: ImageBuffer,
}

impl ExposureSeries {
    /// Number of exposures in the series.
    pub fn len(&self) -> usize {
        self.exposures.len()
    }

    /// True when the series holds no exposures.
    pub fn is_empty(&self) -> bool {
        self.exposures.is_empty()
    }

    /// Bayer color at pixel (x, y).
    #[inline(always)]
    pub fn fc(&self, x: usize, y: usize) -> usize {
        self.cfa.fc(x, y)
    }

    /// Release every frame's sensor plane (after the merge consumed them).
    pub fn release_raw(&mut self) {
        for exposure in &mut self.exposures {
            exposure.release();
        }
    }
}

/// Output color space of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Keep sensor RGB untouched
    Native,
    /// Transform to linear sRGB primaries
    Srgb,
    /// Transform to CIE XYZ
    Xyz,
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// OpenEXR, half precision
    Exr,
    /// OpenEXR, single precision
    Exr32,
    /// 8-bit PNG with the sRGB transfer curve
    Png,
    /// 8-bit JPEG with the sRGB transfer curve
    Jpg,
    /// 16-bit linear TIFF
    Tiff16,
}

impl OutputFormat {
    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Exr | OutputFormat::Exr32 => "exr",
            OutputFormat::Png => "png",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Tiff16 => "tiff",
        }
    }
}

/// Reconstruction filter used by the resampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Lanczos windowed sinc, radius 3
    Lanczos,
    /// Tent (linear) filter
    Tent,
}

/// Resampling target resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleTarget {
    /// Explicit width and height
    Size(usize, usize),
    /// Scale so the longer edge matches, keeping the aspect ratio
    MaxEdge(usize),
}

impl ResampleTarget {
    /// Resolve to concrete dimensions for a source image.
    pub fn resolve(&self, width: usize, height: usize) -> Result<(usize, usize), String> {
        let (w, h) = match *self {
            ResampleTarget::Size(w, h) => (w, h),
            ResampleTarget::MaxEdge(edge) => {
                let factor = edge as f64 / width.max(height) as f64;
                (
                    (width as f64 * factor).round() as usize,
                    (height as f64 * factor).round() as usize,
                )
            }
        };
        if w == 0 || h == 0 {
            return Err(format!("Cannot resample to an empty image ({}x{})", w, h));
        }
        Ok((w, h))
    }
}

/// White balance request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WhiteBalance {
    /// Explicit per-channel multipliers
    Multipliers([f32; 3]),
    /// Estimate multipliers from a grey patch (x, y, width, height)
    Patch(usize, usize, usize, usize),
}

/// Vignetting handling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VignettingMode {
    /// Fit the radial polynomial to this image, then correct with it
    Calibrate,
    /// Correct with known coefficients (a, b, c)
    Correct([f32; 3]),
}

/// Combined rotation and mirroring, applied as a single strided copy.
///
/// Internally reduced to a 90-degree-rotation bit plus per-axis mirror
/// flags; 180 and 270 degree rotations fold into the mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotateFlip {
    pub(crate) rotate_90: bool,
    pub(crate) flip_x: bool,
    pub(crate) flip_y: bool,
}

impl RotateFlip {
    /// Build from a rotation in degrees and mirror axes ("", "x", "y", "xy").
    pub fn new(rotation: u32, axes: &str) -> Result<Self, String> {
        let axes = axes.to_lowercase();
        let axes = if axes == "yx" { "xy".to_string() } else { axes };

        let code: u8 = match (rotation, axes.as_str()) {
            (0, "") => 0,
            (0, "x") => 4,
            (0, "y") => 6,
            (0, "xy") => 2,
            (90, "") => 1,
            (90, "x") => 5,
            (90, "y") => 7,
            (90, "xy") => 3,
            (180, "") => 2,
            (180, "x") => 6,
            (180, "y") => 4,
            (180, "xy") => 0,
            (270, "") => 3,
            (270, "x") => 7,
            (270, "y") => 5,
            (270, "xy") => 1,
            _ => {
                return Err(
                    "Rotation must be one of 0, 90, 180 or 270, and the flip axes one of x, y, or xy"
                        .to_string(),
                )
            }
        };

        Ok(Self {
            rotate_90: code & 1 == 1,
            flip_x: matches!(code & 6, 2 | 4),
            flip_y: matches!(code & 3, 1 | 2),
        })
    }

    /// True when the transform leaves the image untouched.
    pub fn is_identity(&self) -> bool {
        !self.rotate_90 && !self.flip_x && !self.flip_y
    }
}
