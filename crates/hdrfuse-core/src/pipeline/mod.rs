//! Image processing pipeline
//!
//! Stages run in a fixed order on the series' working buffer:
//! exposure-time fitting (optional, pre-merge), HDR merge, demosaic,
//! color transform, white balance, brightness scale, vignetting,
//! crop, resample, rotation. Each stage owns the buffer while it runs;
//! there is no I/O inside the pipeline.

mod color;
mod demosaic;
mod fitexp;
mod geometry;
mod merge;
mod resample;
mod vignetting;

#[cfg(test)]
mod tests;

pub use color::{
    apply_matrix, matmul3, transform_color, white_balance, white_balance_from_patch,
    SRGB_FROM_XYZ, XYZ_FROM_SRGB,
};
pub use demosaic::demosaic;
pub use fitexp::fit_exposure_times;
pub use geometry::{crop, rotate_flip, scale_brightness};
pub use merge::merge;
pub use resample::{resample, resample_image, Lanczos, ReconstructionFilter, Resampler, Tent};
pub use vignetting::{correct as vignetting_correct, fit as vignetting_fit};

use std::path::PathBuf;

use crate::models::{
    ColorMode, ExposureSeries, FilterKind, ResampleTarget, RotateFlip, VignettingMode,
    WhiteBalance,
};
use crate::tables::SensorTables;
use crate::verbose_println;

/// Everything the pipeline needs to know beyond the series itself.
pub struct ProcessOptions {
    /// Re-estimate exposure times before merging
    pub fit_exposure_times: bool,

    /// Seed for the fitter's random patch placement
    pub seed: u64,

    /// Where the fitter writes its diagnostic plotting script
    pub fit_script_path: Option<PathBuf>,

    /// Reconstruct full color; otherwise the mosaic is kept single-channel
    pub demosaic: bool,

    /// Sensor to XYZ matrix (used by the demosaicer and color transform)
    pub sensor2xyz: [[f32; 3]; 3],

    /// Output color space
    pub colormode: ColorMode,

    /// White balance request
    pub white_balance: Option<WhiteBalance>,

    /// Constant brightness factor
    pub scale: Option<f32>,

    /// Vignetting calibration or correction
    pub vignetting: Option<VignettingMode>,

    /// Crop rectangle (x, y, width, height)
    pub crop: Option<(usize, usize, usize, usize)>,

    /// Resampling target and reconstruction filter
    pub resample: Option<(ResampleTarget, FilterKind)>,

    /// Final rotation/mirror
    pub rotate_flip: RotateFlip,

    /// Suppress progress output
    pub silent: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            fit_exposure_times: false,
            seed: 0,
            fit_script_path: None,
            demosaic: true,
            sensor2xyz: XYZ_FROM_SRGB,
            colormode: ColorMode::Native,
            white_balance: None,
            scale: None,
            vignetting: None,
            crop: None,
            resample: None,
            rotate_flip: RotateFlip::default(),
            silent: true,
        }
    }
}

/// Run the full pipeline on a loaded series.
pub fn process_series(
    series: &mut ExposureSeries,
    options: &ProcessOptions,
) -> Result<(), String> {
    let tables = SensorTables::new(series.blacklevel, series.whitepoint, series.saturation);

    if options.fit_exposure_times {
        fitexp::fit_exposure_times(
            series,
            &tables,
            options.seed,
            options.fit_script_path.as_deref(),
        )?;
    }

    if !options.silent && series.len() > 1 {
        println!("Merging {} exposures ..", series.len());
    }
    merge::merge(series, &tables)?;

    if options.demosaic {
        if !options.silent {
            println!("Demosaicing ({}x{}) ..", series.width, series.height);
        }
        demosaic::demosaic(series, &options.sensor2xyz)?;
        color::transform_color(series, &options.sensor2xyz, options.colormode)?;
    } else if options.colormode != ColorMode::Native {
        return Err(
            "Color transforms require demosaicing (drop --no-demosaic or use native color)"
                .to_string(),
        );
    }

    if let Some(request) = &options.white_balance {
        let scale = match *request {
            WhiteBalance::Multipliers(scale) => scale,
            WhiteBalance::Patch(x, y, w, h) => {
                let scale = color::white_balance_from_patch(series, x, y, w, h)?;
                if !options.silent {
                    println!(
                        "White balance multipliers: [{:.4}, {:.4}, {:.4}]",
                        scale[0], scale[1], scale[2]
                    );
                }
                scale
            }
        };
        color::white_balance(series, scale)?;
    }

    if let Some(factor) = options.scale {
        verbose_println!("[verbose] Scaling brightness by {}", factor);
        geometry::scale_brightness(series, factor);
    }

    match options.vignetting {
        Some(VignettingMode::Calibrate) => {
            let coefficients = vignetting::fit(series)?;
            if !options.silent {
                println!(
                    "Vignetting polynomial: 1 + {:.6} r^2 + {:.6} r^4 + {:.6} r^6",
                    coefficients[1], coefficients[2], coefficients[3]
                );
                println!(
                    "Reuse with: --vcorr {:.6},{:.6},{:.6}",
                    coefficients[1], coefficients[2], coefficients[3]
                );
            }
            vignetting::correct(
                series,
                coefficients[1] as f32,
                coefficients[2] as f32,
                coefficients[3] as f32,
            )?;
        }
        Some(VignettingMode::Correct([a, b, c])) => {
            vignetting::correct(series, a, b, c)?;
        }
        None => {}
    }

    if let Some((x, y, w, h)) = options.crop {
        geometry::crop(series, x, y, w, h)?;
    }

    if let Some((target, filter_kind)) = &options.resample {
        let (target_width, target_height) = target.resolve(series.width, series.height)?;
        if !options.silent {
            println!("Resampling to {}x{} ..", target_width, target_height);
        }
        let filter = filter_kind.build();
        resample::resample(series, filter.as_ref(), target_width, target_height)?;
    }

    if !options.rotate_flip.is_identity() {
        geometry::rotate_flip(series, options.rotate_flip)?;
    }

    Ok(())
}
