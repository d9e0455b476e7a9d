//! Vignetting calibration and correction
//!
//! Radial falloff model `1 + a r^2 + b r^4 + c r^6` with `r` the distance
//! from the image center normalized by the longer edge. Calibration fits
//! the model to the luminance of a flat-field shot by least squares;
//! correction divides every channel by the polynomial.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::models::{ExposureSeries, ImageBuffer};

/// Sampling stride of the fit, in pixels along each axis.
const SAMPLE_SKIP: usize = 10;

/// Rec. 709 luminance weights.
const LUMA: [f64; 3] = [0.212671, 0.715160, 0.072169];

/// Fit the radial polynomial to the demosaiced image.
///
/// Returns the coefficient vector `[1, a, b, c]`; the constant term is
/// normalized to exactly 1.
pub fn fit(series: &ExposureSeries) -> Result<[f64; 4], String> {
    let data = match &series.buffer {
        ImageBuffer::Color(data) => data,
        _ => return Err("Vignetting calibration requires a demosaiced image".to_string()),
    };

    let width = series.width;
    let height = series.height;
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;
    let norm = width.max(height) as f64;

    let mut rows: Vec<[f64; 4]> = Vec::new();
    let mut luminance: Vec<f64> = Vec::new();
    for y in (0..height).step_by(SAMPLE_SKIP) {
        for x in (0..width).step_by(SAMPLE_SKIP) {
            let pixel = &data[(y * width + x) * 3..][..3];
            let lum = LUMA[0] * pixel[0] as f64
                + LUMA[1] * pixel[1] as f64
                + LUMA[2] * pixel[2] as f64;
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let r2 = (dx * dx + dy * dy) / (norm * norm);
            rows.push([1.0, r2, r2 * r2, r2 * r2 * r2]);
            luminance.push(lum);
        }
    }

    let a = DMatrix::<f64>::from_fn(rows.len(), 4, |i, j| rows[i][j]);
    let b = DVector::<f64>::from_vec(luminance);
    let svd = a.svd(true, true);
    let solution = svd
        .solve(&b, 1e-12)
        .map_err(|e| format!("Vignetting fit failed: {}", e))?;

    if solution[0].abs() < 1e-12 {
        return Err("Vignetting fit is degenerate (zero constant term)".to_string());
    }
    let inv = 1.0 / solution[0];
    Ok([1.0, solution[1] * inv, solution[2] * inv, solution[3] * inv])
}

/// Divide every channel by the radial polynomial.
pub fn correct(series: &mut ExposureSeries, a: f32, b: f32, c: f32) -> Result<(), String> {
    let width = series.width;
    let height = series.height;
    let channels = series.buffer.channels();
    let data = match series.buffer.data_mut() {
        Some(data) => data,
        None => return Err("Vignetting correction requires a merged image".to_string()),
    };

    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let inv_norm2 = 1.0 / (width.max(height) as f32 * width.max(height) as f32);

    data.par_chunks_mut(width * channels)
        .enumerate()
        .for_each(|(y, row)| {
            let dy = y as f32 - cy;
            for (x, pixel) in row.chunks_exact_mut(channels).enumerate() {
                let dx = x as f32 - cx;
                let r2 = (dx * dx + dy * dy) * inv_norm2;
                let falloff = 1.0 + r2 * (a + r2 * (b + r2 * c));
                let gain = 1.0 / falloff;
                for v in pixel {
                    *v *= gain;
                }
            }
        });
    Ok(())
}
