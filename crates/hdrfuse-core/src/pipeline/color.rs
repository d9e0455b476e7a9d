//! Color transform and white balance
//!
//! Both operators are strictly linear per pixel; no clamping happens
//! here so that scaling commutes with every other linear stage.

use rayon::prelude::*;

use crate::cfa::{BLUE, GREEN, RED};
use crate::models::{ColorMode, ExposureSeries, ImageBuffer};

/// RGB -> XYZ matrix (sRGB primaries, D65). Used as the default
/// sensor-to-XYZ matrix when the camera matrix is unknown.
pub const XYZ_FROM_SRGB: [[f32; 3]; 3] = [
    [0.412453, 0.357580, 0.180423],
    [0.212671, 0.715160, 0.072169],
    [0.019334, 0.119193, 0.950227],
];

/// XYZ -> linear sRGB matrix (inverse of `XYZ_FROM_SRGB`).
pub const SRGB_FROM_XYZ: [[f32; 3]; 3] = [
    [3.2404542, -1.5371385, -0.4985314],
    [-0.9692660, 1.8760108, 0.0415560],
    [0.0556434, -0.2040259, 1.0572252],
];

/// Transform the demosaiced image into the requested output color space.
pub fn transform_color(
    series: &mut ExposureSeries,
    sensor2xyz: &[[f32; 3]; 3],
    mode: ColorMode,
) -> Result<(), String> {
    if mode == ColorMode::Native {
        return Ok(());
    }
    let data = match &mut series.buffer {
        ImageBuffer::Color(data) => data,
        _ => return Err("Color transform requires a demosaiced image".to_string()),
    };
    match mode {
        ColorMode::Native => unreachable!(),
        ColorMode::Xyz => apply_matrix(data, sensor2xyz),
        ColorMode::Srgb => apply_matrix(data, &matmul3(&SRGB_FROM_XYZ, sensor2xyz)),
    }
    Ok(())
}

/// 3x3 matrix product.
pub fn matmul3(a: &[[f32; 3]; 3], b: &[[f32; 3]; 3]) -> [[f32; 3]; 3] {
    let mut out = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                out[i][j] += a[i][k] * b[k][j];
            }
        }
    }
    out
}

/// Apply a 3x3 matrix to every interleaved RGB pixel.
pub fn apply_matrix(data: &mut [f32], matrix: &[[f32; 3]; 3]) {
    // Chunks of whole pixels keep cache locality without a row structure
    const CHUNK_SIZE: usize = 256 * 3;
    data.par_chunks_mut(CHUNK_SIZE).for_each(|chunk| {
        for pixel in chunk.chunks_exact_mut(3) {
            let r = pixel[0];
            let g = pixel[1];
            let b = pixel[2];
            pixel[0] = matrix[0][0] * r + matrix[0][1] * g + matrix[0][2] * b;
            pixel[1] = matrix[1][0] * r + matrix[1][1] * g + matrix[1][2] * b;
            pixel[2] = matrix[2][0] * r + matrix[2][1] * g + matrix[2][2] * b;
        }
    });
}

/// Multiply each channel by its white-balance gain.
///
/// Works on the color buffer directly, and on the mosaic buffer through
/// the CFA lookup so white balancing composes with `--no-demosaic`.
pub fn white_balance(series: &mut ExposureSeries, scale: [f32; 3]) -> Result<(), String> {
    let width = series.width;
    let cfa = series.cfa;
    match &mut series.buffer {
        ImageBuffer::Color(data) => {
            data.par_chunks_mut(3).for_each(|pixel| {
                pixel[0] *= scale[0];
                pixel[1] *= scale[1];
                pixel[2] *= scale[2];
            });
            Ok(())
        }
        ImageBuffer::Mosaic(data) => {
            data.par_chunks_mut(width)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, v) in row.iter_mut().enumerate() {
                        *v *= scale[cfa.fc(x, y)];
                    }
                });
            Ok(())
        }
        ImageBuffer::Empty => Err("White balance requires a merged image".to_string()),
    }
}

/// Estimate white-balance gains from a grey patch.
///
/// Each channel is summed inside the rectangle; the gains are the
/// reciprocal sums, normalized so their mean is 1 to keep the overall
/// brightness fixed.
pub fn white_balance_from_patch(
    series: &ExposureSeries,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
) -> Result<[f32; 3], String> {
    if w == 0 || h == 0 || x + w > series.width || y + h > series.height {
        return Err(format!(
            "White balance patch {},{} {}x{} is outside the {}x{} image",
            x, y, w, h, series.width, series.height
        ));
    }

    let mut sum = [0.0f64; 3];
    match &series.buffer {
        ImageBuffer::Color(data) => {
            for py in y..y + h {
                for px in x..x + w {
                    let pixel = &data[(py * series.width + px) * 3..][..3];
                    sum[RED] += pixel[0] as f64;
                    sum[GREEN] += pixel[1] as f64;
                    sum[BLUE] += pixel[2] as f64;
                }
            }
        }
        ImageBuffer::Mosaic(data) => {
            for py in y..y + h {
                for px in x..x + w {
                    sum[series.fc(px, py)] += data[py * series.width + px] as f64;
                }
            }
        }
        ImageBuffer::Empty => return Err("White balance requires a merged image".to_string()),
    }

    if sum.iter().any(|&s| s <= 0.0) {
        return Err("White balance patch has a zero channel sum".to_string());
    }

    let mut scale = [0.0f32; 3];
    for c in 0..3 {
        scale[c] = (1.0 / sum[c]) as f32;
    }
    let mean = (scale[0] + scale[1] + scale[2]) / 3.0;
    for s in &mut scale {
        *s /= mean;
    }
    Ok(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::CfaPattern;
    use crate::models::{format_exposure_time, Exposure};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn series_with_color(data: Vec<f32>, width: usize, height: usize) -> ExposureSeries {
        ExposureSeries {
            exposures: vec![Exposure {
                filename: PathBuf::from("synthetic.cr2"),
                exposure: 1.0,
                shown_exposure: format_exposure_time(1.0),
                image: Vec::new(),
            }],
            metadata: BTreeMap::new(),
            width,
            height,
            blacklevel: 0,
            whitepoint: 65535,
            cfa: CfaPattern::from_name("RGGB").unwrap(),
            saturation: 1.0,
            buffer: ImageBuffer::Color(data),
        }
    }

    #[test]
    fn test_matrices_are_inverses() {
        let product = matmul3(&SRGB_FROM_XYZ, &XYZ_FROM_SRGB);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (product[i][j] - expected).abs() < 1e-4,
                    "product[{}][{}] = {}",
                    i,
                    j,
                    product[i][j]
                );
            }
        }
    }

    #[test]
    fn test_apply_matrix_identity() {
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let mut data = vec![0.2, 0.5, 0.9, 1.5, -0.25, 0.0];
        let original = data.clone();
        apply_matrix(&mut data, &identity);
        assert_eq!(data, original, "identity matrix must not change values");
    }

    #[test]
    fn test_apply_matrix_is_linear() {
        let matrix = XYZ_FROM_SRGB;
        let x = [0.3f32, 0.1, 0.7];
        let y = [0.2f32, 0.9, 0.4];
        let (alpha, beta) = (2.0f32, -0.5f32);

        let mut combined: Vec<f32> = (0..3).map(|i| alpha * x[i] + beta * y[i]).collect();
        apply_matrix(&mut combined, &matrix);

        let mut fx = x.to_vec();
        let mut fy = y.to_vec();
        apply_matrix(&mut fx, &matrix);
        apply_matrix(&mut fy, &matrix);

        for i in 0..3 {
            let expected = alpha * fx[i] + beta * fy[i];
            assert!(
                (combined[i] - expected).abs() < 1e-5,
                "f(ax + by) must equal a f(x) + b f(y), channel {}",
                i
            );
        }
    }

    #[test]
    fn test_transform_native_is_noop() {
        let data = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let mut series = series_with_color(data.clone(), 2, 1);
        transform_color(&mut series, &XYZ_FROM_SRGB, ColorMode::Native).unwrap();
        assert_eq!(series.buffer.data().unwrap(), &data[..]);
    }

    #[test]
    fn test_transform_srgb_of_srgb_sensor_is_identity() {
        // A sensor whose native space already is linear sRGB
        let data = vec![0.25, 0.5, 0.75];
        let mut series = series_with_color(data.clone(), 1, 1);
        transform_color(&mut series, &XYZ_FROM_SRGB, ColorMode::Srgb).unwrap();
        for (a, b) in series.buffer.data().unwrap().iter().zip(&data) {
            assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
        }
    }

    #[test]
    fn test_transform_rejects_mosaic() {
        let mut series = series_with_color(vec![0.0; 12], 2, 2);
        series.buffer = ImageBuffer::Mosaic(vec![0.0; 4]);
        assert!(transform_color(&mut series, &XYZ_FROM_SRGB, ColorMode::Xyz).is_err());
    }

    #[test]
    fn test_white_balance_gains() {
        let mut series = series_with_color(vec![0.5, 0.5, 0.5, 1.0, 1.0, 1.0], 2, 1);
        white_balance(&mut series, [2.0, 1.0, 0.5]).unwrap();
        let data = series.buffer.data().unwrap();
        assert_eq!(&data[..3], &[1.0, 0.5, 0.25]);
        assert_eq!(&data[3..], &[2.0, 1.0, 0.5]);
    }

    #[test]
    fn test_white_balance_on_mosaic_uses_cfa() {
        let mut series = series_with_color(Vec::new(), 2, 2);
        // RGGB: one sample of each channel in the 2x2 cell
        series.buffer = ImageBuffer::Mosaic(vec![1.0, 1.0, 1.0, 1.0]);
        white_balance(&mut series, [2.0, 3.0, 4.0]).unwrap();
        let data = series.buffer.data().unwrap();
        assert_eq!(data, &[2.0, 3.0, 3.0, 4.0]);
    }

    #[test]
    fn test_patch_estimate_neutralizes_grey() {
        // A grey scene with a strong color cast
        let (w, h) = (4, 4);
        let mut data = Vec::with_capacity(w * h * 3);
        for _ in 0..w * h {
            data.extend_from_slice(&[0.8, 0.4, 0.2]);
        }
        let mut series = series_with_color(data, w, h);

        let scale = white_balance_from_patch(&series, 0, 0, w, h).unwrap();
        let mean = (scale[0] + scale[1] + scale[2]) / 3.0;
        assert!((mean - 1.0).abs() < 1e-6, "gains must average to 1");

        white_balance(&mut series, scale).unwrap();
        let data = series.buffer.data().unwrap();
        for pixel in data.chunks_exact(3) {
            assert!(
                (pixel[0] - pixel[1]).abs() < 1e-6 && (pixel[1] - pixel[2]).abs() < 1e-6,
                "grey patch should be neutral after balancing: {:?}",
                pixel
            );
        }
    }

    #[test]
    fn test_patch_out_of_bounds() {
        let series = series_with_color(vec![0.0; 12], 2, 2);
        assert!(white_balance_from_patch(&series, 1, 1, 4, 4).is_err());
        assert!(white_balance_from_patch(&series, 0, 0, 0, 2).is_err());
    }
}
