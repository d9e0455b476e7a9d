//! Adaptive homogeneity-directed demosaicing
//!
//! Produces two candidate reconstructions of the mosaic (green
//! interpolated horizontally first, then vertically first), scores both
//! in CIELab with a local homogeneity count, and keeps the locally more
//! homogeneous one per pixel. Ties average the candidates, which is what
//! suppresses zippering without blurring: only the loser of a local
//! contest is ever discarded.
//!
//! The image interior is covered by overlapping tiles of side `TILE`
//! advancing by `TILE - 6`. Each tile reads a slightly extended window
//! but writes only its 3-pixel-inset interior, so consecutive tiles
//! write disjoint regions that together cover everything but the global
//! 5-pixel border (which is filled by naive per-color averaging).

use rayon::prelude::*;

use crate::cfa::{CfaPattern, GREEN};
use crate::models::{ExposureSeries, ImageBuffer};

const TILE: usize = 256;
const BORDER: usize = 5;

/// D65 reference white used for the CIELab homogeneity metric.
const D65_WHITE: [f32; 3] = [0.950456, 1.0, 1.088754];

const CIELAB_LUT_SIZE: usize = 1 << 16;

/// Per-worker scratch storage: two RGB candidates, two Lab images and two
/// homogeneity maps, all tile-sized. One instance is reused for every
/// tile of a band rather than allocated per tile.
struct TileScratch {
    rgb: [Vec<f32>; 2],
    lab: [Vec<f32>; 2],
    homo: [Vec<u8>; 2],
}

impl TileScratch {
    fn new() -> Self {
        Self {
            rgb: [vec![0.0; TILE * TILE * 3], vec![0.0; TILE * TILE * 3]],
            lab: [vec![0.0; TILE * TILE * 3], vec![0.0; TILE * TILE * 3]],
            homo: [vec![0; TILE * TILE], vec![0; TILE * TILE]],
        }
    }
}

/// Replace the merged mosaic with a three-channel reconstruction.
///
/// `sensor2xyz` is only used for the perceptual homogeneity metric; the
/// output stays in sensor RGB.
pub fn demosaic(series: &mut ExposureSeries, sensor2xyz: &[[f32; 3]; 3]) -> Result<(), String> {
    let width = series.width;
    let height = series.height;
    let cfa = series.cfa;

    let mosaic = match std::mem::replace(&mut series.buffer, ImageBuffer::Empty) {
        ImageBuffer::Mosaic(mosaic) => mosaic,
        other => {
            series.buffer = other;
            return Err("Demosaicing requires the merged mosaic image".to_string());
        }
    };

    let mut output = vec![0.0f32; width * height * 3];
    fill_border(&mosaic, width, height, cfa, &mut output);

    // Lab conversion setup: white-normalized matrix, scaled so every
    // component lands in [0, 1] before the cube-root lookup.
    let mut cam = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            cam[i][j] = sensor2xyz[i][j] / D65_WHITE[i];
        }
    }
    let max_entry = cam
        .iter()
        .flatten()
        .fold(0.0f32, |acc, &v| acc.max(v.abs()));
    let max_value = mosaic.iter().fold(0.0f32, |acc, &v| acc.max(v));
    let norm = 1.0 / (max_entry * max_value).max(1e-8);
    for row in &mut cam {
        for v in row {
            *v *= norm;
        }
    }
    let lut = build_cielab_lut();

    // Row bands of height TILE - 6 tile the interior exactly once; tiles
    // within a band run sequentially on one scratch buffer while bands
    // run in parallel.
    let tops: Vec<usize> = if height > BORDER + 2 {
        (2..height - BORDER).step_by(TILE - 6).collect()
    } else {
        Vec::new()
    };

    let mut bands: Vec<(usize, &mut [f32])> = Vec::new();
    if !tops.is_empty() {
        let mut rest = &mut output[BORDER * width * 3..];
        for &top in &tops {
            let start = top + 3;
            let end = (top + TILE - 3).min(height - BORDER);
            let len = end.saturating_sub(start) * width * 3;
            let (band, tail) = std::mem::take(&mut rest).split_at_mut(len);
            bands.push((top, band));
            rest = tail;
        }
    }

    bands.into_par_iter().for_each(|(top, band)| {
        let mut scratch = TileScratch::new();
        if width > BORDER + 2 {
            for left in (2..width - BORDER).step_by(TILE - 6) {
                process_tile(
                    &mosaic, width, height, cfa, top, left, &cam, &lut, &mut scratch, band,
                );
            }
        }
    });

    series.buffer = ImageBuffer::Color(output);
    Ok(())
}

/// Naive 3x3 per-color averaging for the 5-pixel image border.
fn fill_border(mosaic: &[f32], width: usize, height: usize, cfa: CfaPattern, output: &mut [f32]) {
    let mut fill = |x: usize, y: usize| {
        let mut sum = [0.0f32; 3];
        let mut count = [0usize; 3];
        for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                let color = cfa.fc(nx, ny);
                sum[color] += mosaic[ny * width + nx];
                count[color] += 1;
            }
        }
        let idx = (y * width + x) * 3;
        let own = cfa.fc(x, y);
        for c in 0..3 {
            output[idx + c] = if c == own {
                mosaic[y * width + x]
            } else if count[c] > 0 {
                sum[c] / count[c] as f32
            } else {
                1.0
            };
        }
    };

    for y in 0..height {
        if y < BORDER || y >= height.saturating_sub(BORDER) {
            for x in 0..width {
                fill(x, y);
            }
        } else {
            for x in 0..BORDER.min(width) {
                fill(x, y);
            }
            for x in width.saturating_sub(BORDER)..width {
                fill(x, y);
            }
        }
    }
}

fn build_cielab_lut() -> Vec<f32> {
    (0..CIELAB_LUT_SIZE)
        .map(|i| {
            let r = i as f32 / (CIELAB_LUT_SIZE - 1) as f32;
            if r > 0.008856 {
                r.cbrt()
            } else {
                7.787 * r + 16.0 / 116.0
            }
        })
        .collect()
}

/// Clamp `value` into the interval spanned by `a` and `b`.
#[inline]
fn clamp_between(value: f32, a: f32, b: f32) -> f32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    value.clamp(lo, hi)
}

#[allow(clippy::too_many_arguments)]
fn process_tile(
    mosaic: &[f32],
    width: usize,
    height: usize,
    cfa: CfaPattern,
    top: usize,
    left: usize,
    cam: &[[f32; 3]; 3],
    lut: &[f32],
    scratch: &mut TileScratch,
    band: &mut [f32],
) {
    // Directional green estimates at every non-green pixel. The clamp to
    // the bracketing greens is load-bearing: it forbids new extrema.
    for y in top..(top + TILE).min(height - 2) {
        let mut x = left + (cfa.fc(left, y) & 1);
        while x < (left + TILE).min(width - 2) {
            let idx = y * width + x;
            let t = ((y - top) * TILE + (x - left)) * 3;

            let interp_h = 0.25
                * ((mosaic[idx - 1] + mosaic[idx] + mosaic[idx + 1]) * 2.0
                    - mosaic[idx - 2]
                    - mosaic[idx + 2]);
            let interp_v = 0.25
                * ((mosaic[idx - width] + mosaic[idx] + mosaic[idx + width]) * 2.0
                    - mosaic[idx - 2 * width]
                    - mosaic[idx + 2 * width]);

            scratch.rgb[0][t + GREEN] = clamp_between(interp_h, mosaic[idx - 1], mosaic[idx + 1]);
            scratch.rgb[1][t + GREEN] =
                clamp_between(interp_v, mosaic[idx - width], mosaic[idx + width]);

            x += 2;
        }
    }

    // Chroma interpolation and Lab conversion, per direction.
    for dir in 0..2 {
        for y in (top + 1)..(top + TILE - 1).min(height - 3) {
            for x in (left + 1)..(left + TILE - 1).min(width - 3) {
                let idx = y * width + x;
                let t = ((y - top) * TILE + (x - left)) * 3;
                let rgb = &mut scratch.rgb[dir];
                let color = cfa.fc(x, y);

                if color == GREEN {
                    // Row neighbors carry one chroma, column neighbors the other
                    let col_color = cfa.fc(x, y + 1);
                    let row_color = 2 - col_color;

                    let row_est = mosaic[idx]
                        + 0.5
                            * (mosaic[idx - 1] + mosaic[idx + 1]
                                - rgb[t - 3 + GREEN]
                                - rgb[t + 3 + GREEN]);
                    rgb[t + row_color] = row_est.max(0.0);

                    let col_est = mosaic[idx]
                        + 0.5
                            * (mosaic[idx - width] + mosaic[idx + width]
                                - rgb[t - TILE * 3 + GREEN]
                                - rgb[t + TILE * 3 + GREEN]);
                    rgb[t + col_color] = col_est.max(0.0);

                    rgb[t + GREEN] = mosaic[idx];
                } else {
                    // The opposite chroma sits on the four diagonals
                    let other = 2 - color;
                    let est = rgb[t + GREEN]
                        + 0.25
                            * (mosaic[idx - width - 1]
                                + mosaic[idx - width + 1]
                                + mosaic[idx + width - 1]
                                + mosaic[idx + width + 1]
                                - rgb[t - (TILE + 1) * 3 + GREEN]
                                - rgb[t - (TILE - 1) * 3 + GREEN]
                                - rgb[t + (TILE - 1) * 3 + GREEN]
                                - rgb[t + (TILE + 1) * 3 + GREEN]);
                    rgb[t + other] = est.max(0.0);
                    rgb[t + color] = mosaic[idx];
                }

                let r = rgb[t];
                let g = rgb[t + 1];
                let b = rgb[t + 2];
                let mut f = [0.0f32; 3];
                for (i, fi) in f.iter_mut().enumerate() {
                    let v = cam[i][0] * r + cam[i][1] * g + cam[i][2] * b;
                    let index = (v.clamp(0.0, 1.0) * (CIELAB_LUT_SIZE - 1) as f32) as usize;
                    *fi = lut[index];
                }
                let lab = &mut scratch.lab[dir];
                lab[t] = 116.0 * f[1] - 16.0;
                lab[t + 1] = 500.0 * (f[0] - f[1]);
                lab[t + 2] = 200.0 * (f[1] - f[2]);
            }
        }
    }

    // Homogeneity maps: count the axis neighbors whose Lab distance stays
    // below thresholds adapted to the local contrast.
    const OFFSETS: [isize; 4] = [-1, 1, -(TILE as isize), TILE as isize];
    for y in (top + 2)..(top + TILE - 2).min(height - 4) {
        for x in (left + 2)..(left + TILE - 2).min(width - 4) {
            let t = (y - top) * TILE + (x - left);

            let mut ldiff = [[0.0f32; 4]; 2];
            let mut abdiff = [[0.0f32; 4]; 2];
            for dir in 0..2 {
                let lab = &scratch.lab[dir];
                let base = t * 3;
                for (i, &off) in OFFSETS.iter().enumerate() {
                    let n = (base as isize + off * 3) as usize;
                    ldiff[dir][i] = (lab[base] - lab[n]).abs();
                    let da = lab[base + 1] - lab[n + 1];
                    let db = lab[base + 2] - lab[n + 2];
                    abdiff[dir][i] = da * da + db * db;
                }
            }

            let leps = ldiff[0][0]
                .max(ldiff[0][1])
                .min(ldiff[1][2].max(ldiff[1][3]));
            let abeps = abdiff[0][0]
                .max(abdiff[0][1])
                .min(abdiff[1][2].max(abdiff[1][3]));

            for dir in 0..2 {
                let mut count = 0u8;
                for i in 0..4 {
                    if ldiff[dir][i] <= leps && abdiff[dir][i] <= abeps {
                        count += 1;
                    }
                }
                scratch.homo[dir][t] = count;
            }
        }
    }

    // Selection: 3x3 homogeneity vote, averaging the candidates on ties.
    let band_row0 = top + 3;
    for y in (top + 3)..(top + TILE - 3).min(height - BORDER) {
        for x in (left + 3)..(left + TILE - 3).min(width - BORDER) {
            let t = (y - top) * TILE + (x - left);

            let mut votes = [0u32; 2];
            for (dir, vote) in votes.iter_mut().enumerate() {
                for dy in [-(TILE as isize), 0, TILE as isize] {
                    for dx in [-1isize, 0, 1] {
                        *vote += scratch.homo[dir][(t as isize + dy + dx) as usize] as u32;
                    }
                }
            }

            let out = &mut band[((y - band_row0) * width + x) * 3..][..3];
            if votes[0] != votes[1] {
                let dir = usize::from(votes[1] > votes[0]);
                out.copy_from_slice(&scratch.rgb[dir][t * 3..t * 3 + 3]);
            } else {
                for c in 0..3 {
                    out[c] = 0.5 * (scratch.rgb[0][t * 3 + c] + scratch.rgb[1][t * 3 + c]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{format_exposure_time, Exposure};
    use crate::pipeline::color::XYZ_FROM_SRGB;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn series_with_mosaic(mosaic: Vec<f32>, width: usize, height: usize) -> ExposureSeries {
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
            buffer: ImageBuffer::Mosaic(mosaic),
        }
    }

    fn color_data(series: &ExposureSeries) -> &[f32] {
        match &series.buffer {
            ImageBuffer::Color(data) => data,
            _ => panic!("demosaic should produce a color buffer"),
        }
    }

    #[test]
    fn test_constant_field_reconstructs_exactly() {
        let (w, h) = (64, 48);
        let mut series = series_with_mosaic(vec![0.5; w * h], w, h);
        demosaic(&mut series, &XYZ_FROM_SRGB).unwrap();

        let data = color_data(&series);
        for (i, &v) in data.iter().enumerate() {
            assert!(
                (v - 0.5).abs() < 1e-6,
                "channel {} of pixel {} should be 0.5, got {}",
                i % 3,
                i / 3,
                v
            );
        }
    }

    #[test]
    fn test_known_channel_preserved_in_interior() {
        let (w, h) = (64, 64);
        let cfa = CfaPattern::from_name("RGGB").unwrap();
        let mut mosaic = vec![0.0f32; w * h];
        for y in 0..h {
            for x in 0..w {
                // Smooth gradient so both candidates stay well-behaved
                mosaic[y * w + x] = 0.1 + 0.6 * (x + y) as f32 / (w + h) as f32;
            }
        }
        let mut series = series_with_mosaic(mosaic.clone(), w, h);
        demosaic(&mut series, &XYZ_FROM_SRGB).unwrap();

        let data = color_data(&series);
        for y in BORDER..h - BORDER {
            for x in BORDER..w - BORDER {
                let idx = y * w + x;
                let own = cfa.fc(x, y);
                assert!(
                    (data[idx * 3 + own] - mosaic[idx]).abs() < 1e-6,
                    "CFA sample at ({}, {}) must pass through unchanged",
                    x,
                    y
                );
            }
        }
    }

    #[test]
    fn test_output_non_negative() {
        let (w, h) = (48, 48);
        let mut mosaic = vec![0.0f32; w * h];
        for (i, v) in mosaic.iter_mut().enumerate() {
            // Harsh alternating pattern to provoke overshoot in the
            // unclamped estimates
            *v = if (i / 7) % 2 == 0 { 0.9 } else { 0.05 };
        }
        let mut series = series_with_mosaic(mosaic, w, h);
        demosaic(&mut series, &XYZ_FROM_SRGB).unwrap();

        for &v in color_data(&series) {
            assert!(v >= 0.0, "demosaiced values must be non-negative, got {}", v);
        }
    }

    #[test]
    fn test_small_image_is_all_border() {
        let (w, h) = (8, 8);
        let mut series = series_with_mosaic(vec![0.25; w * h], w, h);
        demosaic(&mut series, &XYZ_FROM_SRGB).unwrap();

        let data = color_data(&series);
        assert_eq!(data.len(), w * h * 3);
        for &v in data {
            assert!((v - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rejects_color_buffer() {
        let mut series = series_with_mosaic(vec![0.5; 64], 8, 8);
        series.buffer = ImageBuffer::Color(vec![0.5; 192]);
        assert!(demosaic(&mut series, &XYZ_FROM_SRGB).is_err());
    }
}
