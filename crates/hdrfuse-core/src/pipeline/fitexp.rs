//! Exposure-time recovery
//!
//! When the EXIF shutter times cannot be trusted, the true per-frame
//! exposure scalars are recovered jointly with per-patch radiances by
//! fitting the log-linear model
//!
//! ```text
//! log2 mean_green(patch i, exposure k) = e_k + p_i
//! ```
//!
//! over many approximately constant image patches, gauge-fixed so the
//! longest usable exposure keeps its nominal time.

use std::path::Path;

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cfa::GREEN;
use crate::diagnostics::{self, FitPoint};
use crate::models::ExposureSeries;
use crate::tables::SensorTables;

const PATCH_SIZE: usize = 20;
const PATCHES_PER_EXPOSURE: usize = 200;
const MAX_TRIES: usize = PATCHES_PER_EXPOSURE * 100;

const MIN_LEVEL: f32 = 0.01;
const SATURATION_MARGIN: f32 = 0.05;
const MAX_REL_STDDEV: f32 = 0.1;

/// A fixed-size, even-aligned candidate window of approximately constant
/// radiance.
#[derive(Debug, Clone, Copy)]
struct Patch {
    x: usize,
    y: usize,
}

impl Patch {
    /// Sample a random even-aligned position away from the image borders.
    fn random(rng: &mut StdRng, width: usize, height: usize) -> Self {
        let rx: f32 = rng.random();
        let ry: f32 = rng.random();
        let x = 2 * ((rx * (width - 4 * PATCH_SIZE) as f32 / 2.0) as usize) + PATCH_SIZE;
        let y = 2 * ((ry * (height - 4 * PATCH_SIZE) as f32 / 2.0) as usize) + PATCH_SIZE;
        Patch { x, y }
    }

    /// Per-color min, max, mean and relative standard deviation over the window.
    fn statistics(
        &self,
        series: &ExposureSeries,
        tables: &SensorTables,
        img: usize,
    ) -> ([f32; 3], [f32; 3], [f32; 3], [f32; 3]) {
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        let mut mean = [0.0f32; 3];
        let mut count = [0usize; 3];

        for yo in 0..PATCH_SIZE {
            for xo in 0..PATCH_SIZE {
                let color = series.fc(self.x + xo, self.y + yo);
                let value = sample_value(series, tables, img, self.x + xo, self.y + yo);
                min[color] = min[color].min(value);
                max[color] = max[color].max(value);
                mean[color] += value;
                count[color] += 1;
            }
        }
        for c in 0..3 {
            mean[c] /= count[c] as f32;
        }

        let mut variance = [0.0f32; 3];
        for yo in 0..PATCH_SIZE {
            for xo in 0..PATCH_SIZE {
                let color = series.fc(self.x + xo, self.y + yo);
                let diff = sample_value(series, tables, img, self.x + xo, self.y + yo) - mean[color];
                variance[color] += diff * diff;
            }
        }

        let mut rel_stddev = [0.0f32; 3];
        for c in 0..3 {
            rel_stddev[c] = (variance[c] / (count[c] - 1) as f32).sqrt() / mean[c].abs();
        }

        (min, max, mean, rel_stddev)
    }

    /// Mean value per color over the window.
    fn mean(&self, series: &ExposureSeries, tables: &SensorTables, img: usize) -> [f32; 3] {
        let (_, _, mean, _) = self.statistics(series, tables, img);
        mean
    }

    /// Heuristic for whether a patch is usable on one exposure: well above
    /// the black level, safely below saturation, and nearly uniform.
    fn is_good(&self, series: &ExposureSeries, tables: &SensorTables, img: usize) -> bool {
        let (min, max, _, rel_stddev) = self.statistics(series, tables, img);
        min[GREEN] > MIN_LEVEL
            && max[GREEN] < series.saturation - SATURATION_MARGIN
            && rel_stddev[GREEN] < MAX_REL_STDDEV
    }

    /// Window overlap test.
    fn overlaps(&self, other: &Patch) -> bool {
        self.x.abs_diff(other.x) < PATCH_SIZE && self.y.abs_diff(other.y) < PATCH_SIZE
    }
}

#[inline]
fn sample_value(
    series: &ExposureSeries,
    tables: &SensorTables,
    img: usize,
    x: usize,
    y: usize,
) -> f32 {
    tables.value[series.exposures[img].image[x + y * series.width] as usize]
}

/// Re-estimate the exposure scalars of a loaded (not yet merged) series.
///
/// Replaces the exposure time of every frame that yields enough usable
/// patches; frames that do not are excluded with a warning. Fails when
/// fewer than three frames remain. The random patch placement is
/// reproducible through `seed`. When `script_path` is given, a plotting
/// script comparing observed patch means against fitted and original
/// times is written there.
pub fn fit_exposure_times(
    series: &mut ExposureSeries,
    tables: &SensorTables,
    seed: u64,
    script_path: Option<&Path>,
) -> Result<(), String> {
    if series.width <= 4 * PATCH_SIZE || series.height <= 4 * PATCH_SIZE {
        return Err(format!(
            "Image too small for exposure fitting ({}x{}, needs more than {} pixels per side)",
            series.width,
            series.height,
            4 * PATCH_SIZE
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut patches: Vec<Patch> = Vec::new();
    let mut patch_list: Vec<Patch> = Vec::new();
    let mut good = vec![false; series.len()];

    println!("Fitting exposure times ..");
    for img in 0..series.len() {
        // Drop patches that stopped being usable on this exposure
        patches.retain(|p| p.is_good(series, tables, img));

        let mut tries = 0;
        while tries < MAX_TRIES && patches.len() < PATCHES_PER_EXPOSURE {
            tries += 1;
            let patch = Patch::random(&mut rng, series.width, series.height);
            if !patch.is_good(series, tables, img) {
                continue;
            }
            if patches.iter().any(|p| patch.overlaps(p)) {
                continue;
            }
            patches.push(patch);
            patch_list.push(patch);
        }

        good[img] = patches.len() == PATCHES_PER_EXPOSURE;
        println!(
            "  - Exposure {}: found {} well-exposed uniform patches after {} tries.",
            img,
            patches.len(),
            tries
        );
        if !good[img] {
            eprintln!(
                "    Warning: not enough patches found -- consider removing this exposure\n    (it is excluded from the fit)"
            );
        }
    }

    let good_exposures = good.iter().filter(|&&g| g).count();
    if good_exposures < 3 {
        return Err(
            "Fewer than 3 exposures with enough usable patches -- cannot fit exposure times"
                .to_string(),
        );
    }

    // One row per (patch, exposure) pair where the patch is usable on a
    // usable exposure, plus the gauge row.
    let mut n_rows = 0;
    for patch in &patch_list {
        for img in 0..series.len() {
            if good[img] && patch.is_good(series, tables, img) {
                n_rows += 1;
            }
        }
    }

    let n_patches = patch_list.len();
    let mut a = DMatrix::<f64>::zeros(n_rows + 1, good_exposures + n_patches);
    let mut b = DVector::<f64>::zeros(n_rows + 1);

    let mut row = 0;
    for (i, patch) in patch_list.iter().enumerate() {
        let mut exposure_idx = 0;
        for img in 0..series.len() {
            if !good[img] {
                continue;
            }
            if patch.is_good(series, tables, img) {
                a[(row, exposure_idx)] = 1.0;
                a[(row, good_exposures + i)] = 1.0;
                b[row] = (patch.mean(series, tables, img)[GREEN] as f64).log2();
                row += 1;
            }
            exposure_idx += 1;
        }
    }

    // Gauge: the longest usable exposure keeps its nominal time
    let longest = series
        .exposures
        .iter()
        .zip(&good)
        .filter(|(_, g)| **g)
        .map(|(e, _)| e.exposure)
        .last()
        .unwrap();
    a[(n_rows, good_exposures - 1)] = 1.0;
    b[n_rows] = (longest as f64).log2();

    println!(
        "  - Assuming that the {}s exposure is accurate (and computing the\n    other exposure times with respect to it)",
        longest
    );

    // The system can be poorly conditioned with many exposures, hence the
    // rank-revealing solve in double precision.
    let svd = a.svd(true, true);
    let result = svd
        .solve(&b, 1e-12)
        .map_err(|e| format!("Exposure-time fit failed: {}", e))?;

    let old_times: Vec<f32> = series.exposures.iter().map(|e| e.exposure).collect();
    let mut index = 0;
    for (img, exposure) in series.exposures.iter_mut().enumerate() {
        if !good[img] {
            continue;
        }
        exposure.exposure = 2f64.powf(result[index]) as f32;
        index += 1;
    }

    let times: Vec<String> = series
        .exposures
        .iter()
        .map(|e| format!("{}", e.exposure))
        .collect();
    println!();
    println!("Fitting is done. To reuse these corrected exposure times in future runs, add");
    println!("the following line to hdrfuse.yml:");
    println!();
    println!("exptimes: [{}]", times.join(", "));
    println!();

    if let Some(script_path) = script_path {
        // Diagnostic scatter data: observed patch means against the patch
        // radiance scaled by the fitted and the original exposure times.
        let mut points = Vec::new();
        for (i, patch) in patch_list.iter().enumerate() {
            let radiance = 2f64.powf(result[good_exposures + i]) as f32;
            for img in 0..series.len() {
                if !patch.is_good(series, tables, img) {
                    continue;
                }
                points.push(FitPoint {
                    observed: patch.mean(series, tables, img)[GREEN],
                    fitted: radiance * series.exposures[img].exposure,
                    original: radiance * old_times[img],
                });
            }
        }
        diagnostics::write_fit_script(script_path, &points)?;
        println!(
            "To verify the quality of this fit, execute the script '{}' in",
            script_path.display()
        );
        println!("MATLAB or Octave. The data points should nicely align to the diagonal.");
        println!();
    }

    Ok(())
}
