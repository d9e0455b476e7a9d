//! Two-pass weighted HDR merging
//!
//! Pass 1 forms a reference radiance from the observed confidence
//! weights. Pass 2 repeats the average, but weights each exposure by the
//! confidence of its *predicted* (noise-free) sensor code, which is far
//! more stable near the saturation knee than the observed one. Samples
//! clipped at either end of the trusted range never contribute.

use rayon::prelude::*;

use crate::models::{ExposureSeries, ImageBuffer};
use crate::tables::SensorTables;

/// Merge all exposures into a single radiance mosaic and release the
/// per-frame sensor planes.
pub fn merge(series: &mut ExposureSeries, tables: &SensorTables) -> Result<(), String> {
    let width = series.width;
    let height = series.height;

    for exposure in &series.exposures {
        if exposure.image.len() != width * height {
            return Err(format!(
                "\"{}\": sensor plane does not match the series dimensions",
                exposure.filename.display()
            ));
        }
    }
    if series.is_empty() {
        return Err("No exposures to merge".to_string());
    }

    let mut merged = vec![0.0f32; width * height];

    if series.len() == 1 {
        // Fast path: a single exposure is just the normalized sensor value,
        // and its exposure time is irrelevant.
        let src = &series.exposures[0].image;
        merged
            .par_chunks_mut(width)
            .zip(src.par_chunks(width))
            .for_each(|(dst_row, src_row)| {
                for (dst, &code) in dst_row.iter_mut().zip(src_row) {
                    *dst = tables.value[code as usize];
                }
            });
    } else {
        let black = series.blacklevel as f32;
        let range = series.whitepoint as f32 - black;
        let planes: Vec<&[u16]> = series.exposures.iter().map(|e| e.image.as_slice()).collect();
        let times: Vec<f32> = series.exposures.iter().map(|e| e.exposure).collect();

        merged
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, dst_row)| {
                let offset = y * width;
                for (x, dst) in dst_row.iter_mut().enumerate() {
                    let idx = offset + x;

                    // Pass 1: reference estimate from observed weights
                    let mut value = 0.0f32;
                    let mut total_exposure = 0.0f32;
                    for (plane, &time) in planes.iter().zip(&times) {
                        let code = plane[idx] as usize;
                        let weight = tables.weight[code];
                        value += tables.value[code] * weight;
                        total_exposure += time * weight;
                    }
                    let reference = if total_exposure > 0.0 {
                        value / total_exposure
                    } else {
                        0.0
                    };

                    // Pass 2: observed values, predicted weights
                    value = 0.0;
                    total_exposure = 0.0;
                    for (plane, &time) in planes.iter().zip(&times) {
                        let code = plane[idx] as usize;
                        if tables.weight[code] == 0.0 {
                            continue;
                        }
                        let predicted = reference * time * range + black;
                        if predicted <= 0.0 || predicted >= 65535.0 {
                            continue;
                        }
                        let predicted_code = (predicted + 0.5) as usize;
                        let weight = tables.weight[predicted_code];
                        value += tables.value[code] * weight;
                        total_exposure += time * weight;
                    }

                    *dst = if total_exposure > 0.0 {
                        value / total_exposure
                    } else {
                        0.0
                    };
                }
            });
    }

    series.release_raw();
    series.buffer = ImageBuffer::Mosaic(merged);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::CfaPattern;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn make_series(planes: Vec<(f32, Vec<u16>)>, width: usize, height: usize) -> ExposureSeries {
        let exposures = planes
            .into_iter()
            .enumerate()
            .map(|(i, (time, image))| crate::models::Exposure {
                filename: PathBuf::from(format!("exp-{}.cr2", i)),
                exposure: time,
                shown_exposure: crate::models::format_exposure_time(time),
                image,
            })
            .collect();
        ExposureSeries {
            exposures,
            metadata: BTreeMap::new(),
            width,
            height,
            blacklevel: 100,
            whitepoint: 1000,
            cfa: CfaPattern::from_name("RGGB").unwrap(),
            saturation: 0.99,
            buffer: ImageBuffer::Empty,
        }
    }

    fn merged_data(series: &ExposureSeries) -> &[f32] {
        match &series.buffer {
            ImageBuffer::Mosaic(data) => data,
            _ => panic!("merge should produce a mosaic buffer"),
        }
    }

    #[test]
    fn test_two_exposure_merge() {
        // Radiance consistent across both frames: code 200 at 4s, 125 at 1s
        let mut series = make_series(
            vec![(1.0, vec![125; 16]), (4.0, vec![200; 16])],
            4,
            4,
        );
        let tables = SensorTables::new(100, 1000, 0.99);
        merge(&mut series, &tables).unwrap();

        let expected = (200.0 - 100.0) / 900.0 / 4.0;
        for (i, &v) in merged_data(&series).iter().enumerate() {
            assert!(
                (v - expected).abs() < 1e-4,
                "pixel {}: {} != {}",
                i,
                v,
                expected
            );
        }
    }

    #[test]
    fn test_saturated_sample_rejected() {
        // The long exposure is clipped; only the short one may contribute
        let mut series = make_series(
            vec![(1.0, vec![300; 16]), (4.0, vec![65535; 16])],
            4,
            4,
        );
        let tables = SensorTables::new(100, 1000, 0.99);
        merge(&mut series, &tables).unwrap();

        let expected = (300.0 - 100.0) / 900.0;
        for &v in merged_data(&series) {
            assert!((v - expected).abs() < 1e-4, "{} != {}", v, expected);
        }
    }

    #[test]
    fn test_saturated_everywhere_produces_zero() {
        let mut series = make_series(
            vec![(1.0, vec![65535; 16]), (4.0, vec![65535; 16])],
            4,
            4,
        );
        let tables = SensorTables::new(100, 1000, 0.99);
        merge(&mut series, &tables).unwrap();

        for &v in merged_data(&series) {
            assert_eq!(v, 0.0);
        }
    }

    #[test]
    fn test_single_exposure_passthrough() {
        let mut series = make_series(vec![(0.01, vec![550; 16])], 4, 4);
        let tables = SensorTables::new(100, 1000, 0.99);
        merge(&mut series, &tables).unwrap();

        // Bit-exact normalized value, exposure time discarded
        for &v in merged_data(&series) {
            assert_eq!(v, 0.5);
        }
    }

    #[test]
    fn test_merge_output_non_negative() {
        let plane_a: Vec<u16> = (0..64u16).map(|i| i * 31).collect();
        let plane_b: Vec<u16> = (0..64u16).map(|i| i * 117).collect();
        let mut series = make_series(vec![(0.5, plane_a), (2.0, plane_b)], 8, 8);
        let tables = SensorTables::new(100, 1000, 0.99);
        merge(&mut series, &tables).unwrap();

        for &v in merged_data(&series) {
            assert!(v >= 0.0, "merged radiance must be non-negative, got {}", v);
        }
    }

    #[test]
    fn test_raw_planes_released_after_merge() {
        let mut series = make_series(vec![(1.0, vec![300; 16]), (2.0, vec![500; 16])], 4, 4);
        let tables = SensorTables::new(100, 1000, 0.99);
        merge(&mut series, &tables).unwrap();

        for exposure in &series.exposures {
            assert!(exposure.image.is_empty(), "sensor planes must be released");
        }
    }
}
