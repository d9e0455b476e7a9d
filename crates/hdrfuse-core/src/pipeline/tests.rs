//! End-to-end pipeline tests on synthetic series.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::*;
use crate::cfa::CfaPattern;
use crate::models::{format_exposure_time, Exposure, ExposureSeries, ImageBuffer, WhiteBalance};

/// Two consistent exposures of a smooth radiance ramp.
fn synthetic_series(width: usize, height: usize) -> ExposureSeries {
    let blacklevel = 100u16;
    let whitepoint = 16000u16;
    let range = (whitepoint - blacklevel) as f32;
    let times = [0.5f32, 2.0];

    let exposures = times
        .iter()
        .enumerate()
        .map(|(i, &time)| {
            let mut image = vec![0u16; width * height];
            for y in 0..height {
                for x in 0..width {
                    // Radiance ramp in [0.05, 0.4] per second of exposure
                    let radiance = 0.05 + 0.35 * (x + y) as f32 / (width + height) as f32;
                    let code = radiance * time * range + blacklevel as f32;
                    image[y * width + x] = code.round().min(whitepoint as f32) as u16;
                }
            }
            Exposure {
                filename: PathBuf::from(format!("ramp-{}.cr2", i)),
                exposure: time,
                shown_exposure: format_exposure_time(time),
                image,
            }
        })
        .collect();

    ExposureSeries {
        exposures,
        metadata: BTreeMap::new(),
        width,
        height,
        blacklevel,
        whitepoint,
        cfa: CfaPattern::from_name("RGGB").unwrap(),
        saturation: 0.95,
        buffer: ImageBuffer::Empty,
    }
}

#[test]
fn test_full_pipeline_produces_color_image() {
    let mut series = synthetic_series(64, 48);
    let options = ProcessOptions::default();
    process_series(&mut series, &options).unwrap();

    match &series.buffer {
        ImageBuffer::Color(data) => {
            assert_eq!(data.len(), 64 * 48 * 3);
            for &v in data {
                assert!(v >= 0.0, "pipeline output must be non-negative");
            }
        }
        _ => panic!("demosaiced pipeline must end in a color buffer"),
    }
    assert!(
        series.exposures.iter().all(|e| e.image.is_empty()),
        "RAW planes must be released by the merge"
    );
}

#[test]
fn test_pipeline_without_demosaic_keeps_mosaic() {
    let mut series = synthetic_series(32, 32);
    let options = ProcessOptions {
        demosaic: false,
        ..Default::default()
    };
    process_series(&mut series, &options).unwrap();

    match &series.buffer {
        ImageBuffer::Mosaic(data) => assert_eq!(data.len(), 32 * 32),
        _ => panic!("--no-demosaic must keep the single-channel mosaic"),
    }
}

#[test]
fn test_merge_recovers_ramp_radiance() {
    let mut series = synthetic_series(32, 32);
    let options = ProcessOptions {
        demosaic: false,
        ..Default::default()
    };
    process_series(&mut series, &options).unwrap();

    let data = series.buffer.data().unwrap();
    for y in 0..32 {
        for x in 0..32 {
            let expected = 0.05 + 0.35 * (x + y) as f32 / 64.0;
            let got = data[y * 32 + x];
            assert!(
                (got - expected).abs() < 2e-3,
                "merged radiance at ({}, {}): {} vs {}",
                x,
                y,
                got,
                expected
            );
        }
    }
}

#[test]
fn test_color_mode_requires_demosaic() {
    let mut series = synthetic_series(32, 32);
    let options = ProcessOptions {
        demosaic: false,
        colormode: crate::models::ColorMode::Srgb,
        ..Default::default()
    };
    assert!(process_series(&mut series, &options).is_err());
}

#[test]
fn test_scale_is_linear_over_the_pipeline() {
    let mut plain = synthetic_series(48, 48);
    let mut scaled = synthetic_series(48, 48);

    process_series(&mut plain, &ProcessOptions::default()).unwrap();
    process_series(
        &mut scaled,
        &ProcessOptions {
            scale: Some(2.5),
            ..Default::default()
        },
    )
    .unwrap();

    for (&a, &b) in plain
        .buffer
        .data()
        .unwrap()
        .iter()
        .zip(scaled.buffer.data().unwrap())
    {
        assert!(
            (b - 2.5 * a).abs() < 1e-5,
            "scaling must be linear: {} vs {}",
            b,
            2.5 * a
        );
    }
}

#[test]
fn test_crop_resample_rotate_chain() {
    let mut series = synthetic_series(96, 64);
    let options = ProcessOptions {
        crop: Some((8, 8, 64, 48)),
        resample: Some((
            crate::models::ResampleTarget::Size(32, 24),
            crate::models::FilterKind::Lanczos,
        )),
        rotate_flip: crate::models::RotateFlip::new(90, "").unwrap(),
        ..Default::default()
    };
    process_series(&mut series, &options).unwrap();

    // Rotation happens last, so the resampled 32x24 image ends up 24x32
    assert_eq!((series.width, series.height), (24, 32));
    assert_eq!(series.buffer.data().unwrap().len(), 24 * 32 * 3);
}

#[test]
fn test_white_balance_patch_over_pipeline() {
    let mut series = synthetic_series(64, 64);
    let options = ProcessOptions {
        white_balance: Some(WhiteBalance::Patch(16, 16, 16, 16)),
        ..Default::default()
    };
    process_series(&mut series, &options).unwrap();

    // The synthetic scene is grey, so the estimated gains are mild and
    // the output stays roughly neutral in the patch
    let data = series.buffer.data().unwrap();
    let idx = (20 * 64 + 20) * 3;
    let pixel = &data[idx..idx + 3];
    let mean = (pixel[0] + pixel[1] + pixel[2]) / 3.0;
    for &v in pixel {
        assert!(
            (v - mean).abs() / mean < 0.2,
            "white-balanced grey scene should stay near neutral: {:?}",
            pixel
        );
    }
}

#[test]
fn test_invalid_crop_is_fatal() {
    let mut series = synthetic_series(32, 32);
    let options = ProcessOptions {
        crop: Some((16, 16, 32, 32)),
        ..Default::default()
    };
    assert!(process_series(&mut series, &options).is_err());
}
