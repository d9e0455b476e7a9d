//! Exposure-series loading and pre-merge validation
//!
//! Decodes every input in parallel (delegating to hdrfuse-raw), checks
//! that the frames actually form a bracketed series of the same scene,
//! pools their EXIF metadata, sorts by exposure time and estimates the
//! saturation threshold. Inconsistent series are fatal; a missing
//! manual-exposure assertion only warns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::cfa::CfaPattern;
use crate::models::{format_exposure_time, Exposure, ExposureSeries, ImageBuffer};

/// Longest metadata value kept; huge attributes (maker notes and the
/// like) are dropped.
const MAX_METADATA_VALUE_LEN: usize = 100;

/// Expand a printf-style `%`-pattern ("img_%03i.cr2") into the files
/// that exist, starting at index 0 and falling back to 1.
///
/// Arguments without a `%` are returned verbatim.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, String> {
    let mut expanded = Vec::new();
    for input in inputs {
        let text = input.to_string_lossy();
        if text.contains('%') {
            let matches = expand_pattern(&text)?;
            if matches.is_empty() {
                return Err(format!("No input found matching the pattern {}", text));
            }
            expanded.extend(matches);
        } else {
            expanded.push(input.clone());
        }
    }
    Ok(expanded)
}

fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>, String> {
    for start in [0usize, 1] {
        let mut found = Vec::new();
        for index in start.. {
            let candidate = PathBuf::from(format_pattern(pattern, index)?);
            if !candidate.is_file() {
                break;
            }
            found.push(candidate);
        }
        if !found.is_empty() {
            return Ok(found);
        }
    }
    Ok(Vec::new())
}

/// Substitute a single printf-style integer conversion ("%i", "%d",
/// "%03i") with the given index.
fn format_pattern(pattern: &str, index: usize) -> Result<String, String> {
    let percent = match pattern.find('%') {
        Some(position) => position,
        None => return Ok(pattern.to_string()),
    };
    let rest = &pattern[percent + 1..];

    let width_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let width_spec = &rest[..width_len];
    let conversion = rest[width_len..].chars().next();

    match conversion {
        Some('i') | Some('d') => {
            let pad = width_spec.trim_start_matches('0').parse::<usize>().ok();
            let zero_padded = width_spec.starts_with('0');
            let number = match (pad, zero_padded) {
                (Some(width), true) => format!("{:0width$}", index, width = width),
                (Some(width), false) => format!("{:width$}", index, width = width),
                (None, _) => format!("{}", index),
            };
            Ok(format!(
                "{}{}{}",
                &pattern[..percent],
                number,
                &rest[width_len + 1..]
            ))
        }
        _ => Err(format!(
            "Input pattern {} must use a %i or %d style index",
            pattern
        )),
    }
}

/// Decode and validate a full exposure series.
///
/// `exptimes_override` replaces the EXIF shutter times (in input order)
/// before sorting; `saturation_override` skips the estimate from the
/// brightest frame.
pub fn load_series(
    paths: &[PathBuf],
    saturation_override: Option<f32>,
    exptimes_override: Option<&[f32]>,
    silent: bool,
) -> Result<ExposureSeries, String> {
    if paths.is_empty() {
        return Err("No input found / list of exposures to merge is empty".to_string());
    }
    if let Some(times) = exptimes_override {
        if times.len() != paths.len() {
            return Err(format!(
                "Exposure time override lists {} values for {} input files",
                times.len(),
                paths.len()
            ));
        }
        if times.iter().any(|&t| t <= 0.0) {
            return Err("Exposure times must be strictly positive".to_string());
        }
    }

    for path in paths {
        if !is_raw_file(path) {
            eprintln!(
                "Warning: \"{}\" does not have a known RAW extension",
                path.display()
            );
        }
    }

    if !silent {
        use std::io::Write;
        print!("Loading raw image data ..");
        std::io::stdout().flush().ok();
    }
    let frames: Vec<Result<hdrfuse_raw::DecodedRaw, String>> =
        paths.par_iter().map(hdrfuse_raw::decode_raw).collect();

    let mut decoded = Vec::with_capacity(frames.len());
    for frame in frames {
        decoded.push(frame?);
    }
    if !silent {
        let megabytes = decoded
            .iter()
            .map(|f| f.data.len() * 2)
            .sum::<usize>() as f32
            / (1024.0 * 1024.0);
        println!(
            " done ({}x{}, using {:.1} MiB of memory)",
            decoded[0].width, decoded[0].height, megabytes
        );
    }

    let first = &decoded[0];
    let cfa = CfaPattern::from_name(&first.cfa_name)
        .map_err(|e| format!("\"{}\": {}", paths[0].display(), e))?;
    let width = first.width;
    let height = first.height;
    let blacklevel = first.blacklevel;
    let whitepoint = first.whitepoint;
    if blacklevel >= whitepoint {
        return Err(format!(
            "\"{}\": black level {} is not below the whitepoint {}",
            paths[0].display(),
            blacklevel,
            whitepoint
        ));
    }

    let mut iso: Option<f32> = None;
    let mut aperture: Option<f32> = None;
    let mut metadata: BTreeMap<String, String> = BTreeMap::new();
    let mut exposures = Vec::with_capacity(decoded.len());

    for (i, (frame, path)) in decoded.into_iter().zip(paths).enumerate() {
        if frame.width != width || frame.height != height {
            return Err(format!(
                "\"{}\": image size {}x{} differs from the first exposure ({}x{})",
                path.display(),
                frame.width,
                frame.height,
                width,
                height
            ));
        }
        if frame.cfa_name != cfa.name() {
            return Err(format!(
                "\"{}\": CFA pattern {} differs from the first exposure ({})",
                path.display(),
                frame.cfa_name,
                cfa
            ));
        }
        if frame.blacklevel != blacklevel || frame.whitepoint != whitepoint {
            return Err(format!(
                "\"{}\": black level / whitepoint ({}, {}) differ from the first exposure ({}, {})",
                path.display(),
                frame.blacklevel,
                frame.whitepoint,
                blacklevel,
                whitepoint
            ));
        }

        match (iso, frame.iso) {
            (None, value) => iso = value,
            (Some(expected), Some(value)) if value != expected => {
                return Err(format!(
                    "\"{}\": detected an ISO speed that is different from the other images!",
                    path.display()
                ));
            }
            _ => {}
        }
        match (aperture, frame.aperture) {
            (None, value) => aperture = value,
            (Some(expected), Some(value)) if value != expected => {
                return Err(format!(
                    "\"{}\": detected an aperture setting that is different from the other images!",
                    path.display()
                ));
            }
            _ => {}
        }
        if frame.manual_exposure == Some(false) {
            eprintln!(
                "Warning: image \"{}\" was *not* taken in manual exposure mode!",
                path.display()
            );
        }

        for (key, value) in &frame.metadata {
            if value.len() > MAX_METADATA_VALUE_LEN {
                continue;
            }
            match metadata.entry(key.clone()) {
                std::collections::btree_map::Entry::Vacant(entry) => {
                    entry.insert(value.clone());
                }
                std::collections::btree_map::Entry::Occupied(mut entry) => {
                    let current = entry.get_mut();
                    if current.as_str() != value {
                        current.push_str("; ");
                        current.push_str(value);
                    }
                }
            }
        }

        let exposure_time = match exptimes_override {
            Some(times) => times[i],
            None => frame.exposure_time.ok_or_else(|| {
                format!(
                    "\"{}\": could not extract the exposure time!",
                    path.display()
                )
            })?,
        };
        exposures.push(Exposure {
            filename: path.clone(),
            exposure: exposure_time,
            shown_exposure: format_exposure_time(exposure_time),
            image: frame.data,
        });
    }

    exposures.sort_by(|a, b| a.exposure.total_cmp(&b.exposure));
    if let Some(pair) = exposures.windows(2).find(|w| w[0].exposure == w[1].exposure) {
        return Err(format!(
            "Duplicate exposure time: {}",
            pair[0].shown_exposure
        ));
    }

    let saturation = match saturation_override {
        Some(saturation) => {
            if !(0.0..=1.0).contains(&saturation) || saturation == 0.0 {
                return Err(format!(
                    "Saturation threshold must be in (0, 1], got {}",
                    saturation
                ));
            }
            saturation
        }
        None => estimate_saturation(exposures.last().unwrap(), blacklevel, whitepoint),
    };

    if !silent {
        let times: Vec<&str> = exposures
            .iter()
            .map(|e| e.shown_exposure.as_str())
            .collect();
        println!(
            "Found {} image{} [ISO {}, f/{}, exposure times: {}]",
            exposures.len(),
            if exposures.len() > 1 { "s" } else { "" },
            iso.map_or("unknown".to_string(), |v| format!("{}", v)),
            aperture.map_or("unknown".to_string(), |v| format!("{}", v)),
            times.join(", ")
        );
        println!("Collected {} metadata entries.", metadata.len());
    }

    Ok(ExposureSeries {
        exposures,
        metadata,
        width,
        height,
        blacklevel,
        whitepoint,
        cfa,
        saturation,
        buffer: ImageBuffer::Empty,
    })
}

/// Estimate the saturation threshold from the brightest exposure: back
/// off a little from its maximum observed code so the knee of the sensor
/// response stays excluded.
fn estimate_saturation(brightest: &Exposure, blacklevel: u16, whitepoint: u16) -> f32 {
    let max_code = brightest.image.iter().copied().max().unwrap_or(whitepoint);
    let range = (whitepoint - blacklevel) as f32;
    let fraction = 0.98 * (max_code.saturating_sub(blacklevel)) as f32 / range;
    fraction.clamp(f32::MIN_POSITIVE, 1.0)
}

/// True when the path has a supported RAW extension.
pub fn is_raw_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(hdrfuse_raw::is_raw_extension)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pattern() {
        assert_eq!(format_pattern("img_%03i.cr2", 7).unwrap(), "img_007.cr2");
        assert_eq!(format_pattern("img_%i.cr2", 7).unwrap(), "img_7.cr2");
        assert_eq!(format_pattern("meas-%05d.nef", 42).unwrap(), "meas-00042.nef");
        assert!(format_pattern("img_%s.cr2", 0).is_err());
    }

    #[test]
    fn test_expand_inputs_passes_plain_paths_through() {
        let inputs = vec![PathBuf::from("a.cr2"), PathBuf::from("b.cr2")];
        assert_eq!(expand_inputs(&inputs).unwrap(), inputs);
    }

    #[test]
    fn test_expand_inputs_pattern() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=3 {
            std::fs::write(dir.path().join(format!("shot_{:02}.cr2", i)), b"x").unwrap();
        }
        let pattern = dir.path().join("shot_%02i.cr2");
        let expanded = expand_inputs(&[pattern]).unwrap();
        // The sequence starts at 1, which the fallback scan picks up
        assert_eq!(expanded.len(), 3);
        assert!(expanded[0].ends_with("shot_01.cr2"));
        assert!(expanded[2].ends_with("shot_03.cr2"));
    }

    #[test]
    fn test_expand_inputs_missing_pattern_is_fatal() {
        let err = expand_inputs(&[PathBuf::from("/nonexistent/img_%03i.cr2")]).unwrap_err();
        assert!(err.contains("No input found"));
    }

    #[test]
    fn test_load_series_requires_inputs() {
        let err = load_series(&[], None, None, true).unwrap_err();
        assert!(err.contains("empty"));
    }

    #[test]
    fn test_exptimes_override_length_checked() {
        let paths = vec![PathBuf::from("a.cr2"), PathBuf::from("b.cr2")];
        let err = load_series(&paths, None, Some(&[1.0]), true).unwrap_err();
        assert!(err.contains("2 input files"));
    }

    #[test]
    fn test_estimate_saturation_backs_off_from_peak() {
        let exposure = Exposure {
            filename: PathBuf::from("x.cr2"),
            exposure: 1.0,
            shown_exposure: "1".to_string(),
            image: vec![100, 500, 900],
        };
        let saturation = estimate_saturation(&exposure, 100, 1000);
        assert!((saturation - 0.98 * 800.0 / 900.0).abs() < 1e-6);
    }
}
