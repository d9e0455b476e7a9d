//! RAW file decoding using rawler
//!
//! This crate isolates the rawler dependency so the processing pipeline
//! does not rebuild when decoder support changes. It hands out the
//! undecoded 16-bit Bayer plane together with the calibration data the
//! merger needs; anything rawler cannot express as such (subsampled
//! planes, non-CFA sensors, float data) is rejected here with a precise
//! reason.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rawler::decoders::RawDecodeParams;
use rawler::RawFile;
use rawler::RawImageData;

/// Decoded RAW frame at the active sensor area.
#[derive(Debug, Clone)]
pub struct DecodedRaw {
    /// Image width in pixels
    pub width: usize,

    /// Image height in pixels
    pub height: usize,

    /// 16-bit sensor plane, row-major
    pub data: Vec<u16>,

    /// Sensor code for zero light
    pub blacklevel: u16,

    /// Sensor code at full scale
    pub whitepoint: u16,

    /// Row-major 2x2 Bayer pattern name ("RGGB", "BGGR", "GRBG", "GBRG")
    pub cfa_name: String,

    /// Shutter time in seconds, if the file carries one
    pub exposure_time: Option<f32>,

    /// ISO sensitivity
    pub iso: Option<f32>,

    /// Aperture f-number
    pub aperture: Option<f32>,

    /// Whether the frame was taken in manual exposure mode (EXIF
    /// exposure program), if recorded
    pub manual_exposure: Option<bool>,

    /// Selected EXIF entries as strings, passed through to the output
    pub metadata: BTreeMap<String, String>,
}

/// List of supported RAW file extensions
pub const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "nrw", "arw", "raf", "rw2", "orf", "pef", "dng", "3fr", "fff", "iiq",
    "rwl", "raw",
];

/// Check if a file extension is a supported RAW format
pub fn is_raw_extension(ext: &str) -> bool {
    RAW_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// Decode a single RAW file.
pub fn decode_raw<P: AsRef<Path>>(path: P) -> Result<DecodedRaw, String> {
    let path = path.as_ref();

    let file = File::open(path)
        .map_err(|e| format!("\"{}\": could not open RAW file: {}", path.display(), e))?;
    let mut source = RawFile::from(BufReader::new(file));
    let decoder = rawler::get_decoder(&mut source)
        .map_err(|e| format!("\"{}\": unsupported RAW file: {:?}", path.display(), e))?;
    let params = RawDecodeParams { image_index: 0 };

    let raw = decoder
        .raw_image(&mut source, params.clone(), false)
        .map_err(|e| format!("\"{}\": failed to decode RAW data: {:?}", path.display(), e))?;
    let metadata = decoder
        .raw_metadata(&mut source, params)
        .map_err(|e| format!("\"{}\": failed to read metadata: {:?}", path.display(), e))?;

    if raw.cpp != 1 {
        return Err(format!(
            "\"{}\": only single-component CFA sensors are supported (got {} components per pixel)",
            path.display(),
            raw.cpp
        ));
    }
    let cfa_name = bayer_name(&raw.camera.cfa)
        .ok_or_else(|| format!("\"{}\": sensor does not use a 2x2 Bayer CFA", path.display()))?;

    let data = match raw.data {
        RawImageData::Integer(data) => data,
        RawImageData::Float(_) => {
            return Err(format!(
                "\"{}\": only RAW data in 16-bit integer format is supported",
                path.display()
            ))
        }
    };
    if data.len() != raw.width * raw.height {
        return Err(format!(
            "\"{}\": unexpected sensor plane size {} for {}x{} image",
            path.display(),
            data.len(),
            raw.width,
            raw.height
        ));
    }

    let blacklevel = raw.blacklevel.levels[0].as_f32() as u16;
    let whitepoint = raw.whitelevel.0[0].min(u16::MAX as u32) as u16;

    let exif = &metadata.exif;
    let exposure_time = exif
        .exposure_time
        .as_ref()
        .and_then(|r| rational(r.n, r.d));
    let aperture = exif.fnumber.as_ref().and_then(|r| rational(r.n, r.d));
    let iso = exif.iso_speed_ratings.map(|v| v as f32);
    // EXIF exposure program 1 is manual
    let manual_exposure = exif.exposure_program.map(|p| p == 1);

    let mut entries = BTreeMap::new();
    entries.insert("Exif.Image.Make".to_string(), metadata.make.clone());
    entries.insert("Exif.Image.Model".to_string(), metadata.model.clone());
    if let Some(iso) = iso {
        entries.insert("Exif.Photo.ISOSpeedRatings".to_string(), format!("{}", iso));
    }
    if let Some(time) = exposure_time {
        entries.insert("Exif.Photo.ExposureTime".to_string(), format!("{}", time));
    }
    if let Some(aperture) = aperture {
        entries.insert("Exif.Photo.FNumber".to_string(), format!("{}", aperture));
    }
    if let Some(ref lens) = exif.lens_model {
        entries.insert("Exif.Photo.LensModel".to_string(), lens.clone());
    }

    Ok(DecodedRaw {
        width: raw.width,
        height: raw.height,
        data,
        blacklevel,
        whitepoint,
        cfa_name,
        exposure_time,
        iso,
        aperture,
        manual_exposure,
        metadata: entries,
    })
}

fn rational(n: u32, d: u32) -> Option<f32> {
    if d == 0 {
        None
    } else {
        Some(n as f32 / d as f32)
    }
}

/// Name a 2x2 Bayer pattern from rawler's CFA table, or None for
/// anything that is not plain Bayer.
fn bayer_name(cfa: &rawler::CFA) -> Option<String> {
    if cfa.width != 2 || cfa.height != 2 {
        return None;
    }
    let mut name = String::with_capacity(4);
    for row in 0..2 {
        for col in 0..2 {
            name.push(match cfa.color_at(row, col) {
                0 => 'R',
                1 => 'G',
                2 => 'B',
                _ => return None,
            });
        }
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_raw_extension() {
        assert!(is_raw_extension("cr2"));
        assert!(is_raw_extension("CR2"));
        assert!(is_raw_extension("nef"));
        assert!(is_raw_extension("dng"));
        assert!(!is_raw_extension("tiff"));
        assert!(!is_raw_extension("png"));
        assert!(!is_raw_extension("jpg"));
    }

    #[test]
    fn test_bayer_name() {
        let cfa = rawler::CFA::new("RGGB");
        assert_eq!(bayer_name(&cfa).as_deref(), Some("RGGB"));
        let cfa = rawler::CFA::new("BGGR");
        assert_eq!(bayer_name(&cfa).as_deref(), Some("BGGR"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = decode_raw("/nonexistent/file.cr2");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("could not open RAW file"));
    }
}
