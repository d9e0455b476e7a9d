//! Image output writers
//!
//! OpenEXR for high-dynamic-range output (half or single precision, one
//! or three channels, EXIF metadata embedded as string attributes),
//! 8-bit PNG/JPEG with the sRGB transfer curve for quick previews, and
//! 16-bit linear TIFF for pipelines that ingest it.

use std::collections::BTreeMap;
use std::path::Path;

use rayon::prelude::*;

/// Write a lossless OpenEXR file in half or single precision.
///
/// Single-channel data is written as a luminance ("Y") image, three
/// channel data as RGB. Metadata entries become string attributes.
pub fn export_exr<P: AsRef<Path>>(
    path: P,
    width: usize,
    height: usize,
    channels: usize,
    data: &[f32],
    metadata: &BTreeMap<String, String>,
    write_half: bool,
) -> Result<(), String> {
    // Scoped so the exr prelude's own Result alias stays out of this
    // module's signatures
    use exr::prelude::*;

    let path = path.as_ref();
    if data.len() != width * height * channels {
        return Err(format!(
            "EXR export: buffer holds {} floats, expected {}x{}x{}",
            data.len(),
            width,
            height,
            channels
        ));
    }

    let mut attributes = LayerAttributes::named("merged");
    for (key, value) in metadata {
        attributes.other.insert(
            Text::from(key.as_str()),
            AttributeValue::Text(Text::from(value.as_str())),
        );
    }

    let io_error = |e: Error| format!("Failed to write {}: {}", path.display(), e);

    match (channels, write_half) {
        (3, true) => {
            let pixels = SpecificChannels::rgb(|pos: Vec2<usize>| {
                let i = (pos.y() * width + pos.x()) * 3;
                (
                    f16::from_f32(data[i]),
                    f16::from_f32(data[i + 1]),
                    f16::from_f32(data[i + 2]),
                )
            });
            let layer = Layer::new((width, height), attributes, Encoding::SMALL_LOSSLESS, pixels);
            Image::from_layer(layer)
                .write()
                .to_file(path)
                .map_err(io_error)
        }
        (3, false) => {
            let pixels = SpecificChannels::rgb(|pos: Vec2<usize>| {
                let i = (pos.y() * width + pos.x()) * 3;
                (data[i], data[i + 1], data[i + 2])
            });
            let layer = Layer::new((width, height), attributes, Encoding::SMALL_LOSSLESS, pixels);
            Image::from_layer(layer)
                .write()
                .to_file(path)
                .map_err(io_error)
        }
        (1, true) => {
            let pixels = SpecificChannels::build()
                .with_channel("Y")
                .with_pixel_fn(|pos: Vec2<usize>| (f16::from_f32(data[pos.y() * width + pos.x()]),));
            let layer = Layer::new((width, height), attributes, Encoding::SMALL_LOSSLESS, pixels);
            Image::from_layer(layer)
                .write()
                .to_file(path)
                .map_err(io_error)
        }
        (1, false) => {
            let pixels = SpecificChannels::build()
                .with_channel("Y")
                .with_pixel_fn(|pos: Vec2<usize>| (data[pos.y() * width + pos.x()],));
            let layer = Layer::new((width, height), attributes, Encoding::SMALL_LOSSLESS, pixels);
            Image::from_layer(layer)
                .write()
                .to_file(path)
                .map_err(io_error)
        }
        _ => Err(format!(
            "EXR export supports 1 or 3 channels, got {}",
            channels
        )),
    }
}

/// sRGB transfer curve for 8-bit output.
#[inline]
fn srgb_encode(value: f32) -> f32 {
    if value <= 0.0031308 {
        12.92 * value
    } else {
        1.055 * value.powf(1.0 / 2.4) - 0.055
    }
}

/// Write an 8-bit low-dynamic-range image (PNG or JPEG by extension),
/// applying the sRGB transfer curve and clamping to [0, 255].
pub fn export_ldr<P: AsRef<Path>>(
    path: P,
    width: usize,
    height: usize,
    data: &[f32],
) -> Result<(), String> {
    let path = path.as_ref();
    if data.len() != width * height * 3 {
        return Err(format!(
            "LDR export: buffer holds {} floats, expected {}x{}x3",
            data.len(),
            width,
            height
        ));
    }

    let mut bytes = vec![0u8; width * height * 3];
    bytes
        .par_chunks_mut(width * 3)
        .zip(data.par_chunks(width * 3))
        .for_each(|(out_row, in_row)| {
            for (out, &value) in out_row.iter_mut().zip(in_row) {
                let encoded = srgb_encode(value);
                *out = (encoded * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        });

    let image: image::RgbImage =
        image::ImageBuffer::from_raw(width as u32, height as u32, bytes)
            .ok_or_else(|| "LDR export: image dimensions overflow".to_string())?;
    image
        .save(path)
        .map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}

/// Write a 16-bit linear RGB TIFF (values clamped to [0, 1]).
pub fn export_tiff16<P: AsRef<Path>>(
    path: P,
    width: usize,
    height: usize,
    data: &[f32],
) -> Result<(), String> {
    use std::fs::File;
    use std::io::BufWriter;

    let path = path.as_ref();
    if data.len() != width * height * 3 {
        return Err(format!(
            "TIFF export: buffer holds {} floats, expected {}x{}x3",
            data.len(),
            width,
            height
        ));
    }

    let file =
        File::create(path).map_err(|e| format!("Failed to create {}: {}", path.display(), e))?;
    let writer = BufWriter::new(file);
    let mut encoder = tiff::encoder::TiffEncoder::new(writer)
        .map_err(|e| format!("Failed to create TIFF encoder: {}", e))?;

    let u16_data: Vec<u16> = data
        .iter()
        .map(|&v| (v.clamp(0.0, 1.0) * 65535.0).round() as u16)
        .collect();

    encoder
        .write_image::<tiff::encoder::colortype::RGB16>(width as u32, height as u32, &u16_data)
        .map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gradient(width: usize, height: usize, channels: usize) -> Vec<f32> {
        (0..width * height * channels)
            .map(|i| i as f32 / (width * height * channels) as f32)
            .collect()
    }

    // ========================================================================
    // export_exr Tests
    // ========================================================================

    #[test]
    fn test_export_exr_rgb_half() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rgb_half.exr");
        let mut metadata = BTreeMap::new();
        metadata.insert("Exif.Image.Model".to_string(), "Test Camera".to_string());

        let result = export_exr(&path, 16, 8, 3, &gradient(16, 8, 3), &metadata, true);
        assert!(result.is_ok(), "half RGB export should succeed: {:?}", result);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_export_exr_single_channel_float() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("luma.exr");

        let result = export_exr(&path, 16, 8, 1, &gradient(16, 8, 1), &BTreeMap::new(), false);
        assert!(result.is_ok(), "float Y export should succeed: {:?}", result);
        assert!(path.exists());
    }

    #[test]
    fn test_export_exr_rejects_bad_sizes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.exr");
        let result = export_exr(&path, 16, 8, 3, &[0.0; 10], &BTreeMap::new(), false);
        assert!(result.is_err());
        let result = export_exr(&path, 4, 4, 2, &[0.0; 32], &BTreeMap::new(), false);
        assert!(result.is_err(), "2-channel output is not a thing");
    }

    // ========================================================================
    // export_ldr Tests
    // ========================================================================

    #[test]
    fn test_export_ldr_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let result = export_ldr(&path, 8, 8, &gradient(8, 8, 3));
        assert!(result.is_ok(), "PNG export should succeed: {:?}", result);
        assert!(path.exists());
    }

    #[test]
    fn test_export_ldr_clamps_out_of_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clamped.png");
        let data = vec![-0.5, 2.0, 0.5, 1.0, 0.0, 7.0];
        let result = export_ldr(&path, 2, 1, &data);
        assert!(result.is_ok(), "out-of-range values must clamp: {:?}", result);
    }

    #[test]
    fn test_srgb_curve_endpoints() {
        assert_eq!(srgb_encode(0.0), 0.0);
        assert!((srgb_encode(1.0) - 1.0).abs() < 1e-6);
        // Linear segment below the knee
        assert!((srgb_encode(0.002) - 12.92 * 0.002).abs() < 1e-7);
        // Curve is monotonic across the knee
        assert!(srgb_encode(0.0031309) > srgb_encode(0.0031308));
    }

    // ========================================================================
    // export_tiff16 Tests
    // ========================================================================

    #[test]
    fn test_export_tiff16() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("linear.tiff");
        let result = export_tiff16(&path, 8, 4, &gradient(8, 4, 3));
        assert!(result.is_ok(), "TIFF export should succeed: {:?}", result);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_export_tiff16_invalid_path() {
        let result = export_tiff16("/nonexistent/dir/out.tiff", 2, 2, &[0.0; 12]);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Failed to create"));
    }
}
