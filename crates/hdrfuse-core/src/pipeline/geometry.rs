//! Geometric and intensity operators
//!
//! Brightness scaling, validated cropping, and combined rotation and
//! mirroring. Rotation and mirroring compile down to one strided copy
//! with signed per-axis steps; no intermediate buffers beyond the
//! output.

use rayon::prelude::*;

use crate::models::{ExposureSeries, ImageBuffer, RotateFlip};

/// Multiply every sample by a constant factor.
pub fn scale_brightness(series: &mut ExposureSeries, factor: f32) {
    if let Some(data) = series.buffer.data_mut() {
        data.par_chunks_mut(4096).for_each(|chunk| {
            for v in chunk {
                *v *= factor;
            }
        });
    }
}

/// Replace the image with a rectangular region of itself.
pub fn crop(
    series: &mut ExposureSeries,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
) -> Result<(), String> {
    if w == 0 || h == 0 {
        return Err("Crop rectangle must not be empty".to_string());
    }
    if x + w > series.width || y + h > series.height {
        return Err(format!(
            "Crop rectangle {},{} {}x{} exceeds the {}x{} image",
            x, y, w, h, series.width, series.height
        ));
    }

    let channels = series.buffer.channels();
    let width = series.width;
    let data = match series.buffer.data() {
        Some(data) => data,
        None => return Err("Crop requires a merged image".to_string()),
    };

    let mut cropped = vec![0.0f32; w * h * channels];
    for row in 0..h {
        let src = &data[((y + row) * width + x) * channels..][..w * channels];
        cropped[row * w * channels..][..w * channels].copy_from_slice(src);
    }

    series.buffer = match series.buffer {
        ImageBuffer::Mosaic(_) => ImageBuffer::Mosaic(cropped),
        ImageBuffer::Color(_) => ImageBuffer::Color(cropped),
        ImageBuffer::Empty => unreachable!(),
    };
    series.width = w;
    series.height = h;
    Ok(())
}

/// Apply a rotation/mirror combination to the working buffer.
pub fn rotate_flip(series: &mut ExposureSeries, transform: RotateFlip) -> Result<(), String> {
    if transform.is_identity() {
        return Ok(());
    }
    let channels = series.buffer.channels();
    let data = match series.buffer.data() {
        Some(data) => data,
        None => return Err("Rotation requires a merged image".to_string()),
    };

    let (rotated, t_width, t_height) =
        rotate_flip_buffer(data, series.width, series.height, channels, transform);

    series.buffer = match series.buffer {
        ImageBuffer::Mosaic(_) => ImageBuffer::Mosaic(rotated),
        ImageBuffer::Color(_) => ImageBuffer::Color(rotated),
        ImageBuffer::Empty => unreachable!(),
    };
    series.width = t_width;
    series.height = t_height;
    Ok(())
}

/// Single strided copy implementing all sixteen rotation/mirror cases.
pub(crate) fn rotate_flip_buffer(
    src: &[f32],
    s_width: usize,
    s_height: usize,
    channels: usize,
    transform: RotateFlip,
) -> (Vec<f32>, usize, usize) {
    let (t_width, t_height) = if transform.rotate_90 {
        (s_height, s_width)
    } else {
        (s_width, s_height)
    };

    let bypp = channels as isize;
    let src_stride = (s_width * channels) as isize;
    let dst_stride = t_width * channels;

    let mut src_row: isize = 0;
    if transform.flip_x {
        src_row += bypp * (s_width as isize - 1);
    }
    if transform.flip_y {
        src_row += src_stride * (s_height as isize - 1);
    }

    let (src_x_step, src_y_step) = if transform.rotate_90 {
        (
            if transform.flip_y { -src_stride } else { src_stride },
            if transform.flip_x { -bypp } else { bypp },
        )
    } else {
        (
            if transform.flip_x { -bypp } else { bypp },
            if transform.flip_y { -src_stride } else { src_stride },
        )
    };

    let mut dst = vec![0.0f32; src.len()];
    for y in 0..t_height {
        let mut src_pixel = src_row;
        let dst_row = &mut dst[y * dst_stride..][..dst_stride];
        for x in 0..t_width {
            let s = src_pixel as usize;
            dst_row[x * channels..][..channels].copy_from_slice(&src[s..s + channels]);
            src_pixel += src_x_step;
        }
        src_row += src_y_step;
    }

    (dst, t_width, t_height)
}
