//! Separable image resampling
//!
//! A `Resampler` precomputes, for one axis, the first contributing
//! source index and the normalized filter taps of every output sample,
//! so the per-row work is a plain dot product. Output samples whose taps
//! stay inside the source run through a branch-free fast path; the
//! borders use clamped indexing. A 2-D resample is the X pass followed
//! by the Y pass.

use rayon::prelude::*;

use crate::models::{ExposureSeries, FilterKind, ImageBuffer};

/// Radially symmetric reconstruction filter.
pub trait ReconstructionFilter: Sync {
    /// Support radius; the filter is zero at and beyond it.
    fn radius(&self) -> f32;
    /// Evaluate at a (signed) distance from the center.
    fn eval(&self, x: f32) -> f32;
}

/// Lanczos windowed sinc.
pub struct Lanczos {
    radius: f32,
}

impl Lanczos {
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }
}

impl Default for Lanczos {
    fn default() -> Self {
        Self::new(3.0)
    }
}

impl ReconstructionFilter for Lanczos {
    fn radius(&self) -> f32 {
        self.radius
    }

    fn eval(&self, x: f32) -> f32 {
        let x = x.abs();
        if x >= self.radius {
            0.0
        } else if x < 1e-6 {
            1.0
        } else {
            let pix = std::f32::consts::PI * x;
            self.radius * pix.sin() * (pix / self.radius).sin() / (pix * pix)
        }
    }
}

/// Tent (linear interpolation) filter.
pub struct Tent {
    radius: f32,
}

impl Tent {
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }
}

impl Default for Tent {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ReconstructionFilter for Tent {
    fn radius(&self) -> f32 {
        self.radius
    }

    fn eval(&self, x: f32) -> f32 {
        (1.0 - (x / self.radius).abs()).max(0.0)
    }
}

impl FilterKind {
    /// Instantiate the filter this kind names.
    pub fn build(&self) -> Box<dyn ReconstructionFilter> {
        match self {
            FilterKind::Lanczos => Box::new(Lanczos::default()),
            FilterKind::Tent => Box::new(Tent::default()),
        }
    }
}

/// Precomputed 1-D resampling weights between two resolutions.
pub struct Resampler {
    source_res: usize,
    target_res: usize,
    taps: usize,
    start: Vec<i32>,
    weights: Vec<f32>,
    fast_start: usize,
    fast_end: usize,
}

impl Resampler {
    /// Precompute taps for resampling `source_res` samples to `target_res`.
    ///
    /// When downscaling, the filter is stretched by the scale factor so it
    /// acts as a low-pass filter.
    pub fn new(
        filter: &dyn ReconstructionFilter,
        source_res: usize,
        target_res: usize,
    ) -> Result<Self, String> {
        if source_res == 0 || target_res == 0 {
            return Err("Cannot resample to or from an empty image".to_string());
        }

        let mut filter_radius = filter.radius();
        let mut inv_scale = 1.0f32;
        if target_res < source_res {
            let scale = source_res as f32 / target_res as f32;
            inv_scale = 1.0 / scale;
            filter_radius *= scale;
        }

        let taps = (filter_radius * 2.0).floor() as usize;
        let mut start = Vec::with_capacity(target_res);
        let mut weights = vec![0.0f32; taps * target_res];
        let mut fast_start: isize = 0;
        let mut fast_end: isize = target_res as isize;

        for i in 0..target_res {
            // Output sample center in source coordinates
            let center = (i as f32 + 0.5) / target_res as f32 * source_res as f32;
            let first = (center - filter_radius + 0.5).floor() as i32;
            start.push(first);

            if first < 0 {
                fast_start = fast_start.max(i as isize + 1);
            } else if first as isize + taps as isize - 1 >= source_res as isize {
                fast_end = fast_end.min(i as isize - 1);
            }

            let mut sum = 0.0f32;
            for j in 0..taps {
                let pos = first as f32 + j as f32 + 0.5 - center;
                let weight = filter.eval(pos * inv_scale);
                weights[i * taps + j] = weight;
                sum += weight;
            }
            if sum != 0.0 {
                let normalization = 1.0 / sum;
                for j in 0..taps {
                    weights[i * taps + j] *= normalization;
                }
            }
        }

        let fast_end = fast_end.clamp(0, target_res as isize) as usize;
        let fast_start = (fast_start.max(0) as usize).min(fast_end);

        Ok(Self {
            source_res,
            target_res,
            taps,
            start,
            weights,
            fast_start,
            fast_end,
        })
    }

    #[inline]
    fn lookup(&self, source: &[f32], pos: i32, stride: usize, channel: usize) -> f32 {
        let pos = pos.clamp(0, self.source_res as i32 - 1) as usize;
        source[stride * pos + channel]
    }

    /// Resample one line of multi-channel samples.
    ///
    /// Strides are in samples (not floats), so both passes of a 2-D
    /// resample can run on the same interleaved storage.
    pub fn resample(
        &self,
        source: &[f32],
        source_stride: usize,
        target: &mut [f32],
        target_stride: usize,
        channels: usize,
    ) {
        let taps = self.taps;
        let s_stride = source_stride * channels;
        let t_stride = target_stride * channels;

        let mut emit = |i: usize, fast: bool| {
            let first = self.start[i];
            let weights = &self.weights[i * taps..][..taps];
            for ch in 0..channels {
                let mut result = 0.0f32;
                for (j, &w) in weights.iter().enumerate() {
                    let value = if fast {
                        source[s_stride * (first as usize + j) + ch]
                    } else {
                        self.lookup(source, first + j as i32, s_stride, ch)
                    };
                    result += value * w;
                }
                target[t_stride * i + ch] = result;
            }
        };

        for i in 0..self.fast_start {
            emit(i, false);
        }
        for i in self.fast_start..self.fast_end {
            emit(i, true);
        }
        for i in self.fast_end..self.target_res {
            emit(i, false);
        }
    }

    /// Compute one output row of a vertical resample.
    ///
    /// `source` is the whole image, `row_len` its row length in floats;
    /// the output row accumulates `taps` weighted source rows.
    pub fn resample_row_vertical(&self, source: &[f32], row_len: usize, i: usize, out: &mut [f32]) {
        let first = self.start[i];
        let fast = i >= self.fast_start && i < self.fast_end;
        let weights = &self.weights[i * self.taps..][..self.taps];

        out.fill(0.0);
        for (j, &w) in weights.iter().enumerate() {
            let sy = if fast {
                first as usize + j
            } else {
                (first + j as i32).clamp(0, self.source_res as i32 - 1) as usize
            };
            let src_row = &source[sy * row_len..][..row_len];
            for (o, &s) in out.iter_mut().zip(src_row) {
                *o += w * s;
            }
        }
    }
}

/// Resample an interleaved image to a new resolution, X pass then Y pass.
pub fn resample_image(
    data: &[f32],
    width: usize,
    height: usize,
    channels: usize,
    filter: &dyn ReconstructionFilter,
    target_width: usize,
    target_height: usize,
) -> Result<Vec<f32>, String> {
    let (mut current, current_width) = if target_width != width {
        let resampler = Resampler::new(filter, width, target_width)?;
        let mut resampled = vec![0.0f32; target_width * height * channels];
        resampled
            .par_chunks_mut(target_width * channels)
            .zip(data.par_chunks(width * channels))
            .for_each(|(dst_row, src_row)| {
                resampler.resample(src_row, 1, dst_row, 1, channels);
            });
        (resampled, target_width)
    } else {
        (data.to_vec(), width)
    };

    if target_height != height {
        let resampler = Resampler::new(filter, height, target_height)?;
        let row_len = current_width * channels;
        let mut resampled = vec![0.0f32; row_len * target_height];
        resampled
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(i, out_row)| {
                resampler.resample_row_vertical(&current, row_len, i, out_row);
            });
        current = resampled;
    }

    Ok(current)
}

/// Resample the series' working buffer in place.
pub fn resample(
    series: &mut ExposureSeries,
    filter: &dyn ReconstructionFilter,
    target_width: usize,
    target_height: usize,
) -> Result<(), String> {
    let channels = series.buffer.channels();
    let data = match series.buffer.data() {
        Some(data) => data,
        None => return Err("Resampling requires a merged image".to_string()),
    };

    let resampled = resample_image(
        data,
        series.width,
        series.height,
        channels,
        filter,
        target_width,
        target_height,
    )?;

    series.buffer = match series.buffer {
        ImageBuffer::Mosaic(_) => ImageBuffer::Mosaic(resampled),
        ImageBuffer::Color(_) => ImageBuffer::Color(resampled),
        ImageBuffer::Empty => unreachable!(),
    };
    series.width = target_width;
    series.height = target_height;
    Ok(())
}
