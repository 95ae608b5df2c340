//! À trous B-spline wavelet decomposition.
//!
//! ```text
//!   kernel = (1 / 16) * [ 1 4 6 4 1 ]   (separable, taps 2^s pixels apart)
//!
//!   LF_s = blur_s(LF_{s-1}),  LF_{-1} = input
//!   HF_s = LF_{s-1} - LF_s
//! ```
//!
//! Only two low-frequency buffers are kept: scale `s` writes slot `s % 2` and
//! reads slot `(s - 1) % 2`. The high-frequency buffer is overwritten at every
//! scale, so it must be consumed before the next call to
//! [`WaveletDecomposer::decompose`].

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::buffer::{try_alloc_zeroed, PixelBuffer, Rgba};
use crate::kernels::clamp_index;
use crate::{HighlightError, HlResult};

/// Standard deviation of the B-spline kernel at scale 0.
pub const B_SPLINE_SIGMA: f32 = 1.055_365_1;

/// Ratio between the B-spline detail layer and the isotropic laplacian.
pub const B_SPLINE_TO_LAPLACIAN: f32 = 3.182_727_4;

/// Largest number of wavelet scales.
pub const MAX_SCALES: u32 = 12;

const KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Standard deviation of the cumulated blur after `steps` dyadic steps.
pub fn equivalent_sigma_at_step(sigma: f32, steps: u32) -> f32 {
    let mut out = sigma;
    for k in 1..=steps {
        let s = 2f32.powi(k as i32) * sigma;
        out = (out * out + s * s).sqrt();
    }
    out
}

/// Number of scales needed to cover `2^requested` pixels once the image has been
/// reduced by `zoom`.
pub fn scale_count(requested: u32, zoom: f32) -> u32 {
    let zoom = zoom.max(1.0);
    let final_radius = 2f32.powi(requested as i32) / zoom;
    let scales = final_radius.log2().ceil();
    if scales.is_nan() || scales < 1.0 {
        1
    } else {
        (scales as u32).min(MAX_SCALES)
    }
}

/// Position of a scale in the decomposition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScaleRole {
    /// The accumulator starts from this scale.
    pub first: bool,
    /// The residual is added after this scale.
    pub last: bool,
}

impl ScaleRole {
    /// Role of scale `s` out of `scales`.
    pub fn of(s: usize, scales: usize) -> Self {
        Self {
            first: s == 0,
            last: s + 1 == scales,
        }
    }
}

/// One decomposed scale, borrowed from the decomposer.
#[derive(Clone, Copy, Debug)]
pub struct WaveletScale<'a> {
    /// Scale index.
    pub s: usize,
    /// Tap spacing, `2^s`.
    pub mult: usize,
    /// Role of the scale.
    pub role: ScaleRole,
    /// Low-frequency layer.
    pub lf: &'a PixelBuffer,
    /// High-frequency layer.
    pub hf: &'a PixelBuffer,
}

/// Owner of the ping-pong low-frequency buffers and the detail buffer.
#[derive(Debug)]
pub struct WaveletDecomposer {
    lf: [PixelBuffer; 2],
    hf: PixelBuffer,
}

impl WaveletDecomposer {
    /// Allocate the buffers for a `width` x `height` 4-channel image.
    ///
    /// # Errors
    /// - [`HighlightError::OutOfMemory`] if a buffer cannot be allocated.
    /// - [`HighlightError::InvalidGeometry`] for zero-sized images.
    pub fn new(width: usize, height: usize) -> HlResult<Self> {
        Ok(Self {
            lf: [
                PixelBuffer::try_zeroed(width, height, 4)?,
                PixelBuffer::try_zeroed(width, height, 4)?,
            ],
            hf: PixelBuffer::try_zeroed(width, height, 4)?,
        })
    }

    /// Decompose scale `s` of `scales`.
    ///
    /// `input` is read at `s == 0` only, later scales start from the previous
    /// low-frequency layer. Scales must be requested in increasing order.
    ///
    /// # Errors
    /// - [`HighlightError::InvalidGeometry`] if `input` does not match the decomposer.
    /// - [`HighlightError::OutOfMemory`] if the row buffer cannot be allocated.
    pub fn decompose(
        &mut self,
        input: &PixelBuffer,
        s: usize,
        scales: usize,
    ) -> HlResult<WaveletScale<'_>> {
        let mult = 1usize << s;
        let [even, odd] = &mut self.lf;
        let (src, dst) = match (s, s % 2) {
            (0, _) => {
                if input.width() != even.width()
                    || input.height() != even.height()
                    || input.channels() != 4
                {
                    return Err(HighlightError::InvalidGeometry(format!(
                        "wavelet input {}x{}x{} does not match {}x{}x4",
                        input.width(),
                        input.height(),
                        input.channels(),
                        even.width(),
                        even.height()
                    )));
                }
                (input, even)
            }
            (_, 1) => (&*even, odd),
            _ => (&*odd, even),
        };
        blur_and_detail(src, dst, &mut self.hf, mult)?;
        Ok(WaveletScale {
            s,
            mult,
            role: ScaleRole::of(s, scales),
            lf: &self.lf[s % 2],
            hf: &self.hf,
        })
    }
}

/// Vertical taps of output row `i` into `tmp`, then horizontal taps into `lf_row`.
#[inline]
fn blur_row(
    src: &[Rgba],
    width: usize,
    height: usize,
    i: usize,
    mult: usize,
    tmp: &mut [Rgba],
    lf_row: &mut [Rgba],
) {
    let rows = [-2isize, -1, 0, 1, 2].map(|k| clamp_index(i as isize + k * mult as isize, height));
    for (j, t) in tmp.iter_mut().enumerate() {
        let mut acc = [0.0f32; 4];
        for (r, w) in rows.iter().zip(KERNEL) {
            let px = &src[r * width + j];
            for c in 0..4 {
                acc[c] += w * px[c];
            }
        }
        *t = acc;
    }
    for (j, out) in lf_row.iter_mut().enumerate() {
        let mut acc = [0.0f32; 4];
        for (k, w) in [-2isize, -1, 0, 1, 2].into_iter().zip(KERNEL) {
            let px = &tmp[clamp_index(j as isize + k * mult as isize, width)];
            for c in 0..4 {
                acc[c] += w * px[c];
            }
        }
        *out = acc;
    }
}

#[inline]
fn detail_row(src_row: &[Rgba], lf_row: &[Rgba], hf_row: &mut [Rgba]) {
    for ((h, s), l) in hf_row.iter_mut().zip(src_row).zip(lf_row) {
        for c in 0..4 {
            h[c] = s[c] - l[c];
        }
    }
}

#[cfg(feature = "rayon")]
fn blur_and_detail(
    src: &PixelBuffer,
    lf: &mut PixelBuffer,
    hf: &mut PixelBuffer,
    mult: usize,
) -> HlResult<()> {
    let (width, height) = (src.width(), src.height());
    let src_px = src.pixels();
    lf.pixels_mut()
        .par_chunks_mut(width)
        .zip(hf.pixels_mut().par_chunks_mut(width))
        .enumerate()
        .try_for_each_init(
            || try_alloc_zeroed(4 * width),
            |tmp, (i, (lf_row, hf_row))| {
                let tmp = tmp.as_mut().map_err(|e| e.clone())?;
                let tmp: &mut [Rgba] = bytemuck::cast_slice_mut(tmp.as_mut_slice());
                blur_row(src_px, width, height, i, mult, tmp, lf_row);
                detail_row(&src_px[i * width..(i + 1) * width], lf_row, hf_row);
                Ok(())
            },
        )
}

#[cfg(not(feature = "rayon"))]
fn blur_and_detail(
    src: &PixelBuffer,
    lf: &mut PixelBuffer,
    hf: &mut PixelBuffer,
    mult: usize,
) -> HlResult<()> {
    let (width, height) = (src.width(), src.height());
    let src_px = src.pixels();
    let mut tmp = try_alloc_zeroed(4 * width)?;
    for (i, (lf_row, hf_row)) in lf
        .pixels_mut()
        .chunks_mut(width)
        .zip(hf.pixels_mut().chunks_mut(width))
        .enumerate()
    {
        let tmp: &mut [Rgba] = bytemuck::cast_slice_mut(tmp.as_mut_slice());
        blur_row(src_px, width, height, i, mult, tmp, lf_row);
        detail_row(&src_px[i * width..(i + 1) * width], lf_row, hf_row);
    }
    Ok(())
}
