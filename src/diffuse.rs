//! Per-scale reconstruction of clipped detail.
//!
//! Two variants run over the same wavelet decomposition:
//!
//! - [`DiffuseVariant::Rgb`] replaces the detail of clipped channels by a local
//!   linear fit against the channel with the strongest local detail, then splits
//!   the result into RGB ratios and their norm.
//! - [`DiffuseVariant::Chroma`] runs one step of isotropic heat diffusion on the
//!   ratios, leaves the norm alone, and recombines ratios and norm.
//!
//! Both read a 3x3 neighbourhood of the detail layer with taps `mult` pixels
//! apart, clamped at the image edges:
//!
//! ```text
//!   (i - m, j - m)  (i - m, j)  (i - m, j + m)
//!   (i    , j - m)  (i    , j)  (i    , j + m)
//!   (i + m, j - m)  (i + m, j)  (i + m, j + m)
//! ```

use log::trace;

use crate::buffer::{ClippingMask, PixelBuffer, Rgba};
use crate::kernels::{clamp_index, laplacian, rgb_norm, sqrf};
use crate::noise;
use crate::pipeline::{Cancellation, Uncancellable};
use crate::wavelet::{
    equivalent_sigma_at_step, ScaleRole, WaveletDecomposer, WaveletScale, B_SPLINE_SIGMA,
    B_SPLINE_TO_LAPLACIAN,
};
use crate::{HighlightError, HlResult};

/// Diffusion variant applied to every scale of one wavelet pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffuseVariant {
    /// Guided laplacians on RGB, output as ratios and norm.
    Rgb,
    /// Heat diffusion on ratios, output as RGB.
    Chroma,
}

type DiffuseFn = fn(&WaveletScale<'_>, &ClippingMask, &mut PixelBuffer, &DiffusionParams, f32);

impl DiffuseVariant {
    fn kernel(self) -> DiffuseFn {
        match self {
            DiffuseVariant::Rgb => guide_laplacians,
            DiffuseVariant::Chroma => heat_diffusion,
        }
    }
}

/// Settings shared by all scales of one wavelet pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiffusionParams {
    /// Relative noise strength, already divided by the zoom factor.
    pub noise_level: f32,
    /// Inject noise at the last scale.
    pub salt: bool,
    /// Noise seed.
    pub seed: u64,
    /// First-order damping of the heat diffusion.
    pub first_order_factor: f32,
    /// Downsampling factor of the working image, used to size the scale radius.
    pub downsample: usize,
}

impl Default for DiffusionParams {
    fn default() -> Self {
        Self {
            noise_level: 0.0,
            salt: false,
            seed: 0,
            first_order_factor: 0.0,
            downsample: 1,
        }
    }
}

/// Decompose `input` into `scales` wavelet scales and diffuse each of them into
/// `reconstructed`.
///
/// `reconstructed` is fully overwritten. `input`, `reconstructed` and `mask`
/// must share the geometry of `decomposer`.
///
/// # Errors
/// - [`HighlightError::InvalidGeometry`] on mismatched buffers or `scales == 0`.
/// - [`HighlightError::OutOfMemory`] if a row buffer cannot be allocated.
pub fn wavelets_process(
    input: &PixelBuffer,
    reconstructed: &mut PixelBuffer,
    mask: &ClippingMask,
    decomposer: &mut WaveletDecomposer,
    scales: usize,
    variant: DiffuseVariant,
    params: &DiffusionParams,
) -> HlResult<()> {
    wavelets_process_with(
        input,
        reconstructed,
        mask,
        decomposer,
        scales,
        variant,
        params,
        &Uncancellable,
    )
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn wavelets_process_with(
    input: &PixelBuffer,
    reconstructed: &mut PixelBuffer,
    mask: &ClippingMask,
    decomposer: &mut WaveletDecomposer,
    scales: usize,
    variant: DiffuseVariant,
    params: &DiffusionParams,
    cancel: &dyn Cancellation,
) -> HlResult<()> {
    if scales == 0 {
        return Err(HighlightError::InvalidGeometry(
            "at least one wavelet scale is needed".into(),
        ));
    }
    let m = mask.buffer();
    if reconstructed.width() != input.width()
        || reconstructed.height() != input.height()
        || reconstructed.channels() != 4
        || m.width() != input.width()
        || m.height() != input.height()
    {
        return Err(HighlightError::InvalidGeometry(format!(
            "diffusion buffers do not match the {}x{} input",
            input.width(),
            input.height()
        )));
    }

    let diffuse = variant.kernel();
    for s in 0..scales {
        if !cancel.still_wanted() {
            return Err(HighlightError::Cancelled);
        }
        let scale = decomposer.decompose(input, s, scales)?;
        let radius_sq = sqrf(equivalent_sigma_at_step(
            B_SPLINE_SIGMA,
            (s * params.downsample) as u32,
        ));
        trace!("{variant:?} scale {s}/{scales}: mult {}, radius^2 {radius_sq}", scale.mult);
        diffuse(&scale, mask, reconstructed, params, radius_sq);
    }
    Ok(())
}

/// Gather the 3x3 neighbourhood of (`i`, `j`) with taps `mult` apart.
#[inline]
fn neighbourhood(
    px: &[Rgba],
    width: usize,
    height: usize,
    i: usize,
    j: usize,
    mult: usize,
) -> [Rgba; 9] {
    let m = mult as isize;
    let rows = [-m, 0, m].map(|d| clamp_index(i as isize + d, height) * width);
    let cols = [-m, 0, m].map(|d| clamp_index(j as isize + d, width));
    let mut out = [[0.0f32; 4]; 9];
    for (k, o) in out.iter_mut().enumerate() {
        *o = px[rows[k / 3] + cols[k % 3]];
    }
    out
}

/// Start, continue or finish the running sum of scales.
#[inline]
fn accumulate(out: &mut Rgba, hf: &Rgba, lf: &Rgba, role: ScaleRole) {
    for c in 0..4 {
        if role.first {
            out[c] = hf[c];
        } else {
            out[c] += hf[c];
        }
        if role.last {
            out[c] = (out[c] + lf[c]).max(0.0);
        }
    }
}

/// Linear fit of every channel against the guide, blended in by the channel opacity.
pub(crate) fn guided_detail(
    n: &[Rgba; 9],
    hf: &Rgba,
    alpha: &Rgba,
    scale_multiplier: f32,
) -> Rgba {
    let mut mean = [0.0f32; 4];
    for px in n {
        for c in 0..4 {
            mean[c] += px[c] / 9.0;
        }
    }
    let mut variance = [0.0f32; 4];
    for px in n {
        for c in 0..4 {
            variance[c] += sqrf(px[c] - mean[c]) / 9.0;
        }
    }

    // first channel of largest variance, alpha if all of them are flat
    let mut guide = 3;
    let mut best = 0.0f32;
    for (c, &v) in variance.iter().take(3).enumerate() {
        if v > best {
            best = v;
            guide = c;
        }
    }

    let mut covariance = [0.0f32; 4];
    for px in n {
        for c in 0..4 {
            covariance[c] += (px[c] - mean[c]) * (px[guide] - mean[guide]) / 9.0;
        }
    }

    let mut out = *hf;
    for c in 0..4 {
        // NaN from a flat guide collapses to 0
        let a = (covariance[c] / variance[guide]).max(0.0);
        let b = mean[c] - a * mean[guide];
        let w = alpha[c] * scale_multiplier;
        out[c] = w * (a * hf[guide] + b) + (1.0 - w) * hf[c];
    }
    out
}

/// Guided laplacians on RGB detail.
///
/// At the last scale, optional noise is folded in and the pixel is split into
/// `[R / norm, G / norm, B / norm, norm]`.
fn guide_laplacians(
    scale: &WaveletScale<'_>,
    mask: &ClippingMask,
    out: &mut PixelBuffer,
    params: &DiffusionParams,
    radius_sq: f32,
) {
    let (width, height) = (out.width(), out.height());
    let hf = scale.hf.pixels();
    let lf = scale.lf.pixels();
    let alpha_px = mask.buffer().pixels();
    let scale_multiplier = 1.0 / radius_sq;
    let salt = params.salt && params.noise_level > 0.0;

    out.for_each_row_mut(|i, row| {
        for (j, o) in row.iter_mut().enumerate() {
            let idx = i * width + j;
            let alpha = alpha_px[idx];
            let mut detail = hf[idx];
            if alpha[3] > 0.0 {
                let n = neighbourhood(hf, width, height, i, j, scale.mult);
                detail = guided_detail(&n, &detail, &alpha, scale_multiplier);
            }
            accumulate(o, &detail, &lf[idx], scale.role);

            if scale.role.last {
                if salt && alpha[3] > 0.0 {
                    noise::brighten(o, alpha[3], params.noise_level, i, j, params.seed);
                }
                let norm = rgb_norm(o).max(1e-6);
                for v in o.iter_mut() {
                    *v /= norm;
                }
                o[3] = norm;
            }
        }
    });
}

/// Isotropic heat diffusion of the ratio detail, norm untouched.
///
/// At the last scale, ratios are renormalised where clipped and multiplied
/// back by the norm.
fn heat_diffusion(
    scale: &WaveletScale<'_>,
    mask: &ClippingMask,
    out: &mut PixelBuffer,
    params: &DiffusionParams,
    _radius_sq: f32,
) {
    let (width, height) = (out.width(), out.height());
    let hf = scale.hf.pixels();
    let lf = scale.lf.pixels();
    let alpha_px = mask.buffer().pixels();
    let k = 1.0 / B_SPLINE_TO_LAPLACIAN;
    let first_order = params.first_order_factor;

    out.for_each_row_mut(|i, row| {
        for (j, o) in row.iter_mut().enumerate() {
            let idx = i * width + j;
            let alpha = alpha_px[idx];
            let mut detail = hf[idx];
            if alpha[3] > 0.0 {
                let n = neighbourhood(hf, width, height, i, j, scale.mult);
                let lap = laplacian(&n);
                for c in 0..3 {
                    detail[c] += alpha[c] * k * (lap[c] - first_order * detail[c]);
                }
            }
            accumulate(o, &detail, &lf[idx], scale.role);

            if scale.role.last {
                if alpha[3] > 0.0 {
                    let norm = rgb_norm(o);
                    if norm > 1e-4 {
                        for v in o.iter_mut().take(3) {
                            *v /= norm;
                        }
                    }
                }
                let n = o[3];
                for v in o.iter_mut().take(3) {
                    *v *= n;
                }
            }
        }
    });
}
