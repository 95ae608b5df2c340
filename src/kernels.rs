//! Pure per-pixel stencil functions shared by the demosaicers and the diffusion
//! step.
//!
//! ```text
//!   directional high pass (taps -3..=3 along one axis or diagonal) =
//!       [ 1 -3 -1 6 -1 -3 1 ] , squared
//!
//!   low pass (RCD) =
//!       [ 0.25 0.5 0.25
//!       ; 0.5  1   0.5
//!       ; 0.25 0.5 0.25 ]
//!
//!   isotropic laplacian =
//!       [ 0.25  0.5 0.25
//!       ; 0.5  -3   0.5
//!       ; 0.25  0.5 0.25 ]
//! ```

use crate::buffer::Rgba;

/// Tolerance guarding gradient denominators.
pub const EPS: f32 = 1e-5;
/// Floor of the squared directional statistics.
pub const EPS_SQ: f32 = 1e-10;

/// Weights of the isotropic 3x3 laplacian, row-major.
pub const LAPLACIAN_3X3: [f32; 9] = [0.25, 0.5, 0.25, 0.5, -3.0, 0.5, 0.25, 0.5, 0.25];

#[inline]
pub(crate) fn sqrf(x: f32) -> f32 {
    x * x
}

/// Clamp negative input to zero and normalise.
#[inline]
pub(crate) fn safe_in(a: f32, scale: f32) -> f32 {
    a.max(0.0) * scale
}

/// `a * b + (1 - a) * c`.
#[inline]
pub(crate) fn interpolatef(a: f32, b: f32, c: f32) -> f32 {
    a * (b - c) + c
}

/// Squared colour-difference high pass over seven equally spaced taps.
#[inline]
pub(crate) fn hpf_sq(t: [f32; 7]) -> f32 {
    sqrf((t[0] - t[2] - t[4] + t[6]) - 3.0 * (t[1] + t[5]) + 6.0 * t[3])
}

/// Directional strength of the first axis, in `[0, 1]`.
///
/// `a` and `b` are the summed squared high-pass responses along each axis.
#[inline]
pub(crate) fn discrimination(a: f32, b: f32) -> f32 {
    let a = a.max(EPS_SQ);
    let b = b.max(EPS_SQ);
    a / (a + b)
}

/// Pick whichever of the central and neighbourhood discrimination is more decisive.
#[inline]
pub(crate) fn refine_disc(central: f32, neighbourhood: f32) -> f32 {
    if (0.5 - central).abs() < (0.5 - neighbourhood).abs() {
        neighbourhood
    } else {
        central
    }
}

/// Low pass of the raw mosaic around a sensel.
#[inline]
pub(crate) fn low_pass(c: f32, cardinal: [f32; 4], diagonal: [f32; 4]) -> f32 {
    c + 0.5 * cardinal.iter().sum::<f32>() + 0.25 * diagonal.iter().sum::<f32>()
}

/// Ratio-corrected estimate of a neighbouring sample.
#[inline]
pub(crate) fn ratio_estimate(neighbour: f32, lpf_c: f32, lpf_n: f32) -> f32 {
    neighbour * (lpf_c + lpf_c) / (EPS + lpf_c + lpf_n)
}

/// Blend two opposite estimates, each weighted by the other side's gradient.
#[inline]
pub(crate) fn weighted_pair(grad_a: f32, est_a: f32, grad_b: f32, est_b: f32) -> f32 {
    (grad_b * est_a + grad_a * est_b) / (grad_a + grad_b)
}

/// Clamp a signed coordinate into `0..len`.
#[inline]
pub(crate) fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Per-channel laplacian of a 3x3 neighbourhood given in row-major order.
#[inline]
pub(crate) fn laplacian(neighbours: &[Rgba; 9]) -> Rgba {
    let mut out = [0.0f32; 4];
    for (px, w) in neighbours.iter().zip(LAPLACIAN_3X3) {
        for c in 0..4 {
            out[c] += px[c] * w;
        }
    }
    out
}

/// Euclidean magnitude of the RGB part of a pixel.
#[inline]
pub(crate) fn rgb_norm(px: &Rgba) -> f32 {
    (sqrf(px[0]) + sqrf(px[1]) + sqrf(px[2])).sqrt()
}
