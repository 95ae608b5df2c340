//! Top-level highlight reconstruction.
//!
//! ```text
//!   mosaic --interpolate_and_mask--> [R G B norm] + clipping mask
//!          --box_mean(mask)--------> soft mask
//!          --bilinear(1 / ds)------> working image + working mask
//!          --iterations x (Rgb wavelet pass, Chroma wavelet pass)
//!          --bilinear(ds)----------> reconstructed RGB
//!          --remosaic_and_replace--> mosaic
//! ```
//!
//! The caller's output buffer is written once, at the very end. Any error
//! leaves it untouched.

use log::{debug, trace, warn};

use crate::buffer::{ClippingMask, PixelBuffer};
use crate::cfa::CfaLookup;
use crate::diffuse::{wavelets_process_with, DiffuseVariant, DiffusionParams};
use crate::interpolate::interpolate_tiled;
use crate::params::HighlightsParams;
use crate::resample::{bilinear, box_mean, remosaic_and_replace};
use crate::tile::{TileLayout, MIN_EXTENT};
use crate::wavelet::WaveletDecomposer;
use crate::{HighlightError, HlResult};

/// Radius of the box mean softening the clipping mask.
const MASK_RADIUS: usize = 2;

/// A hook polled at tile and scale boundaries.
///
/// Returning `false` aborts processing with [`HighlightError::Cancelled`].
pub trait Cancellation: Sync {
    /// Whether the result is still needed.
    fn still_wanted(&self) -> bool;
}

impl<F> Cancellation for F
where
    F: Fn() -> bool + Sync,
{
    fn still_wanted(&self) -> bool {
        self()
    }
}

/// A [`Cancellation`] that never cancels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Uncancellable;

impl Cancellation for Uncancellable {
    fn still_wanted(&self) -> bool {
        true
    }
}

/// Reconstruct clipped highlights of a Bayer mosaic.
///
/// `output` receives a mosaic of the same geometry as `input`. Sensels far from
/// any clipped sample are copied unchanged, and an image without clipped samples
/// is copied as is.
///
/// # Arguments
/// * `input` - Raw mosaic, `width * height` samples.
/// * `cfa` - Colour of each sensel.
/// * `params` - Reconstruction parameters.
/// * `output` - Destination mosaic, `width * height` samples.
///
/// # Errors
/// - [`HighlightError::InvalidParameter`] if `params` does not validate.
/// - [`HighlightError::InvalidGeometry`] if a buffer has the wrong length.
/// - [`HighlightError::TooSmallImage`] below 16 pixels along either axis.
/// - [`HighlightError::OutOfMemory`] if a working buffer cannot be allocated.
pub fn reconstruct_highlights<C>(
    input: &[f32],
    width: usize,
    height: usize,
    cfa: &C,
    params: &HighlightsParams,
    output: &mut [f32],
) -> HlResult<()>
where
    C: CfaLookup + ?Sized,
{
    reconstruct_highlights_with(input, width, height, cfa, params, output, &Uncancellable)
}

/// Reconstruct clipped highlights, polling `cancel` at every tile, scale and iteration.
///
/// # Errors
/// As [`reconstruct_highlights`], plus [`HighlightError::Cancelled`] when `cancel`
/// asks to stop. `output` is not written in that case.
pub fn reconstruct_highlights_with<C>(
    input: &[f32],
    width: usize,
    height: usize,
    cfa: &C,
    params: &HighlightsParams,
    output: &mut [f32],
    cancel: &dyn Cancellation,
) -> HlResult<()>
where
    C: CfaLookup + ?Sized,
{
    params.validate()?;
    if width == 0 || height == 0 {
        return Err(HighlightError::InvalidGeometry(format!(
            "zero-sized image {width}x{height}"
        )));
    }
    let len = width
        .checked_mul(height)
        .ok_or_else(|| HighlightError::InvalidGeometry("image too large".into()))?;
    if input.len() != len {
        return Err(HighlightError::size_mismatch("input", len, input.len()));
    }
    if output.len() != len {
        return Err(HighlightError::size_mismatch("output", len, output.len()));
    }
    if width < MIN_EXTENT || height < MIN_EXTENT {
        return Err(HighlightError::TooSmallImage {
            width,
            height,
            min: MIN_EXTENT,
        });
    }

    let wb = params.white_balance_or_unity();
    let (interpolated, mut mask) = interpolate_tiled(
        input,
        width,
        height,
        cfa,
        params.clip_thresholds,
        wb,
        TileLayout::stencil3x3(),
        cancel,
    )?;
    if !mask.any_clipped() {
        debug!("no clipped sensels in {width}x{height}, copying input");
        output.copy_from_slice(input);
        return Ok(());
    }
    box_mean(mask.buffer_mut(), MASK_RADIUS, 1)?;

    let ds_width = (width / params.downsample).max(1);
    let ds_height = (height / params.downsample).max(1);
    let scales = params.scale_count();
    debug!(
        "reconstructing {width}x{height} at {ds_width}x{ds_height}: {scales} scales, {} iterations",
        params.iterations
    );

    let ds_mask = ClippingMask::new(bilinear(mask.buffer(), ds_width, ds_height, true)?)?;
    let mut ds_image = bilinear(&interpolated, ds_width, ds_height, true)?;
    drop(interpolated);
    let mut temp = PixelBuffer::try_zeroed(ds_width, ds_height, 4)?;
    let mut decomposer = WaveletDecomposer::new(ds_width, ds_height)?;

    for i in 0..params.iterations {
        let diffusion = DiffusionParams {
            noise_level: params.working_noise_level(),
            salt: i + 1 == params.iterations,
            seed: params.seed,
            first_order_factor: params.solid_color,
            downsample: params.downsample,
        };
        wavelets_process_with(
            &ds_image,
            &mut temp,
            &ds_mask,
            &mut decomposer,
            scales,
            DiffuseVariant::Rgb,
            &diffusion,
            cancel,
        )?;
        wavelets_process_with(
            &temp,
            &mut ds_image,
            &ds_mask,
            &mut decomposer,
            scales,
            DiffuseVariant::Chroma,
            &diffusion,
            cancel,
        )?;
        trace!("iteration {}/{} done", i + 1, params.iterations);
    }
    drop(decomposer);
    drop(temp);

    let reconstructed = bilinear(&ds_image, width, height, true)?;
    if !cancel.still_wanted() {
        return Err(HighlightError::Cancelled);
    }
    remosaic_and_replace(input, &reconstructed, &mask, cfa, wb, output)
}

/// Reconstruct clipped highlights, falling back to a plain copy on failure.
///
/// Returns the error that caused the fallback, if any. The copy is skipped when
/// `output` does not have the length of `input`.
pub fn reconstruct_or_passthrough<C>(
    input: &[f32],
    width: usize,
    height: usize,
    cfa: &C,
    params: &HighlightsParams,
    output: &mut [f32],
) -> Option<HighlightError>
where
    C: CfaLookup + ?Sized,
{
    match reconstruct_highlights(input, width, height, cfa, params, output) {
        Ok(()) => None,
        Err(e) => {
            warn!("highlight reconstruction skipped: {e}");
            if output.len() == input.len() {
                output.copy_from_slice(input);
            }
            Some(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::ColorFilterArray;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clipped_mosaic(width: usize, height: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..width * height).map(|_| rng.gen_range(0.0..1.6)).collect()
    }

    #[test]
    fn closures_cancel() {
        let calls = AtomicUsize::new(0);
        let stop_after_two = || calls.fetch_add(1, Ordering::Relaxed) < 2;
        assert!(stop_after_two.still_wanted());
        assert!(stop_after_two.still_wanted());
        assert!(!stop_after_two.still_wanted());
        assert!(Uncancellable.still_wanted());
    }

    #[test]
    fn unclipped_input_is_copied() {
        let (w, h) = (40, 24);
        let mut rng = StdRng::seed_from_u64(1);
        let input: Vec<f32> = (0..w * h).map(|_| rng.gen_range(0.0..0.99)).collect();
        let mut output = vec![-1.0; w * h];
        reconstruct_highlights(
            &input,
            w,
            h,
            &ColorFilterArray::Rggb,
            &HighlightsParams::default(),
            &mut output,
        )
        .unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn output_is_finite_and_non_negative() {
        let (w, h) = (48, 36);
        let input = clipped_mosaic(w, h, 2);
        let params = HighlightsParams {
            iterations: 2,
            noise_level: 0.1,
            white_balance: [2.0, 1.0, 1.6],
            clip_thresholds: [1.2, 1.0, 1.1, 1.0],
            ..Default::default()
        };
        let mut output = vec![0.0; w * h];
        reconstruct_highlights(&input, w, h, &ColorFilterArray::Gbrg, &params, &mut output)
            .unwrap();
        assert!(output.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn cancellation_leaves_output_alone() {
        let (w, h) = (32, 32);
        let input = clipped_mosaic(w, h, 3);
        let mut output = vec![7.0; w * h];
        let res = reconstruct_highlights_with(
            &input,
            w,
            h,
            &ColorFilterArray::Rggb,
            &HighlightsParams::default(),
            &mut output,
            &|| false,
        );
        assert_eq!(res, Err(HighlightError::Cancelled));
        assert!(output.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn bad_geometry_is_reported() {
        let params = HighlightsParams::default();
        let cfa = ColorFilterArray::Rggb;
        let mut out = vec![0.0; 64];
        assert!(matches!(
            reconstruct_highlights(&[0.0; 64], 8, 8, &cfa, &params, &mut out),
            Err(HighlightError::TooSmallImage { min: 16, .. })
        ));
        assert!(matches!(
            reconstruct_highlights(&[0.0; 60], 8, 8, &cfa, &params, &mut out),
            Err(HighlightError::InvalidGeometry(_))
        ));
        assert!(matches!(
            reconstruct_highlights(&[], 0, 8, &cfa, &params, &mut []),
            Err(HighlightError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn passthrough_copies_on_error() {
        let input: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let mut out = vec![0.0; 64];
        let err = reconstruct_or_passthrough(
            &input,
            8,
            8,
            &ColorFilterArray::Rggb,
            &HighlightsParams::default(),
            &mut out,
        );
        assert!(matches!(err, Some(HighlightError::TooSmallImage { .. })));
        assert_eq!(out, input);

        let (w, h) = (20, 20);
        let input = vec![0.5; w * h];
        let mut out = vec![0.0; w * h];
        let err = reconstruct_or_passthrough(
            &input,
            w,
            h,
            &ColorFilterArray::Rggb,
            &HighlightsParams::default(),
            &mut out,
        );
        assert_eq!(err, None);
        assert_eq!(out, input);
    }
}
