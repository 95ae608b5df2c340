//! Moving between sensor resolution, working resolution and the mosaic.
//!
//! ```text
//!   bilinear:   x_in = j * w_in / w_out, taps at floor(x_in) and floor(x_in) + 1,
//!               both clamped to the image
//!
//!   box mean:   (2r + 1) x (2r + 1) average over the samples inside the image
//!
//!   remosaic:   out = alpha * max(rgb[c] * wb[c], 0) + (1 - alpha) * raw
//! ```

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::buffer::{ClippingMask, PixelBuffer, Rgba};
use crate::cfa::CfaLookup;
use crate::{HighlightError, HlResult};

/// Source taps and weights of one output coordinate.
#[derive(Clone, Copy, Debug)]
struct Taps {
    prev: usize,
    next: usize,
    w_prev: f32,
    w_next: f32,
}

impl Taps {
    #[inline]
    fn new(out: usize, len_out: usize, len_in: usize) -> Self {
        let x_in = out as f32 / len_out as f32 * len_in as f32;
        let prev = (x_in.floor() as usize).min(len_in - 1);
        let next = (prev + 1).min(len_in - 1);
        // at the far edge both taps fall on the same sample and the weights still sum to 1
        let w_prev = next as f32 - x_in;
        Self {
            prev,
            next,
            w_prev,
            w_next: 1.0 - w_prev,
        }
    }
}

/// Resize a 4-channel buffer with bilinear interpolation.
///
/// With `rgba == false`, the fourth channel is copied from the top-left tap
/// instead of interpolated.
///
/// # Errors
/// - [`HighlightError::InvalidGeometry`] if `src` is not 4-channel or a target dimension is zero.
/// - [`HighlightError::OutOfMemory`] if the output cannot be allocated.
pub fn bilinear(
    src: &PixelBuffer,
    width: usize,
    height: usize,
    rgba: bool,
) -> HlResult<PixelBuffer> {
    if src.channels() != 4 {
        return Err(HighlightError::InvalidGeometry(
            "bilinear resize needs 4 channels".into(),
        ));
    }
    let mut out = PixelBuffer::try_zeroed(width, height, 4)?;
    let (w_in, h_in) = (src.width(), src.height());
    let px = src.pixels();
    let cols: Vec<Taps> = (0..width).map(|j| Taps::new(j, width, w_in)).collect();

    out.for_each_row_mut(|i, row| {
        let y = Taps::new(i, height, h_in);
        let north = &px[y.prev * w_in..(y.prev + 1) * w_in];
        let south = &px[y.next * w_in..(y.next + 1) * w_in];
        for (o, x) in row.iter_mut().zip(&cols) {
            let (nw, ne, sw, se) = (north[x.prev], north[x.next], south[x.prev], south[x.next]);
            for c in 0..4 {
                o[c] = y.w_prev * (nw[c] * x.w_prev + ne[c] * x.w_next)
                    + y.w_next * (sw[c] * x.w_prev + se[c] * x.w_next);
            }
            if !rgba {
                o[3] = nw[3];
            }
        }
    });
    Ok(out)
}

/// Replace every sample of a 4-channel buffer by the mean of its
/// `(2 * radius + 1)^2` neighbourhood, `iterations` times.
///
/// Only samples inside the image are averaged, so edges are not darkened.
///
/// # Errors
/// - [`HighlightError::InvalidGeometry`] if `buf` is not 4-channel.
/// - [`HighlightError::OutOfMemory`] if the scratch buffer cannot be allocated.
pub fn box_mean(buf: &mut PixelBuffer, radius: usize, iterations: usize) -> HlResult<()> {
    if buf.channels() != 4 {
        return Err(HighlightError::InvalidGeometry(
            "box mean needs 4 channels".into(),
        ));
    }
    let (width, height) = (buf.width(), buf.height());
    let mut tmp = PixelBuffer::try_zeroed(width, height, 4)?;
    for _ in 0..iterations {
        {
            let src = buf.pixels();
            tmp.for_each_row_mut(|i, row| {
                let line = &src[i * width..(i + 1) * width];
                for (j, o) in row.iter_mut().enumerate() {
                    *o = mean(line[j.saturating_sub(radius)..(j + radius + 1).min(width)].iter());
                }
            });
        }
        {
            let src = tmp.pixels();
            buf.for_each_row_mut(|i, row| {
                let rows = i.saturating_sub(radius)..(i + radius + 1).min(height);
                for (j, o) in row.iter_mut().enumerate() {
                    *o = mean(rows.clone().map(|r| &src[r * width + j]));
                }
            });
        }
    }
    Ok(())
}

#[inline]
fn mean<'a>(samples: impl Iterator<Item = &'a Rgba>) -> Rgba {
    let mut acc = [0.0f32; 4];
    let mut n = 0.0f32;
    for s in samples {
        for c in 0..4 {
            acc[c] += s[c];
        }
        n += 1.0;
    }
    acc.map(|v| v / n)
}

/// Write the reconstructed channel of every sensel back into the mosaic.
///
/// Each output sensel blends the white-balanced reconstruction of its own CFA
/// channel with the raw input, weighted by the union opacity of `mask`. Where the
/// opacity is 0 the raw value is copied through unchanged.
///
/// # Errors
/// - [`HighlightError::InvalidGeometry`] if the buffers disagree on size.
pub fn remosaic_and_replace<C>(
    input: &[f32],
    reconstructed: &PixelBuffer,
    mask: &ClippingMask,
    cfa: &C,
    wb: [f32; 3],
    output: &mut [f32],
) -> HlResult<()>
where
    C: CfaLookup + ?Sized,
{
    let (width, height) = (reconstructed.width(), reconstructed.height());
    let len = width * height;
    if input.len() != len {
        return Err(HighlightError::size_mismatch("input", len, input.len()));
    }
    if output.len() != len {
        return Err(HighlightError::size_mismatch("output", len, output.len()));
    }
    let m = mask.buffer();
    if m.width() != width || m.height() != height || reconstructed.channels() != 4 {
        return Err(HighlightError::InvalidGeometry(
            "mask does not match the reconstruction".into(),
        ));
    }
    let rgb = reconstructed.pixels();

    let fill = |i: usize, row: &mut [f32]| {
        for (j, o) in row.iter_mut().enumerate() {
            let idx = i * width + j;
            let c = cfa.channel_at(i, j).index();
            let opacity = mask.opacity(idx);
            *o = opacity * (rgb[idx][c] * wb[c]).max(0.0) + (1.0 - opacity) * input[idx];
        }
    };

    #[cfg(feature = "rayon")]
    output
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(i, row)| fill(i, row));
    #[cfg(not(feature = "rayon"))]
    output
        .chunks_mut(width)
        .enumerate()
        .for_each(|(i, row)| fill(i, row));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::{Channel, ColorFilterArray};

    fn ramp(width: usize, height: usize) -> PixelBuffer {
        let mut buf = PixelBuffer::try_zeroed(width, height, 4).unwrap();
        for (k, px) in buf.pixels_mut().iter_mut().enumerate() {
            let (i, j) = ((k / width) as f32, (k % width) as f32);
            *px = [j, i, 1.0, i + j];
        }
        buf
    }

    #[test]
    fn bilinear_identity_size() {
        let src = ramp(7, 5);
        let out = bilinear(&src, 7, 5, true).unwrap();
        for (a, b) in out.as_slice().iter().zip(src.as_slice()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn bilinear_downsample_samples_the_grid() {
        let src = ramp(16, 12);
        let out = bilinear(&src, 4, 3, true).unwrap();
        assert_eq!((out.width(), out.height()), (4, 3));
        // output (i, j) sits exactly on source (4i, 4j)
        for i in 0..3 {
            for j in 0..4 {
                let px = out.pixel(i, j);
                assert!((px[0] - 4.0 * j as f32).abs() < 1e-5);
                assert!((px[1] - 4.0 * i as f32).abs() < 1e-5);
                assert!((px[2] - 1.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn bilinear_upsample_is_linear_inside() {
        let src = ramp(4, 4);
        let out = bilinear(&src, 8, 8, true).unwrap();
        // x_in = j / 2
        let px = out.pixel(3, 5);
        assert!((px[0] - 2.5).abs() < 1e-5);
        assert!((px[1] - 1.5).abs() < 1e-5);
        // the far edge clamps to the last sample
        let px = out.pixel(7, 7);
        assert!((px[0] - 3.0).abs() < 1e-5);
        assert!((px[1] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn bilinear_can_hold_alpha() {
        let src = ramp(4, 4);
        let out = bilinear(&src, 8, 8, false).unwrap();
        let px = out.pixel(3, 5);
        // top-left tap is source (1, 2)
        assert_eq!(px[3], 3.0);
        assert!((px[0] - 2.5).abs() < 1e-5);
    }

    #[test]
    fn box_mean_spreads_and_preserves_flat() {
        let mut buf = PixelBuffer::try_zeroed(9, 9, 4).unwrap();
        buf.pixels_mut()[4 * 9 + 4] = [25.0; 4];
        box_mean(&mut buf, 2, 1).unwrap();
        assert!((buf.pixel(4, 4)[0] - 1.0).abs() < 1e-6);
        assert!((buf.pixel(2, 6)[3] - 1.0).abs() < 1e-6);
        assert_eq!(buf.pixel(1, 4)[0], 0.0);

        let mut flat = PixelBuffer::from_vec(vec![0.5; 6 * 5 * 4], 6, 5, 4).unwrap();
        box_mean(&mut flat, 2, 2).unwrap();
        assert!(flat.as_slice().iter().all(|v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn box_mean_at_corner_counts_inside_samples() {
        let mut buf = PixelBuffer::try_zeroed(5, 5, 4).unwrap();
        buf.pixels_mut()[0] = [9.0; 4];
        box_mean(&mut buf, 2, 1).unwrap();
        // the corner window holds 3 x 3 in-image samples
        assert!((buf.pixel(0, 0)[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn remosaic_blends_by_opacity() {
        let (w, h) = (4, 4);
        let cfa = ColorFilterArray::Rggb;
        let input: Vec<f32> = (0..w * h).map(|i| i as f32 * 0.1).collect();
        let rgb = PixelBuffer::from_vec(
            (0..w * h).flat_map(|_| [1.0, 2.0, 3.0, 0.0]).collect(),
            w,
            h,
            4,
        )
        .unwrap();
        let mut m = PixelBuffer::try_zeroed(w, h, 4).unwrap();
        m.pixels_mut()[0][3] = 1.0;
        m.pixels_mut()[5][3] = 0.5;
        let mask = ClippingMask::new(m).unwrap();
        let mut out = vec![0.0; w * h];
        remosaic_and_replace(&input, &rgb, &mask, &cfa, [2.0, 1.0, 1.5], &mut out).unwrap();

        assert_eq!(cfa.channel_at(0, 0), Channel::Red);
        assert_eq!(out[0], 2.0);
        // (1, 1) is blue: 0.5 * 4.5 + 0.5 * 0.5
        assert!((out[5] - 2.5).abs() < 1e-6);
        for k in [1, 2, 3, 4, 6, 15] {
            assert_eq!(out[k], input[k]);
        }
    }

    #[test]
    fn remosaic_checks_lengths() {
        let rgb = PixelBuffer::try_zeroed(4, 4, 4).unwrap();
        let mask = ClippingMask::new(PixelBuffer::try_zeroed(4, 4, 4).unwrap()).unwrap();
        let mut out = vec![0.0; 15];
        let cfa = ColorFilterArray::Rggb;
        let res = remosaic_and_replace(&[0.0; 16], &rgb, &mask, &cfa, [1.0; 3], &mut out);
        assert!(matches!(res, Err(HighlightError::InvalidGeometry(_))));
    }
}
