//! Border fill for the tiled demosaicer.
//!
//! The tiles leave a band of `margin` pixels along the image edge unwritten.
//! This pass fills it with a patterned-pixel-grouping estimate:
//!
//! 1. within 3 pixels of the edge, every missing channel is the mean of the
//!    in-image 3x3 samples of that colour;
//! 2. green at red and blue sites is a gradient-selected 5-tap guess, clamped
//!    to the two neighbours along the chosen axis;
//! 3. the remaining red and blue values come from colour differences against
//!    green, taken along the cardinal axes at green sites and along the
//!    smoother diagonal at red and blue sites, clamped at zero.
//!
//! Pass 3 only reads channels it never writes, so pixel order does not matter.

use crate::buffer::{PixelBuffer, Rgba};
use crate::cfa::{CfaLookup, Channel};

/// Whether (`row`, `col`) lies in the outer band of width `margin`.
#[inline]
fn in_band(row: usize, col: usize, width: usize, height: usize, margin: usize) -> bool {
    row < margin || col < margin || row + margin >= height || col + margin >= width
}

/// Fill the outer `margin` band of `out` from the raw mosaic `input`.
///
/// Pixels inside the band are overwritten, pixels outside are only read.
pub(crate) fn ppg_border<C>(out: &mut PixelBuffer, input: &[f32], cfa: &C, margin: usize)
where
    C: CfaLookup + ?Sized,
{
    let (width, height) = (out.width(), out.height());
    let raw = |row: usize, col: usize| input[row * width + col].max(0.0);
    let px = out.pixels_mut();

    // 1: 3x3 means near the edge.
    for row in 0..height {
        for col in 0..width {
            if !in_band(row, col, width, height, 3) {
                continue;
            }
            let mut sum = [0.0f32; 3];
            let mut count = [0.0f32; 3];
            for y in row.saturating_sub(1)..(row + 2).min(height) {
                for x in col.saturating_sub(1)..(col + 2).min(width) {
                    let f = cfa.channel_at(y, x).index();
                    sum[f] += raw(y, x);
                    count[f] += 1.0;
                }
            }
            let own = cfa.channel_at(row, col).index();
            let p = &mut px[row * width + col];
            for c in 0..3 {
                p[c] = if c != own && count[c] > 0.0 {
                    sum[c] / count[c]
                } else {
                    raw(row, col)
                };
            }
        }
    }

    // 2: green at red and blue sites.
    if width > 6 && height > 6 {
        for row in 3..height - 3 {
            for col in 3..width - 3 {
                if !in_band(row, col, width, height, margin) {
                    continue;
                }
                let own = cfa.channel_at(row, col);
                let pc = raw(row, col);
                let p = &mut px[row * width + col];
                p[own.index()] = pc;
                p[3] = 0.0;
                if own == Channel::Green {
                    continue;
                }
                let [pym, pym2, pym3] = [1, 2, 3].map(|k| raw(row - k, col));
                let [py_m, py_m2, py_m3] = [1, 2, 3].map(|k| raw(row + k, col));
                let [pxm, pxm2, pxm3] = [1, 2, 3].map(|k| raw(row, col - k));
                let [px_m, px_m2, px_m3] = [1, 2, 3].map(|k| raw(row, col + k));

                let guessx = (pxm + pc + px_m) * 2.0 - px_m2 - pxm2;
                let diffx = ((pxm2 - pc).abs() + (px_m2 - pc).abs() + (pxm - px_m).abs()) * 3.0
                    + ((px_m3 - px_m).abs() + (pxm3 - pxm).abs()) * 2.0;
                let guessy = (pym + pc + py_m) * 2.0 - py_m2 - pym2;
                let diffy = ((pym2 - pc).abs() + (py_m2 - pc).abs() + (pym - py_m).abs()) * 3.0
                    + ((py_m3 - py_m).abs() + (pym3 - pym).abs()) * 2.0;

                p[1] = if diffx > diffy {
                    (guessy * 0.25).min(pym.max(py_m)).max(pym.min(py_m))
                } else {
                    (guessx * 0.25).min(pxm.max(px_m)).max(pxm.min(px_m))
                };
            }
        }
    }

    // 3: red and blue from colour differences.
    for row in 1..height - 1 {
        for col in 1..width - 1 {
            if !in_band(row, col, width, height, margin) {
                continue;
            }
            let at = |dy: isize, dx: isize| -> Rgba {
                px[(row as isize + dy) as usize * width + (col as isize + dx) as usize]
            };
            let mut color = at(0, 0);
            match cfa.channel_at(row, col) {
                Channel::Green => {
                    let (nt, nb, nl, nr) = (at(-1, 0), at(1, 0), at(0, -1), at(0, 1));
                    // the colour sharing this row is interpolated horizontally
                    let (h, v) = if cfa.channel_at(row, col + 1) == Channel::Red {
                        (0, 2)
                    } else {
                        (2, 0)
                    };
                    color[v] = ((nt[v] + nb[v] + 2.0 * color[1] - nt[1] - nb[1]) * 0.5).max(0.0);
                    color[h] = ((nl[h] + nr[h] + 2.0 * color[1] - nl[1] - nr[1]) * 0.5).max(0.0);
                }
                own => {
                    let c = own.opposite().index();
                    let (ntl, ntr, nbl, nbr) = (at(-1, -1), at(-1, 1), at(1, -1), at(1, 1));
                    let diff1 = (ntl[c] - nbr[c]).abs()
                        + (ntl[1] - color[1]).abs()
                        + (nbr[1] - color[1]).abs();
                    let guess1 = ntl[c] + nbr[c] + 2.0 * color[1] - ntl[1] - nbr[1];
                    let diff2 = (ntr[c] - nbl[c]).abs()
                        + (ntr[1] - color[1]).abs()
                        + (nbl[1] - color[1]).abs();
                    let guess2 = ntr[c] + nbl[c] + 2.0 * color[1] - ntr[1] - nbl[1];
                    color[c] = if diff1 > diff2 {
                        guess2 * 0.5
                    } else if diff1 < diff2 {
                        guess1 * 0.5
                    } else {
                        (guess1 + guess2) * 0.25
                    }
                    .max(0.0);
                }
            }
            px[row * width + col] = color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::ColorFilterArray;

    fn planes(width: usize, height: usize, cfa: ColorFilterArray, v: [f32; 3]) -> Vec<f32> {
        (0..width * height)
            .map(|i| v[cfa.channel_at(i / width, i % width).index()])
            .collect()
    }

    #[test]
    fn flat_planes_fill_whole_small_image() {
        let (w, h) = (16, 17);
        let v = [0.3f32, 0.6, 0.45];
        for cfa in [ColorFilterArray::Rggb, ColorFilterArray::Gbrg] {
            let input = planes(w, h, cfa, v);
            let mut out = PixelBuffer::try_zeroed(w, h, 4).unwrap();
            ppg_border(&mut out, &input, &cfa, 9);
            for (i, p) in out.pixels().iter().enumerate() {
                for c in 0..3 {
                    assert!((p[c] - v[c]).abs() < 1e-5, "pixel {i} channel {c}: {}", p[c]);
                }
                assert_eq!(p[3], 0.0);
            }
        }
    }

    #[test]
    fn interior_is_left_alone() {
        let (w, h) = (40, 40);
        let cfa = ColorFilterArray::Rggb;
        let input = planes(w, h, cfa, [0.3, 0.6, 0.45]);
        let mut out = PixelBuffer::try_zeroed(w, h, 4).unwrap();
        for p in out.pixels_mut() {
            *p = [0.3, 0.6, 0.45, 0.0];
        }
        out.pixels_mut()[20 * w + 20] = [9.0; 4];
        ppg_border(&mut out, &input, &cfa, 7);
        assert_eq!(out.pixel(20, 20), [9.0; 4]);
        let p = out.pixel(0, 0);
        assert!((p[2] - 0.45).abs() < 1e-6);
    }

    #[test]
    fn negative_input_is_clamped() {
        let (w, h) = (16, 16);
        let input = vec![-1.0f32; w * h];
        let mut out = PixelBuffer::try_zeroed(w, h, 4).unwrap();
        ppg_border(&mut out, &input, &ColorFilterArray::Bggr, 9);
        assert!(out.as_slice().iter().all(|&v| v == 0.0));
    }
}
