//! Bilinear interpolation of the mosaic with clipping detection.
//!
//! ```text
//!   green at R/B = (1 / 4) *
//!       [ 0 1 0
//!       ; 1 0 1
//!       ; 0 1 0 ];
//!
//!   R/B on a R/B column = (1 / 2) * [ 1 ; 0 ; 1 ]
//!   R/B on a R/B row    = (1 / 2) * [ 1 0 1 ]
//!   R/B elsewhere       = (1 / 4) *
//!       [ 1 0 1
//!       ; 0 0 0
//!       ; 1 0 1 ];
//! ```
//!
//! A channel is marked clipped when any sample it was interpolated from exceeds
//! the clipping threshold of that channel. The outermost pixel ring replicates
//! the centre sample into all three channels and takes its clipping state from
//! the centre alone.

use crate::buffer::{ClippingMask, PixelBuffer, Rgba};
use crate::cfa::{CfaLookup, Channel};
use crate::kernels::rgb_norm;
use crate::pipeline::{Cancellation, Uncancellable};
use crate::tile::{run_tiles, TileGrid, TileLayout};
use crate::{HighlightError, HlResult};

/// Interpolate every pixel to RGB and detect clipped channels.
///
/// Returns the white-balance-neutral 4-channel image `[R, G, B, norm]` and the
/// clipping mask (`[R, G, B, any]`, values 0 or 1).
///
/// # Arguments
/// * `input` - Raw mosaic, `width * height` samples.
/// * `clips` - Clipping thresholds for R, G, B and the norm.
/// * `wb` - White balance multipliers applied to the mosaic.
/// * `layout` - Tile layout. Any layout with a border of at least 1 gives the same result.
///
/// # Errors
/// - [`HighlightError::InvalidGeometry`] if `input` has the wrong length.
/// - [`HighlightError::TooSmallImage`] if the image cannot be tiled.
/// - [`HighlightError::OutOfMemory`] if the output buffers cannot be allocated.
pub fn interpolate_and_mask<C>(
    input: &[f32],
    width: usize,
    height: usize,
    cfa: &C,
    clips: [f32; 4],
    wb: [f32; 3],
    layout: TileLayout,
) -> HlResult<(PixelBuffer, ClippingMask)>
where
    C: CfaLookup + ?Sized,
{
    interpolate_tiled(input, width, height, cfa, clips, wb, layout, &Uncancellable)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn interpolate_tiled<C>(
    input: &[f32],
    width: usize,
    height: usize,
    cfa: &C,
    clips: [f32; 4],
    wb: [f32; 3],
    layout: TileLayout,
    cancel: &dyn Cancellation,
) -> HlResult<(PixelBuffer, ClippingMask)>
where
    C: CfaLookup + ?Sized,
{
    let len = width
        .checked_mul(height)
        .ok_or_else(|| HighlightError::InvalidGeometry("image too large".into()))?;
    if input.len() != len {
        return Err(HighlightError::size_mismatch("input", len, input.len()));
    }
    if layout.border < 1 {
        return Err(HighlightError::InvalidGeometry(
            "interpolation needs a tile border of at least 1".into(),
        ));
    }
    let grid = TileGrid::new(width, height, layout)?;
    let mut interp = PixelBuffer::try_zeroed(width, height, 4)?;
    let mut mask = PixelBuffer::try_zeroed(width, height, 4)?;
    let wb = [wb[0], wb[1], wb[2], 1.0];

    {
        let stride = interp.stride();
        let bands = grid
            .split_rows(interp.as_mut_slice(), stride)?
            .into_iter()
            .zip(grid.split_rows(mask.as_mut_slice(), stride)?)
            .collect::<Vec<_>>();

        run_tiles(
            &grid,
            bands,
            cancel,
            || Ok(()),
            |_, tile, (rgb_band, mask_band)| {
                for row in tile.valid_row_start..tile.valid_row_end {
                    let rgb_row: &mut [Rgba] = bytemuck::cast_slice_mut(rgb_band.row_mut(row));
                    let mask_row: &mut [Rgba] = bytemuck::cast_slice_mut(mask_band.row_mut(row));
                    for col in tile.valid_col_start..tile.valid_col_end {
                        let (rgb, clipped) =
                            interpolate_pixel(input, width, height, cfa, &clips, row, col);
                        for k in 0..4 {
                            rgb_row[col][k] = (rgb[k] / wb[k]).max(0.0);
                        }
                        mask_row[col] = clipped;
                    }
                }
                Ok(())
            },
        )?;
    }

    Ok((interp, ClippingMask::new(mask)?))
}

#[inline]
fn flag(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Interpolate one non-green channel at a site that lacks it.
#[inline]
fn interpolate_rb<C: CfaLookup + ?Sized>(
    cfa: &C,
    want: Channel,
    row: usize,
    col: usize,
    n: &[f32; 9],
    clip: f32,
) -> (f32, bool) {
    let [nw, north, ne, west, _, east, sw, south, se] = *n;
    if cfa.channel_at(row - 1, col) == want && cfa.channel_at(row + 1, col) == want {
        ((north + south) / 2.0, north > clip || south > clip)
    } else if cfa.channel_at(row, col - 1) == want && cfa.channel_at(row, col + 1) == want {
        ((west + east) / 2.0, west > clip || east > clip)
    } else {
        (
            (nw + ne + se + sw) / 4.0,
            nw > clip || ne > clip || sw > clip || se > clip,
        )
    }
}

fn interpolate_pixel<C: CfaLookup + ?Sized>(
    input: &[f32],
    width: usize,
    height: usize,
    cfa: &C,
    clips: &[f32; 4],
    row: usize,
    col: usize,
) -> (Rgba, Rgba) {
    let own = cfa.channel_at(row, col);
    let center = input[row * width + col];

    let ([r, g, b], [rc, gc, bc]) =
        if row == 0 || col == 0 || row == height - 1 || col == width - 1 {
            let clipped = center > clips[own.index()];
            ([center; 3], [clipped; 3])
        } else {
            let mut n = [0.0f32; 9];
            for (k, v) in n.iter_mut().enumerate() {
                *v = input[(row + k / 3 - 1) * width + col + k % 3 - 1];
            }
            let [_, north, _, west, _, east, _, south, _] = n;

            let (g, gc) = if own == Channel::Green {
                (center, center > clips[1])
            } else {
                let clip = clips[1];
                (
                    (north + south + east + west) / 4.0,
                    north > clip || south > clip || east > clip || west > clip,
                )
            };
            let (r, rc) = if own == Channel::Red {
                (center, center > clips[0])
            } else {
                interpolate_rb(cfa, Channel::Red, row, col, &n, clips[0])
            };
            let (b, bc) = if own == Channel::Blue {
                (center, center > clips[2])
            } else {
                interpolate_rb(cfa, Channel::Blue, row, col, &n, clips[2])
            };
            ([r, g, b], [rc, gc, bc])
        };

    let rgb = [r, g, b, 0.0];
    (
        [r, g, b, rgb_norm(&rgb)],
        [flag(rc), flag(gc), flag(bc), flag(rc || gc || bc)],
    )
}
