//! Ratio Corrected Demosaicing, processed in overlapping tiles.
//!
//! ```text
//!   step 0   load the tile, clamp negatives, normalise by the white point
//!   step 1   V/H discrimination from squared colour-difference high passes
//!   step 2   low pass filter at red and blue sites
//!   step 3   green at red and blue sites, ratio corrected V/H estimates
//!   step 4   P/Q diagonal discrimination, red at blue and blue at red sites
//!   step 4.3 red and blue at green sites
//! ```
//!
//! Each tile owns its scratch planes, which are cleared before the tile is
//! loaded so partially filled edge tiles never see data from a previous tile.
//!
//! A sample depends on the mosaic up to 10 pixels away: 3 for the high passes,
//! 1 each for the V/H and diagonal refinements, 2 for the green neighbours of
//! step 4.2 and 3 for the colour differences of step 4.3. With a border of at
//! least `RCD_MIN_BORDER` the tiled result equals a single-tile run.

use log::debug;

use crate::buffer::{try_alloc_zeroed, PixelBuffer, Rgba};
use crate::cfa::CfaLookup;
use crate::demosaic::ppg_border::ppg_border;
use crate::kernels::{
    discrimination, hpf_sq, interpolatef, low_pass, ratio_estimate, refine_disc, safe_in,
    weighted_pair, EPS,
};
use crate::params::RcdParams;
use crate::pipeline::{Cancellation, Uncancellable};
use crate::tile::{run_tiles, RowBand, Tile, TileGrid, MIN_EXTENT};
use crate::{HighlightError, HlResult};

/// Smallest tile border for which tiles stitch exactly.
pub(crate) const RCD_MIN_BORDER: usize = 10;

/// Squared high pass over seven taps spaced `$step` apart around `$i`.
macro_rules! hpf_at {
    ($buf:expr, $i:expr, $step:expr) => {{
        let (i, s) = ($i, $step);
        hpf_sq([
            $buf[i - 3 * s],
            $buf[i - 2 * s],
            $buf[i - s],
            $buf[i],
            $buf[i + s],
            $buf[i + 2 * s],
            $buf[i + 3 * s],
        ])
    }};
}

/// Mean of the four diagonal neighbours of `$i` in a plane of stride `$w`.
macro_rules! diag_mean {
    ($buf:expr, $i:expr, $w:expr) => {{
        let (i, w) = ($i, $w);
        0.25 * ($buf[i - w - 1] + $buf[i - w + 1] + $buf[i + w - 1] + $buf[i + w + 1])
    }};
}

/// Demosaic a Bayer mosaic with RCD.
///
/// Returns a 4-channel buffer `[R, G, B, 0]` scaled like the input.
///
/// # Errors
/// - [`HighlightError::InvalidGeometry`] if `input` has the wrong length.
/// - [`HighlightError::InvalidParameter`] if `params` does not validate.
/// - [`HighlightError::TooSmallImage`] if either side is below 16 pixels.
/// - [`HighlightError::OutOfMemory`] if a buffer cannot be allocated.
pub fn demosaic_rcd<C>(
    input: &[f32],
    width: usize,
    height: usize,
    cfa: &C,
    params: &RcdParams,
) -> HlResult<PixelBuffer>
where
    C: CfaLookup + ?Sized,
{
    demosaic_rcd_with(input, width, height, cfa, params, &Uncancellable)
}

/// Demosaic a Bayer mosaic with RCD, polling `cancel` before each tile.
///
/// # Errors
/// As [`demosaic_rcd`], plus [`HighlightError::Cancelled`].
pub fn demosaic_rcd_with<C>(
    input: &[f32],
    width: usize,
    height: usize,
    cfa: &C,
    params: &RcdParams,
    cancel: &dyn Cancellation,
) -> HlResult<PixelBuffer>
where
    C: CfaLookup + ?Sized,
{
    params.validate()?;
    let len = width
        .checked_mul(height)
        .ok_or_else(|| HighlightError::InvalidGeometry("image too large".into()))?;
    if input.len() != len {
        return Err(HighlightError::size_mismatch("input", len, input.len()));
    }
    if width < MIN_EXTENT || height < MIN_EXTENT {
        return Err(HighlightError::TooSmallImage {
            width,
            height,
            min: MIN_EXTENT,
        });
    }

    let layout = params.layout;
    let mut out = PixelBuffer::try_zeroed(width, height, 4)?;

    if width <= 2 * layout.border || height <= 2 * layout.border {
        debug!("rcd: {width}x{height} below two borders, border pass only");
        ppg_border(&mut out, input, cfa, layout.border);
        return Ok(out);
    }

    let grid = TileGrid::new(width, height, layout)?;
    debug!(
        "rcd: {width}x{height} in {}x{} tiles of {}",
        grid.num_vertical(),
        grid.num_horizontal(),
        layout.size
    );
    {
        let stride = out.stride();
        let bands = grid.split_rows(out.as_mut_slice(), stride)?;
        let scaler = params.white_point;
        run_tiles(
            &grid,
            bands,
            cancel,
            || RcdScratch::try_new(layout.size),
            |scratch, tile, band| {
                scratch.clear();
                scratch.load(input, width, cfa, tile, 1.0 / scaler);
                scratch.directions(cfa, tile);
                scratch.green(cfa, tile);
                scratch.red_blue(cfa, tile);
                scratch.store(tile, scaler, band);
                Ok(())
            },
        )?;
    }
    ppg_border(&mut out, input, cfa, layout.margin);
    Ok(out)
}

/// Per-tile working planes, `size * size` each, indexed `row * size + col`.
struct RcdScratch {
    size: usize,
    cfa: Vec<f32>,
    rgb: [Vec<f32>; 3],
    vh_dir: Vec<f32>,
    pq_dir: Vec<f32>,
    lpf: Vec<f32>,
    v_hpf: Vec<f32>,
    h_hpf: Vec<f32>,
    p_hpf: Vec<f32>,
    q_hpf: Vec<f32>,
}

impl RcdScratch {
    fn try_new(size: usize) -> HlResult<Self> {
        let n = size * size;
        Ok(Self {
            size,
            cfa: try_alloc_zeroed(n)?,
            rgb: [
                try_alloc_zeroed(n)?,
                try_alloc_zeroed(n)?,
                try_alloc_zeroed(n)?,
            ],
            vh_dir: try_alloc_zeroed(n)?,
            pq_dir: try_alloc_zeroed(n)?,
            lpf: try_alloc_zeroed(n)?,
            v_hpf: try_alloc_zeroed(n)?,
            h_hpf: try_alloc_zeroed(n)?,
            p_hpf: try_alloc_zeroed(n)?,
            q_hpf: try_alloc_zeroed(n)?,
        })
    }

    fn clear(&mut self) {
        let [r, g, b] = &mut self.rgb;
        for plane in [
            &mut self.cfa,
            r,
            g,
            b,
            &mut self.vh_dir,
            &mut self.pq_dir,
            &mut self.lpf,
            &mut self.v_hpf,
            &mut self.h_hpf,
            &mut self.p_hpf,
            &mut self.q_hpf,
        ] {
            plane.fill(0.0);
        }
    }

    /// Step 0.
    fn load<C: CfaLookup + ?Sized>(
        &mut self,
        input: &[f32],
        width: usize,
        cfa: &C,
        tile: &Tile,
        revscaler: f32,
    ) {
        let w1 = self.size;
        for row in tile.row_start..tile.row_end {
            let c0 = cfa.channel_at(row, tile.col_start).index();
            let c1 = cfa.channel_at(row, tile.col_start + 1).index();
            let base = (row - tile.row_start) * w1;
            let src = &input[row * width + tile.col_start..row * width + tile.col_end];
            for (k, &v) in src.iter().enumerate() {
                let v = safe_in(v, revscaler);
                self.cfa[base + k] = v;
                self.rgb[c0][base + k] = v;
                self.rgb[c1][base + k] = v;
            }
        }
    }

    /// Steps 1 and 2.
    fn directions<C: CfaLookup + ?Sized>(&mut self, cfa_at: &C, tile: &Tile) {
        let (tr, tc, w1) = (tile.rows(), tile.cols(), self.size);
        let cfa = &self.cfa;

        for row in 3..tr - 3 {
            for col in 4..tc - 4 {
                let i = row * w1 + col;
                self.v_hpf[i] = hpf_at!(cfa, i, w1);
            }
        }
        for row in 4..tr - 4 {
            for col in 3..tc - 3 {
                let i = row * w1 + col;
                self.h_hpf[i] = hpf_at!(cfa, i, 1);
            }
        }
        for row in 4..tr - 4 {
            for col in 4..tc - 4 {
                let i = row * w1 + col;
                let v = self.v_hpf[i - w1] + self.v_hpf[i] + self.v_hpf[i + w1];
                let h = self.h_hpf[i - 1] + self.h_hpf[i] + self.h_hpf[i + 1];
                self.vh_dir[i] = discrimination(v, h);
            }
        }

        for row in 2..tr - 2 {
            for col in (first_site(cfa_at, tile, row, 2, false)..tc - 2).step_by(2) {
                let i = row * w1 + col;
                self.lpf[i] = low_pass(
                    cfa[i],
                    [cfa[i - w1], cfa[i + w1], cfa[i - 1], cfa[i + 1]],
                    [cfa[i - w1 - 1], cfa[i - w1 + 1], cfa[i + w1 - 1], cfa[i + w1 + 1]],
                );
            }
        }
    }

    /// Step 3.
    fn green<C: CfaLookup + ?Sized>(&mut self, cfa_at: &C, tile: &Tile) {
        let (tr, tc, w1) = (tile.rows(), tile.cols(), self.size);
        let (w2, w3, w4) = (2 * w1, 3 * w1, 4 * w1);
        let (cfa, lpf, vh) = (&self.cfa, &self.lpf, &self.vh_dir);

        for row in 4..tr - 4 {
            let first = first_site(cfa_at, tile, row, 4, false);
            for col in (first..tc - 4).step_by(2) {
                let i = row * w1 + col;
                let cfai = cfa[i];

                let n_grad = EPS
                    + (cfa[i - w1] - cfa[i + w1]).abs()
                    + (cfai - cfa[i - w2]).abs()
                    + (cfa[i - w1] - cfa[i - w3]).abs()
                    + (cfa[i - w2] - cfa[i - w4]).abs();
                let s_grad = EPS
                    + (cfa[i - w1] - cfa[i + w1]).abs()
                    + (cfai - cfa[i + w2]).abs()
                    + (cfa[i + w1] - cfa[i + w3]).abs()
                    + (cfa[i + w2] - cfa[i + w4]).abs();
                let w_grad = EPS
                    + (cfa[i - 1] - cfa[i + 1]).abs()
                    + (cfai - cfa[i - 2]).abs()
                    + (cfa[i - 1] - cfa[i - 3]).abs()
                    + (cfa[i - 2] - cfa[i - 4]).abs();
                let e_grad = EPS
                    + (cfa[i - 1] - cfa[i + 1]).abs()
                    + (cfai - cfa[i + 2]).abs()
                    + (cfa[i + 1] - cfa[i + 3]).abs()
                    + (cfa[i + 2] - cfa[i + 4]).abs();

                let lpfi = lpf[i];
                let n_est = ratio_estimate(cfa[i - w1], lpfi, lpf[i - w2]);
                let s_est = ratio_estimate(cfa[i + w1], lpfi, lpf[i + w2]);
                let w_est = ratio_estimate(cfa[i - 1], lpfi, lpf[i - 2]);
                let e_est = ratio_estimate(cfa[i + 1], lpfi, lpf[i + 2]);

                let v_est = weighted_pair(n_grad, n_est, s_grad, s_est);
                let h_est = weighted_pair(w_grad, w_est, e_grad, e_est);

                let disc = refine_disc(vh[i], diag_mean!(vh, i, w1));
                self.rgb[1][i] = interpolatef(disc, h_est, v_est);
            }
        }
    }

    /// Step 4.
    fn red_blue<C: CfaLookup + ?Sized>(&mut self, cfa_at: &C, tile: &Tile) {
        let (tr, tc, w1) = (tile.rows(), tile.cols(), self.size);
        let (w2, w3) = (2 * w1, 3 * w1);

        // 4.0: diagonal high passes.
        for row in 3..tr - 3 {
            for col in (first_site(cfa_at, tile, row, 3, false)..tc - 3).step_by(2) {
                let i = row * w1 + col;
                self.p_hpf[i] = hpf_at!(self.cfa, i, w1 + 1);
                self.q_hpf[i] = hpf_at!(self.cfa, i, w1 - 1);
            }
        }

        // 4.1: P/Q discrimination.
        for row in 4..tr - 4 {
            let first = first_site(cfa_at, tile, row, 4, false);
            for col in (first..tc - 4).step_by(2) {
                let i = row * w1 + col;
                let p = self.p_hpf[i - w1 - 1] + self.p_hpf[i] + self.p_hpf[i + w1 + 1];
                let q = self.q_hpf[i - w1 + 1] + self.q_hpf[i] + self.q_hpf[i + w1 - 1];
                self.pq_dir[i] = discrimination(p, q);
            }
        }

        // 4.2: red at blue and blue at red sites.
        for row in 4..tr - 4 {
            let first = first_site(cfa_at, tile, row, 4, false);
            for col in (first..tc - 4).step_by(2) {
                let i = row * w1 + col;
                let c = cfa_at
                    .channel_at(tile.row_start + row, tile.col_start + col)
                    .opposite()
                    .index();
                let (rc, g, pq) = (&self.rgb[c], &self.rgb[1], &self.pq_dir);
                let disc = refine_disc(pq[i], diag_mean!(pq, i, w1));

                let (nw, ne, sw, se) = (i - w1 - 1, i - w1 + 1, i + w1 - 1, i + w1 + 1);
                let nw_grad = EPS
                    + (rc[nw] - rc[se]).abs()
                    + (rc[nw] - rc[i - w3 - 3]).abs()
                    + (g[i] - g[i - w2 - 2]).abs();
                let ne_grad = EPS
                    + (rc[ne] - rc[sw]).abs()
                    + (rc[ne] - rc[i - w3 + 3]).abs()
                    + (g[i] - g[i - w2 + 2]).abs();
                let sw_grad = EPS
                    + (rc[ne] - rc[sw]).abs()
                    + (rc[sw] - rc[i + w3 - 3]).abs()
                    + (g[i] - g[i + w2 - 2]).abs();
                let se_grad = EPS
                    + (rc[nw] - rc[se]).abs()
                    + (rc[se] - rc[i + w3 + 3]).abs()
                    + (g[i] - g[i + w2 + 2]).abs();

                let nw_est = rc[nw] - g[nw];
                let ne_est = rc[ne] - g[ne];
                let sw_est = rc[sw] - g[sw];
                let se_est = rc[se] - g[se];

                let p_est = weighted_pair(nw_grad, nw_est, se_grad, se_est);
                let q_est = weighted_pair(ne_grad, ne_est, sw_grad, sw_est);

                let value = g[i] + interpolatef(disc, q_est, p_est);
                self.rgb[c][i] = value;
            }
        }

        // 4.3: red and blue at green sites.
        for row in 4..tr - 4 {
            let first = first_site(cfa_at, tile, row, 4, true);
            for col in (first..tc - 4).step_by(2) {
                let i = row * w1 + col;
                let vh = &self.vh_dir;
                let disc = refine_disc(vh[i], diag_mean!(vh, i, w1));

                let g = &self.rgb[1];
                let g1 = g[i];
                let dn = EPS + (g1 - g[i - w2]).abs();
                let ds = EPS + (g1 - g[i + w2]).abs();
                let dw = EPS + (g1 - g[i - 2]).abs();
                let de = EPS + (g1 - g[i + 2]).abs();
                let (g_n, g_s, g_w, g_e) = (g[i - w1], g[i + w1], g[i - 1], g[i + 1]);

                for c in [0, 2] {
                    let rc = &self.rgb[c];
                    let sn_abs = (rc[i - w1] - rc[i + w1]).abs();
                    let ew_abs = (rc[i - 1] - rc[i + 1]).abs();

                    let n_grad = dn + sn_abs + (rc[i - w1] - rc[i - w3]).abs();
                    let s_grad = ds + sn_abs + (rc[i + w1] - rc[i + w3]).abs();
                    let w_grad = dw + ew_abs + (rc[i - 1] - rc[i - 3]).abs();
                    let e_grad = de + ew_abs + (rc[i + 1] - rc[i + 3]).abs();

                    let n_est = rc[i - w1] - g_n;
                    let s_est = rc[i + w1] - g_s;
                    let w_est = rc[i - 1] - g_w;
                    let e_est = rc[i + 1] - g_e;

                    let v_est = weighted_pair(n_grad, n_est, s_grad, s_est);
                    let h_est = weighted_pair(w_grad, w_est, e_grad, e_est);

                    self.rgb[c][i] = g1 + interpolatef(disc, h_est, v_est);
                }
            }
        }
    }

    /// Write the valid region of the tile.
    fn store(&self, tile: &Tile, scaler: f32, band: &mut RowBand<'_>) {
        let w1 = self.size;
        for row in tile.valid_row_start..tile.valid_row_end {
            let out: &mut [Rgba] = bytemuck::cast_slice_mut(band.row_mut(row));
            let base = (row - tile.row_start) * w1;
            for col in tile.valid_col_start..tile.valid_col_end {
                let i = base + col - tile.col_start;
                out[col] = [
                    scaler * self.rgb[0][i].max(0.0),
                    scaler * self.rgb[1][i].max(0.0),
                    scaler * self.rgb[2][i].max(0.0),
                    0.0,
                ];
            }
        }
    }
}

/// First tile column at or after `from` holding a green (`green == true`) or a
/// red/blue sensel on tile row `row`.
#[inline]
fn first_site<C: CfaLookup + ?Sized>(
    cfa: &C,
    tile: &Tile,
    row: usize,
    from: usize,
    green: bool,
) -> usize {
    let is_green = cfa.is_green(tile.row_start + row, tile.col_start + from);
    if is_green == green {
        from
    } else {
        from + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::ColorFilterArray;
    use crate::tile::TileLayout;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn planes(width: usize, height: usize, cfa: ColorFilterArray, v: [f32; 3]) -> Vec<f32> {
        (0..width * height)
            .map(|i| v[cfa.channel_at(i / width, i % width).index()])
            .collect()
    }

    fn assert_planes(out: &PixelBuffer, v: [f32; 3], tol: f32) {
        for (i, p) in out.pixels().iter().enumerate() {
            for c in 0..3 {
                assert!(
                    (p[c] - v[c]).abs() < tol,
                    "pixel ({}, {}) channel {c}: {} != {}",
                    i / out.width(),
                    i % out.width(),
                    p[c],
                    v[c]
                );
            }
            assert_eq!(p[3], 0.0);
        }
    }

    #[test]
    fn flat_planes_are_reproduced() {
        let (w, h) = (130, 121);
        let v = [0.25f32, 0.5, 0.125];
        for cfa in [
            ColorFilterArray::Rggb,
            ColorFilterArray::Bggr,
            ColorFilterArray::Grbg,
            ColorFilterArray::Gbrg,
        ] {
            let input = planes(w, h, cfa, v);
            let out = demosaic_rcd(&input, w, h, &cfa, &RcdParams::default()).unwrap();
            assert_planes(&out, v, 1e-4);
        }
    }

    #[test]
    fn white_point_round_trips() {
        let (w, h) = (64, 48);
        let cfa = ColorFilterArray::Rggb;
        let v = [100.0f32, 400.0, 250.0];
        let input = planes(w, h, cfa, v);
        let params = RcdParams {
            white_point: 1000.0,
            ..Default::default()
        };
        let out = demosaic_rcd(&input, w, h, &cfa, &params).unwrap();
        assert_planes(&out, v, 0.05);
    }

    #[test]
    fn small_images_use_border_pass() {
        let (w, h) = (16, 40);
        let cfa = ColorFilterArray::Grbg;
        let v = [0.3f32, 0.6, 0.45];
        let out = demosaic_rcd(&planes(w, h, cfa, v), w, h, &cfa, &RcdParams::default()).unwrap();
        assert_planes(&out, v, 1e-5);
    }

    #[test]
    fn tiles_stitch_exactly() {
        let (w, h) = (300, 260);
        let cfa = ColorFilterArray::Rggb;
        let mut rng = StdRng::seed_from_u64(17);
        let input: Vec<f32> = (0..w * h).map(|_| rng.gen_range(0.0..1.0)).collect();
        let whole = RcdParams {
            layout: TileLayout {
                size: 512,
                border: RCD_MIN_BORDER,
                margin: 7,
            },
            ..Default::default()
        };
        let one = demosaic_rcd(&input, w, h, &cfa, &whole).unwrap();
        for size in [112, 48] {
            let params = RcdParams {
                layout: TileLayout {
                    size,
                    ..TileLayout::rcd()
                },
                ..Default::default()
            };
            let tiled = demosaic_rcd(&input, w, h, &cfa, &params).unwrap();
            let differing = one
                .as_slice()
                .iter()
                .zip(tiled.as_slice())
                .filter(|(a, b)| a != b)
                .count();
            assert_eq!(differing, 0, "tile size {size}");
        }
    }

    #[test]
    fn narrow_border_is_rejected() {
        let params = RcdParams {
            layout: TileLayout {
                size: 112,
                border: 9,
                margin: 7,
            },
            ..Default::default()
        };
        assert!(matches!(
            demosaic_rcd(&[0.5; 64 * 64], 64, 64, &ColorFilterArray::Rggb, &params),
            Err(HighlightError::InvalidParameter(_))
        ));
    }

    #[test]
    fn huge_dimensions_are_rejected() {
        let res = demosaic_rcd(
            &[],
            usize::MAX,
            2,
            &ColorFilterArray::Rggb,
            &RcdParams::default(),
        );
        assert!(matches!(res, Err(HighlightError::InvalidGeometry(_))));
    }

    #[test]
    fn output_is_non_negative() {
        let (w, h) = (48, 48);
        let input: Vec<f32> = (0..w * h)
            .map(|i| if (i * 7919) % 13 < 3 { -0.5 } else { ((i * 31) % 17) as f32 / 16.0 })
            .collect();
        let out = demosaic_rcd(&input, w, h, &ColorFilterArray::Rggb, &RcdParams::default())
            .unwrap();
        assert!(out.as_slice().iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn rejects_tiny_and_cancelled() {
        let input = vec![0.5f32; 8 * 8];
        assert!(matches!(
            demosaic_rcd(&input, 8, 8, &ColorFilterArray::Rggb, &RcdParams::default()),
            Err(HighlightError::TooSmallImage { .. })
        ));
        let input = vec![0.5f32; 64 * 64];
        let res = demosaic_rcd_with(
            &input,
            64,
            64,
            &ColorFilterArray::Rggb,
            &RcdParams::default(),
            &|| false,
        );
        assert_eq!(res, Err(HighlightError::Cancelled));
    }
}
