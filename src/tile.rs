//! Tile scheduling.
//!
//! An image is cut into overlapping square tiles of `size` pixels. Neighbouring
//! tiles overlap by `2 * border` pixels, so each tile owns a *valid* region that
//! excludes `border` pixels on every side facing another tile and `margin`
//! pixels on every side facing the image boundary.
//!
//! ```text
//!   row_start = t * (size - 2 * border)
//!   row_end   = min(row_start + size, height)
//!   valid     = [row_start + (first ? margin : border),
//!                row_end   - (last  ? margin : border))
//! ```
//!
//! The valid regions of all tiles partition `[margin, height - margin)` by
//! `[margin, width - margin)`. Tiles of one tile row write to one row band of the
//! output, and bands are disjoint, so bands are processed concurrently.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use itertools::iproduct;
use serde::{Deserialize, Serialize};

use crate::pipeline::Cancellation;
use crate::{HighlightError, HlResult};

/// Smallest width or height accepted by the tiled stages.
pub const MIN_EXTENT: usize = 16;

/// Tile geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileLayout {
    /// Edge length of a computed tile.
    pub size: usize,
    /// Overlap kept on sides facing another tile.
    pub border: usize,
    /// Overlap kept on sides facing the image boundary.
    pub margin: usize,
}

impl TileLayout {
    /// Layout used by the RCD demosaicer.
    ///
    /// RCD outputs depend on mosaic samples up to 10 pixels away, so a border
    /// of 10 makes the stitched result equal to a single-tile run.
    pub const fn rcd() -> Self {
        Self {
            size: 112,
            border: 10,
            margin: 7,
        }
    }

    /// Layout for 3x3 stencils that handle the image edge themselves.
    pub const fn stencil3x3() -> Self {
        Self {
            size: 112,
            border: 1,
            margin: 0,
        }
    }

    /// Number of output pixels a tile owns along one axis.
    pub fn valid(&self) -> usize {
        self.size - 2 * self.border
    }

    fn check(&self) -> HlResult<()> {
        if self.margin > self.border || self.size <= 2 * self.border {
            return Err(HighlightError::InvalidGeometry(format!(
                "tile layout {}/{}/{} has no valid region",
                self.size, self.border, self.margin
            )));
        }
        Ok(())
    }
}

impl Default for TileLayout {
    fn default() -> Self {
        Self::rcd()
    }
}

/// A tile's computed and valid regions, as half-open absolute ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    /// Tile row index.
    pub tv: usize,
    /// Tile column index.
    pub th: usize,
    /// First computed row.
    pub row_start: usize,
    /// One past the last computed row.
    pub row_end: usize,
    /// First computed column.
    pub col_start: usize,
    /// One past the last computed column.
    pub col_end: usize,
    /// First row written to the output.
    pub valid_row_start: usize,
    /// One past the last row written to the output.
    pub valid_row_end: usize,
    /// First column written to the output.
    pub valid_col_start: usize,
    /// One past the last column written to the output.
    pub valid_col_end: usize,
}

impl Tile {
    /// Number of computed rows.
    pub fn rows(&self) -> usize {
        self.row_end - self.row_start
    }

    /// Number of computed columns.
    pub fn cols(&self) -> usize {
        self.col_end - self.col_start
    }
}

/// Tile decomposition of a `width` x `height` image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    width: usize,
    height: usize,
    layout: TileLayout,
    num_vertical: usize,
    num_horizontal: usize,
}

fn tile_count(extent: usize, layout: &TileLayout) -> usize {
    1 + (extent - 2 * layout.border - 1) / layout.valid()
}

impl TileGrid {
    /// Build the grid for an image.
    ///
    /// # Errors
    /// - [`HighlightError::TooSmallImage`] if either extent is below [`MIN_EXTENT`] or
    ///   cannot hold two borders.
    /// - [`HighlightError::InvalidGeometry`] if the layout has no valid region.
    pub fn new(width: usize, height: usize, layout: TileLayout) -> HlResult<Self> {
        layout.check()?;
        let min = MIN_EXTENT.max(2 * layout.border + 1);
        if width < min || height < min {
            return Err(HighlightError::TooSmallImage { width, height, min });
        }
        Ok(Self {
            width,
            height,
            layout,
            num_vertical: tile_count(height, &layout),
            num_horizontal: tile_count(width, &layout),
        })
    }

    /// Get the layout.
    pub fn layout(&self) -> TileLayout {
        self.layout
    }

    /// Number of tile rows.
    pub fn num_vertical(&self) -> usize {
        self.num_vertical
    }

    /// Number of tile columns.
    pub fn num_horizontal(&self) -> usize {
        self.num_horizontal
    }

    fn span(&self, t: usize, count: usize, extent: usize) -> (usize, usize, usize, usize) {
        let TileLayout {
            size,
            border,
            margin,
        } = self.layout;
        let start = t * self.layout.valid();
        let end = (start + size).min(extent);
        let first = start + if t == 0 { margin } else { border };
        let last = end - if t + 1 == count { margin } else { border };
        (start, end, first, last)
    }

    /// Describe tile (`tv`, `th`).
    pub fn tile(&self, tv: usize, th: usize) -> Tile {
        let (row_start, row_end, valid_row_start, valid_row_end) =
            self.span(tv, self.num_vertical, self.height);
        let (col_start, col_end, valid_col_start, valid_col_end) =
            self.span(th, self.num_horizontal, self.width);
        Tile {
            tv,
            th,
            row_start,
            row_end,
            col_start,
            col_end,
            valid_row_start,
            valid_row_end,
            valid_col_start,
            valid_col_end,
        }
    }

    /// All tiles in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        iproduct!(0..self.num_vertical, 0..self.num_horizontal).map(|(tv, th)| self.tile(tv, th))
    }

    /// Split a row-major buffer with `stride` samples per row into the row bands
    /// owned by each tile row.
    ///
    /// # Errors
    /// - [`HighlightError::InvalidGeometry`] if the buffer does not hold `height` rows.
    pub fn split_rows<'a>(&self, buf: &'a mut [f32], stride: usize) -> HlResult<Vec<RowBand<'a>>> {
        if buf.len() != stride * self.height {
            return Err(HighlightError::size_mismatch(
                "tile output",
                stride * self.height,
                buf.len(),
            ));
        }
        let first = self.layout.margin;
        let (_, mut rest) = buf.split_at_mut(first * stride);
        let mut bands = Vec::with_capacity(self.num_vertical);
        for tv in 0..self.num_vertical {
            let (_, _, start, end) = self.span(tv, self.num_vertical, self.height);
            let (band, tail) = std::mem::take(&mut rest).split_at_mut((end - start) * stride);
            bands.push(RowBand {
                first_row: start,
                stride,
                data: band,
            });
            rest = tail;
        }
        Ok(bands)
    }
}

/// Mutable view of the output rows owned by one tile row.
#[derive(Debug)]
pub struct RowBand<'a> {
    first_row: usize,
    stride: usize,
    data: &'a mut [f32],
}

impl RowBand<'_> {
    /// Borrow absolute image row `row`.
    ///
    /// # Panics
    /// Panics if the row is outside the band.
    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut [f32] {
        let r = row - self.first_row;
        &mut self.data[r * self.stride..(r + 1) * self.stride]
    }
}

fn check_wanted(cancel: &dyn Cancellation) -> HlResult<()> {
    if cancel.still_wanted() {
        Ok(())
    } else {
        Err(HighlightError::Cancelled)
    }
}

/// Run `process` over every tile.
///
/// `bands` holds one entry per tile row (see [`TileGrid::split_rows`]); tiles of
/// one row are processed in order against the same band. `init` builds the
/// per-worker scratch state, which is reused across the tiles that worker runs.
/// Cancellation is polled before each tile.
///
/// # Errors
/// The first error returned by `init` or `process`, or
/// [`HighlightError::Cancelled`].
#[cfg(feature = "rayon")]
pub(crate) fn run_tiles<B, S, I, F>(
    grid: &TileGrid,
    bands: Vec<B>,
    cancel: &dyn Cancellation,
    init: I,
    process: F,
) -> HlResult<()>
where
    B: Send,
    I: Fn() -> HlResult<S> + Sync + Send,
    F: Fn(&mut S, &Tile, &mut B) -> HlResult<()> + Sync + Send,
{
    bands
        .into_par_iter()
        .enumerate()
        .try_for_each_init(&init, |state, (tv, mut band)| {
            let scratch = state.as_mut().map_err(|e| e.clone())?;
            for th in 0..grid.num_horizontal() {
                check_wanted(cancel)?;
                process(scratch, &grid.tile(tv, th), &mut band)?;
            }
            Ok(())
        })
}

/// Run `process` over every tile.
///
/// `bands` holds one entry per tile row (see [`TileGrid::split_rows`]); tiles of
/// one row are processed in order against the same band. `init` builds the
/// scratch state, which is reused across all tiles. Cancellation is polled
/// before each tile.
///
/// # Errors
/// The first error returned by `init` or `process`, or
/// [`HighlightError::Cancelled`].
#[cfg(not(feature = "rayon"))]
pub(crate) fn run_tiles<B, S, I, F>(
    grid: &TileGrid,
    bands: Vec<B>,
    cancel: &dyn Cancellation,
    init: I,
    process: F,
) -> HlResult<()>
where
    I: Fn() -> HlResult<S>,
    F: Fn(&mut S, &Tile, &mut B) -> HlResult<()>,
{
    let mut scratch = init()?;
    for (tv, mut band) in bands.into_iter().enumerate() {
        for th in 0..grid.num_horizontal() {
            check_wanted(cancel)?;
            process(&mut scratch, &grid.tile(tv, th), &mut band)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Uncancellable;

    fn covered(grid: &TileGrid, width: usize, height: usize) -> Vec<u32> {
        let mut hits = vec![0u32; width * height];
        for t in grid.tiles() {
            assert!(t.row_start <= t.valid_row_start && t.valid_row_end <= t.row_end);
            assert!(t.col_start <= t.valid_col_start && t.valid_col_end <= t.col_end);
            assert!(t.rows() <= grid.layout().size && t.cols() <= grid.layout().size);
            for r in t.valid_row_start..t.valid_row_end {
                for c in t.valid_col_start..t.valid_col_end {
                    hits[r * width + c] += 1;
                }
            }
        }
        hits
    }

    const NARROW: TileLayout = TileLayout {
        size: 112,
        border: 9,
        margin: 7,
    };

    #[test]
    fn rcd_valid_regions_partition_interior() {
        for layout in [TileLayout::rcd(), NARROW] {
            for (w, h) in [(21, 21), (100, 37), (112, 113), (250, 301), (1000, 22)] {
                let grid = TileGrid::new(w, h, layout).unwrap();
                let hits = covered(&grid, w, h);
                let m = layout.margin;
                for r in 0..h {
                    for c in 0..w {
                        let inside = r >= m && r < h - m && c >= m && c < w - m;
                        assert_eq!(hits[r * w + c], inside as u32, "({r}, {c}) in {w}x{h}");
                    }
                }
            }
        }
    }

    #[test]
    fn stencil_layout_covers_everything() {
        let grid = TileGrid::new(230, 17, TileLayout::stencil3x3()).unwrap();
        assert_eq!(grid.num_horizontal(), 3);
        assert_eq!(grid.num_vertical(), 1);
        assert!(covered(&grid, 230, 17).iter().all(|&n| n == 1));
    }

    #[test]
    fn tile_counts() {
        let grid = TileGrid::new(300, 206, NARROW).unwrap();
        // 1 + (300 - 19) / 94 = 3, 1 + (206 - 19) / 94 = 2
        assert_eq!(grid.num_horizontal(), 3);
        assert_eq!(grid.num_vertical(), 2);
        let last = grid.tile(1, 2);
        assert_eq!(last.row_start, 94);
        assert_eq!(last.row_end, 206);
        assert_eq!(last.valid_row_start, 103);
        assert_eq!(last.valid_row_end, 199);
        assert_eq!(last.col_start, 188);
        assert_eq!(last.col_end, 300);

        let grid = TileGrid::new(300, 206, TileLayout::rcd()).unwrap();
        // 1 + (300 - 21) / 92 = 4, 1 + (206 - 21) / 92 = 3
        assert_eq!(grid.num_horizontal(), 4);
        assert_eq!(grid.num_vertical(), 3);
        assert_eq!(grid.tile(1, 0).valid_row_start, 102);
    }

    #[test]
    fn rejects_small_images() {
        assert_eq!(
            TileGrid::new(8, 8, TileLayout::stencil3x3()),
            Err(HighlightError::TooSmallImage {
                width: 8,
                height: 8,
                min: 16
            })
        );
        assert!(matches!(
            TileGrid::new(20, 40, TileLayout::rcd()),
            Err(HighlightError::TooSmallImage { min: 21, .. })
        ));
        let bad = TileLayout {
            size: 10,
            border: 5,
            margin: 1,
        };
        assert!(matches!(
            TileGrid::new(64, 64, bad),
            Err(HighlightError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn runner_writes_each_valid_pixel_once() {
        let (w, h) = (60, 45);
        let layout = TileLayout {
            size: 24,
            border: 4,
            margin: 2,
        };
        let grid = TileGrid::new(w, h, layout).unwrap();
        let mut out = vec![0.0f32; w * h];
        let bands = grid.split_rows(&mut out, w).unwrap();
        run_tiles(
            &grid,
            bands,
            &Uncancellable,
            || Ok(0usize),
            |count, tile, band| {
                *count += 1;
                for r in tile.valid_row_start..tile.valid_row_end {
                    let row = band.row_mut(r);
                    for v in &mut row[tile.valid_col_start..tile.valid_col_end] {
                        *v += 1.0;
                    }
                }
                Ok(())
            },
        )
        .unwrap();
        for r in 0..h {
            for c in 0..w {
                let inside = r >= 2 && r < h - 2 && c >= 2 && c < w - 2;
                assert_eq!(out[r * w + c], inside as u8 as f32);
            }
        }
    }

    #[test]
    fn runner_stops_when_cancelled() {
        let grid = TileGrid::new(32, 32, TileLayout::stencil3x3()).unwrap();
        let mut out = vec![0.0f32; 32 * 32];
        let bands = grid.split_rows(&mut out, 32).unwrap();
        let res = run_tiles(&grid, bands, &|| false, || Ok(()), |_, _, _| Ok(()));
        assert_eq!(res, Err(HighlightError::Cancelled));
    }
}
