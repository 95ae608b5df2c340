//! Owned pixel storage.
//!
//! [`PixelBuffer`] holds a row-major matrix of interleaved `f32` samples, either
//! one raw sample per sensel or four samples (`[R, G, B, norm]`) per pixel.
//! Allocations are fallible: a failed reservation is reported as
//! [`HighlightError::OutOfMemory`] instead of aborting the process.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{HighlightError, HlResult};

/// A 4-channel pixel, `[R, G, B, norm]` or `[R, G, B, alpha]`.
pub type Rgba = [f32; 4];

/// Allocate a zeroed `Vec<f32>` of `len` elements without aborting on failure.
pub(crate) fn try_alloc_zeroed(len: usize) -> HlResult<Vec<f32>> {
    let bytes = len.saturating_mul(std::mem::size_of::<f32>());
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| HighlightError::OutOfMemory { bytes })?;
    data.resize(len, 0.0);
    Ok(data)
}

/// A flat, row-major buffer of interleaved channel samples.
///
/// Invariant: `data.len() == width * height * channels`.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    data: Vec<f32>,
    width: usize,
    height: usize,
    channels: usize,
}

impl PixelBuffer {
    /// Allocate a zero-initialised buffer.
    ///
    /// # Errors
    /// - [`HighlightError::InvalidGeometry`] if a dimension is zero, the channel count is
    ///   not 1 or 4, or the size overflows.
    /// - [`HighlightError::OutOfMemory`] if the allocation fails.
    pub fn try_zeroed(width: usize, height: usize, channels: usize) -> HlResult<Self> {
        let len = Self::checked_len(width, height, channels)?;
        Ok(Self {
            data: try_alloc_zeroed(len)?,
            width,
            height,
            channels,
        })
    }

    /// Wrap an existing vector.
    ///
    /// # Errors
    /// - [`HighlightError::InvalidGeometry`] if the vector length does not match the geometry.
    pub fn from_vec(
        data: Vec<f32>,
        width: usize,
        height: usize,
        channels: usize,
    ) -> HlResult<Self> {
        let len = Self::checked_len(width, height, channels)?;
        if data.len() != len {
            return Err(HighlightError::size_mismatch("pixel", len, data.len()));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    fn checked_len(width: usize, height: usize, channels: usize) -> HlResult<usize> {
        if width == 0 || height == 0 {
            return Err(HighlightError::InvalidGeometry(format!(
                "zero-sized buffer {width}x{height}"
            )));
        }
        if channels != 1 && channels != 4 {
            return Err(HighlightError::InvalidGeometry(format!(
                "unsupported channel count {channels}"
            )));
        }
        width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(channels))
            .ok_or_else(|| HighlightError::InvalidGeometry("image too large".into()))
    }

    /// Get the width of the buffer.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Get the height of the buffer.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Get the number of channels per pixel.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of samples in one row.
    pub fn stride(&self) -> usize {
        self.width * self.channels
    }

    /// Get the underlying data as a slice.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Get the underlying data as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Get the underlying data as a vector.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// View a 4-channel buffer as pixels.
    ///
    /// # Panics
    /// Panics if the buffer does not have 4 channels.
    pub fn pixels(&self) -> &[Rgba] {
        assert_eq!(self.channels, 4, "pixel view needs 4 channels");
        bytemuck::cast_slice(&self.data)
    }

    /// View a 4-channel buffer as mutable pixels.
    ///
    /// # Panics
    /// Panics if the buffer does not have 4 channels.
    pub fn pixels_mut(&mut self) -> &mut [Rgba] {
        assert_eq!(self.channels, 4, "pixel view needs 4 channels");
        bytemuck::cast_slice_mut(&mut self.data)
    }

    /// The pixel at (`row`, `col`) of a 4-channel buffer.
    #[inline]
    pub fn pixel(&self, row: usize, col: usize) -> Rgba {
        self.pixels()[row * self.width + col]
    }

    /// Run `f(row_index, row)` over every row of a 4-channel buffer.
    #[cfg(feature = "rayon")]
    pub(crate) fn for_each_row_mut<F>(&mut self, f: F)
    where
        F: Fn(usize, &mut [Rgba]) + Sync + Send,
    {
        let width = self.width;
        self.pixels_mut()
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(i, row)| f(i, row));
    }

    /// Run `f(row_index, row)` over every row of a 4-channel buffer.
    #[cfg(not(feature = "rayon"))]
    pub(crate) fn for_each_row_mut<F>(&mut self, f: F)
    where
        F: Fn(usize, &mut [Rgba]),
    {
        let width = self.width;
        self.pixels_mut()
            .chunks_mut(width)
            .enumerate()
            .for_each(|(i, row)| f(i, row));
    }
}

/// Per-channel clipping opacity, parallel to a 4-channel [`PixelBuffer`].
///
/// Channels 0..3 hold the red, green and blue opacity, channel 3 the union of
/// the three. Values start in {0, 1} and become continuous once smoothed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClippingMask(PixelBuffer);

impl ClippingMask {
    /// Wrap a 4-channel buffer.
    ///
    /// # Errors
    /// - [`HighlightError::InvalidGeometry`] if the buffer does not have 4 channels.
    pub fn new(buf: PixelBuffer) -> HlResult<Self> {
        if buf.channels() != 4 {
            return Err(HighlightError::InvalidGeometry(
                "clipping mask needs 4 channels".into(),
            ));
        }
        Ok(Self(buf))
    }

    /// Opacity of the union mask at linear pixel index `idx`.
    #[inline]
    pub fn opacity(&self, idx: usize) -> f32 {
        self.0.pixels()[idx][3]
    }

    /// Whether any sample is marked as clipped.
    pub fn any_clipped(&self) -> bool {
        self.0.pixels().iter().any(|px| px[3] > 0.0)
    }

    /// Borrow the underlying buffer.
    pub fn buffer(&self) -> &PixelBuffer {
        &self.0
    }

    /// Mutably borrow the underlying buffer.
    pub fn buffer_mut(&mut self) -> &mut PixelBuffer {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_has_expected_len() {
        let buf = PixelBuffer::try_zeroed(5, 3, 4).unwrap();
        assert_eq!(buf.as_slice().len(), 60);
        assert_eq!(buf.pixels().len(), 15);
        assert_eq!(buf.stride(), 20);
        assert!(buf.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(matches!(
            PixelBuffer::try_zeroed(0, 3, 1),
            Err(HighlightError::InvalidGeometry(_))
        ));
        assert!(matches!(
            PixelBuffer::try_zeroed(3, 3, 3),
            Err(HighlightError::InvalidGeometry(_))
        ));
        assert!(matches!(
            PixelBuffer::from_vec(vec![0.0; 7], 2, 2, 1),
            Err(HighlightError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn huge_allocation_reports_oom() {
        let res = try_alloc_zeroed(usize::MAX / 8);
        assert!(matches!(res, Err(HighlightError::OutOfMemory { .. })));
    }

    #[test]
    fn pixel_view_is_interleaved() {
        let data = (0..16).map(|v| v as f32).collect();
        let mut buf = PixelBuffer::from_vec(data, 2, 2, 4).unwrap();
        assert_eq!(buf.pixel(1, 0), [8.0, 9.0, 10.0, 11.0]);
        buf.pixels_mut()[3][3] = -1.0;
        assert_eq!(buf.as_slice()[15], -1.0);
        let flat = buf.into_vec();
        assert_eq!(flat.len(), 16);
        assert_eq!(flat[8], 8.0);
    }

    #[test]
    fn mask_union_channel() {
        let mut buf = PixelBuffer::try_zeroed(2, 1, 4).unwrap();
        let mut mask = ClippingMask::new(buf.clone()).unwrap();
        assert!(!mask.any_clipped());
        mask.buffer_mut().pixels_mut()[1][3] = 0.5;
        assert!(mask.any_clipped());
        assert_eq!(mask.opacity(1), 0.5);
        buf = PixelBuffer::try_zeroed(2, 1, 1).unwrap();
        assert!(ClippingMask::new(buf).is_err());
    }
}
