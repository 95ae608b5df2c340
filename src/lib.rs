#![deny(missing_docs)]
//! Tiled demosaicing and wavelet-guided highlight reconstruction for Bayer sensor data.
//!
//! The main entry point is [`reconstruct_highlights`], which takes a raw mosaic,
//! detects clipped sensels and rebuilds them from the detail and colour of their
//! unclipped neighbourhood:
//!
//! ```
//! use hlrecon::{reconstruct_highlights, ColorFilterArray, HighlightsParams};
//!
//! let (width, height) = (32, 32);
//! let mut input = vec![0.4f32; width * height];
//! input[16 * width + 16] = 2.0;
//! let mut output = vec![0.0; width * height];
//! reconstruct_highlights(
//!     &input,
//!     width,
//!     height,
//!     &ColorFilterArray::Rggb,
//!     &HighlightsParams::default(),
//!     &mut output,
//! )
//! .unwrap();
//! assert!(output.iter().all(|v| v.is_finite() && *v >= 0.0));
//! ```
//!
//! The building blocks are public as well:
//! - [`interpolate_and_mask`]: bilinear interpolation with clipping detection,
//! - [`demosaic_rcd`]: tiled RCD demosaicing with a PPG border,
//! - [`WaveletDecomposer`] and [`wavelets_process`]: à trous decomposition and
//!   per-scale diffusion,
//! - [`resample`]: bilinear resizing, box mean and remosaicing.
//!
//! With the default `rayon` feature, tiles and rows are processed in parallel.
//! Results do not depend on the number of threads.

mod buffer;
mod cfa;
mod demosaic;
mod diffuse;
mod error;
mod interpolate;
mod kernels;
mod noise;
mod params;
mod pipeline;
pub mod resample;
mod tile;
mod wavelet;

pub use buffer::{ClippingMask, PixelBuffer, Rgba};
pub use cfa::{CfaLookup, Channel, ColorFilterArray};
pub use demosaic::{demosaic_rcd, demosaic_rcd_with};
pub use diffuse::{wavelets_process, DiffuseVariant, DiffusionParams};
pub use error::{HighlightError, HlResult};
pub use interpolate::interpolate_and_mask;
pub use params::{HighlightsParams, RcdParams};
pub use pipeline::{
    reconstruct_highlights, reconstruct_highlights_with, reconstruct_or_passthrough,
    Cancellation, Uncancellable,
};
pub use tile::{RowBand, Tile, TileGrid, TileLayout, MIN_EXTENT};
pub use wavelet::{
    equivalent_sigma_at_step, scale_count, ScaleRole, WaveletDecomposer, WaveletScale,
    B_SPLINE_SIGMA, B_SPLINE_TO_LAPLACIAN, MAX_SCALES,
};
