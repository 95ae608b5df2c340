//! Tiled directional demosaicing.
//!
//! [`demosaic_rcd`] interpolates the interior of the image tile by tile with
//! Ratio Corrected Demosaicing, then fills the outer band the tiles cannot
//! reach with a patterned-pixel-grouping pass.

mod ppg_border;
mod rcd;

pub(crate) use rcd::RCD_MIN_BORDER;
pub use rcd::{demosaic_rcd, demosaic_rcd_with};
