//! Configuration of the reconstruction and demosaicing stages.
//!
//! Both parameter sets deserialize with every field optional:
//!
//! ```
//! use hlrecon::HighlightsParams;
//!
//! let params: HighlightsParams = serde_json::from_str(r#"{ "iterations": 2 }"#).unwrap();
//! assert_eq!(params.iterations, 2);
//! assert_eq!(params.downsample, 4);
//! ```

use serde::{Deserialize, Serialize};

use crate::demosaic::RCD_MIN_BORDER;
use crate::tile::TileLayout;
use crate::wavelet::{self, MAX_SCALES};
use crate::{HighlightError, HlResult};

/// Parameters of [`reconstruct_highlights`](crate::reconstruct_highlights).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightsParams {
    /// White balance multipliers of the mosaic. All zero means unity.
    pub white_balance: [f32; 3],
    /// Clipping thresholds for R, G, B and the norm, in mosaic units.
    pub clip_thresholds: [f32; 4],
    /// Number of guided + chroma diffusion rounds.
    pub iterations: u32,
    /// Requested radius of the reconstruction, as a power of 2 in sensor pixels.
    pub scales: u32,
    /// Relative strength of the noise added to reconstructed pixels.
    pub noise_level: f32,
    /// How many sensor pixels one pixel of the final image covers.
    pub resolution_factor: f32,
    /// Reduction of the working image used for the diffusion.
    pub downsample: usize,
    /// First-order damping of the chroma diffusion, in `[0, 1]`.
    pub solid_color: f32,
    /// Seed of the noise field.
    pub seed: u64,
}

impl Default for HighlightsParams {
    fn default() -> Self {
        Self {
            white_balance: [1.0; 3],
            clip_thresholds: [1.0; 4],
            iterations: 1,
            scales: 5,
            noise_level: 0.0,
            resolution_factor: 1.0,
            downsample: 4,
            solid_color: 0.0,
            seed: 0,
        }
    }
}

impl HighlightsParams {
    /// Check every field against its accepted range.
    ///
    /// # Errors
    /// - [`HighlightError::InvalidParameter`] naming the first offending field.
    pub fn validate(&self) -> HlResult<()> {
        let unity = self.white_balance.iter().all(|&w| w == 0.0);
        if !unity && !self.white_balance.iter().all(|&w| w.is_finite() && w > 0.0) {
            return Err(HighlightError::InvalidParameter(
                "white balance multipliers must be positive",
            ));
        }
        if !self.clip_thresholds.iter().all(|&c| c.is_finite() && c > 0.0) {
            return Err(HighlightError::InvalidParameter(
                "clipping thresholds must be positive",
            ));
        }
        if self.iterations == 0 {
            return Err(HighlightError::InvalidParameter(
                "at least one iteration is needed",
            ));
        }
        if !(1..=MAX_SCALES).contains(&self.scales) {
            return Err(HighlightError::InvalidParameter("scales must be in 1..=12"));
        }
        if !(self.noise_level.is_finite() && self.noise_level >= 0.0) {
            return Err(HighlightError::InvalidParameter(
                "noise level must be non-negative",
            ));
        }
        if !(self.resolution_factor.is_finite() && self.resolution_factor >= 1.0) {
            return Err(HighlightError::InvalidParameter(
                "resolution factor must be at least 1",
            ));
        }
        if self.downsample == 0 {
            return Err(HighlightError::InvalidParameter(
                "downsample factor must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.solid_color) {
            return Err(HighlightError::InvalidParameter(
                "solid color must be in [0, 1]",
            ));
        }
        Ok(())
    }

    /// Get the white balance, with the all-zero default replaced by unity.
    pub fn white_balance_or_unity(&self) -> [f32; 3] {
        if self.white_balance.iter().all(|&w| w == 0.0) {
            [1.0; 3]
        } else {
            self.white_balance
        }
    }

    /// Get the total reduction between the sensor and the working image.
    pub fn zoom(&self) -> f32 {
        (self.downsample as f32 * self.resolution_factor).max(1.0)
    }

    /// Get the number of wavelet scales run on the working image.
    pub fn scale_count(&self) -> usize {
        wavelet::scale_count(self.scales, self.zoom()) as usize
    }

    /// Get the noise level relative to the working image.
    pub fn working_noise_level(&self) -> f32 {
        self.noise_level / self.zoom()
    }
}

/// Parameters of [`demosaic_rcd`](crate::demosaic_rcd).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RcdParams {
    /// Input value mapped to 1 during processing.
    pub white_point: f32,
    /// Tile geometry.
    pub layout: TileLayout,
}

impl Default for RcdParams {
    fn default() -> Self {
        Self {
            white_point: 1.0,
            layout: TileLayout::rcd(),
        }
    }
}

impl RcdParams {
    /// Check the white point and the tile layout.
    ///
    /// # Errors
    /// - [`HighlightError::InvalidParameter`] for a non-positive white point, a
    ///   border narrower than the RCD stencil or a margin outside `4..=border`.
    pub fn validate(&self) -> HlResult<()> {
        if !(self.white_point.is_finite() && self.white_point > 0.0) {
            return Err(HighlightError::InvalidParameter(
                "white point must be positive",
            ));
        }
        let TileLayout {
            size,
            border,
            margin,
        } = self.layout;
        if border < RCD_MIN_BORDER {
            return Err(HighlightError::InvalidParameter(
                "RCD needs a tile border of at least 10",
            ));
        }
        if margin < 4 || margin > border {
            return Err(HighlightError::InvalidParameter(
                "RCD tile margin must be in 4..=border",
            ));
        }
        if size <= 2 * border {
            return Err(HighlightError::InvalidParameter(
                "RCD tile size must exceed twice the border",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        HighlightsParams::default().validate().unwrap();
        RcdParams::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let p: HighlightsParams =
            serde_json::from_str(r#"{ "scales": 7, "noise_level": 0.1, "seed": 42 }"#).unwrap();
        assert_eq!(p.scales, 7);
        assert_eq!(p.seed, 42);
        assert_eq!(p.iterations, 1);
        assert_eq!(p.clip_thresholds, [1.0; 4]);

        let r: RcdParams =
            serde_json::from_str(r#"{ "layout": { "size": 64, "border": 10, "margin": 7 } }"#)
                .unwrap();
        assert_eq!(r.white_point, 1.0);
        assert_eq!(r.layout.size, 64);
        r.validate().unwrap();
    }

    #[test]
    fn zero_white_balance_means_unity() {
        let p = HighlightsParams {
            white_balance: [0.0; 3],
            ..Default::default()
        };
        p.validate().unwrap();
        assert_eq!(p.white_balance_or_unity(), [1.0; 3]);
        let p = HighlightsParams {
            white_balance: [2.0, 1.0, 1.5],
            ..Default::default()
        };
        assert_eq!(p.white_balance_or_unity(), [2.0, 1.0, 1.5]);
    }

    #[test]
    fn scale_count_follows_zoom() {
        let p = HighlightsParams::default();
        assert_eq!(p.zoom(), 4.0);
        // 2^5 / 4 = 8
        assert_eq!(p.scale_count(), 3);
        let p = HighlightsParams {
            scales: 3,
            ..Default::default()
        };
        assert_eq!(p.scale_count(), 1);
        let p = HighlightsParams {
            downsample: 1,
            scales: 12,
            noise_level: 0.5,
            ..Default::default()
        };
        assert_eq!(p.scale_count(), 12);
        assert_eq!(p.working_noise_level(), 0.5);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let bad = [
            HighlightsParams {
                white_balance: [1.0, -1.0, 1.0],
                ..Default::default()
            },
            HighlightsParams {
                clip_thresholds: [1.0, 1.0, 0.0, 1.0],
                ..Default::default()
            },
            HighlightsParams {
                iterations: 0,
                ..Default::default()
            },
            HighlightsParams {
                scales: 13,
                ..Default::default()
            },
            HighlightsParams {
                noise_level: f32::NAN,
                ..Default::default()
            },
            HighlightsParams {
                resolution_factor: 0.5,
                ..Default::default()
            },
            HighlightsParams {
                downsample: 0,
                ..Default::default()
            },
            HighlightsParams {
                solid_color: 1.5,
                ..Default::default()
            },
        ];
        for p in bad {
            assert!(matches!(
                p.validate(),
                Err(HighlightError::InvalidParameter(_))
            ));
        }

        let r = RcdParams {
            layout: TileLayout::stencil3x3(),
            ..Default::default()
        };
        assert!(r.validate().is_err());
        let r = RcdParams {
            layout: TileLayout {
                size: 112,
                border: 9,
                margin: 7,
            },
            ..Default::default()
        };
        assert!(r.validate().is_err());
        let r = RcdParams {
            white_point: 0.0,
            ..Default::default()
        };
        assert!(r.validate().is_err());
    }
}
