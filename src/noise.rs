//! Seedable photon noise.
//!
//! Every pixel draws from its own [`SmallRng`] seeded from its coordinates and a
//! caller seed, so the noise field does not depend on thread scheduling.
//!
//! ```text
//!   n      = gaussian(0, 1)                       (Box-Muller)
//!   r      = sigma * n + 2 * sqrt(max(mu + 3/8, 0)) (Anscombe domain)
//!   result = (r^2 - sigma^2) / 4 - 3/8
//! ```

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::buffer::Rgba;

/// Channels taking the cosine branch of the Box-Muller pair.
const FLIP: [bool; 4] = [true, false, true, false];

#[inline]
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Random generator of the pixel at (`row`, `col`).
pub fn pixel_rng(row: usize, col: usize, seed: u64) -> SmallRng {
    let key = splitmix64(seed ^ splitmix64(((row as u64) << 32) | (col as u64 & 0xffff_ffff)));
    SmallRng::seed_from_u64(key)
}

/// Draw one standard normal sample per channel.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> Rgba {
    let mut out = [0.0f32; 4];
    for (o, flip) in out.iter_mut().zip(FLIP) {
        // (0, 1] keeps the logarithm finite
        let u1: f32 = 1.0 - rng.gen::<f32>();
        let u2: f32 = rng.gen();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f32::consts::PI * u2;
        *o = if flip { r * theta.cos() } else { r * theta.sin() };
    }
    out
}

/// Poisson-like noise around `mu` with per-channel spread `sigma`.
pub fn poisson<R: Rng + ?Sized>(rng: &mut R, mu: &Rgba, sigma: &Rgba) -> Rgba {
    let n = gaussian(rng);
    let mut out = [0.0f32; 4];
    for c in 0..4 {
        let r = sigma[c] * n[c] + 2.0 * (mu[c] + 0.375).max(0.0).sqrt();
        out[c] = (r * r - sigma[c] * sigma[c]) * 0.25 - 0.375;
    }
    out
}

/// Add noise of relative strength `noise_level` to `px`, blended by `alpha`.
///
/// The noise is folded around the current value, so no channel ever decreases.
pub fn brighten(px: &mut Rgba, alpha: f32, noise_level: f32, row: usize, col: usize, seed: u64) {
    let mut rng = pixel_rng(row, col, seed);
    let sigma = px.map(|v| v * noise_level);
    let noise = poisson(&mut rng, px, &sigma);
    for c in 0..4 {
        let up = px[c] + (noise[c] - px[c]).abs();
        px[c] = (alpha * up + (1.0 - alpha) * px[c]).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_pixel_same_noise() {
        let a = gaussian(&mut pixel_rng(12, 40, 3));
        let b = gaussian(&mut pixel_rng(12, 40, 3));
        let c = gaussian(&mut pixel_rng(40, 12, 3));
        let d = gaussian(&mut pixel_rng(12, 40, 4));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn gaussian_moments() {
        let mut rng = pixel_rng(0, 0, 99);
        let n = 20_000;
        let (mut sum, mut sum_sq) = (0.0f64, 0.0f64);
        for _ in 0..n {
            for v in gaussian(&mut rng) {
                sum += v as f64;
                sum_sq += (v * v) as f64;
            }
        }
        let mean = sum / (4 * n) as f64;
        let var = sum_sq / (4 * n) as f64 - mean * mean;
        assert!(mean.abs() < 0.03, "mean {mean}");
        assert!((var - 1.0).abs() < 0.05, "variance {var}");
    }

    #[test]
    fn zero_sigma_is_identity() {
        let mut rng = pixel_rng(1, 2, 0);
        let mu = [0.5, 1.25, 3.0, 0.0];
        let out = poisson(&mut rng, &mu, &[0.0; 4]);
        for c in 0..4 {
            assert!((out[c] - mu[c]).abs() < 1e-5);
        }
    }

    #[test]
    fn noise_only_brightens() {
        for row in 0..32 {
            for col in 0..32 {
                let before = [0.8, 0.3, 1.7, 2.0];
                let mut px = before;
                brighten(&mut px, 0.6, 0.5, row, col, 7);
                for c in 0..4 {
                    assert!(px[c] >= before[c] - 1e-6, "{row} {col} {c}");
                }
            }
        }
    }

    #[test]
    fn transparent_pixel_is_untouched() {
        let before = [0.8, 0.3, 1.7, 2.0];
        let mut px = before;
        brighten(&mut px, 0.0, 0.5, 3, 4, 1);
        assert_eq!(px, before);
    }
}
