//! Galaxy population sampling.
//!
//! Parameter spaces follow the SIE population of Oguri (2018): velocity
//! dispersions weighted by the local velocity function, a truncated normal
//! ellipticity and a log-normal external shear. Every distribution is fixed
//! here; callers choose only the population size and the seed.
//!
//! The generator is ChaCha8 seeded through `seed_from_u64`, whose stream is
//! stable across `rand_chacha` releases, so a (count, seed) pair always yields
//! bit-identical galaxies.

use std::f64::consts::LN_10;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, LogNormal, Normal};
use statrs::function::gamma::gamma;
use tracing::debug;

use crate::domain::{GalaxyRecord, LensError, Result};

/// Velocity dispersion range (km/s). Below 75 multiple images are unlikely,
/// above 375 such galaxies are not observed.
pub const SIGMA_MIN: f64 = 75.0;
pub const SIGMA_MAX: f64 = 375.0;
pub const SIGMA_BINS: usize = 15;

// Local velocity function parameters, (h/0.7)^3 Mpc^-3 and km/s.
const PHI_STAR: f64 = 2.099e-2;
const SIGMA_STAR: f64 = 113.78;
const ALPHA: f64 = 0.94;
const BETA: f64 = 1.85;

pub const ELLIPTICITY_MEAN: f64 = 0.3;
pub const ELLIPTICITY_STD: f64 = 0.16;
pub const ELLIPTICITY_MAX: f64 = 0.9;

/// Median external shear and its scatter in dex.
pub const SHEAR_MEDIAN: f64 = 0.05;
pub const SHEAR_SCATTER_DEX: f64 = 0.2;

pub const LENS_REDSHIFT_RANGE: (f64, f64) = (0.3, 0.8);
pub const SOURCE_REDSHIFT_RANGE: (f64, f64) = (2.5, 4.0);

/// Half-width of the square source-plane box (arcsec).
pub const SOURCE_HALF_WIDTH: f64 = 1.0;

/// Local velocity function φ(σ).
pub fn phi_loc(sigma: f64) -> f64 {
    let ratio = sigma / SIGMA_STAR;
    PHI_STAR * ratio.powf(ALPHA) * (-ratio.powf(BETA)).exp() * BETA / gamma(ALPHA / BETA) / sigma
}

/// Draw `count` galaxies deterministically from `seed`.
pub fn sample(count: usize, seed: u64) -> Result<Vec<GalaxyRecord>> {
    if count == 0 {
        return Err(LensError::InvalidArgument(
            "galaxy count must be positive".to_string(),
        ));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let ellipticity = Normal::new(ELLIPTICITY_MEAN, ELLIPTICITY_STD)
        .map_err(|e| LensError::InvalidArgument(format!("ellipticity distribution: {e}")))?;
    let shear = LogNormal::new(SHEAR_MEDIAN.ln(), SHEAR_SCATTER_DEX * LN_10)
        .map_err(|e| LensError::InvalidArgument(format!("shear distribution: {e}")))?;

    let dispersions = dispersion_samples(count, &mut rng);

    let galaxies: Vec<GalaxyRecord> = dispersions
        .into_iter()
        .enumerate()
        .map(|(index, velocity_dispersion)| GalaxyRecord {
            index: index as u64,
            velocity_dispersion,
            x: 0.0,
            y: 0.0,
            ellipticity: truncated(&ellipticity, &mut rng, |e| (0.0..=ELLIPTICITY_MAX).contains(&e)),
            position_angle: rng.gen_range(0.0..360.0),
            core_radius: 0.0,
            shear: truncated(&shear, &mut rng, |g| g < 1.0),
            shear_angle: rng.gen_range(0.0..360.0),
            convergence: 0.0,
            lens_redshift: rng.gen_range(LENS_REDSHIFT_RANGE.0..=LENS_REDSHIFT_RANGE.1),
            source_redshift: rng.gen_range(SOURCE_REDSHIFT_RANGE.0..=SOURCE_REDSHIFT_RANGE.1),
            source_x: rng.gen_range(-SOURCE_HALF_WIDTH..=SOURCE_HALF_WIDTH),
            source_y: rng.gen_range(-SOURCE_HALF_WIDTH..=SOURCE_HALF_WIDTH),
        })
        .collect();

    debug!(count, seed, "sampled galaxy population");
    Ok(galaxies)
}

/// Rejection-sample `dist` until `accept` holds.
fn truncated<D, F>(dist: &D, rng: &mut ChaCha8Rng, accept: F) -> f64
where
    D: Distribution<f64>,
    F: Fn(f64) -> bool,
{
    loop {
        let value = dist.sample(rng);
        if accept(value) {
            return value;
        }
    }
}

/// Per-bin galaxy counts proportional to φ(σ) at each bin's left edge,
/// corrected by random ±1 steps until they sum to `count`.
fn bin_allocation(count: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let width = (SIGMA_MAX - SIGMA_MIN) / SIGMA_BINS as f64;
    let weights: Vec<f64> = (0..SIGMA_BINS)
        .map(|i| phi_loc(SIGMA_MIN + i as f64 * width))
        .collect();
    let total: f64 = weights.iter().sum();

    let mut alloc: Vec<usize> = weights
        .iter()
        .map(|w| (w * count as f64 / total).round() as usize)
        .collect();

    loop {
        let sum: usize = alloc.iter().sum();
        if sum == count {
            break;
        }
        let pos = rng.gen_range(0..SIGMA_BINS);
        if sum > count {
            if alloc[pos] > 0 {
                alloc[pos] -= 1;
            }
        } else {
            alloc[pos] += 1;
        }
    }
    alloc
}

/// Representative, shuffled velocity dispersions: uniform within each bin.
fn dispersion_samples(count: usize, rng: &mut ChaCha8Rng) -> Vec<f64> {
    let width = (SIGMA_MAX - SIGMA_MIN) / SIGMA_BINS as f64;
    let alloc = bin_allocation(count, rng);

    let mut samples = Vec::with_capacity(count);
    for (bin, &n) in alloc.iter().enumerate() {
        let left = SIGMA_MIN + bin as f64 * width;
        for _ in 0..n {
            samples.push(rng.gen_range(left..left + width));
        }
    }
    samples.shuffle(rng);
    samples
}
