//! Sampled lens galaxies.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One sampled lens galaxy: an SIE mass model, its external shear and the
/// point source lensed behind it.
///
/// Angles are in degrees, positions in arcseconds, velocity dispersion in km/s.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GalaxyRecord {
    /// Stable identifier, carried through instantiation, parsing and archiving.
    pub index: u64,

    /// SIE velocity dispersion.
    pub velocity_dispersion: f64,

    /// Lens centre.
    pub x: f64,
    pub y: f64,

    /// SIE ellipticity in [0, 0.9].
    pub ellipticity: f64,

    /// SIE position angle.
    pub position_angle: f64,

    /// SIE core radius.
    pub core_radius: f64,

    /// External shear magnitude.
    pub shear: f64,

    /// External shear angle.
    pub shear_angle: f64,

    /// Convergence of the external perturbation.
    pub convergence: f64,

    pub lens_redshift: f64,
    pub source_redshift: f64,

    /// Point-source position in the source plane.
    pub source_x: f64,
    pub source_y: f64,
}

impl GalaxyRecord {
    /// SHA-256 hex digest over every parameter, index included.
    ///
    /// Two records share a fingerprint only when they are bit-identical.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        for value in self.parameters() {
            hasher.update(value.to_bits().to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Whether two records describe the same physical galaxy, ignoring the index.
    pub fn same_parameters(&self, other: &GalaxyRecord) -> bool {
        self.parameters()
            .iter()
            .zip(other.parameters().iter())
            .all(|(a, b)| a.to_bits() == b.to_bits())
    }

    fn parameters(&self) -> [f64; 13] {
        [
            self.velocity_dispersion,
            self.x,
            self.y,
            self.ellipticity,
            self.position_angle,
            self.core_radius,
            self.shear,
            self.shear_angle,
            self.convergence,
            self.lens_redshift,
            self.source_redshift,
            self.source_x,
            self.source_y,
        ]
    }
}

/// Digest of an ordered galaxy sequence.
pub fn galaxies_digest(galaxies: &[GalaxyRecord]) -> String {
    let mut hasher = Sha256::new();
    for galaxy in galaxies {
        hasher.update(galaxy.fingerprint().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
pub(crate) fn test_galaxy(index: u64) -> GalaxyRecord {
    GalaxyRecord {
        index,
        velocity_dispersion: 210.5,
        x: 0.0,
        y: 0.0,
        ellipticity: 0.31,
        position_angle: 42.0,
        core_radius: 0.0,
        shear: 0.05,
        shear_angle: 120.0,
        convergence: 0.0,
        lens_redshift: 0.5,
        source_redshift: 3.0,
        source_x: 0.1,
        source_y: -0.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = test_galaxy(1);
        let b = test_galaxy(1);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_sensitive_to_index_and_params() {
        let a = test_galaxy(1);
        assert_ne!(a.fingerprint(), test_galaxy(2).fingerprint());

        let mut b = a;
        b.shear += 1e-12;
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert!(!a.same_parameters(&b));
    }

    #[test]
    fn test_same_parameters_ignores_index() {
        assert!(test_galaxy(1).same_parameters(&test_galaxy(9)));
    }

    #[test]
    fn test_galaxies_digest_order_sensitive() {
        let a = vec![test_galaxy(0), test_galaxy(1)];
        let b = vec![test_galaxy(1), test_galaxy(0)];
        assert_ne!(galaxies_digest(&a), galaxies_digest(&b));
        assert_eq!(galaxies_digest(&a), galaxies_digest(&a.clone()));
    }
}
