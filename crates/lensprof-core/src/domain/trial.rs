//! Trial identity, per-galaxy results and the failure log.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::LensError;

/// Identity of one batch run over a galaxy population.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrialKey {
    pub trial_name: String,
    pub seed: u64,
}

impl TrialKey {
    pub fn new(trial_name: impl Into<String>, seed: u64) -> Self {
        Self {
            trial_name: trial_name.into(),
            seed,
        }
    }
}

impl fmt::Display for TrialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}---seed{}", self.trial_name, self.seed)
    }
}

/// One lensed image reported by the simulator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LensedImage {
    /// Image-plane position (arcsec).
    pub x: f64,
    pub y: f64,

    /// Signed magnification.
    pub magnification: f64,

    /// Arrival time relative to the first image (days).
    pub time_delay: f64,
}

/// Flags derived from a parsed simulator output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrialFlags {
    /// The simulator found no images for this configuration.
    pub zero_image: bool,

    /// Two or more images.
    pub multiply_imaged: bool,

    /// Every reported value is finite.
    pub valid: bool,
}

/// Parsed simulator output for exactly one galaxy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrialResult {
    pub galaxy_index: u64,
    pub images: Vec<LensedImage>,
    pub flags: TrialFlags,
}

impl TrialResult {
    pub fn new(galaxy_index: u64, images: Vec<LensedImage>) -> Self {
        let valid = images.iter().all(|img| {
            img.x.is_finite()
                && img.y.is_finite()
                && img.magnification.is_finite()
                && img.time_delay.is_finite()
        });
        let flags = TrialFlags {
            zero_image: images.is_empty(),
            multiply_imaged: images.len() > 1,
            valid,
        };
        Self {
            galaxy_index,
            images,
            flags,
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Spread between the earliest and latest arrival, `None` without images.
    pub fn delay_spread(&self) -> Option<f64> {
        let first = self.images.first()?;
        let (lo, hi) = self
            .images
            .iter()
            .fold((first.time_delay, first.time_delay), |(lo, hi), img| {
                (lo.min(img.time_delay), hi.max(img.time_delay))
            });
        Some(hi - lo)
    }

    /// Smallest delay between any two images, `None` unless multiply imaged.
    pub fn min_pair_delay(&self) -> Option<f64> {
        let mut min: Option<f64> = None;
        for (k, a) in self.images.iter().enumerate() {
            for b in &self.images[k + 1..] {
                let delay = (a.time_delay - b.time_delay).abs();
                min = Some(min.map_or(delay, |m| m.min(delay)));
            }
        }
        min
    }

    /// Sum of unsigned magnifications over all images.
    pub fn total_magnification(&self) -> f64 {
        self.images.iter().map(|img| img.magnification.abs()).sum()
    }
}

/// Why a galaxy ended up in the error log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SimulatorFailure,
    ParseError,
}

/// A single galaxy that produced no archived result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub galaxy_index: u64,
    pub kind: FailureKind,
    pub reason: String,
}

impl FailureRecord {
    /// Convert a per-galaxy error into a log entry; other errors yield `None`.
    pub fn from_error(err: &LensError) -> Option<Self> {
        match err {
            LensError::SimulatorFailure {
                galaxy_index,
                reason,
            } => Some(Self {
                galaxy_index: *galaxy_index,
                kind: FailureKind::SimulatorFailure,
                reason: reason.clone(),
            }),
            LensError::ParseError {
                galaxy_index,
                reason,
            } => Some(Self {
                galaxy_index: *galaxy_index,
                kind: FailureKind::ParseError,
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// Failures of one trial, keyed by galaxy index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorLog {
    pub trial: TrialKey,
    pub failures: Vec<FailureRecord>,
}

impl ErrorLog {
    pub fn new(trial: TrialKey) -> Self {
        Self {
            trial,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, failure: FailureRecord) {
        self.failures.push(failure);
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn contains(&self, galaxy_index: u64) -> bool {
        self.failures.iter().any(|f| f.galaxy_index == galaxy_index)
    }

    pub fn count_of(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }

    pub fn galaxy_indices(&self) -> Vec<u64> {
        self.failures.iter().map(|f| f.galaxy_index).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(time_delay: f64, magnification: f64) -> LensedImage {
        LensedImage {
            x: 0.5,
            y: -0.5,
            magnification,
            time_delay,
        }
    }

    #[test]
    fn test_zero_image_result() {
        let result = TrialResult::new(4, vec![]);
        assert!(result.flags.zero_image);
        assert!(!result.flags.multiply_imaged);
        assert!(result.flags.valid);
        assert_eq!(result.image_count(), 0);
        assert_eq!(result.delay_spread(), None);
        assert_eq!(result.min_pair_delay(), None);
    }

    #[test]
    fn test_delay_statistics() {
        let result = TrialResult::new(
            1,
            vec![image(0.0, 3.2), image(12.5, -1.4), image(4.0, 0.6)],
        );
        assert!(result.flags.multiply_imaged);
        assert_eq!(result.delay_spread(), Some(12.5));
        assert_eq!(result.min_pair_delay(), Some(4.0));
        assert!((result.total_magnification() - 5.2).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_values_invalidate() {
        let result = TrialResult::new(2, vec![image(f64::NAN, 1.0)]);
        assert!(!result.flags.valid);
    }

    #[test]
    fn test_failure_record_from_error() {
        let err = LensError::SimulatorFailure {
            galaxy_index: 3,
            reason: "exit code 2".to_string(),
        };
        let record = FailureRecord::from_error(&err).expect("per-galaxy error");
        assert_eq!(record.galaxy_index, 3);
        assert_eq!(record.kind, FailureKind::SimulatorFailure);

        let err = LensError::MissingDependency("glafic".to_string());
        assert!(FailureRecord::from_error(&err).is_none());
    }

    #[test]
    fn test_error_log_counts() {
        let mut log = ErrorLog::new(TrialKey::new("t1", 7));
        assert!(log.is_empty());
        log.record(FailureRecord {
            galaxy_index: 3,
            kind: FailureKind::ParseError,
            reason: "truncated".to_string(),
        });
        assert_eq!(log.len(), 1);
        assert!(log.contains(3));
        assert!(!log.contains(4));
        assert_eq!(log.count_of(FailureKind::ParseError), 1);
        assert_eq!(log.count_of(FailureKind::SimulatorFailure), 0);
    }

    #[test]
    fn test_trial_key_display() {
        assert_eq!(TrialKey::new("t1", 42).to_string(), "t1---seed42");
    }
}
