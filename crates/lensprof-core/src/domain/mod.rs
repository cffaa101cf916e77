//! Domain models for lensprof.
//!
//! - `GalaxyRecord`: one sampled lens galaxy, immutable once drawn
//! - `TrialResult`: parsed simulator output for one galaxy
//! - `TrialKey`: identity of a batch run (trial name + seed)
//! - `ErrorLog`: per-galaxy failures of a batch

pub mod error;
pub mod galaxy;
pub mod trial;

pub use error::{LensError, Result};
pub use galaxy::{galaxies_digest, GalaxyRecord};
pub use trial::{
    ErrorLog, FailureKind, FailureRecord, LensedImage, TrialFlags, TrialKey, TrialResult,
};
