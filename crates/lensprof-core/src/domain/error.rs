//! Error taxonomy for lensprof.
//!
//! Setup-time errors (`InvalidArgument`, `TemplateError`, `MissingDependency`)
//! abort a batch before any galaxy runs. Per-galaxy errors (`SimulatorFailure`,
//! `ParseError`) are recorded against the galaxy index and the batch continues.

/// lensprof domain errors.
#[derive(Debug, thiserror::Error)]
pub enum LensError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("template error: {0}")]
    TemplateError(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("simulator failure for galaxy {galaxy_index}: {reason}")]
    SimulatorFailure { galaxy_index: u64, reason: String },

    #[error("parse error for galaxy {galaxy_index}: {reason}")]
    ParseError { galaxy_index: u64, reason: String },

    #[error("trial identity conflict for trial '{trial_name}', galaxy {galaxy_index}: {detail}")]
    TrialIdentityConflict {
        trial_name: String,
        galaxy_index: u64,
        detail: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LensError {
    /// Whether this error belongs to a single galaxy rather than the whole batch.
    pub fn is_per_galaxy(&self) -> bool {
        matches!(
            self,
            LensError::SimulatorFailure { .. } | LensError::ParseError { .. }
        )
    }

    /// Galaxy index carried by a per-galaxy error.
    pub fn galaxy_index(&self) -> Option<u64> {
        match self {
            LensError::SimulatorFailure { galaxy_index, .. }
            | LensError::ParseError { galaxy_index, .. }
            | LensError::TrialIdentityConflict { galaxy_index, .. } => Some(*galaxy_index),
            _ => None,
        }
    }
}

/// Result type for lensprof operations.
pub type Result<T> = std::result::Result<T, LensError>;
