//! Structured events for the batch lifecycle.
//!
//! Every event carries an `event` field (`batch.started`, `galaxy.archived`,
//! ...) so log pipelines can filter on it regardless of the message text.

use tracing::{info, warn, Span};

use crate::domain::{FailureRecord, TrialKey, TrialResult};

/// Span covering one batch run; attach with `Instrument::instrument`.
pub fn trial_span(trial: &TrialKey) -> Span {
    tracing::info_span!("lensprof.trial", trial = %trial.trial_name, seed = trial.seed)
}

pub fn emit_batch_started(trial: &TrialKey, galaxies: usize, run_id: &str) {
    info!(
        event = "batch.started",
        trial = %trial,
        galaxies = galaxies,
        run_id = %run_id,
    );
}

pub fn emit_galaxy_archived(result: &TrialResult, duration_ms: u64) {
    info!(
        event = "galaxy.archived",
        galaxy = result.galaxy_index,
        images = result.image_count(),
        multiply_imaged = result.flags.multiply_imaged,
        duration_ms = duration_ms,
    );
}

pub fn emit_galaxy_failed(failure: &FailureRecord) {
    warn!(
        event = "galaxy.failed",
        galaxy = failure.galaxy_index,
        kind = ?failure.kind,
        reason = %failure.reason,
    );
}

/// Emit event: batch finished.
pub fn emit_batch_finished(
    trial: &TrialKey,
    succeeded: usize,
    failed: usize,
    multiply_imaged: usize,
    duration_ms: u64,
) {
    info!(
        event = "batch.finished",
        trial = %trial,
        succeeded = succeeded,
        failed = failed,
        multiply_imaged = multiply_imaged,
        duration_ms = duration_ms,
    );
}
