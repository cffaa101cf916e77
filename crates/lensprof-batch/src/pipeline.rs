//! Batch aggregation over a galaxy population.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use lensprof_core::obs;
use lensprof_core::storage::write_json_atomic;
use lensprof_core::{
    galaxies_digest, parse_output_dir, ConfigTemplate, ErrorLog, FailureRecord, GalaxyRecord,
    LensError, Result, ResultArchive, TrialKey, TrialResult,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::invoker::SimulatorInvoker;
use crate::workspace::TrialWorkspace;

/// Persisted overview of one batch run (`run_summary.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub trial: TrialKey,
    pub simulator: String,
    pub template_digest: String,
    pub galaxies_digest: String,

    pub galaxies: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub multiply_imaged: usize,
    pub zero_image: usize,

    /// Share of galaxies archived, in percent.
    pub success_percent: f64,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Everything a batch produced.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub archive: ResultArchive,
    pub errors: ErrorLog,
    pub summary: RunSummary,
    pub trial_dir: PathBuf,
}

/// Sequential batch runner.
pub struct TrialPipeline;

impl TrialPipeline {
    /// Run every galaxy through instantiate, invoke and parse.
    ///
    /// Each galaxy index ends up in exactly one of the archive or the error
    /// log. Invalid arguments, a missing simulator or an existing trial
    /// directory abort before any galaxy runs.
    pub async fn run_batch(
        invoker: &dyn SimulatorInvoker,
        template: &ConfigTemplate,
        galaxies: &[GalaxyRecord],
        trial: &TrialKey,
        config: &BatchConfig,
    ) -> Result<BatchOutcome> {
        Self::run_inner(invoker, template, galaxies, trial, config)
            .instrument(obs::trial_span(trial))
            .await
    }

    async fn run_inner(
        invoker: &dyn SimulatorInvoker,
        template: &ConfigTemplate,
        galaxies: &[GalaxyRecord],
        trial: &TrialKey,
        config: &BatchConfig,
    ) -> Result<BatchOutcome> {
        validate_galaxies(galaxies)?;
        invoker.preflight().await?;
        let workspace = TrialWorkspace::create(&config.results_dir, trial)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        obs::emit_batch_started(trial, galaxies.len(), &run_id.to_string());

        let mut archive = ResultArchive::for_trial(trial.clone());
        let mut errors = ErrorLog::new(trial.clone());

        for galaxy in galaxies {
            let step = process_galaxy(
                invoker,
                template,
                galaxy,
                trial,
                &workspace,
                config,
                &mut archive,
                &mut errors,
            )
            .await;
            if let Err(e) = step {
                warn!(galaxy = galaxy.index, error = %e, "batch aborted");
                persist_partial(&workspace, &archive, &errors);
                return Err(e);
            }
        }

        let entries = archive.entries();
        let succeeded = entries.len();
        let summary = RunSummary {
            run_id,
            trial: trial.clone(),
            simulator: invoker.describe(),
            template_digest: template.digest().to_string(),
            galaxies_digest: galaxies_digest(galaxies),
            galaxies: galaxies.len(),
            succeeded,
            failed: errors.len(),
            multiply_imaged: entries
                .iter()
                .filter(|e| e.result.flags.multiply_imaged)
                .count(),
            zero_image: entries
                .iter()
                .filter(|e| e.result.flags.zero_image)
                .count(),
            success_percent: 100.0 * succeeded as f64 / galaxies.len() as f64,
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        archive.save(&workspace.archive_path())?;
        write_json_atomic(&workspace.errors_path(), &errors)?;
        write_json_atomic(&workspace.summary_path(), &summary)?;

        obs::emit_batch_finished(
            trial,
            summary.succeeded,
            summary.failed,
            summary.multiply_imaged,
            summary.duration_ms,
        );

        Ok(BatchOutcome {
            archive,
            errors,
            summary,
            trial_dir: workspace.dir().to_path_buf(),
        })
    }
}

/// Run one galaxy and file it under the archive or the error log.
///
/// Only errors that are not attributable to this galaxy are returned.
#[allow(clippy::too_many_arguments)]
async fn process_galaxy(
    invoker: &dyn SimulatorInvoker,
    template: &ConfigTemplate,
    galaxy: &GalaxyRecord,
    trial: &TrialKey,
    workspace: &TrialWorkspace,
    config: &BatchConfig,
    archive: &mut ResultArchive,
    errors: &mut ErrorLog,
) -> Result<()> {
    let galaxy_start = Instant::now();
    let dir = workspace.create_galaxy_dir(galaxy.index)?;

    match run_galaxy(invoker, template, galaxy, &dir, config).await {
        Ok(result) => {
            archive.append(trial, galaxy, &result)?;
            obs::emit_galaxy_archived(&result, galaxy_start.elapsed().as_millis() as u64);
            if config.clean_galaxy_dirs {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    warn!(
                        galaxy = galaxy.index,
                        error = %e,
                        "could not remove galaxy directory"
                    );
                }
            }
            Ok(())
        }
        Err(e) => match FailureRecord::from_error(&e) {
            Some(failure) => {
                obs::emit_galaxy_failed(&failure);
                errors.record(failure);
                Ok(())
            }
            None => Err(e),
        },
    }
}

/// Instantiate, invoke and parse one galaxy.
async fn run_galaxy(
    invoker: &dyn SimulatorInvoker,
    template: &ConfigTemplate,
    galaxy: &GalaxyRecord,
    dir: &Path,
    config: &BatchConfig,
) -> Result<TrialResult> {
    let galaxy_index = galaxy.index;
    let config_path = dir.join(&config.config_file_name);
    std::fs::write(
        &config_path,
        template.instantiate(galaxy, &config.output_prefix),
    )?;

    let invocation = match invoker.run(&config_path, dir).await {
        Ok(invocation) => invocation,
        Err(e @ LensError::MissingDependency(_)) => return Err(e),
        Err(e) => {
            return Err(LensError::SimulatorFailure {
                galaxy_index,
                reason: e.to_string(),
            })
        }
    };

    if invocation.timed_out {
        return Err(LensError::SimulatorFailure {
            galaxy_index,
            reason: format!("timed out after {} ms", invocation.duration_ms),
        });
    }
    if invocation.exit_code != 0 {
        let reason = match invocation.stderr_tail() {
            Some(tail) => format!("exit code {}: {tail}", invocation.exit_code),
            None => format!("exit code {}", invocation.exit_code),
        };
        return Err(LensError::SimulatorFailure {
            galaxy_index,
            reason,
        });
    }

    parse_output_dir(&invocation.output_dir, &config.output_prefix, galaxy_index)
}

fn validate_galaxies(galaxies: &[GalaxyRecord]) -> Result<()> {
    if galaxies.is_empty() {
        return Err(LensError::InvalidArgument(
            "galaxy list is empty".to_string(),
        ));
    }
    let mut seen = HashSet::with_capacity(galaxies.len());
    for galaxy in galaxies {
        if !seen.insert(galaxy.index) {
            return Err(LensError::InvalidArgument(format!(
                "galaxy index {} appears more than once",
                galaxy.index
            )));
        }
    }
    Ok(())
}

/// Best-effort write of what a batch produced before a fatal error.
fn persist_partial(workspace: &TrialWorkspace, archive: &ResultArchive, errors: &ErrorLog) {
    let written = archive
        .save(&workspace.archive_path())
        .and_then(|_| write_json_atomic(&workspace.errors_path(), errors));
    match written {
        Ok(()) => info!(dir = %workspace.dir().display(), "saved partial results"),
        Err(e) => warn!(error = %e, "could not save partial results"),
    }
}
