//! Per-trial output directories.
//!
//! Layout under the results root:
//!
//! ```text
//! <results_root>/<trial_name>---seed<seed>/
//!     archive.json
//!     errors.json
//!     run_summary.json
//!     galaxy-000000/
//!     galaxy-000001/
//!     ...
//! ```

use std::path::{Path, PathBuf};

use lensprof_core::{LensError, Result, TrialKey, ARCHIVE_FILE_NAME};

pub const ERRORS_FILE_NAME: &str = "errors.json";
pub const RUN_SUMMARY_FILE_NAME: &str = "run_summary.json";

/// Exclusive output directory of one trial.
#[derive(Debug, Clone)]
pub struct TrialWorkspace {
    key: TrialKey,
    dir: PathBuf,
}

impl TrialWorkspace {
    /// Directory a trial would use, without creating it.
    pub fn path_for(results_root: &Path, key: &TrialKey) -> PathBuf {
        results_root.join(key.to_string())
    }

    /// Create the trial directory. Refuses to reuse an existing one so that
    /// two workers with the same trial name and seed cannot interleave output.
    pub fn create(results_root: &Path, key: &TrialKey) -> Result<Self> {
        validate_trial_name(&key.trial_name)?;
        std::fs::create_dir_all(results_root)?;

        let dir = Self::path_for(results_root, key);
        std::fs::create_dir(&dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                LensError::Storage(format!(
                    "trial directory {} already exists; choose another trial name or seed",
                    dir.display()
                ))
            } else {
                LensError::Io(e)
            }
        })?;

        Ok(Self {
            key: key.clone(),
            dir,
        })
    }

    pub fn key(&self) -> &TrialKey {
        &self.key
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn galaxy_dir(&self, galaxy_index: u64) -> PathBuf {
        self.dir.join(format!("galaxy-{galaxy_index:06}"))
    }

    /// Create and return the working directory for one galaxy.
    pub fn create_galaxy_dir(&self, galaxy_index: u64) -> Result<PathBuf> {
        let dir = self.galaxy_dir(galaxy_index);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.dir.join(ARCHIVE_FILE_NAME)
    }

    pub fn errors_path(&self) -> PathBuf {
        self.dir.join(ERRORS_FILE_NAME)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(RUN_SUMMARY_FILE_NAME)
    }
}

/// Trial names become directory names.
pub fn validate_trial_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LensError::InvalidArgument(
            "trial name must not be empty".to_string(),
        ));
    }
    if name == "." || name == ".." {
        return Err(LensError::InvalidArgument(format!(
            "trial name {name:?} is reserved"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| matches!(c, '/' | '\\') || c.is_control())
    {
        return Err(LensError::InvalidArgument(format!(
            "trial name {name:?} contains forbidden character {c:?}"
        )));
    }
    Ok(())
}
