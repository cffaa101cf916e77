//! Batch configuration.

use std::path::PathBuf;
use std::time::Duration;

use lensprof_core::{LensError, Result};
use serde::{Deserialize, Serialize};

use crate::invoker::ProcessInvoker;

pub const ENV_SIMULATOR: &str = "LENSPROF_SIMULATOR";
pub const ENV_RESULTS_DIR: &str = "LENSPROF_RESULTS_DIR";
pub const ENV_TIMEOUT_SECS: &str = "LENSPROF_TIMEOUT_SECS";

pub const DEFAULT_SIMULATOR: &str = "glafic";
pub const DEFAULT_RESULTS_DIR: &str = "Results";

/// Settings for one batch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    /// Simulator executable, a bare name is looked up on `PATH`.
    pub simulator: PathBuf,

    /// Root under which trial directories are created.
    pub results_dir: PathBuf,

    /// Per-invocation timeout; `None` waits indefinitely.
    pub timeout_secs: Option<u64>,

    /// Value written to the template's `prefix` directive.
    pub output_prefix: String,

    /// File name of the instantiated configuration in each galaxy directory.
    pub config_file_name: String,

    /// Remove a galaxy's working directory once its output parsed.
    pub clean_galaxy_dirs: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            simulator: PathBuf::from(DEFAULT_SIMULATOR),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            timeout_secs: None,
            output_prefix: "out".to_string(),
            config_file_name: "case.input".to_string(),
            clean_galaxy_dirs: false,
        }
    }
}

impl BatchConfig {
    /// Defaults overridden by `LENSPROF_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(sim) = lookup(ENV_SIMULATOR).filter(|v| !v.is_empty()) {
            config.simulator = PathBuf::from(sim);
        }
        if let Some(dir) = lookup(ENV_RESULTS_DIR).filter(|v| !v.is_empty()) {
            config.results_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS).filter(|v| !v.is_empty()) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                LensError::InvalidArgument(format!("{ENV_TIMEOUT_SECS}={raw:?} is not a number"))
            })?;
            config.timeout_secs = (secs > 0).then_some(secs);
        }
        Ok(config)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Invoker for the configured simulator binary and timeout.
    pub fn process_invoker(&self) -> ProcessInvoker {
        ProcessInvoker::new(self.simulator.clone()).with_timeout(self.timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BatchConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, BatchConfig::default());
        assert_eq!(config.simulator, PathBuf::from("glafic"));
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_env_overrides() {
        let config = BatchConfig::from_lookup(lookup(&[
            (ENV_SIMULATOR, "/opt/glafic/bin/glafic"),
            (ENV_RESULTS_DIR, "/scratch/results"),
            (ENV_TIMEOUT_SECS, "120"),
        ]))
        .unwrap();
        assert_eq!(config.simulator, PathBuf::from("/opt/glafic/bin/glafic"));
        assert_eq!(config.results_dir, PathBuf::from("/scratch/results"));
        assert_eq!(config.timeout(), Some(Duration::from_secs(120)));

        let invoker = config.process_invoker();
        assert_eq!(invoker.program(), Path::new("/opt/glafic/bin/glafic"));
        assert_eq!(invoker.timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = BatchConfig::from_lookup(lookup(&[(ENV_TIMEOUT_SECS, "0")])).unwrap();
        assert_eq!(config.timeout_secs, None);
    }

    #[test]
    fn test_bad_timeout_rejected() {
        let err = BatchConfig::from_lookup(lookup(&[(ENV_TIMEOUT_SECS, "soon")])).unwrap_err();
        assert!(matches!(err, LensError::InvalidArgument(_)));
    }
}
