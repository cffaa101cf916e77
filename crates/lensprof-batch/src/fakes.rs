//! Scripted simulator for tests (no subprocess).
//!
//! [`ScriptedInvoker`] decides each run's outcome from the galaxy index,
//! which it recovers from the `galaxy-NNNNNN` working directory name, and
//! writes the point output file the real simulator would have produced.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use lensprof_core::{point_output_path, LensError, Result};

use crate::invoker::{Invocation, SimulatorInvoker};

/// What the scripted simulator does for one galaxy.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    /// Write this text as `<prefix>_point.dat` and exit 0.
    Output(String),
    /// Exit with this code and stderr, writing nothing.
    Exit { code: i32, stderr: String },
    /// Exit 0 without writing any output.
    Silent,
    /// Report a timeout.
    TimedOut,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedCall {
    pub galaxy_index: Option<u64>,
    pub config_path: PathBuf,
    pub config_text: String,
}

type Script = Box<dyn Fn(u64, &str) -> ScriptedOutcome + Send + Sync>;

pub struct ScriptedInvoker {
    prefix: String,
    script: Script,
    available: bool,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedInvoker {
    /// `script` receives the galaxy index and the instantiated config text.
    pub fn new<F>(prefix: impl Into<String>, script: F) -> Self
    where
        F: Fn(u64, &str) -> ScriptedOutcome + Send + Sync + 'static,
    {
        Self {
            prefix: prefix.into(),
            script: Box::new(script),
            available: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A simulator that fails preflight.
    pub fn unavailable() -> Self {
        let mut invoker = Self::new("out", |_, _| ScriptedOutcome::Silent);
        invoker.available = false;
        invoker
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// Parse `galaxy-000012` into 12.
fn galaxy_index_of(dir: &Path) -> Option<u64> {
    dir.file_name()?
        .to_str()?
        .strip_prefix("galaxy-")?
        .parse()
        .ok()
}

#[async_trait]
impl SimulatorInvoker for ScriptedInvoker {
    async fn preflight(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(LensError::MissingDependency(
                "scripted simulator unavailable".to_string(),
            ))
        }
    }

    async fn run(&self, config_path: &Path, working_dir: &Path) -> Result<Invocation> {
        let config_text = std::fs::read_to_string(config_path)?;
        let galaxy_index = galaxy_index_of(working_dir);
        self.calls.lock().unwrap().push(ScriptedCall {
            galaxy_index,
            config_path: config_path.to_path_buf(),
            config_text: config_text.clone(),
        });

        let outcome = (self.script)(galaxy_index.unwrap_or(u64::MAX), &config_text);
        let mut invocation = Invocation {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            output_dir: working_dir.to_path_buf(),
            timed_out: false,
        };
        match outcome {
            ScriptedOutcome::Output(text) => {
                std::fs::write(point_output_path(working_dir, &self.prefix), text)?;
            }
            ScriptedOutcome::Exit { code, stderr } => {
                invocation.exit_code = code;
                invocation.stderr = stderr;
            }
            ScriptedOutcome::Silent => {}
            ScriptedOutcome::TimedOut => {
                invocation.exit_code = -1;
                invocation.timed_out = true;
            }
        }
        Ok(invocation)
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
