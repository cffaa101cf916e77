//! Simulator invocation.
//!
//! [`SimulatorInvoker`] is the seam between the batch loop and the external
//! simulator. [`ProcessInvoker`] runs the real binary; tests substitute the
//! scripted invoker from the `test-support` feature.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lensprof_core::{LensError, Result};
use tokio::process::Command;
use tracing::debug;

/// Outcome of one simulator run.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Exit code, -1 when killed by a signal or the timeout.
    pub exit_code: i32,

    pub stdout: String,
    pub stderr: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Directory holding the simulator's output files.
    pub output_dir: PathBuf,

    pub timed_out: bool,
}

impl Invocation {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Last non-empty stderr line, for failure reasons.
    pub fn stderr_tail(&self) -> Option<&str> {
        self.stderr.lines().rev().map(str::trim).find(|l| !l.is_empty())
    }
}

#[async_trait]
pub trait SimulatorInvoker: Send + Sync {
    /// Check that the simulator can be launched at all.
    ///
    /// Fails with [`LensError::MissingDependency`] before any galaxy runs.
    async fn preflight(&self) -> Result<()>;

    /// Run the simulator on `config_path` with `working_dir` as its current
    /// directory, waiting until it exits.
    async fn run(&self, config_path: &Path, working_dir: &Path) -> Result<Invocation>;

    /// Name used in logs and run summaries.
    fn describe(&self) -> String;
}

/// Runs the simulator binary as a child process.
///
/// The program is resolved to an absolute path before it is spawned, since
/// each run changes into its galaxy directory first.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    program: PathBuf,
    timeout: Option<Duration>,
    resolved: OnceLock<PathBuf>,
}

impl ProcessInvoker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            resolved: OnceLock::new(),
        }
    }

    /// Kill runs that exceed `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Absolute path to spawn; the configured path when it cannot be resolved.
    fn launch_path(&self) -> PathBuf {
        if let Some(path) = self.resolved.get() {
            return path.clone();
        }
        match resolve_program(&self.program) {
            Some(path) => self.resolved.get_or_init(|| path).clone(),
            None => self.program.clone(),
        }
    }
}

#[async_trait]
impl SimulatorInvoker for ProcessInvoker {
    async fn preflight(&self) -> Result<()> {
        match resolve_program(&self.program) {
            Some(path) => {
                debug!(simulator = %path.display(), "resolved simulator");
                let _ = self.resolved.set(path);
                Ok(())
            }
            None => Err(LensError::MissingDependency(format!(
                "simulator {:?} not found or not executable",
                self.program
            ))),
        }
    }

    async fn run(&self, config_path: &Path, working_dir: &Path) -> Result<Invocation> {
        let start = Instant::now();
        let arg = config_path.strip_prefix(working_dir).unwrap_or(config_path);

        let child = Command::new(self.launch_path())
            .arg(arg)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    LensError::MissingDependency(format!(
                        "cannot launch simulator {:?}: {e}",
                        self.program
                    ))
                }
                _ => LensError::Io(e),
            })?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                // Dropping the future drops the child, which kills it.
                Err(_) => {
                    return Ok(Invocation {
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: format!("timed out after {}s", limit.as_secs_f64()),
                        duration_ms: start.elapsed().as_millis() as u64,
                        output_dir: working_dir.to_path_buf(),
                        timed_out: true,
                    })
                }
            },
            None => child.wait_with_output().await?,
        };

        Ok(Invocation {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            output_dir: working_dir.to_path_buf(),
            timed_out: false,
        })
    }

    fn describe(&self) -> String {
        self.program.display().to_string()
    }
}

/// Locate an executable: paths containing a separator are checked directly,
/// bare names are searched on `PATH`. Relative results are made absolute
/// against the current directory.
pub fn resolve_program(program: &Path) -> Option<PathBuf> {
    let found = if program.components().count() > 1 || program.is_absolute() {
        is_executable(program).then(|| program.to_path_buf())?
    } else {
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))?
    };
    if found.is_absolute() {
        Some(found)
    } else {
        std::env::current_dir().ok().map(|cwd| cwd.join(found))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_succeeded() {
        let inv = Invocation {
            exit_code: 0,
            stdout: String::new(),
            stderr: "warning\n\nfatal: bad input\n\n".to_string(),
            duration_ms: 3,
            output_dir: PathBuf::from("."),
            timed_out: false,
        };
        assert!(inv.succeeded());
        assert_eq!(inv.stderr_tail(), Some("fatal: bad input"));
    }

    #[tokio::test]
    async fn test_preflight_missing_program() {
        let invoker = ProcessInvoker::new("lensprof-no-such-simulator-xyz");
        let err = invoker.preflight().await.unwrap_err();
        assert!(matches!(err, LensError::MissingDependency(_)));
    }

    #[tokio::test]
    async fn test_run_missing_program_is_missing_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = ProcessInvoker::new("/nonexistent/glafic");
        let err = invoker
            .run(&dir.path().join("case.input"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, LensError::MissingDependency(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("case.input"), "hello").unwrap();

        let invoker = ProcessInvoker::new("cat");
        invoker.preflight().await.unwrap();
        let inv = invoker
            .run(&dir.path().join("case.input"), dir.path())
            .await
            .unwrap();
        assert!(inv.succeeded());
        assert_eq!(inv.stdout, "hello");
        assert_eq!(inv.output_dir, dir.path());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_reported() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = ProcessInvoker::new("false");
        let inv = invoker
            .run(&dir.path().join("case.input"), dir.path())
            .await
            .unwrap();
        assert!(!inv.succeeded());
        assert_ne!(inv.exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_run() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let invoker = ProcessInvoker::new(&script).with_timeout(Some(Duration::from_millis(200)));
        let inv = invoker
            .run(&dir.path().join("case.input"), dir.path())
            .await
            .unwrap();
        assert!(inv.timed_out);
        assert!(!inv.succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relative_program_runs_from_galaxy_dir() {
        use std::os::unix::fs::PermissionsExt;

        let cwd = std::env::current_dir().unwrap();
        let bin = tempfile::tempdir_in(&cwd).unwrap();
        let script = bin.path().join("sim.sh");
        std::fs::write(&script, "#!/bin/sh\necho ran \"$1\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let relative = Path::new(".").join(script.strip_prefix(&cwd).unwrap());

        let resolved = resolve_program(&relative).unwrap();
        assert!(resolved.is_absolute());

        let work = tempfile::tempdir().unwrap();
        let invoker = ProcessInvoker::new(&relative);
        invoker.preflight().await.unwrap();
        let inv = invoker
            .run(&work.path().join("case.input"), work.path())
            .await
            .unwrap();
        assert!(inv.succeeded(), "{}", inv.stderr);
        assert_eq!(inv.stdout.trim(), "ran case.input");
        assert_eq!(invoker.program(), relative.as_path());
    }
}
