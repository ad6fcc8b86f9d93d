//! External command execution for engine calls.

use crate::error::EngineError;
use crate::Result;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// A single engine invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Human-readable operation label used in errors and logs.
    pub operation: String,

    /// Program to execute.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,

    /// Working directory (inherits the caller's when unset).
    pub current_dir: Option<PathBuf>,

    /// Deadline for the whole invocation; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Create a spec with no working directory and no timeout.
    pub fn new(operation: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            operation: operation.into(),
            program: program.into(),
            args,
            current_dir: None,
            timeout: None,
        }
    }

    /// Run inside `dir`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Bound the invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn spawn_error(&self, err: std::io::Error) -> EngineError {
        if err.kind() == std::io::ErrorKind::NotFound {
            EngineError::NotInstalled {
                program: self.program.clone(),
            }
        } else {
            EngineError::Io(err)
        }
    }
}

/// Captured result of an engine invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Operation label.
    pub operation: String,

    /// Exit code (`None` when killed by a signal).
    pub exit_code: Option<i32>,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Convert a non-zero exit into `CommandFailed`.
    pub fn into_result(self) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(EngineError::command_failed(
                self.operation,
                self.exit_code,
                &self.stderr,
            ))
        }
    }
}

/// Run a command to completion with stdout/stderr captured.
pub async fn run_captured(spec: &CommandSpec) -> Result<CommandOutput> {
    let start = Instant::now();
    debug!(operation = %spec.operation, program = %spec.program, args = ?spec.args, "running engine command");

    let child = spec
        .command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spec.spawn_error(e))?;

    let output = match spec.timeout {
        Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| EngineError::TimedOut {
                operation: spec.operation.clone(),
                timeout_secs: timeout.as_secs(),
            })??,
        None => child.wait_with_output().await?,
    };

    Ok(CommandOutput {
        operation: spec.operation.clone(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Run a command attached to the caller's terminal and return its exit code.
///
/// Used for `logs`, `exec` and `run`, where output streams straight to the user.
pub async fn run_attached(spec: &CommandSpec) -> Result<i32> {
    debug!(operation = %spec.operation, program = %spec.program, args = ?spec.args, "running attached engine command");

    let mut child = spec
        .command()
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| spec.spawn_error(e))?;

    let status = child.wait().await?;
    Ok(status.code().unwrap_or(-1))
}
