use crate::error::{FleetError, Result};
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// One `key=value` argument handed to a worker program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArg {
    pub key: &'static str,
    pub value: String,
}

impl WorkerArg {
    pub fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

impl fmt::Display for WorkerArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Outcome of one worker invocation. An empty `stderr` means success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ProcessResult {
    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: -1,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.stderr.is_empty()
    }
}

/// Runs external worker programs. Implementations block until the program exits.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[WorkerArg]) -> ProcessResult;

    /// Checked once per request before any worker is dispatched.
    fn ensure_available(&self, _program: &Path) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

impl ProcessRunner for CommandRunner {
    fn run(&self, program: &Path, args: &[WorkerArg]) -> ProcessResult {
        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|a| a.to_string()));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        debug!(program = %program.display(), args = %shell_join(args), "spawning worker");

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ProcessResult::launch_failure(e.to_string()),
        };
        let output = match child.wait_with_output() {
            Ok(output) => output,
            Err(e) => return ProcessResult::launch_failure(e.to_string()),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);
        if stderr.is_empty() && !output.status.success() {
            stderr = match output.status.code() {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            };
        }
        ProcessResult {
            stdout,
            stderr,
            exit_code,
        }
    }

    fn ensure_available(&self, program: &Path) -> Result<()> {
        let path_like = program.components().count() > 1;
        if path_like && !program.is_file() {
            return Err(FleetError::ProcessLaunch {
                program: program.display().to_string(),
                message: "executable not found".to_string(),
            });
        }
        Ok(())
    }
}

fn shell_join(args: &[WorkerArg]) -> String {
    args.iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
