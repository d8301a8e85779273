use std::fmt;
use std::time::Duration;

use crate::command_spec::CommandSpec;
use crate::error::RunnerError;

/// Captured output of a child process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code from the process (None if terminated by signal)
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    #[must_use]
    pub fn new(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: Option<i32>) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
        }
    }

    /// Get stdout as a UTF-8 string, lossy conversion.
    #[must_use]
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Get stderr as a UTF-8 string, lossy conversion.
    #[must_use]
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Trait for process execution.
///
/// Implementations MUST use argv-style APIs only (no `sh -c`, no `cmd /C`
/// around a concatenated string). The interface is synchronous: `run` blocks
/// until the child exits, is killed at the deadline, or fails to spawn.
pub trait ProcessRunner: Send + Sync + fmt::Debug {
    /// Execute `cmd`, killing it if it outlives `timeout`.
    ///
    /// # Errors
    ///
    /// * `RunnerError::Timeout` - the process was killed at the deadline
    /// * `RunnerError::SpawnFailed` - the process could not be started
    /// * `RunnerError::MonitorLost` - the wait thread vanished
    fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError>;
}
