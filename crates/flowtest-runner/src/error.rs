//! Error types for the runner crate

use thiserror::Error;

/// Infrastructure-level failures of process execution.
///
/// Outcomes of the child program itself (any exit code, a rejected binary
/// path, a timeout during an invocation) are reported as data in an
/// `ExecutionResult`, not through this type.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Failed to allocate coverage directory {path}: {source}")]
    CoverageDirFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn process '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Execution timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u128 },

    #[error("Process monitoring thread terminated unexpectedly")]
    MonitorLost,
}

impl RunnerError {
    /// True when the process was killed for exceeding its deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
