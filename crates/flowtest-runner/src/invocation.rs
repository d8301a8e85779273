//! Invocation Runner: one declarative [`InvocationSpec`] in, one isolated,
//! deadline-bound child process, one [`ExecutionResult`] out.
//!
//! Lifecycle of a single `execute` call:
//!
//! ```text
//! Idle -> CoverageDirAllocated -> BinaryValidated -> Spawned -> Exited(code)
//!                    |                   |                  \-> TimedOut | Signaled
//!                    |                   \-> Rejected (exit 1, never spawned)
//!                    \-> Err(RunnerError::CoverageDirFailed)
//! ```
//!
//! Only the coverage-directory failure escapes as an error. Everything else is
//! data in the result so tests can assert on it like any other outcome.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use flowtest_utils::logging::invocation_span;
use flowtest_utils::{PathValidationError, sanitize_args, validate_binary_path};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command_spec::CommandSpec;
use crate::error::RunnerError;
use crate::native::NativeRunner;
use crate::process::ProcessRunner;
use crate::session::{CoverageEnv, CoverageSession};
use crate::strategy::{InvocationTarget, SubcommandArgs, TargetArgs};

/// Exit code meaning "the process did not terminate with a program-supplied
/// code": spawn failure, timeout kill, or death by signal.
pub const SENTINEL_EXIT_CODE: i32 = -1;

/// Exit code reported when the binary path is rejected before spawning.
pub const VALIDATION_EXIT_CODE: i32 = 1;

/// Default per-invocation deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Expectations
// ============================================================================

/// Expected exit status of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedExit {
    /// Exactly this code
    Code(i32),
    /// Exit code 0
    Success,
    /// Any non-zero exit code, including the sentinel
    Failure,
}

impl ExpectedExit {
    #[must_use]
    pub const fn matches(self, exit_code: i32) -> bool {
        match self {
            Self::Code(code) => code == exit_code,
            Self::Success => exit_code == 0,
            Self::Failure => exit_code != 0,
        }
    }
}

impl std::fmt::Display for ExpectedExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Success => write!(f, "exit code 0"),
            Self::Failure => write!(f, "a non-zero exit code"),
        }
    }
}

/// Declarative checks applied to an [`ExecutionResult`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectations {
    pub exit: Option<ExpectedExit>,
    pub stdout_contains: Vec<String>,
    pub stderr_contains: Vec<String>,
}

// ============================================================================
// InvocationSpec
// ============================================================================

/// Everything needed to run one test invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSpec {
    /// Names the coverage session; must be unique among concurrent tests
    pub test_name: String,
    pub binary: PathBuf,
    pub target: InvocationTarget,
    /// Appended after the target arguments
    pub extra_args: Vec<String>,
    /// Inherited working directory when `None`
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub expectations: Expectations,
}

impl InvocationSpec {
    #[must_use]
    pub fn new(test_name: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            test_name: test_name.into(),
            binary: binary.into(),
            target: InvocationTarget::default(),
            extra_args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            expectations: Expectations::default(),
        }
    }

    #[must_use]
    pub fn flow(mut self, flow: impl Into<PathBuf>) -> Self {
        self.target.flow = Some(flow.into());
        self
    }

    #[must_use]
    pub fn config(mut self, config: impl Into<PathBuf>) -> Self {
        self.target.config = Some(config.into());
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn expect_exit(mut self, exit: ExpectedExit) -> Self {
        self.expectations.exit = Some(exit);
        self
    }

    #[must_use]
    pub fn expect_stdout(mut self, needle: impl Into<String>) -> Self {
        self.expectations.stdout_contains.push(needle.into());
        self
    }

    #[must_use]
    pub fn expect_stderr(mut self, needle: impl Into<String>) -> Self {
        self.expectations.stderr_contains.push(needle.into());
        self
    }
}

// ============================================================================
// ExecutionResult
// ============================================================================

/// How the invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The program exited with its own code
    Exited,
    /// Binary validation failed; nothing was spawned
    Rejected,
    /// Killed at the deadline
    TimedOut,
    /// Validated, but the spawn itself failed
    SpawnFailed,
    /// Terminated by a signal without an exit code
    Signaled,
}

/// Underlying reason for a result that did not come from a normal exit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    #[error("invalid binary path: {0}")]
    InvalidBinary(#[from] PathValidationError),

    #[error("process timed out after {timeout_ms} ms and was killed")]
    TimedOut { timeout_ms: u128 },

    #[error("failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("process terminated without an exit code")]
    Signaled,
}

/// Outcome of one [`InvocationRunner::execute`] call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Program-supplied exit code, [`VALIDATION_EXIT_CODE`] for a rejected
    /// binary, or [`SENTINEL_EXIT_CODE`]
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock time including coverage-session setup
    pub duration: Duration,
    pub termination: Termination,
    pub error: Option<ExecutionFailure>,
    /// Session the child was told to write counters into (retained)
    pub session: CoverageSession,
}

impl ExecutionResult {
    #[must_use]
    pub const fn spawned(&self) -> bool {
        !matches!(self.termination, Termination::Rejected)
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    #[must_use]
    pub fn coverage_dir(&self) -> &Utf8Path {
        self.session.dir()
    }
}

// ============================================================================
// InvocationRunner
// ============================================================================

/// Executes [`InvocationSpec`]s, one child process per call.
///
/// The runner holds no per-invocation state; one instance can serve many
/// sequential or concurrent calls as long as test names differ.
#[derive(Debug, Clone)]
pub struct InvocationRunner {
    coverage_base: Utf8PathBuf,
    coverage_env: CoverageEnv,
    target_args: Arc<dyn TargetArgs>,
    process: Arc<dyn ProcessRunner>,
}

impl InvocationRunner {
    /// Runner writing sessions under `coverage_base`, announcing them via
    /// `GOCOVERDIR`, mapping targets with [`SubcommandArgs::default`], and
    /// executing natively.
    #[must_use]
    pub fn new(coverage_base: impl Into<Utf8PathBuf>) -> Self {
        Self {
            coverage_base: coverage_base.into(),
            coverage_env: CoverageEnv::default(),
            target_args: Arc::new(SubcommandArgs::default()),
            process: Arc::new(NativeRunner::new()),
        }
    }

    #[must_use]
    pub fn with_coverage_env(mut self, coverage_env: CoverageEnv) -> Self {
        self.coverage_env = coverage_env;
        self
    }

    #[must_use]
    pub fn with_target_args(mut self, target_args: Arc<dyn TargetArgs>) -> Self {
        self.target_args = target_args;
        self
    }

    #[must_use]
    pub fn with_process_runner(mut self, process: Arc<dyn ProcessRunner>) -> Self {
        self.process = process;
        self
    }

    #[must_use]
    pub fn coverage_base(&self) -> &Utf8Path {
        &self.coverage_base
    }

    /// Build the command for `spec` against an already validated binary.
    fn build_command(
        &self,
        spec: &InvocationSpec,
        binary: PathBuf,
        session: &CoverageSession,
    ) -> CommandSpec {
        let raw_args = self
            .target_args
            .build(&spec.target)
            .into_iter()
            .chain(spec.extra_args.iter().cloned());

        let mut command = CommandSpec::new(binary)
            .args(sanitize_args(raw_args))
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(
                self.coverage_env.var_name(),
                self.coverage_env.value_for(session.dir()),
            );

        if let Some(dir) = &spec.working_dir {
            command = command.cwd(dir);
        }
        command
    }

    /// Run `spec` to completion, deadline, or failure.
    ///
    /// # Errors
    ///
    /// Only [`RunnerError::CoverageDirFailed`]: the session directory could
    /// not be created, so the invocation cannot be isolated and is not run.
    pub fn execute(&self, spec: &InvocationSpec) -> Result<ExecutionResult, RunnerError> {
        let started = Instant::now();
        let span = invocation_span(&spec.test_name, &spec.binary.display().to_string());
        let _guard = span.enter();

        let session = CoverageSession::allocate(&self.coverage_base, &spec.test_name)?;

        let binary = match validate_binary_path(&spec.binary) {
            Ok(binary) => binary,
            Err(e) => {
                warn!(error = %e, "binary validation failed, not spawning");
                let failure = ExecutionFailure::InvalidBinary(e);
                return Ok(ExecutionResult {
                    exit_code: VALIDATION_EXIT_CODE,
                    stdout: String::new(),
                    stderr: failure.to_string(),
                    duration: started.elapsed(),
                    termination: Termination::Rejected,
                    error: Some(failure),
                    session,
                });
            }
        };

        let command = self.build_command(spec, binary, &session);
        debug!(command = %command.display_line(), "spawning");

        let outcome = self.process.run(&command, spec.timeout);
        let duration = started.elapsed();

        let result = match outcome {
            Ok(output) => {
                let (exit_code, termination, error) = match output.exit_code {
                    Some(code) => (code, Termination::Exited, None),
                    None => (
                        SENTINEL_EXIT_CODE,
                        Termination::Signaled,
                        Some(ExecutionFailure::Signaled),
                    ),
                };
                ExecutionResult {
                    exit_code,
                    stdout: output.stdout_string(),
                    stderr: output.stderr_string(),
                    duration,
                    termination,
                    error,
                    session,
                }
            }
            Err(e) => {
                let (termination, failure) = match e {
                    RunnerError::Timeout { timeout_ms } => (
                        Termination::TimedOut,
                        ExecutionFailure::TimedOut { timeout_ms },
                    ),
                    RunnerError::SpawnFailed { program, reason } => (
                        Termination::SpawnFailed,
                        ExecutionFailure::SpawnFailed { program, reason },
                    ),
                    other => (
                        Termination::SpawnFailed,
                        ExecutionFailure::SpawnFailed {
                            program: command.program.to_string_lossy().into_owned(),
                            reason: other.to_string(),
                        },
                    ),
                };
                warn!(error = %failure, "invocation did not exit normally");
                ExecutionResult {
                    exit_code: SENTINEL_EXIT_CODE,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration,
                    termination,
                    error: Some(failure),
                    session,
                }
            }
        };

        info!(
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "invocation finished"
        );
        Ok(result)
    }
}
