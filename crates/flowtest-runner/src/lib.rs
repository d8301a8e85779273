//! Isolated, deadline-bound execution of an instrumented binary.
//!
//! # Security Model
//!
//! All process execution goes through [`CommandSpec`] to ensure argv-style
//! invocation. External tools are additionally funnelled through
//! [`secure_command`], which rejects malformed program names and sanitizes
//! arguments before a spawn handle is built. The binary under test is
//! validated with [`flowtest_utils::validate_binary_path`] before it is run.

pub mod command_spec;
pub mod error;
pub mod invocation;
pub mod native;
pub mod process;
pub mod session;
pub mod strategy;

pub use command_spec::{CommandSpec, secure_command};
pub use error::RunnerError;
pub use invocation::{
    DEFAULT_TIMEOUT, ExecutionFailure, ExecutionResult, ExpectedExit, Expectations,
    InvocationRunner, InvocationSpec, SENTINEL_EXIT_CODE, Termination, VALIDATION_EXIT_CODE,
};
pub use native::NativeRunner;
pub use process::{ProcessOutput, ProcessRunner};
pub use session::{
    CoverageEnv, CoverageSession, RESULT_SHARD, SESSION_MARKER, SessionMarker, read_marker,
    session_component,
};
pub use strategy::{InvocationTarget, PassthroughArgs, SubcommandArgs, TargetArgs};
