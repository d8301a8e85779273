//! flowtest - end-to-end tests against an instrumented binary, with
//! per-test coverage sessions merged into one report.
//!
//! Each test builds an invocation with [`TestBuilder`], which runs the binary
//! in isolation under a deadline, writes its coverage counters into a
//! dedicated session directory, and checks the declared expectations. Once
//! the whole suite is done, the `flowtest aggregate` command (or a
//! [`CoverageCollector`] directly) merges the sessions and updates the
//! manifest.
//!
//! # Crates
//!
//! - [`flowtest_utils`]: path validation, argument sanitizing, atomic writes, logging
//! - [`flowtest_runner`]: command construction, process execution, coverage sessions
//! - [`flowtest_coverage`]: manifest, discovery, toolchains, aggregation

pub mod builder;
pub mod cli;
pub mod config;
pub mod error;
pub mod fixtures;

pub use builder::{RunReport, TestBuilder, Violation, check_expectations};
pub use config::{HarnessConfig, ToolchainKind};
pub use error::HarnessError;
pub use fixtures::FixtureProvider;

pub use flowtest_coverage::{
    CoverageCollector, CoverageError, CoverageReport, CoverageToolchain, GoCovdata, LlvmCov,
    Manifest, ManifestEntry,
};
pub use flowtest_runner::{
    CoverageEnv, ExecutionResult, ExpectedExit, InvocationRunner, InvocationSpec,
    PassthroughArgs, SENTINEL_EXIT_CODE, SubcommandArgs, TargetArgs, Termination,
};
