//! Fluent test assembly around the Invocation Runner.
//!
//! ```rust,no_run
//! use flowtest::{FixtureProvider, TestBuilder};
//!
//! let fixtures = FixtureProvider::standard();
//! TestBuilder::new("runs_minimal_flow", "bin/flow", "coverage/e2e")
//!     .fixture(&fixtures, "valid_flow.json")
//!     .expect_success()
//!     .expect_output("completed")
//!     .run()
//!     .assert_expectations();
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use flowtest_coverage::{ManifestEntry, write_result_shard};
use flowtest_runner::{
    DEFAULT_TIMEOUT, ExecutionResult, ExpectedExit, Expectations, InvocationRunner,
    InvocationSpec, InvocationTarget, TargetArgs,
};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::fixtures::FixtureProvider;

const DEFAULT_PACKAGE: &str = "e2e";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixtureRole {
    Flow,
    Config,
}

#[derive(Debug, Clone)]
struct PendingFixture {
    name: String,
    content: String,
    role: FixtureRole,
}

/// Assembles one invocation plus its expectations.
#[derive(Debug)]
pub struct TestBuilder {
    test_name: String,
    binary: Option<PathBuf>,
    runner: InvocationRunner,
    package: String,
    flow: Option<PathBuf>,
    config: Option<PathBuf>,
    fixtures: Vec<PendingFixture>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
    working_dir: Option<PathBuf>,
    expectations: Expectations,
    misuse: Option<HarnessError>,
    record_result: bool,
}

impl TestBuilder {
    /// Test `test_name` against `binary`, writing its coverage session under
    /// `coverage_base`.
    #[must_use]
    pub fn new(
        test_name: impl Into<String>,
        binary: impl Into<PathBuf>,
        coverage_base: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self::with_runner(test_name, InvocationRunner::new(coverage_base)).binary(binary)
    }

    /// Binary, coverage directory, timeout and package from `config`.
    #[must_use]
    pub fn from_config(test_name: impl Into<String>, config: &HarnessConfig) -> Self {
        let mut builder = Self::with_runner(test_name, config.invocation_runner())
            .timeout(config.timeout())
            .package(config.package.clone());
        builder.binary = config.binary.clone();
        builder
    }

    fn with_runner(test_name: impl Into<String>, runner: InvocationRunner) -> Self {
        Self {
            test_name: test_name.into(),
            binary: None,
            runner,
            package: DEFAULT_PACKAGE.to_string(),
            flow: None,
            config: None,
            fixtures: Vec::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            working_dir: None,
            expectations: Expectations::default(),
            misuse: None,
            record_result: true,
        }
    }

    #[must_use]
    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Replace the runner, e.g. to inject a different process runner.
    #[must_use]
    pub fn runner(mut self, runner: InvocationRunner) -> Self {
        self.runner = runner;
        self
    }

    /// How the flow and config paths are turned into arguments.
    #[must_use]
    pub fn target_args(mut self, target_args: Arc<dyn TargetArgs>) -> Self {
        self.runner = self.runner.with_target_args(target_args);
        self
    }

    /// Package label for the manifest entry.
    #[must_use]
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    /// Whether to leave a result shard in the session after the run (default on).
    #[must_use]
    pub const fn record_result(mut self, record: bool) -> Self {
        self.record_result = record;
        self
    }

    /// Flow definition the binary is pointed at. Required unless a flow
    /// fixture is used.
    #[must_use]
    pub fn flow(mut self, flow: impl Into<PathBuf>) -> Self {
        self.flow = Some(flow.into());
        self
    }

    #[must_use]
    pub fn config(mut self, config: impl Into<PathBuf>) -> Self {
        self.config = Some(config.into());
        self
    }

    /// Write fixture `name` into the working directory and use it as the flow.
    #[must_use]
    pub fn fixture(self, provider: &FixtureProvider, name: &str) -> Self {
        self.add_fixture(provider, name, FixtureRole::Flow)
    }

    /// Write fixture `name` into the working directory and use it as the config.
    #[must_use]
    pub fn config_fixture(self, provider: &FixtureProvider, name: &str) -> Self {
        self.add_fixture(provider, name, FixtureRole::Config)
    }

    fn add_fixture(mut self, provider: &FixtureProvider, name: &str, role: FixtureRole) -> Self {
        match provider.get(name) {
            Some(content) => self.fixtures.push(PendingFixture {
                name: name.to_string(),
                content: content.to_string(),
                role,
            }),
            None => {
                self.misuse.get_or_insert(HarnessError::UnknownFixture {
                    name: name.to_string(),
                });
            }
        }
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Deadline for the child (default 30s).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run in `dir` instead of a fresh temporary directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn expect_exit_code(mut self, code: i32) -> Self {
        self.expectations.exit = Some(ExpectedExit::Code(code));
        self
    }

    #[must_use]
    pub const fn expect_success(mut self) -> Self {
        self.expectations.exit = Some(ExpectedExit::Success);
        self
    }

    #[must_use]
    pub const fn expect_failure(mut self) -> Self {
        self.expectations.exit = Some(ExpectedExit::Failure);
        self
    }

    /// Stdout must contain `needle`.
    #[must_use]
    pub fn expect_output(mut self, needle: impl Into<String>) -> Self {
        self.expectations.stdout_contains.push(needle.into());
        self
    }

    /// Stderr must contain `needle`.
    #[must_use]
    pub fn expect_error(mut self, needle: impl Into<String>) -> Self {
        self.expectations.stderr_contains.push(needle.into());
        self
    }

    /// Execute and check every expectation.
    ///
    /// # Panics
    ///
    /// On builder misuse or when the coverage session cannot be created.
    /// Expectation mismatches do not panic here; they are collected in the
    /// returned report.
    #[must_use]
    pub fn run(self) -> RunReport {
        match self.try_run() {
            Ok(report) => report,
            Err(e) => panic!("flowtest: {e}"),
        }
    }

    /// Like [`TestBuilder::run`], returning harness failures instead of panicking.
    pub fn try_run(self) -> Result<RunReport, HarnessError> {
        if let Some(misuse) = self.misuse {
            return Err(misuse);
        }
        let has_flow_fixture = self.fixtures.iter().any(|f| f.role == FixtureRole::Flow);
        if self.flow.is_none() && !has_flow_fixture {
            return Err(HarnessError::MissingTarget {
                test: self.test_name,
            });
        }
        let Some(binary) = self.binary else {
            return Err(HarnessError::MissingBinary {
                test: self.test_name,
            });
        };

        let (working_dir, temp_dir) = match self.working_dir {
            Some(dir) => (dir, None),
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("flowtest-")
                    .tempdir()
                    .map_err(HarnessError::WorkingDir)?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        let mut target = InvocationTarget {
            flow: self.flow.map(absolute_target).transpose()?,
            config: self.config.map(absolute_target).transpose()?,
        };
        for fixture in &self.fixtures {
            let path = materialize(&working_dir, fixture)?;
            match fixture.role {
                FixtureRole::Flow => target.flow = Some(path),
                FixtureRole::Config => target.config = Some(path),
            }
        }

        let mut spec = InvocationSpec::new(self.test_name, binary)
            .args(self.args)
            .working_dir(&working_dir)
            .timeout(self.timeout);
        spec.target = target;
        spec.env = self.env;
        spec.expectations = self.expectations;

        let result = self.runner.execute(&spec)?;
        let violations = check_expectations(&spec.expectations, &result);
        debug!(
            test = %spec.test_name,
            violations = violations.len(),
            "checked expectations"
        );

        if self.record_result {
            let entry = ManifestEntry::new(
                self.package,
                spec.test_name.clone(),
                result.coverage_dir().to_string(),
                result.duration,
                violations.is_empty(),
            );
            if let Err(e) = write_result_shard(&result.session, &entry) {
                warn!(test = %spec.test_name, error = %e, "failed to record test result");
            }
        }

        Ok(RunReport {
            test_name: spec.test_name,
            result,
            violations,
            working_dir,
            _temp_dir: temp_dir,
        })
    }
}

/// The child may run in another directory, so targets are resolved against
/// the harness's current directory first.
fn absolute_target(path: PathBuf) -> Result<PathBuf, HarnessError> {
    std::path::absolute(&path).map_err(|source| HarnessError::TargetPath {
        path: path.display().to_string(),
        source,
    })
}

fn materialize(working_dir: &Path, fixture: &PendingFixture) -> Result<PathBuf, HarnessError> {
    let mut components = Path::new(&fixture.name).components();
    let single_file = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_file {
        return Err(HarnessError::InvalidFixtureName {
            name: fixture.name.clone(),
        });
    }

    let path = working_dir.join(&fixture.name);
    fs::write(&path, &fixture.content).map_err(|source| HarnessError::Fixture {
        name: fixture.name.clone(),
        source,
    })?;
    Ok(path)
}

// ============================================================================
// RunReport
// ============================================================================

/// One unmet expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    ExitCode { expected: ExpectedExit, actual: i32 },
    MissingStdout { needle: String },
    MissingStderr { needle: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitCode { expected, actual } => {
                write!(f, "expected {expected}, got exit code {actual}")
            }
            Self::MissingStdout { needle } => write!(f, "expected stdout to contain {needle:?}"),
            Self::MissingStderr { needle } => write!(f, "expected stderr to contain {needle:?}"),
        }
    }
}

/// Check each expectation independently; all mismatches are returned.
#[must_use]
pub fn check_expectations(expectations: &Expectations, result: &ExecutionResult) -> Vec<Violation> {
    let mut violations = Vec::new();

    if let Some(expected) = expectations.exit {
        if !expected.matches(result.exit_code) {
            violations.push(Violation::ExitCode {
                expected,
                actual: result.exit_code,
            });
        }
    }
    for needle in &expectations.stdout_contains {
        if !result.stdout.contains(needle.as_str()) {
            violations.push(Violation::MissingStdout {
                needle: needle.clone(),
            });
        }
    }
    for needle in &expectations.stderr_contains {
        if !result.stderr.contains(needle.as_str()) {
            violations.push(Violation::MissingStderr {
                needle: needle.clone(),
            });
        }
    }

    violations
}

/// Outcome of [`TestBuilder::run`].
#[derive(Debug)]
pub struct RunReport {
    test_name: String,
    pub result: ExecutionResult,
    pub violations: Vec<Violation>,
    working_dir: PathBuf,
    _temp_dir: Option<TempDir>,
}

impl RunReport {
    #[must_use]
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Directory the child ran in. A temporary one lives as long as the report.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Panic once, listing every violation with the captured output.
    ///
    /// # Panics
    ///
    /// When any expectation was not met.
    pub fn assert_expectations(&self) {
        if !self.passed() {
            panic!("{self}");
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            writeln!(f, "test '{}' met all expectations", self.test_name)?;
        } else {
            writeln!(
                f,
                "test '{}' failed {} expectation(s):",
                self.test_name,
                self.violations.len()
            )?;
            for (i, violation) in self.violations.iter().enumerate() {
                writeln!(f, "  {}. {violation}", i + 1)?;
            }
        }
        if let Some(error) = &self.result.error {
            writeln!(f, "error: {error}")?;
        }
        writeln!(f, "exit code: {}", self.result.exit_code)?;
        writeln!(f, "--- stdout ---")?;
        writeln!(f, "{}", self.result.stdout.trim_end())?;
        writeln!(f, "--- stderr ---")?;
        write!(f, "{}", self.result.stderr.trim_end())
    }
}
