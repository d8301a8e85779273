//! External coverage toolchains.
//!
//! A toolchain knows which environment variable points an instrumented child
//! at its session directory, how to build the four aggregation commands, and
//! how to pull the aggregate percentage out of its own summary format. Every
//! command goes through [`secure_command`]; the collector runs them.

use std::fmt;
use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use flowtest_runner::{CommandSpec, CoverageEnv, secure_command};
use flowtest_utils::{PathValidationError, validate_file_path};

use crate::error::{CoverageError, Stage};

pub const MERGED_DIR: &str = "e2e-merged";
pub const TEXT_PROFILE: &str = "e2e.out";
pub const HTML_REPORT: &str = "e2e.html";
pub const SUMMARY_FILE: &str = "e2e-summary.txt";

/// One tool invocation of the aggregation pipeline.
#[derive(Debug, Clone)]
pub struct StageCommand {
    pub command: CommandSpec,
    /// When set, the tool's stdout is written to this file after success
    pub stdout_to: Option<Utf8PathBuf>,
}

impl StageCommand {
    #[must_use]
    pub const fn new(command: CommandSpec) -> Self {
        Self {
            command,
            stdout_to: None,
        }
    }

    #[must_use]
    pub fn stdout_to(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.stdout_to = Some(path.into());
        self
    }
}

/// Validated, absolute output locations, siblings of the coverage base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub merged_dir: Utf8PathBuf,
    pub profile: Utf8PathBuf,
    pub html: Utf8PathBuf,
    pub summary: Utf8PathBuf,
}

fn validated(path: &Path) -> Result<Utf8PathBuf, CoverageError> {
    let invalid = |source| CoverageError::PathValidation {
        path: path.display().to_string(),
        source,
    };
    let resolved = validate_file_path(path).map_err(invalid)?;
    Utf8PathBuf::from_path_buf(resolved).map_err(|p| {
        invalid(PathValidationError::Unresolvable {
            path: p.display().to_string(),
            reason: "path is not valid UTF-8".to_string(),
        })
    })
}

impl ReportPaths {
    /// Derive and validate the outputs for `coverage_base`.
    ///
    /// Outputs sit in the base's parent directory, computed from the absolute
    /// base so that no `..` segment ever reaches a command line.
    pub fn for_base(coverage_base: &Utf8Path) -> Result<Self, CoverageError> {
        let base = validated(coverage_base.as_std_path())?;
        let parent = base.parent().unwrap_or(base.as_path());

        Ok(Self {
            merged_dir: validated(parent.join(MERGED_DIR).as_std_path())?,
            profile: validated(parent.join(TEXT_PROFILE).as_std_path())?,
            html: validated(parent.join(HTML_REPORT).as_std_path())?,
            summary: validated(parent.join(SUMMARY_FILE).as_std_path())?,
        })
    }
}

/// Strategy for one family of coverage tools.
pub trait CoverageToolchain: Send + Sync + fmt::Debug {
    /// Short name for logs and the CLI
    fn name(&self) -> &str;

    /// How sessions are announced to instrumented children.
    fn coverage_env(&self) -> CoverageEnv;

    /// Combine the raw counters of `sessions` into `paths.merged_dir`.
    fn merge(&self, sessions: &[Utf8PathBuf], paths: &ReportPaths)
    -> Result<StageCommand, CoverageError>;

    /// Convert the merged data into the textual line profile.
    fn text_profile(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError>;

    fn html(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError>;

    /// Produce the per-function summary at `paths.summary`.
    fn summary(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError>;

    /// Extract the aggregate percentage token from the summary text.
    fn parse_total(&self, summary: &str) -> Option<String>;
}

fn build<I, S>(stage: Stage, program: &str, args: I) -> Result<CommandSpec, CoverageError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    secure_command(program, args).map_err(|source| CoverageError::CommandConstruction { stage, source })
}

// ============================================================================
// Go covdata
// ============================================================================

/// `go tool covdata` / `go tool cover`, fed through `GOCOVERDIR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoCovdata {
    pub go: String,
}

impl Default for GoCovdata {
    fn default() -> Self {
        Self {
            go: "go".to_string(),
        }
    }
}

impl CoverageToolchain for GoCovdata {
    fn name(&self) -> &str {
        "go"
    }

    fn coverage_env(&self) -> CoverageEnv {
        CoverageEnv::GoCoverDir
    }

    fn merge(
        &self,
        sessions: &[Utf8PathBuf],
        paths: &ReportPaths,
    ) -> Result<StageCommand, CoverageError> {
        let inputs = sessions
            .iter()
            .map(|session| session.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let cmd = build(
            Stage::Merge,
            &self.go,
            [
                "tool".to_string(),
                "covdata".to_string(),
                "merge".to_string(),
                format!("-i={inputs}"),
                format!("-o={}", paths.merged_dir),
            ],
        )?;
        Ok(StageCommand::new(cmd))
    }

    fn text_profile(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError> {
        let cmd = build(
            Stage::TextProfile,
            &self.go,
            [
                "tool".to_string(),
                "covdata".to_string(),
                "textfmt".to_string(),
                format!("-i={}", paths.merged_dir),
                format!("-o={}", paths.profile),
            ],
        )?;
        Ok(StageCommand::new(cmd))
    }

    fn html(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError> {
        let cmd = build(
            Stage::Html,
            &self.go,
            [
                "tool".to_string(),
                "cover".to_string(),
                format!("-html={}", paths.profile),
                format!("-o={}", paths.html),
            ],
        )?;
        Ok(StageCommand::new(cmd))
    }

    fn summary(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError> {
        let cmd = build(
            Stage::Summary,
            &self.go,
            [
                "tool".to_string(),
                "cover".to_string(),
                format!("-func={}", paths.profile),
            ],
        )?;
        Ok(StageCommand::new(cmd).stdout_to(paths.summary.clone()))
    }

    fn parse_total(&self, summary: &str) -> Option<String> {
        summary
            .lines()
            .filter(|line| line.starts_with("total:"))
            .next_back()
            .and_then(|line| line.split_whitespace().next_back())
            .map(str::to_string)
    }
}

// ============================================================================
// LLVM source-based coverage
// ============================================================================

/// `llvm-profdata` / `llvm-cov`, fed through `LLVM_PROFILE_FILE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlvmCov {
    /// The instrumented object the profiles were collected from
    pub object: Utf8PathBuf,
    pub profdata: String,
    pub cov: String,
}

impl LlvmCov {
    #[must_use]
    pub fn new(object: impl Into<Utf8PathBuf>) -> Self {
        Self {
            object: object.into(),
            profdata: "llvm-profdata".to_string(),
            cov: "llvm-cov".to_string(),
        }
    }

    fn merged_profdata(paths: &ReportPaths) -> Utf8PathBuf {
        paths.merged_dir.join("merged.profdata")
    }

    fn instr_profile_arg(paths: &ReportPaths) -> String {
        format!("-instr-profile={}", Self::merged_profdata(paths))
    }
}

fn profraw_files(session: &Utf8Path) -> Result<Vec<String>, CoverageError> {
    let entries = fs::read_dir(session).map_err(|source| CoverageError::Io {
        stage: Stage::Merge,
        path: session.to_string(),
        source,
    })?;

    let mut files: Vec<String> = entries
        .flatten()
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.path()).ok())
        .filter(|path| path.extension() == Some("profraw"))
        .map(Utf8PathBuf::into_string)
        .collect();
    files.sort();
    Ok(files)
}

impl CoverageToolchain for LlvmCov {
    fn name(&self) -> &str {
        "llvm"
    }

    fn coverage_env(&self) -> CoverageEnv {
        CoverageEnv::LlvmProfile
    }

    fn merge(
        &self,
        sessions: &[Utf8PathBuf],
        paths: &ReportPaths,
    ) -> Result<StageCommand, CoverageError> {
        let mut args = vec!["merge".to_string(), "-sparse".to_string()];
        for session in sessions {
            args.extend(profraw_files(session)?);
        }
        args.push("-o".to_string());
        args.push(Self::merged_profdata(paths).into_string());

        Ok(StageCommand::new(build(Stage::Merge, &self.profdata, args)?))
    }

    fn text_profile(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError> {
        let cmd = build(
            Stage::TextProfile,
            &self.cov,
            [
                "export".to_string(),
                "-format=lcov".to_string(),
                Self::instr_profile_arg(paths),
                self.object.to_string(),
            ],
        )?;
        Ok(StageCommand::new(cmd).stdout_to(paths.profile.clone()))
    }

    fn html(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError> {
        let cmd = build(
            Stage::Html,
            &self.cov,
            [
                "show".to_string(),
                "-format=html".to_string(),
                format!("-output-dir={}", paths.html),
                Self::instr_profile_arg(paths),
                self.object.to_string(),
            ],
        )?;
        Ok(StageCommand::new(cmd))
    }

    fn summary(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError> {
        let cmd = build(
            Stage::Summary,
            &self.cov,
            [
                "report".to_string(),
                Self::instr_profile_arg(paths),
                self.object.to_string(),
            ],
        )?;
        Ok(StageCommand::new(cmd).stdout_to(paths.summary.clone()))
    }

    /// The `TOTAL` row lists region, function, line and branch percentages;
    /// line coverage is the third.
    fn parse_total(&self, summary: &str) -> Option<String> {
        let line = summary
            .lines()
            .filter(|line| line.starts_with("TOTAL"))
            .next_back()?;
        let percents: Vec<&str> = line
            .split_whitespace()
            .filter(|token| token.ends_with('%'))
            .collect();
        percents
            .get(2)
            .or_else(|| percents.last())
            .map(|token| (*token).to_string())
    }
}
