//! Harness configuration.
//!
//! Precedence: environment (`FLOWTEST_*`) > `flowtest.toml` > built-in
//! defaults. The file is found by searching upward from the start directory,
//! stopping at a repository root (`.git`, `.hg`, `.svn`) or the filesystem
//! root. Relative paths in the file are resolved against the file's directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use camino::Utf8PathBuf;
use flowtest_coverage::{CoverageToolchain, GoCovdata, LlvmCov};
use flowtest_runner::{CoverageEnv, InvocationRunner};
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "flowtest.toml";

pub const ENV_BINARY: &str = "FLOWTEST_BINARY";
pub const ENV_COVERAGE_DIR: &str = "FLOWTEST_COVERAGE_DIR";
pub const ENV_TIMEOUT_SECS: &str = "FLOWTEST_TIMEOUT_SECS";
pub const ENV_TOOLCHAIN: &str = "FLOWTEST_TOOLCHAIN";
pub const ENV_PACKAGE: &str = "FLOWTEST_PACKAGE";
pub const ENV_LLVM_OBJECT: &str = "FLOWTEST_LLVM_OBJECT";

const DEFAULT_COVERAGE_DIR: &str = "coverage/e2e";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;
const DEFAULT_PACKAGE: &str = "e2e";

/// Which external coverage tools aggregate the sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ToolchainKind {
    #[default]
    Go,
    Llvm,
}

impl ToolchainKind {
    /// How sessions are announced to children for this toolchain.
    #[must_use]
    pub const fn coverage_env(self) -> CoverageEnv {
        match self {
            Self::Go => CoverageEnv::GoCoverDir,
            Self::Llvm => CoverageEnv::LlvmProfile,
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "go" => Ok(Self::Go),
            "llvm" => Ok(Self::Llvm),
            other => bail!("unknown toolchain '{other}' (expected 'go' or 'llvm')"),
        }
    }
}

/// Effective settings for tests and the batch CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Instrumented binary under test
    pub binary: Option<PathBuf>,
    pub coverage_dir: Utf8PathBuf,
    pub timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub toolchain: ToolchainKind,
    /// Instrumented object for `llvm-cov`; required by the LLVM toolchain
    pub llvm_object: Option<Utf8PathBuf>,
    /// Package label recorded in manifest entries
    pub package: String,
    /// File the settings were read from, if any
    pub source_file: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            binary: None,
            coverage_dir: Utf8PathBuf::from(DEFAULT_COVERAGE_DIR),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            toolchain: ToolchainKind::default(),
            llvm_object: None,
            package: DEFAULT_PACKAGE.to_string(),
            source_file: None,
        }
    }
}

/// `flowtest.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    binary: Option<PathBuf>,
    coverage_dir: Option<PathBuf>,
    timeout_secs: Option<u64>,
    tool_timeout_secs: Option<u64>,
    toolchain: Option<ToolchainKind>,
    llvm_object: Option<PathBuf>,
    package: Option<String>,
}

fn utf8(path: PathBuf, what: &str) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|p| anyhow!("{what} is not valid UTF-8: {}", p.display()))
}

impl HarnessConfig {
    /// Load from the current directory and the process environment.
    pub fn load() -> Result<Self> {
        let start_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::load_from(&start_dir, |key| std::env::var(key).ok())
    }

    /// Path-driven variant: discover the file from `start_dir` and read
    /// variables through `env` instead of the process environment.
    pub fn load_from<F>(start_dir: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = discover_config_file_from(start_dir);
        Self::load_with(file.as_deref(), env)
    }

    /// Load an explicit config file (or none) and apply `env` on top.
    pub fn load_with<F>(file: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(path) = file {
            config.apply_file(path)?;
        }
        config.apply_env(env)?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { dir.join(p) };

        if let Some(binary) = file.binary {
            self.binary = Some(resolve(binary));
        }
        if let Some(coverage_dir) = file.coverage_dir {
            self.coverage_dir = utf8(resolve(coverage_dir), "coverage_dir")?;
        }
        if let Some(object) = file.llvm_object {
            self.llvm_object = Some(utf8(resolve(object), "llvm_object")?);
        }
        if let Some(secs) = file.timeout_secs {
            self.timeout_secs = secs;
        }
        if let Some(secs) = file.tool_timeout_secs {
            self.tool_timeout_secs = secs;
        }
        if let Some(toolchain) = file.toolchain {
            self.toolchain = toolchain;
        }
        if let Some(package) = file.package {
            self.package = package;
        }
        self.source_file = Some(path.to_path_buf());
        Ok(())
    }

    fn apply_env<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(binary) = get(ENV_BINARY) {
            self.binary = Some(PathBuf::from(binary));
        }
        if let Some(dir) = get(ENV_COVERAGE_DIR) {
            self.coverage_dir = Utf8PathBuf::from(dir);
        }
        if let Some(secs) = get(ENV_TIMEOUT_SECS) {
            self.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("{ENV_TIMEOUT_SECS} must be a whole number of seconds, got '{secs}'"))?;
        }
        if let Some(toolchain) = get(ENV_TOOLCHAIN) {
            self.toolchain = ToolchainKind::parse(&toolchain)
                .with_context(|| format!("invalid {ENV_TOOLCHAIN}"))?;
        }
        if let Some(object) = get(ENV_LLVM_OBJECT) {
            self.llvm_object = Some(Utf8PathBuf::from(object));
        }
        if let Some(package) = get(ENV_PACKAGE) {
            self.package = package;
        }
        Ok(())
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// The configured coverage toolchain.
    pub fn coverage_toolchain(&self) -> Result<Arc<dyn CoverageToolchain>> {
        match self.toolchain {
            ToolchainKind::Go => Ok(Arc::new(GoCovdata::default())),
            ToolchainKind::Llvm => {
                let object = self.llvm_object.clone().with_context(|| {
                    format!("the llvm toolchain needs llvm_object (or {ENV_LLVM_OBJECT})")
                })?;
                Ok(Arc::new(LlvmCov::new(object)))
            }
        }
    }

    /// Invocation runner writing sessions under the configured coverage dir,
    /// announced the way the configured toolchain expects.
    #[must_use]
    pub fn invocation_runner(&self) -> InvocationRunner {
        InvocationRunner::new(self.coverage_dir.clone())
            .with_coverage_env(self.toolchain.coverage_env())
    }
}

/// Search upward from `start_dir` for [`CONFIG_FILE_NAME`].
#[must_use]
pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;
    loop {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }

        if [".git", ".hg", ".svn"]
            .iter()
            .any(|marker| current.join(marker).exists())
        {
            return None;
        }

        current = current.parent()?;
    }
}
