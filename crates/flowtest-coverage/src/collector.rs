//! The Coverage Collector: manifest ownership and the aggregation pipeline.
//!
//! Aggregation must run after every test has finished writing its session.
//! It is sequential and is the only step that reads across sessions.

use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use flowtest_runner::{NativeRunner, ProcessRunner, RESULT_SHARD};
use flowtest_utils::logging::aggregation_span;
use tracing::{debug, info, warn};

use crate::discovery::{discover_sessions, marked_dirs};
use crate::error::{CoverageError, Stage};
use crate::manifest::{MANIFEST_FILE, Manifest, ManifestEntry, read_result_shard};
use crate::toolchain::{CoverageToolchain, GoCovdata, ReportPaths, StageCommand};

/// Default per-stage limit for external coverage tools.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Outcome of a successful [`CoverageCollector::aggregate_coverage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageReport {
    /// Sessions merged, in merge order
    pub sessions: Vec<Utf8PathBuf>,
    pub paths: ReportPaths,
    /// `None` when the summary had no total line
    pub coverage_percent: Option<String>,
}

#[derive(Debug)]
pub struct CoverageCollector {
    base: Utf8PathBuf,
    manifest_path: Utf8PathBuf,
    manifest: Manifest,
    toolchain: Arc<dyn CoverageToolchain>,
    process: Arc<dyn ProcessRunner>,
    tool_timeout: Duration,
}

impl CoverageCollector {
    /// Open the collector for `base`, loading `{base}/manifest.json` if present.
    pub fn new(base: impl Into<Utf8PathBuf>) -> Result<Self, CoverageError> {
        let base = base.into();
        let manifest_path = base.join(MANIFEST_FILE);
        let manifest = Manifest::load(&manifest_path)?;

        Ok(Self {
            base,
            manifest_path,
            manifest,
            toolchain: Arc::new(GoCovdata::default()),
            process: Arc::new(NativeRunner::new()),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_toolchain(mut self, toolchain: Arc<dyn CoverageToolchain>) -> Self {
        self.toolchain = toolchain;
        self
    }

    #[must_use]
    pub fn with_process_runner(mut self, process: Arc<dyn ProcessRunner>) -> Self {
        self.process = process;
        self
    }

    #[must_use]
    pub const fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    #[must_use]
    pub fn base(&self) -> &Utf8Path {
        &self.base
    }

    #[must_use]
    pub fn manifest_path(&self) -> &Utf8Path {
        &self.manifest_path
    }

    #[must_use]
    pub const fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    #[must_use]
    pub fn toolchain(&self) -> &dyn CoverageToolchain {
        self.toolchain.as_ref()
    }

    /// Append one result. Only safe from a single thread; parallel tests
    /// write shards instead.
    pub fn add_test_result(&mut self, entry: ManifestEntry) {
        self.manifest.add_test_result(entry);
    }

    pub fn save_manifest(&mut self) -> Result<(), CoverageError> {
        self.manifest.save(&self.manifest_path)
    }

    /// Fold every per-test result shard under the base into the manifest.
    ///
    /// Shards are read in sorted session order and upserted by package and
    /// test name. Unreadable shards are logged and skipped. Returns the number
    /// absorbed.
    pub fn absorb_shards(&mut self) -> Result<usize, CoverageError> {
        let mut absorbed = 0;
        for dir in marked_dirs(&self.base, Stage::Shards)? {
            match read_result_shard(&dir.join(RESULT_SHARD)) {
                Ok(Some(entry)) => {
                    self.manifest.upsert_test_result(entry);
                    absorbed += 1;
                }
                Ok(None) => debug!(dir = %dir, "session has no result shard"),
                Err(e) => warn!(dir = %dir, error = %e, "skipping unreadable result shard"),
            }
        }
        debug!(absorbed, "absorbed result shards");
        Ok(absorbed)
    }

    /// Merge every populated session into one report.
    ///
    /// Fails with [`CoverageError::NoCoverageData`] when nothing qualifies.
    /// The merged directory is recreated on every call, so repeated runs over
    /// the same sessions produce the same output.
    pub fn aggregate_coverage(&mut self) -> Result<CoverageReport, CoverageError> {
        let span = aggregation_span(self.base.as_str(), self.toolchain.name());
        let _guard = span.enter();

        let sessions = discover_sessions(&self.base)?;
        if sessions.is_empty() {
            return Err(CoverageError::NoCoverageData {
                base: self.base.to_string(),
            });
        }
        info!(sessions = sessions.len(), "aggregating coverage sessions");

        let paths = ReportPaths::for_base(&self.base)?;
        reset_dir(&paths.merged_dir)?;

        let toolchain = Arc::clone(&self.toolchain);
        self.run_stage(Stage::Merge, toolchain.merge(&sessions, &paths)?)?;
        self.run_stage(Stage::TextProfile, toolchain.text_profile(&paths)?)?;
        self.run_stage(Stage::Html, toolchain.html(&paths)?)?;
        self.run_stage(Stage::Summary, toolchain.summary(&paths)?)?;

        let summary = fs::read_to_string(&paths.summary).map_err(|source| CoverageError::Io {
            stage: Stage::Summary,
            path: paths.summary.to_string(),
            source,
        })?;

        let coverage_percent = toolchain.parse_total(&summary);
        match &coverage_percent {
            Some(total) => {
                info!(coverage = %total, "aggregate coverage");
                self.manifest.summary.coverage_percent.clone_from(total);
            }
            None => warn!(summary = %paths.summary, "coverage summary has no total line"),
        }

        Ok(CoverageReport {
            sessions,
            paths,
            coverage_percent,
        })
    }

    fn run_stage(&self, stage: Stage, step: StageCommand) -> Result<(), CoverageError> {
        let command = step.command.display_line();
        info!(stage = %stage, command = %command, "running coverage stage");

        let output = self
            .process
            .run(&step.command, self.tool_timeout)
            .map_err(|e| CoverageError::CommandExecution {
                stage,
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if !output.success() {
            let reason = match output.exit_code {
                Some(code) => format!("exit code {code}: {}", output.stderr_string().trim()),
                None => format!("terminated by signal: {}", output.stderr_string().trim()),
            };
            return Err(CoverageError::CommandExecution {
                stage,
                command,
                reason,
            });
        }

        if let Some(target) = &step.stdout_to {
            fs::write(target, &output.stdout).map_err(|source| CoverageError::Io {
                stage,
                path: target.to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

fn reset_dir(dir: &Utf8Path) -> Result<(), CoverageError> {
    let io_err = |source| CoverageError::Io {
        stage: Stage::Merge,
        path: dir.to_string(),
        source,
    };
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }
    fs::create_dir_all(dir).map_err(io_err)
}
