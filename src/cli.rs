//! Batch-phase command line: aggregation, pruning and manifest inspection.
//!
//! These run after the test suite has finished, never alongside it.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use flowtest_coverage::{CoverageCollector, MANIFEST_FILE, Manifest, prune_sessions};
use flowtest_utils::logging::init_tracing;
use tracing::{debug, warn};

use crate::config::{HarnessConfig, ToolchainKind};

/// flowtest - aggregate coverage from isolated end-to-end test runs
#[derive(Parser, Debug)]
#[command(name = "flowtest", version)]
#[command(about = "Aggregate per-test coverage sessions and inspect the test manifest")]
pub struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Explicit config file instead of searching for flowtest.toml
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Absorb result shards, merge all sessions and write the reports
    Aggregate {
        /// Coverage base directory holding the sessions
        #[arg(long, value_name = "DIR")]
        coverage_dir: Option<Utf8PathBuf>,

        #[arg(long, value_enum)]
        toolchain: Option<ToolchainKind>,

        /// Instrumented object for the llvm toolchain
        #[arg(long, value_name = "PATH")]
        object: Option<Utf8PathBuf>,
    },

    /// Remove sessions older than the given age
    Prune {
        #[arg(long, value_name = "HOURS")]
        older_than_hours: u64,

        #[arg(long, value_name = "DIR")]
        coverage_dir: Option<Utf8PathBuf>,
    },

    /// Print the manifest summary
    Manifest {
        #[arg(long, value_name = "DIR")]
        coverage_dir: Option<Utf8PathBuf>,

        /// Print the whole manifest as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse arguments, run the command, and map the outcome to an exit code.
#[must_use]
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("warning: logging unavailable: {e}");
    }

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(explicit: Option<&PathBuf>) -> Result<HarnessConfig> {
    match explicit {
        Some(path) => HarnessConfig::load_with(Some(path.as_path()), |key| std::env::var(key).ok()),
        None => HarnessConfig::load(),
    }
}

pub fn execute(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_ref())?;
    debug!(source = ?config.source_file, "loaded configuration");

    match cli.command {
        Command::Aggregate {
            coverage_dir,
            toolchain,
            object,
        } => {
            if let Some(dir) = coverage_dir {
                config.coverage_dir = dir;
            }
            if let Some(toolchain) = toolchain {
                config.toolchain = toolchain;
            }
            if let Some(object) = object {
                config.llvm_object = Some(object);
            }
            aggregate(&config)
        }
        Command::Prune {
            older_than_hours,
            coverage_dir,
        } => {
            let dir = coverage_dir.unwrap_or(config.coverage_dir);
            let max_age = Duration::from_secs(older_than_hours.saturating_mul(3600));
            let removed = prune_sessions(&dir, max_age)
                .with_context(|| format!("failed to prune sessions under {dir}"))?;
            println!("pruned {removed} session(s) under {dir}");
            Ok(())
        }
        Command::Manifest { coverage_dir, json } => {
            let dir = coverage_dir.unwrap_or(config.coverage_dir);
            let manifest = Manifest::load(&dir.join(MANIFEST_FILE))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&manifest)?);
            } else {
                let summary = &manifest.summary;
                println!("tests:    {}", summary.total_tests);
                println!("passed:   {}", summary.passed);
                println!("failed:   {}", summary.failed);
                if !summary.coverage_percent.is_empty() {
                    println!("coverage: {}", summary.coverage_percent);
                }
            }
            Ok(())
        }
    }
}

fn aggregate(config: &HarnessConfig) -> Result<()> {
    let toolchain = config.coverage_toolchain()?;
    let mut collector = CoverageCollector::new(config.coverage_dir.clone())?
        .with_toolchain(toolchain)
        .with_tool_timeout(config.tool_timeout());

    let absorbed = collector.absorb_shards()?;
    debug!(absorbed, "absorbed result shards");

    match collector.aggregate_coverage() {
        Ok(report) => {
            match &report.coverage_percent {
                Some(total) => println!("coverage: {total}"),
                None => println!("coverage: unknown (no total in {})", report.paths.summary),
            }
            println!("profile:  {}", report.paths.profile);
            println!("html:     {}", report.paths.html);
        }
        Err(e) if e.is_no_data() => {
            warn!(error = %e, "nothing to aggregate");
            eprintln!("warning: {e}");
        }
        Err(e) => return Err(e).context("coverage aggregation failed"),
    }

    collector
        .save_manifest()
        .context("failed to save the manifest")?;
    Ok(())
}
