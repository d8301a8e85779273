//! Aggregation pipeline against real child processes, with a shell-based
//! stand-in for the coverage tools.
#![cfg(unix)]

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use flowtest_coverage::{
    CoverageCollector, CoverageError, CoverageToolchain, GoCovdata, Manifest, ManifestEntry,
    ReportPaths, Stage, StageCommand, TestStatus, write_result_shard,
};
use flowtest_runner::{CoverageEnv, CoverageSession, secure_command};
use tempfile::TempDir;

/// Concatenates counters in merge order and reports a fixed total.
#[derive(Debug, Default)]
struct ShellToolchain {
    fail_stage: Option<Stage>,
}

impl ShellToolchain {
    fn sh(&self, stage: Stage, script: &str, args: &[&str]) -> Result<StageCommand, CoverageError> {
        let script = if self.fail_stage == Some(stage) {
            "echo broken tool >&2; exit 3"
        } else {
            script
        };
        let mut argv = vec!["-c", script, stage.as_str()];
        argv.extend_from_slice(args);
        secure_command("sh", argv)
            .map(StageCommand::new)
            .map_err(|source| CoverageError::CommandConstruction { stage, source })
    }
}

impl CoverageToolchain for ShellToolchain {
    fn name(&self) -> &str {
        "shell"
    }

    fn coverage_env(&self) -> CoverageEnv {
        CoverageEnv::GoCoverDir
    }

    fn merge(
        &self,
        sessions: &[Utf8PathBuf],
        paths: &ReportPaths,
    ) -> Result<StageCommand, CoverageError> {
        let mut args = vec![paths.merged_dir.as_str()];
        args.extend(sessions.iter().map(|s| s.as_str()));
        self.sh(
            Stage::Merge,
            r#"out=$1; shift; for d in "$@"; do cat "$d"/covcounters.*; done > "$out/merged.dat""#,
            &args,
        )
    }

    fn text_profile(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError> {
        let step = self.sh(
            Stage::TextProfile,
            r#"cat "$1/merged.dat""#,
            &[paths.merged_dir.as_str()],
        )?;
        Ok(step.stdout_to(paths.profile.clone()))
    }

    fn html(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError> {
        self.sh(
            Stage::Html,
            r#"sed 's/^/<p>/' "$1" > "$2""#,
            &[paths.profile.as_str(), paths.html.as_str()],
        )
    }

    fn summary(&self, paths: &ReportPaths) -> Result<StageCommand, CoverageError> {
        let step = self.sh(
            Stage::Summary,
            r#"printf 'flow/run.go:12:\tRun\t100.0%%\ntotal:\t(statements)\t42.5%%\n'"#,
            &[],
        )?;
        Ok(step.stdout_to(paths.summary.clone()))
    }

    fn parse_total(&self, summary: &str) -> Option<String> {
        GoCovdata::default().parse_total(summary)
    }
}

fn coverage_base(temp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join("coverage/e2e")).unwrap()
}

fn populated_session(base: &Utf8Path, test: &str) -> CoverageSession {
    let session = CoverageSession::allocate(base, test).unwrap();
    fs::write(
        session.dir().join("covcounters.0001"),
        format!("counters-{test}\n"),
    )
    .unwrap();
    session
}

fn collector(base: &Utf8Path, toolchain: ShellToolchain) -> CoverageCollector {
    CoverageCollector::new(base.to_path_buf())
        .unwrap()
        .with_toolchain(Arc::new(toolchain))
        .with_tool_timeout(Duration::from_secs(30))
}

#[test]
fn empty_base_reports_no_coverage_data() {
    let temp = TempDir::new().unwrap();
    let base = coverage_base(&temp);
    fs::create_dir_all(&base).unwrap();

    let err = collector(&base, ShellToolchain::default())
        .aggregate_coverage()
        .unwrap_err();
    assert!(err.is_no_data(), "{err}");
    assert!(!matches!(err, CoverageError::Io { .. }));
}

#[test]
fn sessions_without_counters_are_not_coverage_data() {
    let temp = TempDir::new().unwrap();
    let base = coverage_base(&temp);
    CoverageSession::allocate(&base, "rejected").unwrap();

    let err = collector(&base, ShellToolchain::default())
        .aggregate_coverage()
        .unwrap_err();
    assert!(err.is_no_data(), "{err}");
}

#[test]
fn aggregation_is_repeatable_byte_for_byte() {
    let temp = TempDir::new().unwrap();
    let base = coverage_base(&temp);
    populated_session(&base, "T2");
    populated_session(&base, "T1");

    let mut collector = collector(&base, ShellToolchain::default());

    let first = collector.aggregate_coverage().unwrap();
    let first_profile = fs::read(&first.paths.profile).unwrap();
    let second = collector.aggregate_coverage().unwrap();
    let second_profile = fs::read(&second.paths.profile).unwrap();

    assert_eq!(first_profile, second_profile);
    assert_eq!(first_profile, b"counters-T1\ncounters-T2\n");
    assert_eq!(first.sessions, vec![base.join("T1"), base.join("T2")]);
    assert!(first.paths.html.is_file());
}

#[test]
fn outputs_land_next_to_the_coverage_base() {
    let temp = TempDir::new().unwrap();
    let base = coverage_base(&temp);
    populated_session(&base, "T1");

    let report = collector(&base, ShellToolchain::default())
        .aggregate_coverage()
        .unwrap();

    let parent = temp.path().join("coverage");
    assert_eq!(report.paths.profile.as_std_path(), parent.join("e2e.out"));
    assert_eq!(report.paths.summary.as_std_path(), parent.join("e2e-summary.txt"));
    assert!(parent.join("e2e-merged").join("merged.dat").is_file());
}

#[test]
fn total_is_saved_into_the_manifest() {
    let temp = TempDir::new().unwrap();
    let base = coverage_base(&temp);
    populated_session(&base, "T1");

    let mut collector = collector(&base, ShellToolchain::default());
    let report = collector.aggregate_coverage().unwrap();
    assert_eq!(report.coverage_percent.as_deref(), Some("42.5%"));
    collector.save_manifest().unwrap();

    let manifest = Manifest::load(collector.manifest_path()).unwrap();
    assert_eq!(manifest.summary.coverage_percent, "42.5%");
}

#[test]
fn result_shards_are_absorbed_once_per_test() {
    let temp = TempDir::new().unwrap();
    let base = coverage_base(&temp);

    for (test, passed) in [("T1", true), ("T2", false), ("T3", true)] {
        let session = populated_session(&base, test);
        let entry = ManifestEntry::new(
            "e2e",
            test,
            session.dir().to_string(),
            Duration::from_millis(3),
            passed,
        );
        write_result_shard(&session, &entry).unwrap();
    }

    let mut collector = collector(&base, ShellToolchain::default());
    assert_eq!(collector.absorb_shards().unwrap(), 3);
    assert_eq!(collector.absorb_shards().unwrap(), 3);

    let manifest = collector.manifest();
    assert_eq!(manifest.entries.len(), 3);
    assert_eq!(manifest.summary.total_tests, 3);
    assert_eq!(manifest.summary.passed, 2);
    assert_eq!(manifest.summary.failed, 1);
    assert_eq!(manifest.entries[1].test, "T2");
    assert_eq!(manifest.entries[1].status, TestStatus::Failed);

    // Shards never count as coverage data
    let report = collector.aggregate_coverage().unwrap();
    assert_eq!(report.sessions.len(), 3);
}

#[test]
fn failing_tool_is_reported_with_its_stage() {
    for stage in [Stage::Merge, Stage::TextProfile, Stage::Html, Stage::Summary] {
        let temp = TempDir::new().unwrap();
        let base = coverage_base(&temp);
        populated_session(&base, "T1");

        let err = collector(
            &base,
            ShellToolchain {
                fail_stage: Some(stage),
            },
        )
        .aggregate_coverage()
        .unwrap_err();

        match err {
            CoverageError::CommandExecution {
                stage: failed,
                reason,
                ..
            } => {
                assert_eq!(failed, stage);
                assert!(reason.contains("exit code 3"), "{reason}");
                assert!(reason.contains("broken tool"), "{reason}");
            }
            other => panic!("unexpected error for {stage}: {other}"),
        }
    }
}
