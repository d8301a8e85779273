//! JSON ledger of executed tests and aggregate coverage.
//!
//! The on-disk shape is
//! `{version, timestamp, tests: [{package, test, coverDir, duration, status}],
//!   summary: {totalTests, passed, failed, coverage}}`.
//!
//! The manifest file itself is not locked. Parallel tests write one result
//! shard each into their own session directory instead, and the shards are
//! folded in during the sequential aggregation phase.

use std::fs;
use std::io;
use std::time::Duration;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use flowtest_runner::CoverageSession;
use flowtest_utils::atomic_write::{FileMode, write_file_atomic};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoverageError;

pub const MANIFEST_VERSION: &str = "1";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
}

impl TestStatus {
    #[must_use]
    pub const fn from_passed(passed: bool) -> Self {
        if passed { Self::Passed } else { Self::Failed }
    }
}

/// One executed test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub package: String,
    pub test: String,
    pub cover_dir: String,
    /// Wall-clock milliseconds
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub status: TestStatus,
}

impl ManifestEntry {
    #[must_use]
    pub fn new(
        package: impl Into<String>,
        test: impl Into<String>,
        cover_dir: impl Into<String>,
        duration: Duration,
        passed: bool,
    ) -> Self {
        Self {
            package: package.into(),
            test: test.into(),
            cover_dir: cover_dir.into(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            status: TestStatus::from_passed(passed),
        }
    }

    fn same_test(&self, other: &Self) -> bool {
        self.package == other.package && self.test == other.test
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    /// Aggregate percentage token as printed by the coverage tool, e.g. `84.2%`
    #[serde(rename = "coverage", default)]
    pub coverage_percent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "tests", default)]
    pub entries: Vec<ManifestEntry>,
    #[serde(default)]
    pub summary: ManifestSummary,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            timestamp: Utc::now(),
            entries: Vec::new(),
            summary: ManifestSummary::default(),
        }
    }
}

fn manifest_error(path: &Utf8Path, reason: impl ToString) -> CoverageError {
    CoverageError::Manifest {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

impl Manifest {
    /// Load `path`, or start an empty manifest if the file does not exist.
    pub fn load(path: &Utf8Path) -> Result<Self, CoverageError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let mut manifest: Self =
                    serde_json::from_str(&content).map_err(|e| manifest_error(path, e))?;
                manifest.recompute_summary();
                Ok(manifest)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path, "no existing manifest, starting empty");
                Ok(Self::default())
            }
            Err(e) => Err(manifest_error(path, e)),
        }
    }

    /// Append a result and recompute the summary counts.
    pub fn add_test_result(&mut self, entry: ManifestEntry) {
        self.entries.push(entry);
        self.recompute_summary();
    }

    /// Replace the entry for the same package and test, or append.
    pub fn upsert_test_result(&mut self, entry: ManifestEntry) {
        match self.entries.iter_mut().find(|e| e.same_test(&entry)) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self.recompute_summary();
    }

    /// Full pass over the entries; the coverage token is left untouched.
    pub fn recompute_summary(&mut self) {
        let passed = self
            .entries
            .iter()
            .filter(|e| e.status == TestStatus::Passed)
            .count();
        self.summary.total_tests = self.entries.len();
        self.summary.passed = passed;
        self.summary.failed = self.entries.len() - passed;
    }

    /// Persist as pretty-printed JSON, owner-only, creating parent dirs.
    pub fn save(&mut self, path: &Utf8Path) -> Result<(), CoverageError> {
        self.recompute_summary();
        self.timestamp = Utc::now();

        let mut json = serde_json::to_string_pretty(self).map_err(|e| manifest_error(path, e))?;
        json.push('\n');
        write_file_atomic(path, &json, FileMode::Private)
            .map_err(|e| manifest_error(path, format!("{e:#}")))?;

        debug!(path = %path, tests = self.summary.total_tests, "saved manifest");
        Ok(())
    }
}

// ============================================================================
// Result shards
// ============================================================================

/// Record one test outcome inside its own session directory.
///
/// Safe to call from parallel tests: each writes only to its own session.
pub fn write_result_shard(session: &CoverageSession, entry: &ManifestEntry) -> Result<(), CoverageError> {
    let path = session.result_shard_path();
    let json = serde_json::to_string_pretty(entry).map_err(|e| manifest_error(&path, e))?;
    write_file_atomic(&path, &json, FileMode::Private)
        .map_err(|e| manifest_error(&path, format!("{e:#}")))?;
    Ok(())
}

/// Read a shard written by [`write_result_shard`]; `None` if absent.
pub fn read_result_shard(path: &Utf8Path) -> Result<Option<ManifestEntry>, CoverageError> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| manifest_error(path, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(manifest_error(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn manifest_path(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().join("coverage/e2e").join(MANIFEST_FILE)).unwrap()
    }

    fn entry(test: &str, passed: bool) -> ManifestEntry {
        ManifestEntry::new(
            "e2e",
            test,
            format!("coverage/e2e/{test}"),
            Duration::from_millis(12),
            passed,
        )
    }

    #[test]
    fn test_load_missing_file_gives_empty_manifest() {
        let temp = TempDir::new().unwrap();
        let manifest = Manifest::load(&manifest_path(&temp)).unwrap();
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert!(manifest.entries.is_empty());
        assert_eq!(manifest.summary.total_tests, 0);
    }

    #[test]
    fn test_add_recomputes_summary() {
        let mut manifest = Manifest::default();
        manifest.add_test_result(entry("T1", true));
        manifest.add_test_result(entry("T2", false));
        manifest.add_test_result(entry("T3", true));

        assert_eq!(manifest.summary.total_tests, 3);
        assert_eq!(manifest.summary.passed, 2);
        assert_eq!(manifest.summary.failed, 1);
    }

    #[test]
    fn test_upsert_replaces_same_test() {
        let mut manifest = Manifest::default();
        manifest.upsert_test_result(entry("T1", false));
        manifest.upsert_test_result(entry("T1", true));

        assert_eq!(manifest.entries.len(), 1);
        assert_eq!(manifest.summary.passed, 1);
        assert_eq!(manifest.summary.failed, 0);
    }

    #[test]
    fn test_save_then_load_round_trips_counts() {
        let temp = TempDir::new().unwrap();
        let path = manifest_path(&temp);

        let mut manifest = Manifest::load(&path).unwrap();
        for i in 0..5 {
            manifest.add_test_result(entry(&format!("T{i}"), i % 2 == 0));
        }
        manifest.summary.coverage_percent = "61.5%".to_string();
        manifest.save(&path).unwrap();

        let reloaded = Manifest::load(&path).unwrap();
        assert_eq!(reloaded.summary.total_tests, 5);
        assert_eq!(reloaded.summary.passed + reloaded.summary.failed, 5);
        assert_eq!(reloaded.summary.coverage_percent, "61.5%");
        assert_eq!(reloaded.entries, manifest.entries);
    }

    #[test]
    fn test_on_disk_field_names() {
        let temp = TempDir::new().unwrap();
        let path = manifest_path(&temp);

        let mut manifest = Manifest::default();
        manifest.add_test_result(entry("T1", true));
        manifest.save(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value["tests"].is_array());
        assert_eq!(value["tests"][0]["coverDir"], "coverage/e2e/T1");
        assert_eq!(value["tests"][0]["duration"], 12);
        assert_eq!(value["tests"][0]["status"], "passed");
        assert_eq!(value["summary"]["totalTests"], 1);
        assert_eq!(value["summary"]["coverage"], "");
    }

    #[cfg(unix)]
    #[test]
    fn test_save_uses_private_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = manifest_path(&temp);
        Manifest::default().save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_load_rejects_corrupt_manifest() {
        let temp = TempDir::new().unwrap();
        let path = manifest_path(&temp);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let err = Manifest::load(&path).unwrap_err();
        assert!(matches!(err, CoverageError::Manifest { .. }));
    }

    #[test]
    fn test_load_recomputes_stale_summary() {
        let temp = TempDir::new().unwrap();
        let path = manifest_path(&temp);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"{"version":"1","timestamp":"2026-01-01T00:00:00Z",
                "tests":[{"package":"p","test":"t","coverDir":"d","duration":1,"status":"failed"}],
                "summary":{"totalTests":9,"passed":9,"failed":0,"coverage":"10.0%"}}"#,
        )
        .unwrap();

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.summary.total_tests, 1);
        assert_eq!(manifest.summary.failed, 1);
        assert_eq!(manifest.summary.coverage_percent, "10.0%");
    }

    #[test]
    fn test_result_shard_round_trip() {
        let temp = TempDir::new().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let session = CoverageSession::allocate(&base, "T1").unwrap();

        assert!(read_result_shard(&session.result_shard_path()).unwrap().is_none());

        let written = entry("T1", true);
        write_result_shard(&session, &written).unwrap();
        let read = read_result_shard(&session.result_shard_path()).unwrap();
        assert_eq!(read, Some(written));
    }

    proptest! {
        #[test]
        fn prop_upsert_keeps_one_entry_per_test(
            updates in prop::collection::vec((0usize..4, any::<bool>()), 0..24)
        ) {
            let mut manifest = Manifest::default();
            let mut latest = std::collections::BTreeMap::new();
            for (test, passed) in &updates {
                let name = format!("T{test}");
                manifest.upsert_test_result(entry(&name, *passed));
                latest.insert(name, *passed);
            }

            prop_assert_eq!(manifest.entries.len(), latest.len());
            prop_assert_eq!(manifest.summary.total_tests, latest.len());
            let passed = latest.values().filter(|p| **p).count();
            prop_assert_eq!(manifest.summary.passed, passed);
            prop_assert_eq!(manifest.summary.failed, latest.len() - passed);
            for e in &manifest.entries {
                prop_assert_eq!(e.status, TestStatus::from_passed(latest[&e.test]));
            }
        }
    }
}
