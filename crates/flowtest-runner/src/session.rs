//! Per-test coverage session directories.
//!
//! Each invocation gets `{coverage_base}/{test_name}/`, into which the child
//! process flushes raw coverage counters. Allocation drops a marker file so
//! discovery can recognize session directories exactly instead of guessing
//! from file names.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use tracing::{debug, warn};

use crate::error::RunnerError;

/// File written into every session directory at allocation time.
pub const SESSION_MARKER: &str = ".flowtest-session";

/// Per-test outcome shard written next to the counters after a run.
pub const RESULT_SHARD: &str = ".flowtest-result.json";

/// Contents of [`SESSION_MARKER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub test: String,
    pub created_at: DateTime<Utc>,
}

/// Map a test name onto a single safe path component.
///
/// The mapping is injective, so distinct test names never share a session.
/// `~` is the escape character: `~` becomes `~~`, `/` becomes `~s`, `\`
/// becomes `~b` and NUL becomes `~0`. The names `.`, `..` and the empty name
/// map to `~d`, `~d~d` and `~e`. Subtest names such as `TestFlow/case_1`
/// therefore stay directly under the coverage base.
#[must_use]
pub fn session_component(test_name: &str) -> String {
    match test_name {
        "" => return "~e".to_string(),
        "." => return "~d".to_string(),
        ".." => return "~d~d".to_string(),
        _ => {}
    }

    let mut component = String::with_capacity(test_name.len());
    for c in test_name.chars() {
        match c {
            '~' => component.push_str("~~"),
            '/' => component.push_str("~s"),
            '\\' => component.push_str("~b"),
            '\0' => component.push_str("~0"),
            other => component.push(other),
        }
    }
    component
}

fn absolute_base(base: &Utf8Path) -> Result<Utf8PathBuf, RunnerError> {
    let fail = |source: io::Error| RunnerError::CoverageDirFailed {
        path: base.to_string(),
        source,
    };
    let absolute = std::path::absolute(base).map_err(fail)?;
    Utf8PathBuf::from_path_buf(absolute)
        .map_err(|p| fail(io::Error::other(format!("not valid UTF-8: {}", p.display()))))
}

/// A uniquely named, retained directory receiving one test's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageSession {
    dir: Utf8PathBuf,
    test_name: String,
}

impl CoverageSession {
    /// Create `{base}/{test_name}/` (and parents) and write the marker.
    ///
    /// A relative `base` is resolved against the current directory, so the
    /// session path stays valid for a child running in another directory.
    ///
    /// # Errors
    ///
    /// [`RunnerError::CoverageDirFailed`] if the directory or marker cannot be
    /// written. Callers must treat this as fatal: without the directory there
    /// is no isolation between tests.
    pub fn allocate(base: &Utf8Path, test_name: &str) -> Result<Self, RunnerError> {
        let base = absolute_base(base)?;
        let dir = base.join(session_component(test_name));
        let fail = |source: io::Error| RunnerError::CoverageDirFailed {
            path: dir.to_string(),
            source,
        };

        fs::create_dir_all(&dir).map_err(fail)?;

        let marker = SessionMarker {
            test: test_name.to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&marker).map_err(|e| fail(io::Error::other(e)))?;
        fs::write(dir.join(SESSION_MARKER), json).map_err(fail)?;

        debug!(test = %test_name, dir = %dir, "allocated coverage session");
        Ok(Self {
            dir,
            test_name: test_name.to_string(),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    #[must_use]
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Path of this session's result shard.
    #[must_use]
    pub fn result_shard_path(&self) -> Utf8PathBuf {
        self.dir.join(RESULT_SHARD)
    }

    /// Remove the session directory. Failures are logged, never returned.
    pub fn cleanup(self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(dir = %self.dir, "removed coverage session"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir, error = %e, "failed to remove coverage session"),
        }
    }
}

/// How a session directory is announced to the instrumented child.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CoverageEnv {
    /// `GOCOVERDIR=<session>`
    #[default]
    GoCoverDir,
    /// `LLVM_PROFILE_FILE=<session>/%p-%m.profraw`
    LlvmProfile,
    /// `<var>=<session>`
    Custom { var: String },
}

impl CoverageEnv {
    #[must_use]
    pub fn var_name(&self) -> &str {
        match self {
            Self::GoCoverDir => "GOCOVERDIR",
            Self::LlvmProfile => "LLVM_PROFILE_FILE",
            Self::Custom { var } => var,
        }
    }

    #[must_use]
    pub fn value_for(&self, session_dir: &Utf8Path) -> String {
        match self {
            Self::LlvmProfile => session_dir.join("%p-%m.profraw").into_string(),
            Self::GoCoverDir | Self::Custom { .. } => session_dir.to_string(),
        }
    }
}

/// Read the marker of a candidate session directory, if it has a valid one.
#[must_use]
pub fn read_marker(dir: &Utf8Path) -> Option<SessionMarker> {
    let content = fs::read_to_string(dir.join(SESSION_MARKER)).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8_base(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_session_component() {
        assert_eq!(session_component("TestFlow"), "TestFlow");
        assert_eq!(session_component("TestFlow/case_1"), "TestFlow~scase_1");
        assert_eq!(session_component("a\\b"), "a~bb");
        assert_eq!(session_component("a\0b"), "a~0b");
        assert_eq!(session_component("x~y"), "x~~y");
        assert_eq!(session_component(".."), "~d~d");
        assert_eq!(session_component("."), "~d");
        assert_eq!(session_component(""), "~e");
        assert_eq!(session_component("..."), "...");
    }

    #[test]
    fn test_similar_names_get_separate_sessions() {
        let temp = TempDir::new().unwrap();
        let base = utf8_base(&temp);

        let nested = CoverageSession::allocate(&base, "TestFlow/case").unwrap();
        let flat = CoverageSession::allocate(&base, "TestFlow_case").unwrap();
        let escaped = CoverageSession::allocate(&base, "TestFlow~scase").unwrap();

        assert_ne!(nested.dir(), flat.dir());
        assert_ne!(nested.dir(), escaped.dir());
        assert_eq!(read_marker(nested.dir()).unwrap().test, "TestFlow/case");
        assert_eq!(read_marker(flat.dir()).unwrap().test, "TestFlow_case");
        assert_eq!(read_marker(escaped.dir()).unwrap().test, "TestFlow~scase");
    }

    #[test]
    fn test_allocate_creates_nested_dir_with_marker() {
        let temp = TempDir::new().unwrap();
        let base = utf8_base(&temp).join("coverage/e2e");

        let session = CoverageSession::allocate(&base, "T1").unwrap();
        assert_eq!(session.dir(), base.join("T1").as_path());
        assert!(session.dir().join(SESSION_MARKER).is_file());

        let marker = read_marker(session.dir()).unwrap();
        assert_eq!(marker.test, "T1");
    }

    #[test]
    fn test_allocate_resolves_relative_base() {
        let scratch = tempfile::Builder::new()
            .prefix("flowtest-rel-")
            .tempdir_in(".")
            .unwrap();
        let name = scratch.path().file_name().unwrap().to_str().unwrap();
        let relative = Utf8PathBuf::from(name).join("e2e");

        let session = CoverageSession::allocate(&relative, "T1").unwrap();

        let expected = std::env::current_dir().unwrap().join(name).join("e2e/T1");
        assert!(session.dir().is_absolute());
        assert_eq!(session.dir().as_std_path(), expected);
        assert!(session.dir().join(SESSION_MARKER).is_file());
    }

    #[test]
    fn test_allocate_is_repeatable() {
        let temp = TempDir::new().unwrap();
        let base = utf8_base(&temp);

        CoverageSession::allocate(&base, "T1").unwrap();
        let again = CoverageSession::allocate(&base, "T1").unwrap();
        assert!(again.dir().is_dir());
    }

    #[test]
    fn test_allocate_fails_when_base_is_a_file() {
        let temp = TempDir::new().unwrap();
        let base = utf8_base(&temp).join("not-a-dir");
        fs::write(&base, "x").unwrap();

        let err = CoverageSession::allocate(&base, "T1").unwrap_err();
        assert!(matches!(err, RunnerError::CoverageDirFailed { .. }));
    }

    #[test]
    fn test_cleanup_removes_dir_and_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        let base = utf8_base(&temp);

        let session = CoverageSession::allocate(&base, "T1").unwrap();
        let dir = session.dir().to_path_buf();
        session.clone().cleanup();
        assert!(!dir.exists());

        // Second cleanup of an already-removed session only logs
        session.cleanup();
    }

    #[test]
    fn test_read_marker_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let base = utf8_base(&temp);
        fs::write(base.join(SESSION_MARKER), "not json").unwrap();
        assert!(read_marker(&base).is_none());
    }

    #[test]
    fn test_coverage_env_values() {
        let dir = Utf8Path::new("/cov/e2e/T1");
        assert_eq!(CoverageEnv::GoCoverDir.var_name(), "GOCOVERDIR");
        assert_eq!(CoverageEnv::GoCoverDir.value_for(dir), "/cov/e2e/T1");
        assert_eq!(CoverageEnv::LlvmProfile.var_name(), "LLVM_PROFILE_FILE");
        assert_eq!(
            CoverageEnv::LlvmProfile.value_for(dir),
            "/cov/e2e/T1/%p-%m.profraw"
        );
        let custom = CoverageEnv::Custom {
            var: "MY_COVDIR".to_string(),
        };
        assert_eq!(custom.var_name(), "MY_COVDIR");
        assert_eq!(custom.value_for(dir), "/cov/e2e/T1");
    }
}
