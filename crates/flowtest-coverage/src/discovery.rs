//! Locating coverage sessions under a coverage base.
//!
//! A session directory is recognized by its [`SESSION_MARKER`], never by the
//! names or extensions of the counter files inside it.

use std::fs;
use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use flowtest_runner::{RESULT_SHARD, SESSION_MARKER, read_marker};
use tracing::{debug, info, warn};

use crate::error::{CoverageError, Stage};

/// All directories under `base` carrying a session marker, sorted.
///
/// A missing `base` yields an empty list. Marked directories are not
/// descended into. Symlinks are never followed.
pub fn find_marked_dirs(base: &Utf8Path) -> Result<Vec<Utf8PathBuf>, CoverageError> {
    marked_dirs(base, Stage::Discover)
}

pub(crate) fn marked_dirs(base: &Utf8Path, stage: Stage) -> Result<Vec<Utf8PathBuf>, CoverageError> {
    let mut found = Vec::new();
    let mut pending = vec![base.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound && dir.as_path() == base => {
                debug!(base = %base, "coverage base does not exist");
                return Ok(Vec::new());
            }
            Err(e) if dir.as_path() == base => {
                return Err(CoverageError::Io {
                    stage,
                    path: base.to_string(),
                    source: e,
                });
            }
            Err(e) => {
                warn!(dir = %dir, error = %e, "skipping unreadable directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                warn!(path = ?entry.path(), "skipping non UTF-8 path");
                continue;
            };
            if path.join(SESSION_MARKER).is_file() {
                found.push(path);
            } else {
                pending.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// True if `dir` holds anything besides the marker and result shard.
fn has_counters(dir: &Utf8Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name();
        name != SESSION_MARKER && name != RESULT_SHARD
    })
}

/// Sessions that actually received coverage counters, sorted.
///
/// This is the input set for merging. Sessions whose binary was rejected or
/// never flushed counters are skipped.
pub fn discover_sessions(base: &Utf8Path) -> Result<Vec<Utf8PathBuf>, CoverageError> {
    let sessions: Vec<_> = find_marked_dirs(base)?
        .into_iter()
        .filter(|dir| {
            let populated = has_counters(dir);
            if !populated {
                debug!(dir = %dir, "session has no counters");
            }
            populated
        })
        .collect();

    debug!(base = %base, count = sessions.len(), "discovered coverage sessions");
    Ok(sessions)
}

/// Remove marked session directories older than `max_age`.
///
/// Age comes from the marker's `created_at`. Directories whose marker cannot
/// be read are left alone. Removal failures are logged and skipped.
/// Returns the number of directories removed.
pub fn prune_sessions(base: &Utf8Path, max_age: Duration) -> Result<usize, CoverageError> {
    let Ok(max_age) = chrono::Duration::from_std(max_age) else {
        return Ok(0);
    };
    let now = Utc::now();
    let mut removed = 0;

    for dir in marked_dirs(base, Stage::Prune)? {
        let Some(marker) = read_marker(&dir) else {
            warn!(dir = %dir, "unreadable session marker, not pruning");
            continue;
        };
        if now.signed_duration_since(marker.created_at) <= max_age {
            continue;
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(dir = %dir, test = %marker.test, "pruned stale session");
                removed += 1;
            }
            Err(e) => warn!(dir = %dir, error = %e, "failed to prune session"),
        }
    }

    if removed > 0 {
        info!(base = %base, removed, "pruned stale coverage sessions");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowtest_runner::{CoverageSession, SessionMarker};
    use tempfile::TempDir;

    fn utf8_base(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().join("coverage/e2e")).unwrap()
    }

    fn session_with_counters(base: &Utf8Path, test: &str) -> CoverageSession {
        let session = CoverageSession::allocate(base, test).unwrap();
        fs::write(session.dir().join("covcounters.abc.1.2"), b"counters").unwrap();
        session
    }

    #[test]
    fn test_missing_base_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(discover_sessions(&utf8_base(&temp)).unwrap().is_empty());
    }

    #[test]
    fn test_discovery_is_sorted_and_requires_counters() {
        let temp = TempDir::new().unwrap();
        let base = utf8_base(&temp);

        session_with_counters(&base, "T2");
        session_with_counters(&base, "T1");
        CoverageSession::allocate(&base, "empty").unwrap();

        let sessions = discover_sessions(&base).unwrap();
        assert_eq!(sessions, vec![base.join("T1"), base.join("T2")]);
    }

    #[test]
    fn test_result_shard_alone_does_not_qualify() {
        let temp = TempDir::new().unwrap();
        let base = utf8_base(&temp);
        let session = CoverageSession::allocate(&base, "rejected").unwrap();
        fs::write(session.result_shard_path(), "{}").unwrap();

        assert!(discover_sessions(&base).unwrap().is_empty());
        assert_eq!(find_marked_dirs(&base).unwrap().len(), 1);
    }

    #[test]
    fn test_unmarked_dirs_are_ignored_but_searched() {
        let temp = TempDir::new().unwrap();
        let base = utf8_base(&temp);

        let stray = base.join("stray");
        fs::create_dir_all(&stray).unwrap();
        fs::write(stray.join("covmeta.1234"), b"meta").unwrap();

        session_with_counters(&base.join("nested"), "T1");

        let sessions = discover_sessions(&base).unwrap();
        assert_eq!(sessions, vec![base.join("nested/T1")]);
    }

    #[test]
    fn test_prune_removes_only_old_sessions() {
        let temp = TempDir::new().unwrap();
        let base = utf8_base(&temp);

        let fresh = session_with_counters(&base, "fresh");
        let old = session_with_counters(&base, "old");
        let marker = SessionMarker {
            test: "old".to_string(),
            created_at: Utc::now() - chrono::Duration::hours(48),
        };
        fs::write(
            old.dir().join(SESSION_MARKER),
            serde_json::to_string(&marker).unwrap(),
        )
        .unwrap();

        let removed = prune_sessions(&base, Duration::from_secs(24 * 3600)).unwrap();
        assert_eq!(removed, 1);
        assert!(fresh.dir().is_dir());
        assert!(!old.dir().exists());
    }

    #[test]
    fn test_prune_missing_base() {
        let temp = TempDir::new().unwrap();
        assert_eq!(
            prune_sessions(&utf8_base(&temp), Duration::from_secs(1)).unwrap(),
            0
        );
    }
}
