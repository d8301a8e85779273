//! Path validators applied before anything reaches a process-spawn call.
//!
//! Both validators only stat the filesystem; they never create, open or
//! modify anything, so calling them twice on an unchanged filesystem yields
//! the same outcome.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Validation Error Types
// ============================================================================

/// Reasons a path is rejected.
///
/// The `Display` text is user-facing: runners embed it verbatim in the
/// captured stderr of a rejected invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathValidationError {
    /// Nothing exists at the resolved location
    #[error("{path}: not found")]
    NotFound { path: String },

    /// The path names a directory where a file is required
    #[error("{path}: is a directory")]
    IsDirectory { path: String },

    /// The file exists but carries no executable permission bit
    #[error("{path}: not executable")]
    NotExecutable { path: String },

    /// The path contains an embedded NUL byte
    #[error("path contains a null byte: {path:?}")]
    NullByte { path: String },

    /// The path contains a `..` segment
    #[error("path contains parent directory traversal: {path}")]
    ParentTraversal { path: String },

    /// The path could not be made absolute or stat'ed
    #[error("failed to resolve '{path}': {reason}")]
    Unresolvable { path: String, reason: String },
}

fn has_null_byte(path: &Path) -> bool {
    path.as_os_str().as_encoded_bytes().contains(&0)
}

fn absolutize(path: &Path) -> Result<PathBuf, PathValidationError> {
    std::path::absolute(path).map_err(|e| PathValidationError::Unresolvable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

// ============================================================================
// Binary Path Validation
// ============================================================================

/// Resolve `path` to an absolute path naming an executable regular file.
///
/// # Errors
///
/// - [`PathValidationError::NotFound`] if nothing exists at the path
/// - [`PathValidationError::IsDirectory`] if the path is a directory
/// - [`PathValidationError::NotExecutable`] if no execute bit is set (Unix)
/// - [`PathValidationError::NullByte`] / [`PathValidationError::Unresolvable`]
///   for malformed input
pub fn validate_binary_path(path: impl AsRef<Path>) -> Result<PathBuf, PathValidationError> {
    let path = path.as_ref();

    if has_null_byte(path) {
        return Err(PathValidationError::NullByte {
            path: path.to_string_lossy().into_owned(),
        });
    }

    let absolute = absolutize(path)?;
    let display = absolute.display().to_string();

    let metadata = match fs::metadata(&absolute) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PathValidationError::NotFound { path: display });
        }
        Err(e) => {
            return Err(PathValidationError::Unresolvable {
                path: display,
                reason: e.to_string(),
            });
        }
    };

    if metadata.is_dir() {
        return Err(PathValidationError::IsDirectory { path: display });
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(PathValidationError::NotExecutable { path: display });
        }
    }

    Ok(absolute)
}

// ============================================================================
// Report / Output Path Validation
// ============================================================================

/// Resolve `path` to an absolute path suitable for interpolation into a
/// tool command line.
///
/// The target does not need to exist. Rejects embedded NUL bytes and any
/// `..` segment, checked on the path as given (before resolution).
pub fn validate_file_path(path: impl AsRef<Path>) -> Result<PathBuf, PathValidationError> {
    let path = path.as_ref();

    if has_null_byte(path) {
        return Err(PathValidationError::NullByte {
            path: path.to_string_lossy().into_owned(),
        });
    }

    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(PathValidationError::ParentTraversal {
            path: path.display().to_string(),
        });
    }

    absolutize(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_binary_path_not_found() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("no-such-binary");

        let err = validate_binary_path(&missing).unwrap_err();
        assert!(matches!(err, PathValidationError::NotFound { .. }));
        assert!(err.to_string().ends_with("not found"), "got: {err}");
    }

    #[test]
    fn test_binary_path_is_directory() {
        let temp = TempDir::new().unwrap();

        let err = validate_binary_path(temp.path()).unwrap_err();
        assert!(matches!(err, PathValidationError::IsDirectory { .. }));
        assert!(err.to_string().contains("is a directory"));
    }

    #[cfg(unix)]
    #[test]
    fn test_binary_path_requires_exec_bit() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain.txt");
        fs::write(&file, "not a program").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

        let err = validate_binary_path(&file).unwrap_err();
        assert!(matches!(err, PathValidationError::NotExecutable { .. }));

        fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();
        let resolved = validate_binary_path(&file).unwrap();
        assert!(resolved.is_absolute());
    }

    #[cfg(unix)]
    #[test]
    fn test_binary_path_accepts_system_shell() {
        let resolved = validate_binary_path("/bin/sh").unwrap();
        assert_eq!(resolved, PathBuf::from("/bin/sh"));
    }

    #[test]
    fn test_binary_path_rejects_null_byte() {
        let err = validate_binary_path("bin\0ary").unwrap_err();
        assert!(matches!(err, PathValidationError::NullByte { .. }));
    }

    #[test]
    fn test_file_path_rejects_traversal() {
        let err = validate_file_path("reports/../../etc/passwd").unwrap_err();
        assert!(matches!(err, PathValidationError::ParentTraversal { .. }));

        let err = validate_file_path("..").unwrap_err();
        assert!(matches!(err, PathValidationError::ParentTraversal { .. }));
    }

    #[test]
    fn test_file_path_rejects_null_byte() {
        let err = validate_file_path("e2e\0.out").unwrap_err();
        assert!(matches!(err, PathValidationError::NullByte { .. }));
    }

    #[test]
    fn test_file_path_resolves_relative_to_absolute() {
        let resolved = validate_file_path("coverage/e2e.out").unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("coverage/e2e.out"));
    }

    #[test]
    fn test_file_path_allows_dots_inside_names() {
        // Only a whole `..` segment is traversal
        let resolved = validate_file_path("cov..data/e2e..out").unwrap();
        assert!(resolved.ends_with("cov..data/e2e..out"));
    }
}
