//! Error types for coverage collection

use std::fmt;
use std::io;

use flowtest_runner::RunnerError;
use flowtest_utils::PathValidationError;
use thiserror::Error;

/// Pipeline stage an aggregation error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discover,
    Merge,
    TextProfile,
    Html,
    Summary,
    Shards,
    Prune,
}

impl Stage {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Merge => "merge",
            Self::TextProfile => "text-profile",
            Self::Html => "html",
            Self::Summary => "summary",
            Self::Shards => "shards",
            Self::Prune => "prune",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coverage collection failures.
///
/// [`CoverageError::NoCoverageData`] is deliberately separate from the I/O
/// and tool failures so callers can downgrade it to a warning.
#[derive(Error, Debug)]
pub enum CoverageError {
    #[error("no coverage data found under {base}")]
    NoCoverageData { base: String },

    #[error("invalid output path '{path}': {source}")]
    PathValidation {
        path: String,
        #[source]
        source: PathValidationError,
    },

    #[error("failed to construct {stage} command: {source}")]
    CommandConstruction {
        stage: Stage,
        #[source]
        source: RunnerError,
    },

    #[error("{stage} command `{command}` failed: {reason}")]
    CommandExecution {
        stage: Stage,
        command: String,
        reason: String,
    },

    #[error("manifest error at {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("I/O error during {stage} at {path}: {source}")]
    Io {
        stage: Stage,
        path: String,
        #[source]
        source: io::Error,
    },
}

impl CoverageError {
    /// True for the "nothing to report" condition.
    #[must_use]
    pub const fn is_no_data(&self) -> bool {
        matches!(self, Self::NoCoverageData { .. })
    }

    /// The pipeline stage, where one applies.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::CommandConstruction { stage, .. }
            | Self::CommandExecution { stage, .. }
            | Self::Io { stage, .. } => Some(*stage),
            Self::NoCoverageData { .. } => Some(Stage::Discover),
            Self::PathValidation { .. } | Self::Manifest { .. } => None,
        }
    }
}
