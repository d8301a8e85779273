use std::io;

use flowtest_runner::RunnerError;
use thiserror::Error;

/// Failures of the test harness itself, as opposed to the program under test.
///
/// Everything except [`HarnessError::Runner`] is builder misuse and should
/// abort the individual test.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("test '{test}' has no target: call flow() or fixture() before run()")]
    MissingTarget { test: String },

    #[error("test '{test}' has no binary: pass one to the builder or set FLOWTEST_BINARY")]
    MissingBinary { test: String },

    #[error("unknown fixture '{name}'")]
    UnknownFixture { name: String },

    #[error("fixture name '{name}' must be a single file name")]
    InvalidFixtureName { name: String },

    #[error("failed to write fixture '{name}': {source}")]
    Fixture {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to resolve target path '{path}': {source}")]
    TargetPath {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create a working directory: {0}")]
    WorkingDir(#[source] io::Error),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

impl HarnessError {
    /// True when the failure comes from how the builder was used.
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::MissingTarget { .. }
                | Self::MissingBinary { .. }
                | Self::UnknownFixture { .. }
                | Self::InvalidFixtureName { .. }
        )
    }
}
