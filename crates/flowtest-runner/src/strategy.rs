//! Mapping from an invocation's logical target onto the child's argv.
//!
//! The binary under test decides what its command surface looks like, so the
//! mapping is a pluggable strategy rather than a fixed subcommand.

use std::fmt;
use std::path::PathBuf;

/// What an invocation is pointed at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationTarget {
    /// Flow definition (or other primary input) handed to the binary
    pub flow: Option<PathBuf>,
    /// Optional configuration file
    pub config: Option<PathBuf>,
}

/// Builds the arguments that express an [`InvocationTarget`].
///
/// Extra arguments declared on the invocation are appended by the runner
/// after whatever the strategy produces.
pub trait TargetArgs: Send + Sync + fmt::Debug {
    fn build(&self, target: &InvocationTarget) -> Vec<String>;
}

/// `<subcommand...> <flow> [<config_flag> <config>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcommandArgs {
    pub subcommand: Vec<String>,
    pub config_flag: String,
}

impl SubcommandArgs {
    #[must_use]
    pub fn new<I, S>(subcommand: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subcommand: subcommand.into_iter().map(Into::into).collect(),
            config_flag: "--config".to_string(),
        }
    }

    #[must_use]
    pub fn config_flag(mut self, flag: impl Into<String>) -> Self {
        self.config_flag = flag.into();
        self
    }
}

impl Default for SubcommandArgs {
    fn default() -> Self {
        Self::new(["run"])
    }
}

impl TargetArgs for SubcommandArgs {
    fn build(&self, target: &InvocationTarget) -> Vec<String> {
        let mut args = self.subcommand.clone();
        if let Some(flow) = &target.flow {
            args.push(flow.to_string_lossy().into_owned());
        }
        if let Some(config) = &target.config {
            args.push(self.config_flag.clone());
            args.push(config.to_string_lossy().into_owned());
        }
        args
    }
}

/// Ignores the target; only the invocation's extra arguments reach the child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassthroughArgs;

impl TargetArgs for PassthroughArgs {
    fn build(&self, _target: &InvocationTarget) -> Vec<String> {
        Vec::new()
    }
}
