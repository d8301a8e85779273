use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use flowtest_utils::sanitize_args;

use crate::error::RunnerError;

// ============================================================================
// CommandSpec - Secure Process Execution Specification
// ============================================================================

/// Specification for a command to execute.
///
/// All process execution goes through this type to ensure argv-style invocation.
/// Arguments are passed as discrete elements, never as a shell string, so shell
/// metacharacters inside an argument are delivered to the child literally.
///
/// # Example
///
/// ```rust
/// use flowtest_runner::CommandSpec;
/// use std::ffi::OsString;
///
/// let cmd = CommandSpec::new("go")
///     .args(["tool", "covdata", "merge"])
///     .cwd("/tmp");
///
/// assert_eq!(cmd.program, OsString::from("go"));
/// assert_eq!(cmd.args.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// The program to execute
    pub program: OsString,
    /// Arguments as discrete elements (NOT shell strings)
    pub args: Vec<OsString>,
    /// Optional working directory
    pub cwd: Option<PathBuf>,
    /// Environment overrides layered on top of the inherited environment
    pub env: Option<HashMap<OsString, OsString>>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Add a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory for the command.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set an environment variable for the command.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables for the command.
    #[must_use]
    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let env_map = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in envs {
            env_map.insert(key.into(), value.into());
        }
        self
    }

    /// Look up an environment override set on this spec.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&OsString> {
        self.env.as_ref()?.get(&OsString::from(key))
    }

    /// Render as a single line for logs. Not suitable for execution.
    #[must_use]
    pub fn display_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Convert into a `std::process::Command` using argv-style APIs only.
    ///
    /// The inherited environment is preserved; overrides are layered on top.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        if let Some(ref env) = self.env {
            for (key, value) in env {
                cmd.env(key, value);
            }
        }

        cmd
    }
}

// ============================================================================
// secure_command - the single choke point for external tool invocations
// ============================================================================

const FORBIDDEN_NAME_CHARS: &[char] = &[
    '\0', '\n', '\r', ';', '|', '&', '$', '`', '<', '>', '(', ')', '*', '?', '"', '\'',
];

/// Build a [`CommandSpec`] for an external tool after validating its name and
/// sanitizing its arguments.
///
/// The name must be non-empty, must not start with `-`, and must not contain
/// whitespace at either end or any shell metacharacter. Arguments are cleaned
/// with [`sanitize_args`].
///
/// # Errors
///
/// Returns [`RunnerError::InvalidCommand`] for a rejected name.
pub fn secure_command<I, S>(name: &str, args: I) -> Result<CommandSpec, RunnerError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if name.is_empty() || name.trim() != name {
        return Err(RunnerError::InvalidCommand {
            reason: format!("command name is empty or padded: {name:?}"),
        });
    }
    if name.starts_with('-') {
        return Err(RunnerError::InvalidCommand {
            reason: format!("command name looks like a flag: {name:?}"),
        });
    }
    if let Some(bad) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(RunnerError::InvalidCommand {
            reason: format!("command name contains forbidden character {bad:?}: {name:?}"),
        });
    }

    Ok(CommandSpec::new(name).args(sanitize_args(args)))
}
