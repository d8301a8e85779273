use std::process::Stdio;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::command_spec::CommandSpec;
use crate::error::RunnerError;
use crate::process::{ProcessOutput, ProcessRunner};

/// After a kill, how long to wait for the wait thread to observe the exit
/// before abandoning it.
const KILL_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// NativeRunner - argv-only execution with a hard deadline
// ============================================================================

/// Native process runner using `std::process::Command`.
///
/// The child is waited on from a helper thread while the caller blocks on a
/// channel with the deadline. On expiry the child is killed (on Unix, its
/// whole process group, so grandchildren holding the output pipes die too)
/// and `run` returns [`RunnerError::Timeout`] without waiting for the child's
/// natural runtime.
///
/// # Example
///
/// ```rust,no_run
/// use flowtest_runner::{CommandSpec, NativeRunner, ProcessRunner};
/// use std::time::Duration;
///
/// let output = NativeRunner::new()
///     .run(&CommandSpec::new("echo").arg("hello"), Duration::from_secs(5))
///     .unwrap();
/// assert!(output.success());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeRunner;

impl NativeRunner {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ProcessRunner for NativeRunner {
    fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError> {
        let mut command = cmd.to_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|e| RunnerError::SpawnFailed {
            program: cmd.program.to_string_lossy().into_owned(),
            reason: e.to_string(),
        })?;

        let child_id = child.id();
        debug!(pid = child_id, command = %cmd.display_line(), "spawned child process");

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let _ = tx.send(child.wait_with_output());
        });

        match rx.recv_timeout(timeout) {
            Ok(output_result) => {
                let _ = handle.join();

                let output = output_result.map_err(|e| RunnerError::SpawnFailed {
                    program: cmd.program.to_string_lossy().into_owned(),
                    reason: format!("failed to wait for process: {e}"),
                })?;

                Ok(ProcessOutput::new(
                    output.stdout,
                    output.stderr,
                    output.status.code(),
                ))
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    pid = child_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "deadline exceeded, killing child process"
                );
                Self::terminate_process(child_id);

                // The wait thread owns the child; once the kill lands it reaps
                // it and exits. If it does not within the grace period it is
                // left detached rather than blocking the caller.
                if rx.recv_timeout(KILL_GRACE).is_ok() {
                    let _ = handle.join();
                }

                Err(RunnerError::Timeout {
                    timeout_ms: timeout.as_millis(),
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(RunnerError::MonitorLost),
        }
    }
}

impl NativeRunner {
    /// Forcibly terminate a child and, on Unix, its process group.
    fn terminate_process(pid: u32) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }

        #[cfg(windows)]
        {
            use windows::Win32::Foundation::CloseHandle;
            use windows::Win32::System::Threading::{
                OpenProcess, PROCESS_TERMINATE, TerminateProcess,
            };

            unsafe {
                if let Ok(handle) = OpenProcess(PROCESS_TERMINATE, false, pid) {
                    let _ = TerminateProcess(handle, 1);
                    let _ = CloseHandle(handle);
                }
            }
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = pid;
        }
    }
}
