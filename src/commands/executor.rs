use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::{timeout as tokio_timeout, Duration};
use tracing::{debug, warn};

use crate::protocol::{CommandResult, ErrorCode};

const DEFAULT_SHELL: &str = "/bin/sh";

/// Decides from captured stderr whether the shell could not find the program.
pub type NotFoundPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Default rule: the shell's "not found" message anywhere in stderr.
pub fn stderr_reports_not_found(stderr: &str) -> bool {
    stderr.contains("not found")
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command did not finish within {timeout:?}")]
    Timeout {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
    #[error("failed to spawn shell: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("i/o error while running command: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub error_code: ErrorCode,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn into_command_result(self, id: impl Into<String>) -> CommandResult {
        CommandResult {
            status: self.success(),
            stdout: self.stdout,
            stderr: self.stderr,
            error_code: self.error_code,
            id: id.into(),
        }
    }
}

/// Runs command lines through the shell with a fixed timeout.
#[derive(Clone)]
pub struct CommandExecutor {
    timeout: Duration,
    shell: String,
    not_found: NotFoundPredicate,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("timeout", &self.timeout)
            .field("shell", &self.shell)
            .finish_non_exhaustive()
    }
}

impl CommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            shell: DEFAULT_SHELL.to_string(),
            not_found: Arc::new(stderr_reports_not_found),
        }
    }

    /// Replace the rule used to flag results with [`ErrorCode::CommandNotFound`]
    pub fn with_not_found_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.not_found = Arc::new(predicate);
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Execute `command_line` with `sh -c`, capturing both output streams.
    ///
    /// Non-zero exits are results, not errors. Errors are reserved for commands that
    /// never produced an exit status: the shell failed to start or the timeout elapsed.
    pub async fn execute(&self, command_line: &str) -> Result<ExecutionResult, ExecError> {
        let start = Instant::now();

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down everything the shell started
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(ExecError::Spawn)?;
        let child_id = child.id();
        debug!("Spawned shell with PID: {:?}", child_id);

        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture stdout"))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture stderr"))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let run = async {
            let (status, out, err) = tokio::join!(
                child.wait(),
                stdout_pipe.read_to_end(&mut stdout),
                stderr_pipe.read_to_end(&mut stderr),
            );
            out?;
            err?;
            status
        };

        let outcome = tokio_timeout(self.timeout, run).await;
        let status = match outcome {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    pid = ?child_id,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "command timed out, killing process group"
                );
                self.terminate(&mut child, child_id).await;
                return Err(ExecError::Timeout {
                    timeout: self.timeout,
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        let error_code = if (self.not_found)(&stderr) {
            ErrorCode::CommandNotFound
        } else {
            ErrorCode::Ok
        };

        let result = ExecutionResult {
            exit_code: status.code(),
            stdout,
            stderr,
            error_code,
            duration: start.elapsed(),
        };
        debug!(
            pid = ?child_id,
            exit_code = ?result.exit_code,
            error_code = result.error_code.code(),
            "shell exited"
        );
        Ok(result)
    }

    #[cfg(unix)]
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let group_killed = match pid {
            Some(pid) => match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) => true,
                Err(e) => {
                    debug!("killpg({}) failed: {}", pid, e);
                    false
                }
            },
            None => false,
        };
        if !group_killed {
            let _ = child.start_kill();
        }
        let _ = tokio_timeout(Duration::from_secs(2), child.wait()).await;
    }

    #[cfg(not(unix))]
    async fn terminate(&self, child: &mut Child, _pid: Option<u32>) {
        let _ = child.start_kill();
        let _ = tokio_timeout(Duration::from_secs(2), child.wait()).await;
    }
}
