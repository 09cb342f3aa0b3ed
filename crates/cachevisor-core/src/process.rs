use crate::error::ProcessError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{ChildStderr, ChildStdout};
use tracing::{debug, warn};

/// Unique identifier for a process
pub type ProcessId = u32;

/// Everything a platform manager needs to launch the staged executable
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
}

/// How long a forcibly terminated child may take to be reaped
pub const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a single termination request
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Request was delivered
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// The platform has no such request; stdin closure is the only cooperative signal
    Unsupported,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

/// How a graceful-then-forced shutdown ended
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownOutcome {
    /// Exited on its own within the grace period
    Exited { exit_code: Option<i32> },
    /// Still alive after the grace period and forcibly terminated
    Killed,
}

/// Trait representing a handle to a running child with piped stdio
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if process has been reaped)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Take ownership of the read end of the child's stdout
    fn take_stdout(&mut self) -> Option<ChildStdout>;

    /// Take ownership of the read end of the child's stderr
    fn take_stderr(&mut self) -> Option<ChildStderr>;

    /// Close the write end of the child's stdin. Returns false if it was already closed.
    fn close_stdin(&mut self) -> bool;

    /// Try to get exit status without blocking
    async fn try_wait(&mut self) -> Result<Option<ExitStatus>, ProcessError>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ExitStatus, ProcessError>;

    /// Request forced termination without waiting (usable from `Drop`)
    fn start_kill(&mut self) -> Result<(), ProcessError>;
}

/// Core trait for process lifecycle management
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// The type of process handle this lifecycle manager produces
    type Handle: ProcessHandle + 'static;

    /// Spawn the program with stdin, stdout and stderr piped
    async fn spawn_process(&self, spec: &LaunchSpec) -> Result<Self::Handle, ProcessError>;
}

/// Trait for graceful and forced process termination
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Send the platform's cooperative close request (SIGTERM on Unix)
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Forcibly terminate the process (SIGKILL on Unix, TerminateProcess on Windows)
    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Complete shutdown: close stdin, send the close request, wait at most
    /// `grace`, then force-terminate whatever is still alive.
    async fn shutdown(
        &self,
        handle: &mut dyn ProcessHandle,
        grace: Duration,
    ) -> Result<ShutdownOutcome, ProcessError> {
        if !handle.close_stdin() {
            debug!("Child stdin was already closed");
        }

        match self.terminate_gracefully(handle).await {
            TerminationResult::Success
            | TerminationResult::ProcessNotFound
            | TerminationResult::Unsupported => {}
            result => warn!(?result, "Graceful close request was not delivered"),
        }

        let waited = tokio::time::timeout(grace, handle.wait()).await;
        match waited {
            Ok(status) => Ok(ShutdownOutcome::Exited {
                exit_code: status?.code(),
            }),
            Err(_) => match self.force_kill(handle).await {
                TerminationResult::Success | TerminationResult::ProcessNotFound => {
                    Ok(ShutdownOutcome::Killed)
                }
                result => Err(ProcessError::Other(format!(
                    "Forced termination failed: {result:?}"
                ))),
            },
        }
    }
}

/// Deliver forced termination and wait at most [`REAP_TIMEOUT`] for the
/// child to be reaped
pub async fn kill_and_reap(handle: &mut dyn ProcessHandle) -> Result<ExitStatus, ProcessError> {
    handle.start_kill()?;
    let waited = tokio::time::timeout(REAP_TIMEOUT, handle.wait()).await;
    waited.map_err(|_| ProcessError::Timeout)?
}

/// High-level process manager trait that combines lifecycle and termination
pub trait ProcessManager: ProcessLifecycle + ProcessTermination {
    /// Create a new process manager instance
    fn new() -> Self
    where
        Self: Sized;
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessManager;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}
