use async_trait::async_trait;
use cachevisor_core::{
    LaunchSpec, ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager,
    ProcessTermination, TerminationResult, kill_and_reap,
};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Creates the child without a console window
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl WindowsProcessHandle {
    pub fn new(mut child: Child) -> Self {
        let stdin = child.stdin.take();
        Self { child, stdin }
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.child.id()
    }

    fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    fn close_stdin(&mut self) -> bool {
        self.stdin.take().is_some()
    }

    async fn try_wait(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
        Ok(self.child.try_wait()?)
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        Ok(self.child.wait().await?)
    }

    fn start_kill(&mut self) -> Result<(), ProcessError> {
        Ok(self.child.start_kill()?)
    }
}

/// Windows process manager.
///
/// A console child without a window has no close message to receive, so the
/// EOF on stdin is the only cooperative request. Forced termination goes
/// through `TerminateProcess`.
#[derive(Debug, Default)]
pub struct WindowsProcessManager;

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
    type Handle = WindowsProcessHandle;

    async fn spawn_process(&self, spec: &LaunchSpec) -> Result<WindowsProcessHandle, ProcessError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .creation_flags(CREATE_NO_WINDOW);

        let child = cmd.spawn().map_err(|e| {
            ProcessError::SpawnFailed(format!("{}: {e}", spec.program.display()))
        })?;

        if let Some(pid) = child.id() {
            info!(
                pid = %pid,
                command = %spec.program.display(),
                args = ?spec.args,
                "Spawned Windows process"
            );
        }

        Ok(WindowsProcessHandle::new(child))
    }
}

#[async_trait]
impl ProcessTermination for WindowsProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        match handle.get_pid() {
            Some(pid) => {
                debug!(pid = %pid, "No graceful signal on Windows beyond closing stdin");
                TerminationResult::Unsupported
            }
            None => TerminationResult::ProcessNotFound,
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        match kill_and_reap(handle).await {
            Ok(status) => {
                info!(pid = %pid, %status, "Successfully force killed process");
                TerminationResult::Success
            }
            Err(ProcessError::Io(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                warn!(pid = %pid, "Access denied while killing process");
                TerminationResult::AccessDenied
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to force kill process");
                TerminationResult::Failed(format!("Force kill failed: {e}"))
            }
        }
    }
}

impl ProcessManager for WindowsProcessManager {
    fn new() -> Self {
        debug!("Initializing Windows process manager");
        Self
    }
}
