use async_trait::async_trait;
use cachevisor_core::{
    LaunchSpec, ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager,
    ProcessTermination, TerminationResult, kill_and_reap,
};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Unix-specific process handle implementation
pub struct UnixProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl UnixProcessHandle {
    pub fn new(mut child: Child) -> Self {
        let stdin = child.stdin.take();
        Self { child, stdin }
    }
}

#[async_trait]
impl ProcessHandle for UnixProcessHandle {
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
        // Dropping the write end delivers EOF to the child
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

/// Unix process manager: SIGTERM as the cooperative close request, SIGKILL
/// as forced termination
#[derive(Debug, Default)]
pub struct UnixProcessManager;

#[async_trait]
impl ProcessLifecycle for UnixProcessManager {
    type Handle = UnixProcessHandle;

    async fn spawn_process(&self, spec: &LaunchSpec) -> Result<UnixProcessHandle, ProcessError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group: a Ctrl+C on the supervisor's terminal must not
        // reach the child before the supervisor asks it to stop
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            ProcessError::SpawnFailed(format!("{}: {e}", spec.program.display()))
        })?;

        if let Some(pid) = child.id() {
            info!(
                "Spawned Unix process: {} (PID: {}) with args: {:?}",
                spec.program.display(),
                pid,
                spec.args
            );
        }

        Ok(UnixProcessHandle::new(child))
    }
}

#[async_trait]
impl ProcessTermination for UnixProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };
        let nix_pid = NixPid::from_raw(pid as i32);

        match signal::kill(nix_pid, Signal::SIGTERM) {
            Ok(()) => {
                debug!("Sent SIGTERM to process {}", pid);
                TerminationResult::Success
            }
            Err(nix::errno::Errno::ESRCH) => {
                info!("Process {} not found (already terminated)", pid);
                TerminationResult::ProcessNotFound
            }
            Err(nix::errno::Errno::EPERM) => {
                warn!("Permission denied to terminate process {}", pid);
                TerminationResult::AccessDenied
            }
            Err(e) => {
                warn!("Failed to send SIGTERM to process {}: {}", pid, e);
                TerminationResult::Failed(format!("SIGTERM failed: {e}"))
            }
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        match kill_and_reap(handle).await {
            Ok(status) => {
                info!("Killed process {} ({})", pid, status);
                TerminationResult::Success
            }
            Err(ProcessError::Io(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                warn!("Permission denied to kill process {}", pid);
                TerminationResult::AccessDenied
            }
            Err(e) => {
                warn!("Failed to kill process {}: {}", pid, e);
                TerminationResult::Failed(format!("SIGKILL failed: {e}"))
            }
        }
    }
}

impl ProcessManager for UnixProcessManager {
    fn new() -> Self {
        debug!("Initializing Unix process manager");
        Self
    }
}
