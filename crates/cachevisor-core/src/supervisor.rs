use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::output::{OutputSink, OutputStream, spawn_pump};
use crate::process::{LaunchSpec, ProcessHandle, ProcessId, ProcessManager, ShutdownOutcome};
use crate::staging::{Payload, PayloadStager, StagedPayload};
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
}

/// What `stop()` observed while tearing the child down
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// No process was attached
    NotRunning,
    /// The child had exited on its own before `stop()`
    AlreadyExited { exit_code: Option<i32> },
    /// The child exited within the grace period
    Graceful { exit_code: Option<i32> },
    /// The child outlived the grace period and was killed
    Killed,
    /// Shutdown raised an error; it was logged and the process detached
    Failed(String),
}

/// A running child together with its output pumps
struct SupervisedProcess<H: ProcessHandle> {
    handle: H,
    pid: Option<ProcessId>,
    cancel: CancellationToken,
    pumps: Vec<JoinHandle<()>>,
    released: bool,
}

impl<H: ProcessHandle> SupervisedProcess<H> {
    /// Stop the pumps and wait for them, so the sink sees nothing afterwards
    async fn release(mut self) {
        self.cancel.cancel();
        for pump in self.pumps.drain(..) {
            if let Err(e) = pump.await {
                error!(pid = ?self.pid, "Output pump failed: {e}");
            }
        }
        self.released = true;
    }
}

impl<H: ProcessHandle> Drop for SupervisedProcess<H> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(
            pid = ?self.pid,
            "Supervised process dropped without stop() - attempting emergency cleanup"
        );
        self.cancel.cancel();
        for pump in &self.pumps {
            pump.abort();
        }
        if let Err(e) = self.handle.start_kill() {
            warn!(pid = ?self.pid, "Emergency kill failed: {e}");
        }
    }
}

/// Owns the staged payload and at most one running child.
///
/// `start`/`stop` may be paired any number of times. `stop` never fails:
/// whatever goes wrong during shutdown is logged and the child is detached.
/// [`ProcessSupervisor::dispose`] stops the child and deletes the staged
/// directory; dropping the supervisor instead kills the child without waiting.
pub struct ProcessSupervisor<M: ProcessManager> {
    config: SupervisorConfig,
    manager: Arc<M>,
    sink: Arc<dyn OutputSink>,
    staged: StagedPayload,
    process: Option<SupervisedProcess<M::Handle>>,
}

impl<M: ProcessManager> ProcessSupervisor<M> {
    /// Stage `payload` and build an idle supervisor around it
    pub fn new(
        config: SupervisorConfig,
        manager: Arc<M>,
        sink: Arc<dyn OutputSink>,
        payload: &Payload,
    ) -> Result<Self, SupervisorError> {
        let staged = PayloadStager::new(config.staging.clone()).stage(payload)?;
        debug!(
            name = %config.name,
            path = %staged.working_directory().display(),
            "Executable extracted to temporary directory"
        );

        Ok(Self {
            config,
            manager,
            sink,
            staged,
            process: None,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn state(&self) -> SupervisorState {
        match self.process {
            Some(_) => SupervisorState::Running,
            None => SupervisorState::Idle,
        }
    }

    /// PID of the attached child, if any
    pub fn pid(&self) -> Option<ProcessId> {
        self.process.as_ref().and_then(|p| p.pid)
    }

    pub fn executable_path(&self) -> &Path {
        self.staged.executable_path()
    }

    pub fn working_directory(&self) -> &Path {
        self.staged.working_directory()
    }

    /// Launch the staged executable with `args` and start relaying its output.
    ///
    /// Returns as soon as the child exists; it does not wait for it to exit.
    pub async fn start(&mut self, args: Vec<String>) -> Result<(), SupervisorError> {
        if self.process.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }

        let spec = LaunchSpec {
            program: self.staged.executable_path().to_path_buf(),
            args,
            working_dir: self.staged.working_directory().to_path_buf(),
            env: self.config.env.clone(),
        };
        let mut handle = self.manager.spawn_process(&spec).await?;

        let cancel = CancellationToken::new();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = handle.take_stdout() {
            pumps.push(spawn_pump(
                OutputStream::Stdout,
                stdout,
                self.sink.clone(),
                cancel.clone(),
            ));
        }
        if let Some(stderr) = handle.take_stderr() {
            pumps.push(spawn_pump(
                OutputStream::Stderr,
                stderr,
                self.sink.clone(),
                cancel.clone(),
            ));
        }

        let pid = handle.get_pid();
        debug!(
            name = %self.config.name,
            pid = ?pid,
            "Process started with arguments: {}",
            spec.args.join(" ")
        );

        self.process = Some(SupervisedProcess {
            handle,
            pid,
            cancel,
            pumps,
            released: false,
        });
        Ok(())
    }

    /// Terminate the child: graceful request, bounded wait, then kill.
    ///
    /// Idempotent. Output pumps are stopped and the process detached in
    /// every case, including when shutdown itself fails.
    pub async fn stop(&mut self) -> StopOutcome {
        let Some(mut process) = self.process.take() else {
            return StopOutcome::NotRunning;
        };

        let outcome = self.terminate(&mut process.handle).await;
        process.release().await;
        outcome
    }

    async fn terminate(&self, handle: &mut M::Handle) -> StopOutcome {
        let name = &self.config.name;
        let pid = handle.get_pid();

        match handle.try_wait().await {
            Ok(Some(status)) => {
                warn!(
                    name = %name,
                    exit_code = ?status.code(),
                    detected_at = %detection_timestamp(),
                    "Process had already exited"
                );
                return StopOutcome::AlreadyExited {
                    exit_code: status.code(),
                };
            }
            Ok(None) => {}
            Err(e) => error!(name = %name, pid = ?pid, "Failed to refresh process state: {e}"),
        }

        match self
            .manager
            .shutdown(handle, self.config.grace_period)
            .await
        {
            Ok(ShutdownOutcome::Exited { exit_code }) => {
                debug!(name = %name, pid = ?pid, ?exit_code, "Process stopped");
                StopOutcome::Graceful { exit_code }
            }
            Ok(ShutdownOutcome::Killed) => {
                debug!(name = %name, pid = ?pid, "Process killed");
                StopOutcome::Killed
            }
            Err(e) => {
                error!(name = %name, pid = ?pid, "Failed to stop process: {e}");
                if let Err(e) = handle.start_kill() {
                    error!(name = %name, pid = ?pid, "Last-resort kill failed: {e}");
                }
                StopOutcome::Failed(e.to_string())
            }
        }
    }

    /// Stop the child, then delete the staged directory.
    ///
    /// A removal failure is logged, not returned.
    pub async fn dispose(mut self) {
        self.stop().await;

        let dir = self.staged.working_directory().to_path_buf();
        debug!(path = %dir.display(), "Removing temporary directory");
        if let Err(e) = self.staged.remove().await {
            error!(path = %dir.display(), "Failed to remove temporary directory: {e}");
        }
    }
}

fn detection_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use crate::log_capture::LogCapture;
    use crate::output::OutputEvent;
    use crate::process::{ProcessLifecycle, ProcessTermination, TerminationResult};
    use crate::staging::Artifact;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::process::ExitStatus;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::process::{ChildStderr, ChildStdout};
    use tokio::sync::Notify;
    use tracing::Level;

    #[cfg(unix)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[cfg(windows)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::windows::process::ExitStatusExt;
        ExitStatus::from_raw(code as u32)
    }

    /// Scripted child shared between the fake manager and its handles
    #[derive(Default)]
    struct FakeChild {
        calls: Mutex<Vec<&'static str>>,
        exited: Mutex<Option<i32>>,
        exit_on_stdin_close: bool,
        fail_kill: bool,
        notify: Notify,
    }

    impl FakeChild {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn exit(&self, code: i32) {
            *self.exited.lock().unwrap() = Some(code);
            self.notify.notify_waiters();
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, call: &str) -> usize {
            self.calls().iter().filter(|c| **c == call).count()
        }
    }

    struct FakeHandle {
        child: Arc<FakeChild>,
        args: Vec<String>,
        program: PathBuf,
    }

    #[async_trait]
    impl ProcessHandle for FakeHandle {
        fn get_pid(&self) -> Option<ProcessId> {
            Some(4242)
        }

        fn take_stdout(&mut self) -> Option<ChildStdout> {
            None
        }

        fn take_stderr(&mut self) -> Option<ChildStderr> {
            None
        }

        fn close_stdin(&mut self) -> bool {
            self.child.record("close_stdin");
            if self.child.exit_on_stdin_close {
                self.child.exit(0);
            }
            true
        }

        async fn try_wait(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
            self.child.record("try_wait");
            Ok(self.child.exited.lock().unwrap().map(exit_status))
        }

        async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
            loop {
                let notified = self.child.notify.notified();
                if let Some(code) = *self.child.exited.lock().unwrap() {
                    return Ok(exit_status(code));
                }
                notified.await;
            }
        }

        fn start_kill(&mut self) -> Result<(), ProcessError> {
            self.child.record("start_kill");
            Ok(())
        }
    }

    struct FakeManager {
        child: Arc<FakeChild>,
    }

    impl FakeManager {
        fn with(child: FakeChild) -> Arc<Self> {
            Arc::new(Self {
                child: Arc::new(child),
            })
        }
    }

    #[async_trait]
    impl ProcessLifecycle for FakeManager {
        type Handle = FakeHandle;

        async fn spawn_process(&self, spec: &LaunchSpec) -> Result<FakeHandle, ProcessError> {
            self.child.record("spawn");
            Ok(FakeHandle {
                child: self.child.clone(),
                args: spec.args.clone(),
                program: spec.program.clone(),
            })
        }
    }

    #[async_trait]
    impl ProcessTermination for FakeManager {
        async fn terminate_gracefully(&self, _handle: &mut dyn ProcessHandle) -> TerminationResult {
            self.child.record("terminate");
            TerminationResult::Success
        }

        async fn force_kill(&self, _handle: &mut dyn ProcessHandle) -> TerminationResult {
            self.child.record("kill");
            if self.child.fail_kill {
                return TerminationResult::Failed("kill refused".to_string());
            }
            self.child.exit(137);
            TerminationResult::Success
        }
    }

    impl ProcessManager for FakeManager {
        fn new() -> Self {
            Self {
                child: Arc::new(FakeChild::default()),
            }
        }
    }

    fn supervisor(manager: Arc<FakeManager>) -> ProcessSupervisor<FakeManager> {
        let config = SupervisorConfig::builder()
            .name("memcached")
            .grace_period(Duration::from_millis(50))
            .build()
            .unwrap();
        let sink: Arc<dyn OutputSink> = Arc::new(|_: OutputEvent| {});
        let payload = Payload::new(Artifact::embedded("memcached", &b"#!/bin/sh\n"[..]));
        ProcessSupervisor::new(config, manager, sink, &payload).unwrap()
    }

    #[tokio::test]
    async fn test_start_passes_staged_paths_and_args() {
        let manager = FakeManager::with(FakeChild::default());
        let mut supervisor = supervisor(manager.clone());

        supervisor
            .start(vec!["-m".to_string(), "64".to_string()])
            .await
            .unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert_eq!(supervisor.pid(), Some(4242));
        let process = supervisor.process.as_ref().unwrap();
        assert_eq!(process.handle.args, ["-m", "64"]);
        assert_eq!(process.handle.program, supervisor.executable_path());
        supervisor.dispose().await;
    }

    #[tokio::test]
    async fn test_second_start_fails_without_spawning() {
        let manager = FakeManager::with(FakeChild::default());
        let mut supervisor = supervisor(manager.clone());

        supervisor.start(Vec::new()).await.unwrap();
        let error = supervisor.start(Vec::new()).await.unwrap_err();

        assert!(matches!(error, SupervisorError::AlreadyRunning));
        assert_eq!(manager.child.count("spawn"), 1);
        assert_eq!(supervisor.state(), SupervisorState::Running);
        supervisor.dispose().await;
    }

    #[tokio::test]
    async fn test_stop_when_idle_touches_nothing() {
        let manager = FakeManager::with(FakeChild::default());
        let mut supervisor = supervisor(manager.clone());

        assert_eq!(supervisor.stop().await, StopOutcome::NotRunning);
        assert_eq!(supervisor.stop().await, StopOutcome::NotRunning);
        assert!(manager.child.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stop_graceful_when_child_honours_stdin_close() {
        let manager = FakeManager::with(FakeChild {
            exit_on_stdin_close: true,
            ..Default::default()
        });
        let mut supervisor = supervisor(manager.clone());
        supervisor.start(Vec::new()).await.unwrap();

        let outcome = supervisor.stop().await;

        assert_eq!(outcome, StopOutcome::Graceful { exit_code: Some(0) });
        assert_eq!(
            manager.child.calls(),
            ["spawn", "try_wait", "close_stdin", "terminate"]
        );
        assert_eq!(supervisor.state(), SupervisorState::Idle);
    }

    #[tokio::test]
    async fn test_stop_kills_after_grace_period() {
        let manager = FakeManager::with(FakeChild::default());
        let mut supervisor = supervisor(manager.clone());
        supervisor.start(Vec::new()).await.unwrap();

        let outcome = supervisor.stop().await;

        assert_eq!(outcome, StopOutcome::Killed);
        assert_eq!(manager.child.count("kill"), 1);
        assert_eq!(supervisor.state(), SupervisorState::Idle);
    }

    #[tokio::test]
    async fn test_stop_reports_external_exit() {
        let manager = FakeManager::with(FakeChild::default());
        let mut supervisor = supervisor(manager.clone());
        supervisor.start(Vec::new()).await.unwrap();
        manager.child.exit(3);

        let outcome = supervisor.stop().await;

        assert_eq!(outcome, StopOutcome::AlreadyExited { exit_code: Some(3) });
        assert_eq!(manager.child.calls(), ["spawn", "try_wait"]);
        assert_eq!(supervisor.stop().await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_stop_swallows_shutdown_failure() {
        let manager = FakeManager::with(FakeChild {
            fail_kill: true,
            ..Default::default()
        });
        let mut supervisor = supervisor(manager.clone());
        supervisor.start(Vec::new()).await.unwrap();

        let outcome = supervisor.stop().await;

        assert!(matches!(outcome, StopOutcome::Failed(_)));
        assert_eq!(manager.child.count("start_kill"), 1);
        assert_eq!(supervisor.state(), SupervisorState::Idle);
        // Can be started again after a failed stop
        supervisor.start(Vec::new()).await.unwrap();
        assert_eq!(manager.child.count("spawn"), 2);
    }

    #[tokio::test]
    async fn test_dispose_removes_staged_directory() {
        let manager = FakeManager::with(FakeChild {
            exit_on_stdin_close: true,
            ..Default::default()
        });
        let mut supervisor = supervisor(manager.clone());
        let dir = supervisor.working_directory().to_path_buf();
        supervisor.start(Vec::new()).await.unwrap();
        assert!(dir.exists());

        supervisor.dispose().await;

        assert!(!dir.exists());
        assert_eq!(manager.child.count("close_stdin"), 1);
    }

    #[tokio::test]
    async fn test_drop_without_stop_kills_child() {
        let manager = FakeManager::with(FakeChild::default());
        let mut supervisor = supervisor(manager.clone());
        let dir = supervisor.working_directory().to_path_buf();
        supervisor.start(Vec::new()).await.unwrap();

        drop(supervisor);

        assert_eq!(manager.child.count("start_kill"), 1);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_staging_failure_is_reported() {
        let manager = FakeManager::with(FakeChild::default());
        let config = SupervisorConfig::builder().name("memcached").build().unwrap();
        let sink: Arc<dyn OutputSink> = Arc::new(|_: OutputEvent| {});
        let payload = Payload::new(Artifact::file("memcached", "/nonexistent/memcached"));

        let result = ProcessSupervisor::new(config, manager, sink, &payload);

        assert!(matches!(result, Err(SupervisorError::Staging(_))));
    }

    #[tokio::test]
    async fn test_external_exit_is_logged_as_warning() {
        let (logs, _guard) = LogCapture::install();
        let manager = FakeManager::with(FakeChild::default());
        let mut supervisor = supervisor(manager.clone());
        supervisor.start(Vec::new()).await.unwrap();
        manager.child.exit(3);

        supervisor.stop().await;

        let event = logs
            .find(Level::WARN, "Process had already exited")
            .unwrap();
        assert_eq!(event.field("exit_code"), Some("Some(3)"));
        let detected_at = event.field("detected_at").unwrap();
        assert!(OffsetDateTime::parse(detected_at, &Rfc3339).is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_failure_is_logged_as_error() {
        let (logs, _guard) = LogCapture::install();
        let manager = FakeManager::with(FakeChild {
            fail_kill: true,
            ..Default::default()
        });
        let mut supervisor = supervisor(manager.clone());
        supervisor.start(Vec::new()).await.unwrap();

        supervisor.stop().await;

        assert!(logs.find(Level::ERROR, "Failed to stop process").is_some());
        assert!(logs.find(Level::DEBUG, "Process killed").is_none());
    }

    #[tokio::test]
    async fn test_dispose_logs_removal_failure() {
        let (logs, _guard) = LogCapture::install();
        let scratch = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::builder()
            .name("memcached")
            .staging(crate::config::StagingConfig {
                parent_dir: Some(scratch.path().to_path_buf()),
                ..Default::default()
            })
            .build()
            .unwrap();
        let sink: Arc<dyn OutputSink> = Arc::new(|_: OutputEvent| {});
        let payload = Payload::new(Artifact::embedded("memcached", &b"#!/bin/sh\n"[..]));
        let manager = FakeManager::with(FakeChild::default());
        let supervisor = ProcessSupervisor::new(config, manager, sink, &payload).unwrap();

        let dir = supervisor.working_directory().to_path_buf();
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, b"occupied").unwrap();

        supervisor.dispose().await;

        let event = logs
            .find(Level::ERROR, "Failed to remove temporary directory")
            .unwrap();
        assert_eq!(event.field("path"), Some(dir.display().to_string().as_str()));
        assert!(logs.find(Level::WARN, "retrying").is_some());
    }
}
