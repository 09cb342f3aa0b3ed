use crate::context::{ExecutionContext, select_arguments};
use crate::settings::HostConfig;
use cachevisor_core::{OutputSink, ProcessManager, ProcessSupervisor, StopOutcome, SupervisorError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Service-style wrapper around one [`ProcessSupervisor`].
///
/// `on_start`/`on_stop` are what a service manager calls; `set_up` and
/// `tear_down` are the same operations for a console session.
pub struct LifecycleHost<M: ProcessManager> {
    supervisor: ProcessSupervisor<M>,
    default_arguments: Vec<String>,
    context: ExecutionContext,
}

impl<M: ProcessManager> LifecycleHost<M> {
    pub fn new(
        supervisor: ProcessSupervisor<M>,
        default_arguments: Vec<String>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            supervisor,
            default_arguments,
            context,
        }
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn supervisor(&self) -> &ProcessSupervisor<M> {
        &self.supervisor
    }

    /// Start from a console session
    pub async fn set_up(&mut self, args: Vec<String>) -> Result<(), SupervisorError> {
        self.on_start(args).await
    }

    /// Stop from a console session
    pub async fn tear_down(&mut self) -> StopOutcome {
        self.on_stop().await
    }

    /// Start the child. Empty `args` fall back to the default arguments;
    /// starting with no arguments at all is refused.
    pub async fn on_start(&mut self, args: Vec<String>) -> Result<(), SupervisorError> {
        let name = self.supervisor.config().name.clone();
        info!(name = %name, count = args.len(), "Pre-start. Args: {}", args.join(" "));

        let args = select_arguments(args, &self.default_arguments);
        let result = if args.is_empty() {
            Err(SupervisorError::MissingArguments)
        } else {
            info!(name = %name, "Starting service. Args: {}", args.join(" "));
            self.supervisor.start(args).await
        };

        result.inspect_err(|e| error!(name = %name, fatal = true, "Service start failed: {e}"))
    }

    pub async fn on_stop(&mut self) -> StopOutcome {
        debug!(name = %self.supervisor.config().name, "Stopping service");
        self.supervisor.stop().await
    }

    /// Stop the child and delete the staged payload
    pub async fn dispose(self) {
        let name = self.supervisor.config().name.clone();
        self.supervisor.dispose().await;
        debug!(name = %name, "Service released");
    }
}

/// Run the whole service lifecycle until `cancel` fires.
///
/// Stages the payload, starts the child with arguments chosen for
/// `context`, waits for cancellation, then stops the child and removes
/// the staged directory. Startup failures are returned after cleanup.
pub async fn run<M: ProcessManager>(
    config: &HostConfig,
    manager: Arc<M>,
    sink: Arc<dyn OutputSink>,
    context: ExecutionContext,
    cli_args: Vec<String>,
    cancel: CancellationToken,
) -> Result<(), SupervisorError> {
    let supervisor = config
        .supervisor_config()
        .and_then(|supervisor_config| {
            ProcessSupervisor::new(supervisor_config, manager, sink, &config.payload())
        })
        .inspect_err(|e| {
            error!(name = %config.service_name, fatal = true, "Service initialisation failed: {e}")
        })?;
    debug!(
        name = %config.service_name,
        path = %supervisor.working_directory().display(),
        ?context,
        "Service instantiated"
    );

    let mut host = LifecycleHost::new(supervisor, config.default_arguments(), context);
    let started = match context {
        ExecutionContext::Interactive => host.set_up(cli_args).await,
        ExecutionContext::Unattended => host.on_start(cli_args).await,
    };
    if let Err(e) = started {
        host.dispose().await;
        return Err(e);
    }

    if context.is_interactive() {
        info!("Service started. Press Ctrl+C to stop the service...");
    }
    cancel.cancelled().await;

    match context {
        ExecutionContext::Interactive => host.tear_down().await,
        ExecutionContext::Unattended => host.on_stop().await,
    };
    host.dispose().await;
    Ok(())
}
