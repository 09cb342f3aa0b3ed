use std::io::{self, IsTerminal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Environment variable forcing the execution context
pub const CONTEXT_ENV: &str = "CACHEVISOR_CONTEXT";

/// Whether a user is attached to the console or a service manager runs us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    Interactive,
    Unattended,
}

impl ExecutionContext {
    /// `$CACHEVISOR_CONTEXT` when it is `interactive` or `service`,
    /// otherwise whether stdin is a terminal
    pub fn detect() -> Self {
        let forced = std::env::var(CONTEXT_ENV).ok();
        Self::parse(forced.as_deref()).unwrap_or_else(|| {
            if io::stdin().is_terminal() {
                ExecutionContext::Interactive
            } else {
                ExecutionContext::Unattended
            }
        })
    }

    fn parse(value: Option<&str>) -> Option<Self> {
        match value?.trim().to_ascii_lowercase().as_str() {
            "interactive" => Some(ExecutionContext::Interactive),
            "service" | "unattended" => Some(ExecutionContext::Unattended),
            "" => None,
            other => {
                warn!("Ignoring unknown {CONTEXT_ENV} value {other:?}");
                None
            }
        }
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self, ExecutionContext::Interactive)
    }
}

/// Command-line arguments win when there are any; otherwise the configured
/// defaults are used
pub fn select_arguments(cli: Vec<String>, defaults: &[String]) -> Vec<String> {
    if cli.is_empty() {
        defaults.to_vec()
    } else {
        cli
    }
}

/// Cancel `token` on Ctrl+C, or on SIGTERM where there is one.
///
/// The listener only waits on signals; console input is left untouched.
pub fn cancel_on_signals(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => return,
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received Ctrl+C, stopping"),
                Err(e) => warn!("Failed to listen for Ctrl+C: {e}"),
            },
            result = terminate_signal() => match result {
                Ok(()) => info!("Received SIGTERM, stopping"),
                Err(e) => warn!("Failed to listen for SIGTERM: {e}"),
            },
        }
        token.cancel();
    })
}

#[cfg(unix)]
async fn terminate_signal() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate_signal() -> io::Result<()> {
    std::future::pending().await
}
