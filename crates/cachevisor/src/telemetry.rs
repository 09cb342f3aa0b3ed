//! Process-wide `tracing` setup for the host binary

use crate::settings::{LogConfig, LogFormat};
use once_cell::sync::OnceCell;
use std::io::{self, IsTerminal};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

static INSTALLED: OnceCell<()> = OnceCell::new();

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Install the global subscriber described by `config`.
///
/// A non-empty `RUST_LOG` replaces `config.filter`. Only the first call
/// installs anything; later calls return `Ok` untouched.
pub fn initialise(config: &LogConfig) -> Result<(), TelemetryError> {
    INSTALLED.get_or_try_init(|| install(config)).map(|_| ())
}

fn filter_directive(config: &LogConfig, env_value: Option<String>) -> String {
    match env_value {
        Some(value) if !value.trim().is_empty() => value,
        _ => config.filter.clone(),
    }
}

fn install(config: &LogConfig) -> Result<(), TelemetryError> {
    let directive = filter_directive(config, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let filter =
        EnvFilter::try_new(directive).map_err(|e| TelemetryError::Filter(e.to_string()))?;

    // Both formats go to stderr with RFC 3339 UTC timestamps
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());
    let layer = match config.format {
        LogFormat::Json => layer.json().flatten_event(true).boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(layer).with(filter);
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
