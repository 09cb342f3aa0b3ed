//! cachevisor - runs an embedded cache server as a supervised service
//!
//! The host side of the workspace: platform process manager selection,
//! host configuration, execution context detection, telemetry, and the
//! [`LifecycleHost`] that drives a [`ProcessSupervisor`] like a service.

pub mod context;
pub mod factory;
pub mod host;
pub mod settings;
pub mod telemetry;

pub use context::{ExecutionContext, cancel_on_signals, select_arguments};
pub use factory::{PlatformProcessManager, PlatformProcessManagerFactory, create_process_manager};
pub use host::{LifecycleHost, run};
pub use settings::{HostConfig, LogConfig, LogFormat, PayloadConfig, SettingsError};
pub use telemetry::TelemetryError;

// Re-export core functionality
pub use cachevisor_core::*;
