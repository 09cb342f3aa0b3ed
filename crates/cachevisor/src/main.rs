use anyhow::Context;
use cachevisor::{
    ExecutionContext, HostConfig, OutputSink, PlatformProcessManagerFactory,
    ProcessManagerFactory, TracingSink, cancel_on_signals, create_process_manager, settings,
    telemetry,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = settings::config_path();
    let config = HostConfig::load(&path)?;
    telemetry::initialise(&config.log)?;

    let context = ExecutionContext::detect();
    debug!(
        config = %path.display(),
        platform = PlatformProcessManagerFactory::platform_name(),
        ?context,
        "Host configured"
    );

    let cancel = CancellationToken::new();
    let listener = cancel_on_signals(cancel.clone());
    let sink: Arc<dyn OutputSink> = Arc::new(TracingSink::new(config.service_name.clone()));
    let cli_args: Vec<String> = std::env::args().skip(1).collect();

    let result = cachevisor::run(
        &config,
        create_process_manager(),
        sink,
        context,
        cli_args,
        cancel.clone(),
    )
    .await;

    cancel.cancel();
    listener.await.context("signal listener failed")?;
    result.with_context(|| format!("service {} failed", config.service_name))
}
