pub(crate) mod params;

use std::process::ExitCode;

use tracing::{error, info};

use crate::config::BrokerConfig;
use crate::lifecycle::{BrokerLifecycle, LifecycleError, ShutdownSignal, SignalBridge};

pub use params::Params;

/// Host process body: start the broker, wait for a termination signal,
/// stop. Exit status is success only for an orderly shutdown.
pub async fn run(params: Params) -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(params.log_level)
        .with_target(false)
        .with_thread_ids(true)
        .compact()
        .init();

    let config = match params.broker_config() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    info!("embedq starting with config: {:?}", config);

    match serve(config).await {
        Ok(()) => {
            info!("Exiting...");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: BrokerConfig) -> Result<(), LifecycleError> {
    let bridge = SignalBridge::arm(ShutdownSignal::new())?;
    let lifecycle: BrokerLifecycle = BrokerLifecycle::new();

    let outcome = run_until_signalled(&lifecycle, config, &bridge).await;
    // Runs on every path; a no-op unless the broker reached Ready.
    lifecycle.stop().await;
    outcome
}

async fn run_until_signalled(
    lifecycle: &BrokerLifecycle,
    config: BrokerConfig,
    bridge: &SignalBridge,
) -> Result<(), LifecycleError> {
    let endpoint = lifecycle.start(config).await?;
    info!("embedq broker is running on port {}", endpoint.port());
    info!(url = %lifecycle.client_url()?, "accepting client connections");

    bridge.wait().await;
    info!("Received interrupt, shutting down...");
    Ok(())
}
