//! # Beacon Server
//!
//! Queue worker entry point. Loads configuration, opens the record store,
//! registers the built-in handlers and scans the queue on its cron schedule
//! until Ctrl+C or SIGTERM.

use beacon_config::ConfigLoader;
use beacon_core::{init_telemetry, BeaconResult};
use beacon_server::app::App;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {}", e);
        eprintln!("beacon-server: {e}");
        std::process::exit(1);
    }
}

async fn run() -> BeaconResult<()> {
    let config_loader = ConfigLoader::from_default_location()?;
    let config = config_loader.get().await;

    init_telemetry(&config.telemetry)?;

    info!("Starting Beacon queue worker...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    let app = App::build(config).await?;
    app.run_until(shutdown_signal()).await?;

    info!("Beacon queue worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
