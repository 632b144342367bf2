use anyhow::{Context, Result};
use lib_tracker::{FlightCache, StreamTransport};
use tokio::signal;

mod tracker_logic;
use tracker_logic::config::{self, TrackerSettings};
use tracker_logic::coordinator::Coordinator;
use tracker_logic::logger;

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    // .env values become visible to clap's env lookups
    dotenvy::dotenv().ok();

    let config = config::load_config();
    let settings = TrackerSettings::from_config(&config).context("Invalid tracker configuration")?;
    let log_path = logger::setup_logging(&settings.log_dir, settings.log_level)?;
    log::info!("Logging to {}", log_path.display());
    log::info!(
        "Tracking {} (reconnect every {} ms, at most {} attempts)",
        settings.ws_url,
        settings.reconnect_delay.as_millis(),
        settings.max_retries
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let transport = StreamTransport::new(settings.transport_config());
    let coordinator = Coordinator::new(transport.clone(), FlightCache::new(), &settings);
    let coordinator_handle = tokio::spawn(coordinator.run(shutdown_tx.subscribe()));

    transport.connect();

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    transport.disconnect();
    let _ = shutdown_tx.send(());
    coordinator_handle.await.context("Coordinator task failed")?;

    log::info!("Shutdown complete.");
    Ok(())
}
