//! Order bridge - consumes order updates from RabbitMQ and relays each one to
//! the orders API with an HTTP `PUT`.

mod consumer;

use anyhow::{Context, Result};
use tokio::{signal, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use order_bridge::{Config, Forwarder};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before the filter reads RUST_LOG
    let env_file = dotenvy::dotenv();

    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("bridge_starting");

    if let Err(e) = env_file {
        warn!(error = %e, "env_file_not_loaded");
    }

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        rabbitmq_url_length = config.rabbitmq_url.len(),
        queue = %config.queue_name,
        auto_ack = config.subscribe.auto_ack,
        endpoint = %config.orders_endpoint,
        status_policy = ?config.status_policy,
        request_timeout_ms = config.request_timeout_ms,
        reject_non_success = config.reject_non_success,
        max_attempts = config.forward_max_attempts,
        concurrency = config.worker_concurrency,
        "config_loaded"
    );

    let forwarder = Forwarder::from_config(&config).context("Failed to create HTTP client")?;

    // Flipped once by the signal task; every wait in the consumer selects on it.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    consumer::run(config, forwarder, shutdown_rx).await?;

    info!("bridge_shutdown_complete");
    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "ctrl_c_handler_failed");
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
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("bridge_shutting_down");
}
