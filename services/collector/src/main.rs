//! Collector service entry point.
//!
//! Startup order: load configuration, initialize tracing, validate, build the
//! InfluxDB sink, log the local network endpoint, serve until SIGINT/SIGTERM.
//! In-flight requests (and their write sessions) are allowed to finish on
//! shutdown.

use anyhow::{Context, Result};
use std::net::{IpAddr, UdpSocket};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vitalsink_collector::config::{CollectorConfig, LoggingConfig};
use vitalsink_collector::influx::InfluxSink;
use vitalsink_collector::server::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    init_tracing(&config.logging)?;

    info!(
        service = "vitalsink-collector",
        version = env!("CARGO_PKG_VERSION"),
        "Starting collector"
    );

    config.validate().context("Invalid configuration")?;

    if config.logging.debug_payloads {
        info!("Payload debug logging enabled");
    }

    let sink = Arc::new(InfluxSink::new(&config.influx, &config.write));
    let state = AppState {
        sink,
        debug_payloads: config.logging.debug_payloads,
    };

    match local_network_addr() {
        Ok(ip) => info!(
            endpoint = %format!("http://{}:{}/collect", ip, config.server.port),
            "Local network endpoint"
        ),
        Err(e) => warn!(error = %e, "Could not resolve local network address"),
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(address = %addr, "Listening for export payloads");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration, falling back to environment-only sources.
fn load_config() -> Result<CollectorConfig> {
    let config = CollectorConfig::load()
        .or_else(|_| CollectorConfig::from_env())
        .context("Failed to load configuration")?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("vitalsink_collector={}", level).parse()?)
        .add_directive(format!("collector={}", level).parse()?)
        .add_directive("tower_http=info".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Resolve the address this host is reachable at on the local network.
///
/// Connecting a UDP socket picks the outbound interface without sending
/// any packets.
fn local_network_addr() -> Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}

/// Wait for shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
