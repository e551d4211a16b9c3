//! Vigil Server - standalone headless server for the Vigil video inference core.
//!
//! Wires a video file or phone camera through the paced scheduler and inference worker,
//! and serves the REST/WebSocket API for browsers and the phone camera app.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use vigil_core::{start_server, AppState};

use crate::config::ServerConfig;

/// Vigil Server - headless video inference orchestration server.
#[derive(Parser, Debug)]
#[command(name = "vigil-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "VIGIL_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "VIGIL_BIND_PORT")]
    port: Option<u16>,

    /// Advertise IP address (overrides config file).
    #[arg(short = 'a', long, env = "VIGIL_ADVERTISE_IP")]
    advertise_ip: Option<std::net::IpAddr>,

    /// Base URL of the inference collaborator (overrides config file).
    #[arg(short = 'i', long, env = "VIGIL_INFERENCE_URL")]
    inference_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Vigil Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(ip) = args.advertise_ip {
        config.advertise_ip = Some(ip);
    }
    if let Some(url) = args.inference_url {
        config.inference_base_url = url;
    }

    log::info!(
        "Configuration: bind_port={}, target_fps={}, inference_base_url={}",
        config.bind_port,
        config.target_fps,
        config.inference_base_url,
    );

    let core_config = config.to_core_config();
    let services = vigil_core::bootstrap(&core_config).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully, camera url: {}", services.network.camera_url());

    let app_state = AppState::builder()
        .from_services(&services)
        .config(Arc::new(core_config))
        .build();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server started on port {}", config.bind_port);

    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown();
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
