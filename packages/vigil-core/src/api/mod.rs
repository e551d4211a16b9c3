//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to the core services. It provides the
//! router construction and server startup functionality.

use std::sync::Arc;

use thiserror::Error;

use crate::config::Config;
use crate::context::NetworkContext;
use crate::events::BroadcastEventBridge;
use crate::inference::InferenceWorker;
use crate::manager::SourceManager;
use crate::viewers::ViewerRegistry;

pub mod http;
pub mod ws;
pub mod ws_phone;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services. All business logic lives in
/// the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Source lifecycle state machine.
    pub manager: Arc<SourceManager>,
    /// Single-inflight inference worker.
    pub worker: Arc<InferenceWorker>,
    /// Viewer registry and broadcaster.
    pub viewer_registry: Arc<ViewerRegistry>,
    /// Event bridge for emitting domain events.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Network configuration (port, local IP).
    pub network: NetworkContext,
    /// Application configuration.
    pub config: Arc<Config>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    manager: Option<Arc<SourceManager>>,
    worker: Option<Arc<InferenceWorker>>,
    viewer_registry: Option<Arc<ViewerRegistry>>,
    event_bridge: Option<Arc<BroadcastEventBridge>>,
    network: Option<NetworkContext>,
    config: Option<Arc<Config>>,
}

impl AppStateBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates the service fields that come straight out of `BootstrappedServices`, leaving
    /// only `config` to be set individually.
    pub fn from_services(mut self, services: &crate::bootstrap::BootstrappedServices) -> Self {
        self.manager = Some(Arc::clone(&services.manager));
        self.worker = Some(Arc::clone(&services.worker));
        self.viewer_registry = Some(Arc::clone(&services.viewer_registry));
        self.event_bridge = Some(Arc::clone(&services.event_bridge));
        self.network = Some(services.network.clone());
        self
    }

    pub fn manager(mut self, manager: Arc<SourceManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn worker(mut self, worker: Arc<InferenceWorker>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn viewer_registry(mut self, registry: Arc<ViewerRegistry>) -> Self {
        self.viewer_registry = Some(registry);
        self
    }

    pub fn event_bridge(mut self, bridge: Arc<BroadcastEventBridge>) -> Self {
        self.event_bridge = Some(bridge);
        self
    }

    pub fn network(mut self, network: NetworkContext) -> Self {
        self.network = Some(network);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            manager: self.manager.expect("manager is required"),
            worker: self.worker.expect("worker is required"),
            viewer_registry: self.viewer_registry.expect("viewer_registry is required"),
            event_bridge: self.event_bridge.expect("event_bridge is required"),
            network: self.network.expect("network is required"),
            config: self.config.expect("config is required"),
        }
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let preferred_port = state.config.bind_port;
    let (port, listener) = if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => (preferred_port, listener),
            Err(_) => find_available_port(49400, 49410).await?,
        }
    } else {
        find_available_port(49400, 49410).await?
    };

    state.network.set_port(port);

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
