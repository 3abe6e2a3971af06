//! HTTP/WebSocket API layer.
//!
//! Thin handlers that delegate to the core services: the `/transcribe`
//! WebSocket carries the session control protocol and audio; the HTTP
//! routes expose health, metrics, session and alert introspection.

use std::sync::Arc;

use thiserror::Error;

use crate::metrics::{AlertManager, MetricsCollector};
use crate::session::{SessionManager, SessionRenewer};
use crate::state::Config;

pub mod http;
pub mod ws;

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
/// A thin wrapper holding references to services; all business logic lives
/// in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Registry of live transcription sessions.
    pub session_manager: Arc<SessionManager>,
    /// Metrics collector tapped by all components.
    pub metrics: Arc<MetricsCollector>,
    /// Threshold-based alerting over the collector.
    pub alert_manager: Arc<AlertManager>,
    /// Background stream renewal.
    pub renewer: Arc<SessionRenewer>,
    /// Application configuration.
    pub config: Arc<Config>,
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

/// Starts the HTTP server on the configured or an auto-discovered port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let preferred_port = state.config.preferred_port;
    let (port, listener) = if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        (preferred_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(49500, 49510).await?
    };

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(listener, app).await?;
    Ok(())
}
