//! Health check endpoint.
//!
//! `/health` always answers with the link status, `/ready` only succeeds
//! once the session is established, `/live` succeeds while the process runs.

use std::net::SocketAddr;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tracing::info;
use vpcie_link::prelude::*;

/// Health status.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    /// Whether the daemon considers the link usable.
    pub healthy: bool,
    /// Device id.
    pub device: u32,
    /// Current role.
    pub role: String,
    /// Lifecycle state.
    pub state: String,
    /// Whether a socket or loopback is live.
    pub connected: bool,
    /// Session id in use.
    pub session_id: u32,
    /// Link counters.
    pub stats: HealthStats,
}

/// Counters reported by the health endpoint.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct HealthStats {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub errors: u64,
    pub dropped: u64,
    pub timeouts: u64,
    pub reconnects: u64,
}

impl From<StatsSnapshot> for HealthStats {
    fn from(s: StatsSnapshot) -> Self {
        Self {
            rx_packets: s.rx_packets,
            tx_packets: s.tx_packets,
            rx_bytes: s.rx_bytes,
            tx_bytes: s.tx_bytes,
            errors: s.errors,
            dropped: s.dropped,
            timeouts: s.timeouts,
            reconnects: s.reconnects,
        }
    }
}

/// Shared state for health endpoint.
#[derive(Clone)]
pub struct HealthState {
    link: Link,
}

impl HealthState {
    /// Report on `link`.
    pub fn new(link: Link) -> Self {
        Self { link }
    }

    /// Get current status.
    pub fn status(&self) -> HealthStatus {
        let status = self.link.status();
        HealthStatus {
            healthy: status.state == LinkState::Established,
            device: status.device_id,
            role: format!("{:?}", status.role),
            state: format!("{:?}", status.state),
            connected: status.connected,
            session_id: status.session_id,
            stats: status.stats.into(),
        }
    }
}

async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.status()))
}

async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status();
    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn live_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Routes served by the health server.
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/live", get(live_handler))
        .with_state(state)
}

/// Serve the health endpoint until `shutdown` resolves.
pub async fn start_health_server(
    bind_addr: SocketAddr,
    state: HealthState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "health server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_link() -> Link {
        let config = LinkConfig::builder().loopback(true).build().unwrap();
        Link::new(3, config)
    }

    #[tokio::test]
    async fn test_status_before_connect() {
        let state = HealthState::new(loopback_link());
        let status = state.status();
        assert!(!status.healthy);
        assert!(!status.connected);
        assert_eq!(status.device, 3);
        assert_eq!(status.state, "Disconnected");
        assert_eq!(status.role, "None");
    }

    #[tokio::test]
    async fn test_ready_follows_link_state() {
        let link = loopback_link();
        let state = HealthState::new(link.clone());

        let response = ready_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        link.connect().await.unwrap();
        let response = ready_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.status().role, "Loopback");

        link.disconnect().await;
    }

    #[tokio::test]
    async fn test_health_always_ok() {
        let state = HealthState::new(loopback_link());
        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_serializes() {
        let state = HealthState::new(loopback_link());
        let json = serde_json::to_value(state.status()).unwrap();
        assert_eq!(json["connected"], false);
        assert_eq!(json["stats"]["errors"], 0);
    }
}
