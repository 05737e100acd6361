//! vpcie-linkd
//!
//! Runs one virtual PCIe link and reports on it over HTTP.
//!
//! Environment variables:
//! - VPCI_REMOTE_IP, VPCI_REMOTE_PORT: peer to dial as root complex
//! - VPCI_LOCAL_PORT: port to listen on as endpoint
//! - VPCI_LOOPBACK: 1 to run a local self-test link
//! - VPCI_DEBUG: 0-3, 3 enables debug logging
//! - LINKD_ROLE: "endpoint" to wait for a root complex instead of dialing
//! - LINKD_HEALTH_ADDR: health server bind address (default 127.0.0.1:8080)
//! - RUST_LOG: overrides VPCI_DEBUG when set

#![forbid(unsafe_code)]

mod health;

use std::net::SocketAddr;

use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vpcie_link::prelude::*;

use crate::health::{HealthState, start_health_server};

const DEFAULT_HEALTH_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Error)]
enum DaemonError {
    #[error(transparent)]
    Link(#[from] VpciError),

    #[error("invalid {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("health server: {0}")]
    Health(#[from] std::io::Error),
}

impl From<ConfigError> for DaemonError {
    fn from(err: ConfigError) -> Self {
        Self::Link(err.into())
    }
}

impl From<RegistryError> for DaemonError {
    fn from(err: RegistryError) -> Self {
        Self::Link(err.into())
    }
}

fn env_var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn health_addr() -> Result<SocketAddr, DaemonError> {
    let value = env_var("LINKD_HEALTH_ADDR").unwrap_or_else(|| DEFAULT_HEALTH_ADDR.to_string());
    value.parse().map_err(|_| DaemonError::InvalidEnv {
        name: "LINKD_HEALTH_ADDR",
        value,
    })
}

fn endpoint_role() -> Result<bool, DaemonError> {
    match env_var("LINKD_ROLE").as_deref() {
        None | Some("root") => Ok(false),
        Some("endpoint") => Ok(true),
        Some(other) => Err(DaemonError::InvalidEnv {
            name: "LINKD_ROLE",
            value: other.to_string(),
        }),
    }
}

async fn run() -> Result<(), DaemonError> {
    let config = LinkConfig::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let health_addr = health_addr()?;
    let endpoint = endpoint_role()?;

    let registry = Registry::new();
    let id = registry.attach(config)?;
    if endpoint {
        registry.control(id, Command::SetRole(Role::Endpoint)).await?;
    }
    let link = registry
        .get(id)
        .ok_or(RegistryError::UnknownDevice(id))?;

    if endpoint {
        let addr = link.listen().await.map_err(VpciError::from)?;
        info!(device = id, %addr, "waiting for root complex");
    }

    let connecting = {
        let link = link.clone();
        tokio::spawn(async move {
            if let Err(err) = link.connect().await {
                error!(device = link.device_id(), %err, "connect failed");
            }
        })
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let served = start_health_server(health_addr, HealthState::new(link), shutdown).await;

    info!("shutting down");
    registry.detach_all().await;
    let _ = connecting.await;
    served?;
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("vpcie-linkd: {err}");
        std::process::exit(1);
    }
}
