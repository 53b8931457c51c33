//! Serves `/ws` and `/health` without a device, until Ctrl-C.
//!
//! Subscribers can connect and exercise ping and sync; nothing is ever
//! broadcast. `RUST_LOG` controls verbosity (default `info`).
//! `SERIAL_BRIDGE_PORT` overrides the listen port.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serial_scale_bridge::bridge::options::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_PORT};
use serial_scale_bridge::transport::{ConnectionHub, PendingServer, SessionSettings};
use serial_scale_bridge::{Error, Result};
use tracing::{info, info_span};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the listen port.
const PORT_ENV: &str = "SERIAL_BRIDGE_PORT";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = match std::env::var(PORT_ENV) {
        Ok(value) => value
            .parse::<u16>()
            .map_err(|e| Error::config(format!("{PORT_ENV}={value:?}: {e}")))?,
        Err(_) => DEFAULT_PORT,
    };
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

    let span = info_span!("hub-server");
    let hub = ConnectionHub::new(info_span!(parent: &span, "hub"));
    let pending = PendingServer::bind(addr).await?;
    info!(ws = %pending.ws_url(), "Hub server listening");

    let server = pending.serve(hub.clone(), SessionSettings::default(), info_span!(parent: &span, "http"));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let closed = hub.shutdown();
    info!(closed, "Hub closed");
    if !server.shutdown(DEFAULT_DRAIN_TIMEOUT).await {
        info!("Server forced to shut down");
    }

    info!("Server stopped");
    Ok(())
}
