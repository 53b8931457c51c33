//! Runs the bridge until Ctrl-C.
//!
//! `RUST_LOG` controls verbosity (default `info`). `SERIAL_BRIDGE_PORT`
//! overrides the listen port.

use serial_scale_bridge::{Bridge, Error, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the listen port.
const PORT_ENV: &str = "SERIAL_BRIDGE_PORT";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut builder = Bridge::builder();
    if let Ok(value) = std::env::var(PORT_ENV) {
        let port = value
            .parse::<u16>()
            .map_err(|e| Error::config(format!("{PORT_ENV}={value:?}: {e}")))?;
        builder = builder.port(port);
    }

    let bridge = builder.build()?;
    bridge.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");

    bridge.stop().await
}
