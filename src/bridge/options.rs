//! Bridge configuration.
//!
//! [`BridgeOptions`] groups everything a run needs. All fields have
//! defaults suitable for a PL2303-attached scale on port 8001, and the
//! whole tree deserializes from partial JSON.
//!
//! # Example
//!
//! ```
//! use serial_scale_bridge::BridgeOptions;
//!
//! let options: BridgeOptions =
//!     serde_json::from_str(r#"{"server":{"bind_addr":"127.0.0.1:9000"}}"#).unwrap();
//! assert_eq!(options.server.bind_addr.port(), 9000);
//! assert!(options.validate().is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::SerialOptions;
use crate::error::{Error, Result};
use crate::transport::SessionSettings;

// ============================================================================
// Constants
// ============================================================================

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8001;

/// Default interval between device polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default wait for background tasks during stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Default graceful HTTP drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// ServerOptions
// ============================================================================

/// HTTP listener and subscriber session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Upper bound for the graceful HTTP drain on stop.
    pub drain_timeout: Duration,
    /// Per-session limits.
    pub session: SessionSettings,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            session: SessionSettings::default(),
        }
    }
}

// ============================================================================
// BridgeOptions
// ============================================================================

/// Full bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Device discovery and framing.
    pub serial: SerialOptions,
    /// HTTP listener.
    pub server: ServerOptions,
    /// Polling cadence and stop bounds.
    pub polling: PollingOptions,
}

/// Device polling cadence and stop bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingOptions {
    /// Interval between device reads.
    pub interval: Duration,
    /// Upper bound for waiting on background tasks during stop.
    pub stop_timeout: Duration,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl BridgeOptions {
    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.serial.validate()?;

        let session = &self.server.session;
        let durations = [
            ("poll interval", self.polling.interval),
            ("stop timeout", self.polling.stop_timeout),
            ("drain timeout", self.server.drain_timeout),
            ("read deadline", session.read_deadline),
            ("keepalive interval", session.keepalive_interval),
            ("write timeout", session.write_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(Error::config(format!("{name} must be positive")));
        }

        if session.keepalive_interval >= session.read_deadline {
            return Err(Error::config(
                "keepalive interval must be shorter than the read deadline",
            ));
        }
        if session.queue_capacity == 0 {
            return Err(Error::config("queue capacity must be positive"));
        }
        if session.max_frame_size == 0 {
            return Err(Error::config("max frame size must be positive"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
