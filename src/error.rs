//! Error types for the serial scale bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use serial_scale_bridge::{Bridge, Result};
//!
//! async fn example(bridge: &Bridge) -> Result<()> {
//!     bridge.start().await?;
//!     bridge.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Device | [`Error::DeviceNotFound`], [`Error::DeviceOpen`], [`Error::DeviceNotConnected`] |
//! | Data | [`Error::InvalidReading`], [`Error::Protocol`] |
//! | Lifecycle | [`Error::AlreadyRunning`], [`Error::NotRunning`], [`Error::HubClosed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Serial`], [`Error::TaskJoin`] |
//!
//! Only device connect errors and lifecycle misuse cross the [`Bridge`]
//! boundary. Everything else is logged and contained where it happens.
//!
//! [`Bridge`]: crate::Bridge

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::task::JoinError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned by [`BridgeBuilder::build`](crate::BridgeBuilder::build)
    /// when an option is out of range.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// No serial device matched the configured USB identifiers.
    #[error("No serial device found with VID {vendor_id:04X} / PID {product_id:04X}")]
    DeviceNotFound {
        /// USB vendor identifier searched for.
        vendor_id: u16,
        /// USB product identifier searched for.
        product_id: u16,
    },

    /// The serial device was found but could not be opened.
    #[error("Failed to open serial device {port}: {message}")]
    DeviceOpen {
        /// OS path of the port.
        port: String,
        /// Description of the failure.
        message: String,
    },

    /// A read was attempted while no device is connected.
    #[error("Serial device not connected")]
    DeviceNotConnected,

    // ========================================================================
    // Data Errors
    // ========================================================================
    /// A device line could not be decoded into a reading.
    #[error("Invalid reading {line:?}: {message}")]
    InvalidReading {
        /// The offending line, trimmed.
        line: String,
        /// Why it was rejected.
        message: String,
    },

    /// Malformed frame on the wire.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// `start` called while the bridge is not stopped.
    #[error("Bridge is already running")]
    AlreadyRunning,

    /// `stop` called while the bridge is stopped.
    #[error("Bridge is not running")]
    NotRunning,

    /// The hub has been shut down and accepts no further commands.
    #[error("Connection hub is closed")]
    HubClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial port layer error.
    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// A blocking task panicked or was cancelled.
    #[error("Task failed: {0}")]
    TaskJoin(#[from] JoinError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a device not found error.
    #[inline]
    pub fn device_not_found(vendor_id: u16, product_id: u16) -> Self {
        Self::DeviceNotFound {
            vendor_id,
            product_id,
        }
    }

    /// Creates a device open error.
    #[inline]
    pub fn device_open(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceOpen {
            port: port.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid reading error.
    #[inline]
    pub fn invalid_reading(line: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidReading {
            line: line.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error came from device discovery or I/O.
    #[inline]
    #[must_use]
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. }
                | Self::DeviceOpen { .. }
                | Self::DeviceNotConnected
                | Self::Serial(_)
        )
    }

    /// Returns `true` if this is a start/stop misuse error.
    #[inline]
    #[must_use]
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::NotRunning)
    }

    /// Returns `true` if the failed unit of work can simply be dropped.
    ///
    /// Malformed lines and frames are discarded and processing continues.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidReading { .. } | Self::Protocol { .. } | Self::Json(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
