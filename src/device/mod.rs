//! Measurement device access.
//!
//! A [`Device`] produces one trimmed text line per successful read. Reads
//! block up to the device's own timeout; a timeout with no data is reported
//! as `Ok(None)`, not as an error.
//!
//! # Implementations
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SerialDevice`] | USB serial scale discovered by VID/PID |
//! | [`ScriptedDevice`] | In-memory line feed for demos and tests |

// ============================================================================
// Submodules
// ============================================================================

/// In-memory device fed from a handle.
pub mod scripted;

/// USB serial device.
pub mod serial;

// ============================================================================
// Re-exports
// ============================================================================

pub use scripted::{ScriptedDevice, ScriptedFeed};
pub use serial::{Parity, SerialDevice, SerialOptions, StopBits};

// ============================================================================
// Imports
// ============================================================================

use crate::error::Result;

// ============================================================================
// Device
// ============================================================================

/// A line-oriented measurement device.
///
/// All methods may block; callers run them on a blocking thread.
pub trait Device: Send + 'static {
    /// Opens the device.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceNotFound`](crate::Error::DeviceNotFound) if discovery finds nothing
    /// - [`Error::DeviceOpen`](crate::Error::DeviceOpen) if the open call fails
    fn connect(&mut self) -> Result<()>;

    /// Reads one line, trimmed of surrounding whitespace.
    ///
    /// Returns `Ok(None)` when the read timed out with no complete line.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceNotConnected`](crate::Error::DeviceNotConnected) if not connected
    /// - [`Error::InvalidReading`](crate::Error::InvalidReading) if the line is not UTF-8
    /// - [`Error::Io`](crate::Error::Io) on other read failures
    fn read_line(&mut self) -> Result<Option<String>>;

    /// Closes the device. Idempotent.
    ///
    /// # Errors
    ///
    /// Implementations may report a failure to release the handle.
    fn disconnect(&mut self) -> Result<()>;

    /// Returns `true` while the device is open.
    fn is_connected(&self) -> bool;

    /// Returns the device identifier (port path once connected).
    fn name(&self) -> &str;
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        (**self).read_line()
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
