//! Builder pattern for bridge configuration.
//!
//! Provides a fluent API for configuring and creating [`Bridge`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use serial_scale_bridge::Bridge;
//!
//! # fn example() -> serial_scale_bridge::Result<()> {
//! let bridge = Bridge::builder()
//!     .port(8001)
//!     .baud_rate(9600)
//!     .poll_interval(Duration::from_millis(100))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{Span, info_span};

use crate::device::{Device, Parity, SerialDevice, StopBits};
use crate::error::Result;

use super::core::Bridge;
use super::options::BridgeOptions;

// ============================================================================
// BridgeBuilder
// ============================================================================

/// Builder for configuring a [`Bridge`] instance.
///
/// Use [`Bridge::builder()`] to create a new builder.
#[derive(Default)]
pub struct BridgeBuilder {
    /// Accumulated configuration.
    options: BridgeOptions,
    /// Device override. A [`SerialDevice`] is built when unset.
    device: Option<Box<dyn Device>>,
    /// Parent span for all bridge logging.
    span: Option<Span>,
}

impl fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("options", &self.options)
            .field("device", &self.device.as_ref().map(|d| d.name().to_string()))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BridgeBuilder Implementation
// ============================================================================

impl BridgeBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: BridgeOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses a fixed serial port path instead of USB discovery.
    ///
    /// # Arguments
    ///
    /// * `path` - Port path (e.g., "/dev/ttyUSB0" or "COM3")
    #[inline]
    #[must_use]
    pub fn port_path(mut self, path: impl Into<String>) -> Self {
        self.options.serial.port_path = Some(path.into());
        self
    }

    /// Sets the USB vendor and product IDs used for discovery.
    #[inline]
    #[must_use]
    pub fn usb_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.options.serial.vendor_id = vendor_id;
        self.options.serial.product_id = product_id;
        self
    }

    /// Sets the line speed.
    #[inline]
    #[must_use]
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.options.serial.baud_rate = baud_rate;
        self
    }

    /// Sets the word size (5 to 8).
    #[inline]
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.options.serial.data_bits = bits;
        self
    }

    /// Sets the parity mode.
    #[inline]
    #[must_use]
    pub fn parity(mut self, parity: Parity) -> Self {
        self.options.serial.parity = parity;
        self
    }

    /// Sets the stop bits.
    #[inline]
    #[must_use]
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.options.serial.stop_bits = stop_bits;
        self
    }

    /// Sets the upper bound of one blocking device read.
    #[inline]
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.options.serial.read_timeout = timeout;
        self
    }

    /// Sets the full listen address.
    #[inline]
    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.options.server.bind_addr = addr;
        self
    }

    /// Sets the listen port, keeping the configured interface.
    ///
    /// Port 0 lets the OS choose.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.options.server.bind_addr.set_port(port);
        self
    }

    /// Sets the interval between device polls.
    #[inline]
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.polling.interval = interval;
        self
    }

    /// Sets the wait for background tasks during stop.
    #[inline]
    #[must_use]
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.options.polling.stop_timeout = timeout;
        self
    }

    /// Sets the graceful HTTP drain bound.
    #[inline]
    #[must_use]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.options.server.drain_timeout = timeout;
        self
    }

    /// Sets the per-subscriber outbound queue capacity.
    #[inline]
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.options.server.session.queue_capacity = capacity;
        self
    }

    /// Uses `device` instead of a USB serial device.
    #[must_use]
    pub fn device(mut self, device: impl Device) -> Self {
        self.device = Some(Box::new(device));
        self
    }

    /// Sets the parent span for bridge logging.
    #[inline]
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Builds the bridge with validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if any option is out of range.
    pub fn build(self) -> Result<Bridge> {
        self.options.validate()?;

        let device: Box<dyn Device> = match self.device {
            Some(device) => device,
            None => Box::new(SerialDevice::new(self.options.serial.clone())),
        };
        let span = self.span.unwrap_or_else(|| info_span!("bridge"));

        Ok(Bridge::new(self.options, device, span))
    }
}

// ============================================================================
// Tests
// ============================================================================
