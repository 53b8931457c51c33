//! Serial scale bridge - stream weight readings to browser subscribers.
//!
//! This library reads text lines from a USB serial scale, parses each into
//! a numeric reading, and broadcasts it as JSON to every WebSocket client
//! connected to a small embedded HTTP server.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  line  ┌────────────┐ scale_data ┌───────────────┐   ws   ┌──────────┐
//! │ Device     │───────►│ Poll loop  │───────────►│ ConnectionHub │───────►│ Browsers │
//! │ (serial)   │ 100 ms │ (parse)    │            │ (fan-out)     │◄───────│          │
//! └────────────┘        └────────────┘            └───────────────┘  ping  └──────────┘
//! ```
//!
//! - Each start creates a fresh hub, HTTP server and polling task
//! - A slow subscriber is dropped, never waited for
//! - Stop is bounded even when the device read is stuck
//!
//! # Quick Start
//!
//! ```no_run
//! use serial_scale_bridge::{Bridge, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bridge = Bridge::builder().port(8001).build()?;
//!
//!     bridge.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     bridge.stop().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | Lifecycle: [`Bridge`], [`BridgeBuilder`], [`BridgeOptions`] |
//! | [`device`] | [`Device`] trait, [`SerialDevice`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Reading parser and WebSocket message envelope |
//! | [`transport`] | Hub, sessions and HTTP routes |

// ============================================================================
// Modules
// ============================================================================

/// Bridge lifecycle and configuration.
///
/// Use [`Bridge::builder()`] to create a configured bridge.
pub mod bridge;

/// Measurement device access.
pub mod device;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Scale readings and WebSocket message types.
pub mod protocol;

/// WebSocket transport layer.
///
/// Subscriber registry, per-session I/O loops and HTTP routes.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{Bridge, BridgeBuilder, BridgeOptions, BridgeState, BridgeStatus};

// Device types
pub use device::{Device, ScriptedDevice, SerialDevice, SerialOptions};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ClientId;

// Protocol types
pub use protocol::{Message, ScaleDataPayload, ScaleReading};
