//! WebSocket protocol message types.
//!
//! Every frame in either direction is a JSON text message carrying an
//! envelope `{ "type": string, "payload"?: any }`.
//!
//! # Protocol Overview
//!
//! | Type | Direction | Effect |
//! |------|-----------|--------|
//! | `scale_data` | Bridge → Client | Device reading broadcast |
//! | `ping` | Client → Bridge | Answered with `pong`, same payload, sender only |
//! | `pong` | Bridge → Client | Reply to `ping` |
//! | `sync-to-self` | Client → Bridge | Answered with `sync-from-self` / `"pong"` |
//! | `sync-from-self` | Both | Informational, no response |
//! | anything else | Client → Bridge | Logged, no response |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | The envelope and its kinds |
//! | `reading` | Device line parsing and the `scale_data` payload |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope type and kind constants.
pub mod message;

/// Scale readings and their broadcast payload.
pub mod reading;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{Message, RawPayload};
pub use reading::{ScaleDataPayload, ScaleReading};
