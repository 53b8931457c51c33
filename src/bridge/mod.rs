//! Bridge lifecycle and configuration.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bridge`] | Start/stop/status of one bridge |
//! | [`BridgeBuilder`] | Fluent configuration builder |
//! | [`BridgeOptions`] | Serializable configuration tree |
//! | [`BridgeStatus`] | Status snapshot |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for bridge configuration.
pub mod builder;

/// Bridge orchestrator and polling loop.
pub mod core;

/// Configuration types and defaults.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::BridgeBuilder;
pub use core::{Bridge, BridgeState, BridgeStatus};
pub use options::{BridgeOptions, PollingOptions, ServerOptions};
