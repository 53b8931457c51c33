//! WebSocket transport layer.
//!
//! This module fans scale readings out to browser subscribers and answers
//! their keepalive and sync messages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  broadcast   ┌───────────────┐  queue   ┌────────────────┐
//! │  Poll loop   │─────────────►│ ConnectionHub │─────────►│ ClientSession  │
//! │  (bridge)    │              │  (event loop) │          │  write loop ──►│ WebSocket
//! └──────────────┘              └───────────────┘          │  read loop  ◄──│
//!                                  ▲ register/unregister   └────────────────┘
//!                                  │
//!                               HTTP /ws upgrade (server)
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `PendingServer::bind` - Bind the HTTP listener
//! 2. `GET /ws?token=...` - Upgrade and register a `ClientSession`
//! 3. Write loop drains the session queue and sends keepalive pings
//! 4. Read loop answers `ping` and `sync-to-self` until disconnect
//! 5. `ConnectionHub::shutdown` - Close every session at once
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `hub` | Session registry and broadcast event loop |
//! | `server` | HTTP routes and server lifecycle |
//! | `session` | Per-subscriber queue and I/O loops |

// ============================================================================
// Submodules
// ============================================================================

/// Session registry and broadcast event loop.
pub mod hub;

/// HTTP routes for upgrade and health.
pub mod server;

/// Per-subscriber session state and I/O loops.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use hub::ConnectionHub;
pub use server::{PendingServer, RunningServer, bearer_accepted, router};
pub use session::{ClientSession, Enqueue, SessionSettings};
