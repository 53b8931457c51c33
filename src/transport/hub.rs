//! Subscriber membership and broadcast fan-out.
//!
//! The hub owns the set of live [`ClientSession`]s. All membership changes
//! and broadcasts go through one mailbox consumed by a single event loop
//! task, so they are totally ordered: a broadcast sent after a register is
//! offered to that session, a broadcast sent after an unregister is not.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  Register / Unregister / Broadcast  ┌──────────────┐
//! │ ConnectionHub│ ──────────── mailbox ──────────────►│  event loop  │
//! │   (handle)   │                                     │ (one task)   │
//! └──────┬───────┘                                     └──────┬───────┘
//!        │ count / shutdown                                   │ mutates
//!        ▼                                                    ▼
//!   RwLock<sessions> ◄────────────────────────────────────────┘
//! ```
//!
//! `count` and `shutdown` are called from outside the loop and go straight
//! to the lock.
//!
//! # Backpressure
//!
//! Broadcast never blocks. A session whose outbound queue is full is treated
//! as unresponsive: its queue is closed and it is removed immediately.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, Span, debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::ClientId;
use crate::protocol::Message;

use super::session::{ClientSession, Enqueue};

// ============================================================================
// Types
// ============================================================================

/// Live sessions by identity.
type SessionMap = FxHashMap<ClientId, Arc<ClientSession>>;

// ============================================================================
// HubCommand
// ============================================================================

/// Commands for the event loop.
enum HubCommand {
    /// Add a session to the membership set.
    Register {
        session: Arc<ClientSession>,
        ack: oneshot::Sender<()>,
    },
    /// Remove a session and close its outbound queue.
    Unregister {
        id: ClientId,
        ack: oneshot::Sender<bool>,
    },
    /// Offer a message to every member.
    Broadcast {
        message: Message,
        ack: oneshot::Sender<usize>,
    },
    /// Stop the event loop.
    Shutdown,
}

// ============================================================================
// HubState
// ============================================================================

/// State shared between the handle and the event loop.
struct HubState {
    /// Membership set. Written only by the event loop and `shutdown`.
    sessions: RwLock<SessionMap>,
    /// Set once by `shutdown`, under the write lock.
    closed: AtomicBool,
}

// ============================================================================
// ConnectionHub
// ============================================================================

/// Handle to a running hub.
///
/// Cheap to clone; all clones talk to the same event loop.
///
/// # Example
///
/// ```ignore
/// let hub = ConnectionHub::new(tracing::info_span!("hub"));
/// let (session, outbound) = ClientSession::new(256);
/// hub.register(session).await?;
///
/// let delivered = hub.broadcast(Message::sync_reply()).await?;
/// assert_eq!(delivered, 1);
///
/// hub.shutdown();
/// assert_eq!(hub.count(), 0);
/// ```
#[derive(Clone)]
pub struct ConnectionHub {
    /// Mailbox of the event loop.
    command_tx: mpsc::UnboundedSender<HubCommand>,
    /// Shared membership state.
    state: Arc<HubState>,
}

impl ConnectionHub {
    /// Creates a hub and spawns its event loop.
    ///
    /// The loop runs inside `span`. Must be called within a tokio runtime.
    #[must_use]
    pub fn new(span: Span) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(HubState {
            sessions: RwLock::new(SessionMap::default()),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(Self::run_event_loop(Arc::clone(&state), command_rx).instrument(span));

        Self { command_tx, state }
    }

    /// Adds a session to the membership set.
    ///
    /// Resolves once the event loop has processed the registration. A
    /// session must not be registered twice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HubClosed`] if the hub has been shut down.
    pub async fn register(&self, session: Arc<ClientSession>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.submit(HubCommand::Register { session, ack })?;
        done.await.map_err(|_| Error::HubClosed)
    }

    /// Removes a session if present, closing its outbound queue.
    ///
    /// Returns `true` if the session was a member.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HubClosed`] if the hub has been shut down.
    pub async fn unregister(&self, session: &ClientSession) -> Result<bool> {
        let (ack, done) = oneshot::channel();
        self.submit(HubCommand::Unregister {
            id: session.id().clone(),
            ack,
        })?;
        done.await.map_err(|_| Error::HubClosed)
    }

    /// Offers a message to every current member.
    ///
    /// Returns the number of sessions the message was queued for. Members
    /// with a full queue are dropped instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HubClosed`] if the hub has been shut down.
    pub async fn broadcast(&self, message: Message) -> Result<usize> {
        let (ack, done) = oneshot::channel();
        self.submit(HubCommand::Broadcast { message, ack })?;
        done.await.map_err(|_| Error::HubClosed)
    }

    /// Returns the current membership size.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.state.sessions.read().len()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Shuts the hub down.
    ///
    /// Stops the event loop, closes every member's outbound queue and
    /// connection, and clears membership. Returns the number of sessions
    /// that were closed. Safe to call repeatedly and with no members.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = {
            let mut sessions = self.state.sessions.write();
            self.state.closed.store(true, Ordering::SeqCst);
            sessions.drain().collect()
        };

        let _ = self.command_tx.send(HubCommand::Shutdown);

        let count = drained.len();
        for (id, session) in drained {
            session.close_outbound();
            session.close_connection();
            debug!(client_id = %id, "Session closed during hub shutdown");
        }

        info!(closed = count, "Connection hub shut down");
        count
    }

    /// Sends a command to the event loop.
    fn submit(&self, command: HubCommand) -> Result<()> {
        if self.is_closed() {
            return Err(Error::HubClosed);
        }
        self.command_tx.send(command).map_err(|_| Error::HubClosed)
    }
}

// ============================================================================
// ConnectionHub - Event Loop
// ============================================================================

impl ConnectionHub {
    /// Single consumer of the mailbox; the only writer of membership
    /// besides `shutdown`.
    async fn run_event_loop(state: Arc<HubState>, mut command_rx: mpsc::UnboundedReceiver<HubCommand>) {
        debug!("Hub event loop started");

        while let Some(command) = command_rx.recv().await {
            if state.closed.load(Ordering::SeqCst) {
                break;
            }

            match command {
                HubCommand::Register { session, ack } => {
                    let mut sessions = state.sessions.write();

                    // shutdown may have run between the check above and the lock
                    if state.closed.load(Ordering::SeqCst) {
                        session.close_outbound();
                        session.close_connection();
                        break;
                    }

                    sessions.insert(session.id().clone(), Arc::clone(&session));
                    let total = sessions.len();
                    drop(sessions);

                    info!(client_id = %session.id(), total, "Client connected");
                    let _ = ack.send(());
                }

                HubCommand::Unregister { id, ack } => {
                    let removed = state.sessions.write().remove(&id);
                    let was_member = removed.is_some();

                    if let Some(session) = removed {
                        session.close_outbound();
                        info!(client_id = %id, total = state.sessions.read().len(), "Client disconnected");
                    }

                    let _ = ack.send(was_member);
                }

                HubCommand::Broadcast { message, ack } => {
                    let delivered = Self::fan_out(&state, message);
                    let _ = ack.send(delivered);
                }

                HubCommand::Shutdown => break,
            }
        }

        debug!("Hub event loop terminated");
    }

    /// Offers `message` to every member, dropping the ones that cannot keep up.
    fn fan_out(state: &HubState, message: Message) -> usize {
        let mut sessions = state.sessions.write();
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for (id, session) in sessions.iter() {
            match session.try_enqueue(message.clone()) {
                Enqueue::Queued => delivered += 1,
                Enqueue::Full => {
                    warn!(client_id = %id, kind = message.kind(), "Outbound queue full, dropping client");
                    dropped.push(id.clone());
                }
                Enqueue::Closed => {
                    debug!(client_id = %id, "Outbound queue already closed, dropping client");
                    dropped.push(id.clone());
                }
            }
        }

        for id in dropped {
            if let Some(session) = sessions.remove(&id) {
                session.close_outbound();
            }
        }

        delivered
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tracing::Span;

    fn hub() -> ConnectionHub {
        ConnectionHub::new(Span::none())
    }

    #[tokio::test]
    async fn test_new_hub_is_empty() {
        let hub = hub();
        assert_eq!(hub.count(), 0);
        assert!(!hub.is_closed());
    }

    #[tokio::test]
    async fn test_concurrent_register_then_partial_unregister() {
        let hub = hub();
        let mut tasks = Vec::new();
        let mut sessions = Vec::new();

        for _ in 0..64 {
            let (session, rx) = ClientSession::new(8);
            sessions.push((Arc::clone(&session), rx));
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move { hub.register(session).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(hub.count(), 64);

        let mut tasks = Vec::new();
        for (session, _) in sessions.iter().step_by(3) {
            let hub = hub.clone();
            let session = Arc::clone(session);
            tasks.push(tokio::spawn(async move { hub.unregister(&session).await }));
        }
        let removed = tasks.len();
        for task in tasks {
            assert!(task.await.unwrap().unwrap());
        }

        assert_eq!(hub.count(), 64 - removed);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = hub();
        let (session, mut rx) = ClientSession::new(4);
        hub.register(Arc::clone(&session)).await.unwrap();

        assert!(hub.unregister(&session).await.unwrap());
        assert!(!hub.unregister(&session).await.unwrap());
        assert!(session.is_outbound_closed());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_members() {
        let hub = hub();
        let (a, mut rx_a) = ClientSession::new(4);
        let (b, mut rx_b) = ClientSession::new(4);
        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();

        assert_eq!(hub.broadcast(Message::sync_reply()).await.unwrap(), 2);
        assert_eq!(rx_a.recv().await.unwrap().kind(), "sync-from-self");
        assert_eq!(rx_b.recv().await.unwrap().kind(), "sync-from-self");
    }

    #[tokio::test]
    async fn test_broadcast_after_unregister_not_offered() {
        let hub = hub();
        let (a, mut rx_a) = ClientSession::new(4);
        let (b, mut rx_b) = ClientSession::new(4);
        hub.register(Arc::clone(&a)).await.unwrap();
        hub.register(b).await.unwrap();

        hub.unregister(&a).await.unwrap();
        assert_eq!(hub.broadcast(Message::sync_reply()).await.unwrap(), 1);

        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_slow_consumer_is_dropped() {
        let hub = hub();
        let (slow, mut slow_rx) = ClientSession::new(1);
        let (fast, mut fast_rx) = ClientSession::new(16);
        hub.register(Arc::clone(&slow)).await.unwrap();
        hub.register(fast).await.unwrap();

        assert_eq!(hub.broadcast(Message::sync_reply()).await.unwrap(), 2);
        // slow never drains: its single slot is taken
        assert_eq!(hub.broadcast(Message::sync_reply()).await.unwrap(), 1);
        assert_eq!(hub.count(), 1);
        assert!(slow.is_outbound_closed());

        assert_eq!(hub.broadcast(Message::sync_reply()).await.unwrap(), 1);

        // the message queued before the drop is still readable, then closed
        assert!(slow_rx.recv().await.is_some());
        assert!(slow_rx.recv().await.is_none());

        for _ in 0..3 {
            assert!(fast_rx.recv().await.is_some());
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let hub = hub();
        let mut receivers = Vec::new();
        let mut sessions = Vec::new();
        for _ in 0..3 {
            let (session, rx) = ClientSession::new(4);
            hub.register(Arc::clone(&session)).await.unwrap();
            sessions.push(session);
            receivers.push(rx);
        }

        assert_eq!(hub.shutdown(), 3);
        assert_eq!(hub.count(), 0);
        assert!(hub.is_closed());

        for session in &sessions {
            assert!(session.is_outbound_closed());
            assert!(session.is_connection_closed());
        }
        for rx in &mut receivers {
            assert!(rx.recv().await.is_none());
        }
    }

    #[tokio::test]
    async fn test_shutdown_empty_and_repeated() {
        let hub = hub();
        assert_eq!(hub.shutdown(), 0);
        assert_eq!(hub.shutdown(), 0);
        assert_eq!(hub.count(), 0);
    }

    #[tokio::test]
    async fn test_operations_after_shutdown_fail() {
        let hub = hub();
        hub.shutdown();

        let (session, _rx) = ClientSession::new(4);
        assert!(matches!(
            hub.register(Arc::clone(&session)).await,
            Err(Error::HubClosed)
        ));
        assert!(matches!(
            hub.broadcast(Message::sync_reply()).await,
            Err(Error::HubClosed)
        ));
        assert!(matches!(hub.unregister(&session).await, Err(Error::HubClosed)));
        assert_eq!(hub.count(), 0);
    }
}
