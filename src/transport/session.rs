//! Per-subscriber session state and its two I/O loops.
//!
//! Each accepted WebSocket gets one [`ClientSession`] and two tasks:
//!
//! - **write loop**: drains the outbound queue onto the socket and sends a
//!   keepalive Ping on a fixed interval, whatever the outbound traffic
//! - **read loop**: decodes inbound frames, answers `ping` / `sync-to-self`,
//!   enforces the idle read deadline and unregisters the session on exit
//!
//! # Closing
//!
//! ```text
//! hub removes session ──► outbound queue closed ──► write loop sends Close, exits
//! read loop exits     ──► hub.unregister + close_connection ──► write loop exits
//! write loop fails    ──► close_connection ──► read loop exits ──► unregister
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message as WsMessage;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout, timeout_at};
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::identifiers::ClientId;
use crate::protocol::Message;

use super::hub::ConnectionHub;

// ============================================================================
// Constants
// ============================================================================

/// Outbound queue capacity per session.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Idle time after which a silent peer is considered dead.
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(60);

/// Fixed interval between keepalive Pings.
///
/// Pings go out even while messages are flowing; only inbound frames refresh
/// the read deadline. Must stay below [`DEFAULT_READ_DEADLINE`] so the peer's
/// Pong arrives in time.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(54);

/// Maximum time a single frame write may take.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest inbound frame accepted, in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512;

// ============================================================================
// SessionSettings
// ============================================================================

/// Fixed per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Idle read deadline.
    pub read_deadline: Duration,
    /// Keepalive probe interval.
    pub keepalive_interval: Duration,
    /// Per-frame write timeout.
    pub write_timeout: Duration,
    /// Inbound frame size cap.
    pub max_frame_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_deadline: DEFAULT_READ_DEADLINE,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

// ============================================================================
// Enqueue
// ============================================================================

/// Outcome of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// The message is queued.
    Queued,
    /// The queue is at capacity.
    Full,
    /// The queue has been closed.
    Closed,
}

// ============================================================================
// ClientSession
// ============================================================================

/// One live subscriber.
///
/// Membership is owned by the [`ConnectionHub`]; the session's two loops
/// only share the keepalive timestamp.
///
/// # Thread Safety
///
/// `ClientSession` is `Send + Sync` and is shared as `Arc<ClientSession>`.
pub struct ClientSession {
    /// Process-unique identity.
    id: ClientId,
    /// Outbound queue sender. `None` once closed.
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    /// Connection close signal observed by both loops.
    closed: watch::Sender<bool>,
    /// Last inbound frame or keepalive acknowledgment.
    last_keepalive_at: Mutex<Instant>,
}

impl ClientSession {
    /// Creates a session with a fresh identity.
    ///
    /// Returns the session and the receiving end of its outbound queue,
    /// which belongs to the write loop.
    #[must_use]
    pub fn new(queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Message>) {
        Self::with_id(ClientId::generate(), queue_capacity)
    }

    /// Creates a session with a given identity.
    #[must_use]
    pub fn with_id(id: ClientId, queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (closed, _) = watch::channel(false);

        let session = Arc::new(Self {
            id,
            outbound: Mutex::new(Some(tx)),
            closed,
            last_keepalive_at: Mutex::new(Instant::now()),
        });

        (session, rx)
    }

    /// Returns the session identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Attempts a non-blocking enqueue onto the outbound queue.
    pub fn try_enqueue(&self, message: Message) -> Enqueue {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Enqueue::Closed;
        };

        match tx.try_send(message) {
            Ok(()) => Enqueue::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Sends a message to this session only.
    ///
    /// Returns `false` if the message was dropped (queue full or closed).
    pub fn send(&self, message: Message) -> bool {
        let kind = message.kind().to_string();
        match self.try_enqueue(message) {
            Enqueue::Queued => true,
            outcome => {
                warn!(client_id = %self.id, kind = %kind, ?outcome, "Reply dropped");
                false
            }
        }
    }

    /// Closes the outbound queue.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close_outbound(&self) -> bool {
        self.outbound.lock().take().is_some()
    }

    /// Returns `true` once the outbound queue has been closed.
    #[inline]
    #[must_use]
    pub fn is_outbound_closed(&self) -> bool {
        self.outbound.lock().is_none()
    }

    /// Signals both loops to drop the underlying connection.
    pub fn close_connection(&self) {
        self.closed.send_replace(true);
    }

    /// Returns `true` once [`close_connection`](Self::close_connection) was called.
    #[inline]
    #[must_use]
    pub fn is_connection_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Subscribes to the connection close signal.
    #[must_use]
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Records peer activity, pushing the read deadline forward.
    pub fn touch_keepalive(&self) {
        *self.last_keepalive_at.lock() = Instant::now();
    }

    /// Returns the time of the last peer activity.
    #[must_use]
    pub fn last_keepalive_at(&self) -> Instant {
        *self.last_keepalive_at.lock()
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("outbound_closed", &self.is_outbound_closed())
            .field("connection_closed", &self.is_connection_closed())
            .finish()
    }
}

// ============================================================================
// Write Loop
// ============================================================================

/// Resolves once the close signal is set or its sender is gone.
///
/// The `watch::Ref` guard is dropped here so callers stay `Send`.
async fn closed_fired(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// Drains the outbound queue onto the socket, interleaving a Ping every
/// keepalive interval.
///
/// Exits when the queue is closed (after sending a Close frame), when the
/// connection close signal fires, or on the first failed write. Always
/// fires the close signal on exit so the read loop follows.
pub(crate) async fn write_loop<K>(
    session: Arc<ClientSession>,
    mut outbound: mpsc::Receiver<Message>,
    mut sink: K,
    settings: SessionSettings,
) where
    K: Sink<WsMessage> + Unpin,
    K::Error: Display,
{
    let mut closed = session.closed_signal();
    let mut keepalive = interval_at(
        Instant::now() + settings.keepalive_interval,
        settings.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = keepalive.tick() => {
                let ping = timeout(settings.write_timeout, sink.send(WsMessage::Ping(Default::default()))).await;
                if !matches!(ping, Ok(Ok(()))) {
                    debug!(client_id = %session.id(), "Keepalive ping failed");
                    break;
                }
                trace!(client_id = %session.id(), "Keepalive ping sent");
            }

            message = outbound.recv() => {
                let Some(message) = message else {
                    debug!(client_id = %session.id(), "Outbound queue closed");
                    let _ = timeout(settings.write_timeout, sink.send(WsMessage::Close(None))).await;
                    break;
                };

                let text = match message.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(client_id = %session.id(), error = %e, "Failed to encode message");
                        continue;
                    }
                };

                match timeout(settings.write_timeout, sink.send(WsMessage::Text(text.into()))).await {
                    Ok(Ok(())) => {
                        trace!(client_id = %session.id(), kind = message.kind(), "Message sent");
                    }
                    Ok(Err(e)) => {
                        warn!(client_id = %session.id(), error = %e, "Write failed");
                        break;
                    }
                    Err(_) => {
                        warn!(client_id = %session.id(), "Write timed out");
                        break;
                    }
                }
            }

            () = closed_fired(&mut closed) => {
                debug!(client_id = %session.id(), "Connection closed, write loop exiting");
                break;
            }
        }
    }

    session.close_connection();
    debug!(client_id = %session.id(), "Write loop terminated");
}

// ============================================================================
// Read Loop
// ============================================================================

/// Reads frames until the peer goes away, then unregisters the session.
///
/// Each received frame (including Pong) refreshes the idle deadline.
/// Undecodable frames are logged and skipped.
pub(crate) async fn read_loop<S, E>(
    session: Arc<ClientSession>,
    hub: ConnectionHub,
    mut stream: S,
    settings: SessionSettings,
) where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    let mut closed = session.closed_signal();

    loop {
        let deadline = session.last_keepalive_at() + settings.read_deadline;

        let frame = tokio::select! {
            frame = timeout_at(deadline, stream.next()) => frame,
            () = closed_fired(&mut closed) => {
                debug!(client_id = %session.id(), "Connection closed, read loop exiting");
                break;
            }
        };

        let frame = match frame {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!(client_id = %session.id(), error = %e, "Read failed");
                break;
            }
            Ok(None) => {
                debug!(client_id = %session.id(), "Stream ended");
                break;
            }
            Err(_) => {
                info!(client_id = %session.id(), "Read deadline exceeded");
                break;
            }
        };

        session.touch_keepalive();

        match frame {
            WsMessage::Text(text) => match Message::decode(text.as_str()) {
                Ok(message) => dispatch(&session, message),
                Err(e) => {
                    warn!(client_id = %session.id(), error = %e, "Failed to decode message");
                }
            },
            WsMessage::Binary(data) => {
                debug!(client_id = %session.id(), len = data.len(), "Ignoring binary frame");
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => {
                trace!(client_id = %session.id(), "Keepalive frame");
            }
            WsMessage::Close(_) => {
                debug!(client_id = %session.id(), "Close frame received");
                break;
            }
        }
    }

    match hub.unregister(&session).await {
        Ok(_) | Err(Error::HubClosed) => {}
        Err(e) => warn!(client_id = %session.id(), error = %e, "Unregister failed"),
    }
    session.close_connection();

    debug!(client_id = %session.id(), "Read loop terminated");
}

/// Applies one decoded inbound message.
pub(crate) fn dispatch(session: &ClientSession, message: Message) {
    match message {
        Message::Ping(payload) => {
            if session.send(Message::Pong(payload)) {
                debug!(client_id = %session.id(), "Pong queued");
            }
        }

        Message::SyncToSelf(payload) => {
            info!(
                client_id = %session.id(),
                payload = payload.as_deref().map(|p| p.get()),
                "sync-to-self received"
            );
            if session.send(Message::sync_reply()) {
                debug!(client_id = %session.id(), "sync-from-self queued");
            }
        }

        Message::SyncFromSelf(payload) => {
            info!(
                client_id = %session.id(),
                payload = payload.as_deref().map(|p| p.get()),
                "sync-from-self received"
            );
        }

        other => {
            info!(
                client_id = %session.id(),
                kind = other.kind(),
                payload = other.raw_payload().map(|p| p.get()),
                "Unhandled message kind"
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
