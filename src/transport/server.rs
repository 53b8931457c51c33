//! HTTP front end: WebSocket upgrade and status endpoints.
//!
//! # Endpoints
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET /ws?token=<bearer>` | Upgrade to a subscriber session |
//! | `GET /health` | `{"status":"ok","connected_clients":<n>}` |
//!
//! # Lifecycle
//!
//! 1. `PendingServer::bind` - Bind the listener (port 0 for a random port)
//! 2. `PendingServer::serve` - Start serving against one hub
//! 3. `RunningServer::shutdown` - Graceful drain with a bounded wait

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::error::Result;

use super::hub::ConnectionHub;
use super::session::{ClientSession, SessionSettings, read_loop, write_loop};

// ============================================================================
// Constants
// ============================================================================

/// Path of the upgrade endpoint.
pub const WS_PATH: &str = "/ws";

/// Path of the status endpoint.
pub const HEALTH_PATH: &str = "/health";

// ============================================================================
// Types
// ============================================================================

/// State shared by the route handlers of one run.
#[derive(Clone)]
struct ServerState {
    hub: ConnectionHub,
    settings: SessionSettings,
    span: Span,
}

/// Query string of the upgrade endpoint.
#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    token: Option<String>,
}

/// Body of the status endpoint.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    connected_clients: usize,
}

// ============================================================================
// Router
// ============================================================================

/// Builds the router for one run, bound to `hub`.
pub fn router(hub: ConnectionHub, settings: SessionSettings, span: Span) -> Router {
    let state = ServerState {
        hub,
        settings,
        span,
    };

    Router::new()
        .route(WS_PATH, get(ws_handler))
        .route(HEALTH_PATH, get(health_handler))
        .with_state(state)
}

/// Returns `true` if the bearer token is acceptable.
///
/// Any non-empty token passes. This is a placeholder policy, not
/// authentication.
// TODO: verify tokens against a real issuer once one exists for subscribers.
#[inline]
#[must_use]
pub fn bearer_accepted(token: Option<&str>) -> bool {
    token.is_some_and(|token| !token.is_empty())
}

/// GET /health
async fn health_handler(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connected_clients: state.hub.count(),
    })
}

/// GET /ws
async fn ws_handler(
    State(state): State<ServerState>,
    Query(params): Query<ConnectParams>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !bearer_accepted(params.token.as_deref()) {
        debug!("Upgrade rejected: missing bearer token");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(error = %rejection, "Upgrade rejected");
            return rejection.into_response();
        }
    };

    let max = state.settings.max_frame_size;
    upgrade
        .max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| run_session(socket, state))
}

/// Runs one subscriber from registration to disconnect.
async fn run_session(socket: WebSocket, state: ServerState) {
    let (session, outbound) = ClientSession::new(state.settings.queue_capacity);
    let span = info_span!(parent: &state.span, "session", client_id = %session.id());

    async move {
        if let Err(e) = state.hub.register(Arc::clone(&session)).await {
            debug!(error = %e, "Dropping connection");
            return;
        }

        let (sink, stream) = socket.split();
        let writer = tokio::spawn(
            write_loop(Arc::clone(&session), outbound, sink, state.settings).in_current_span(),
        );

        read_loop(session, state.hub.clone(), stream, state.settings).await;

        if let Err(e) = writer.await {
            warn!(error = %e, "Write loop task failed");
        }
    }
    .instrument(span)
    .await;
}

// ============================================================================
// PendingServer
// ============================================================================

/// A listener that is bound but not yet serving.
///
/// # Example
///
/// ```ignore
/// let server = PendingServer::bind("127.0.0.1:0".parse()?).await?;
/// println!("{}", server.ws_url());
///
/// let running = server.serve(hub, SessionSettings::default(), Span::current());
/// // ...
/// running.shutdown(Duration::from_secs(5)).await;
/// ```
pub struct PendingServer {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Address the listener is bound to.
    local_addr: SocketAddr,
}

impl PendingServer {
    /// Binds the listener.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, "HTTP server bound");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the WebSocket URL (without token) for this server.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        ws_url(self.local_addr)
    }

    /// Starts serving on a background task.
    #[must_use]
    pub fn serve(self, hub: ConnectionHub, settings: SessionSettings, span: Span) -> RunningServer {
        let app = router(hub, settings, span.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let local_addr = self.local_addr;

        let task = tokio::spawn(
            async move {
                info!(%local_addr, "HTTP server listening");
                let result = axum::serve(self.listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.await;
                    })
                    .await;
                debug!("HTTP server task stopped");
                result
            }
            .instrument(span),
        );

        RunningServer {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }
}

// ============================================================================
// RunningServer
// ============================================================================

/// A server serving on a background task.
pub struct RunningServer {
    /// Address the listener is bound to.
    local_addr: SocketAddr,
    /// Triggers graceful shutdown.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// The serve task.
    task: JoinHandle<io::Result<()>>,
}

impl RunningServer {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the WebSocket URL (without token) for this server.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        ws_url(self.local_addr)
    }

    /// Stops accepting connections and waits up to `drain_timeout` for
    /// in-flight requests.
    ///
    /// Returns `true` if the server drained in time. On timeout the serve
    /// task is aborted.
    pub async fn shutdown(mut self, drain_timeout: Duration) -> bool {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        match timeout(drain_timeout, &mut self.task).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                error!(error = %e, "HTTP server failed");
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "HTTP server task failed");
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = drain_timeout.as_millis() as u64,
                    "HTTP server did not drain in time, aborting"
                );
                self.task.abort();
                false
            }
        }
    }

    /// Stops serving immediately without draining.
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Formats the upgrade URL for a bound address.
fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}{WS_PATH}")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn localhost() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    fn app(hub: &ConnectionHub) -> Router {
        router(hub.clone(), SessionSettings::default(), Span::none())
    }

    #[test]
    fn test_bearer_accepted() {
        assert!(bearer_accepted(Some("abc")));
        assert!(!bearer_accepted(Some("")));
        assert!(!bearer_accepted(None));
    }

    #[tokio::test]
    async fn test_server_bind_random_port() {
        let server = PendingServer::bind(localhost()).await.expect("bind should succeed");
        assert!(server.local_addr().port() > 0);
        assert_eq!(
            server.ws_url(),
            format!("ws://127.0.0.1:{}/ws", server.local_addr().port())
        );
    }

    #[tokio::test]
    async fn test_health_body() {
        let hub = ConnectionHub::new(Span::none());
        let (session, _rx) = ClientSession::new(4);
        hub.register(session).await.unwrap();

        let req = Request::builder().uri(HEALTH_PATH).body(Body::empty()).unwrap();
        let resp = app(&hub).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"status":"ok","connected_clients":1}"#);
    }

    #[tokio::test]
    async fn test_ws_without_token_unauthorized() {
        let hub = ConnectionHub::new(Span::none());

        for uri in ["/ws", "/ws?token=", "/ws?other=1"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = app(&hub).oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "uri {uri}");
        }
    }

    #[tokio::test]
    async fn test_ws_with_token_but_no_upgrade_is_not_unauthorized() {
        let hub = ConnectionHub::new(Span::none());
        let req = Request::builder().uri("/ws?token=abc").body(Body::empty()).unwrap();
        let resp = app(&hub).oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let hub = ConnectionHub::new(Span::none());
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = app(&hub).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let hub = ConnectionHub::new(Span::none());
        let server = PendingServer::bind(localhost()).await.unwrap();
        let running = server.serve(hub, SessionSettings::default(), Span::none());
        assert!(running.local_addr().port() > 0);
        assert!(running.shutdown(Duration::from_secs(5)).await);
    }
}
