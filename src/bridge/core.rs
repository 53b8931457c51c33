//! Bridge orchestrator.
//!
//! The [`Bridge`] owns the device and, while running, one hub, one HTTP
//! server and one polling task. Every start creates all three afresh;
//! every stop tears all three down.
//!
//! # Start
//!
//! 1. Create the hub and bind the HTTP listener
//! 2. Serve `/ws` and `/health` against that hub
//! 3. Connect the device (failure unwinds steps 1 and 2)
//! 4. Spawn the polling loop
//!
//! # Stop
//!
//! 1. Signal the polling loop and wait for it, bounded
//! 2. Shut the hub down, closing every session
//! 3. Drain the HTTP server, bounded
//! 4. Release the device, bounded

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{Instrument, Span, debug, error, info, info_span, trace, warn};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::protocol::{Message, ScaleDataPayload, ScaleReading};
use crate::transport::{ConnectionHub, PendingServer, RunningServer};

use super::builder::BridgeBuilder;
use super::options::BridgeOptions;

// ============================================================================
// Types
// ============================================================================

/// Device shared with blocking worker threads.
type SharedDevice = Arc<Mutex<Box<dyn Device>>>;

/// Lifecycle phase of a bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    /// Nothing running.
    #[default]
    Stopped,
    /// Start in progress.
    Starting,
    /// Serving and polling.
    Running,
    /// Stop in progress.
    Stopping,
}

/// Point-in-time view of a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStatus {
    /// Lifecycle phase.
    pub state: BridgeState,
    /// `true` only in [`BridgeState::Running`].
    pub running: bool,
    /// Whether the device is open.
    pub device_connected: bool,
    /// Current subscriber count.
    pub session_count: usize,
    /// Device port of the current run.
    pub device_name: Option<String>,
    /// Listen address of the current run.
    pub listen_addr: Option<SocketAddr>,
}

/// Snapshot read by [`Bridge::status`] without touching the device.
#[derive(Default)]
struct Snapshot {
    state: BridgeState,
    hub: Option<ConnectionHub>,
    device_connected: bool,
    device_name: Option<String>,
    listen_addr: Option<SocketAddr>,
}

/// Components of one run.
struct ActiveRun {
    hub: ConnectionHub,
    server: RunningServer,
    stop_tx: oneshot::Sender<()>,
    poll_task: JoinHandle<()>,
}

impl ActiveRun {
    /// Tears the run down without waiting.
    fn abort(self) {
        let _ = self.stop_tx.send(());
        self.poll_task.abort();
        self.hub.shutdown();
        self.server.abort();
    }
}

/// State guarded by the async lifecycle lock.
#[derive(Default)]
struct Lifecycle {
    /// Current run, if any.
    active: Option<ActiveRun>,
    /// Device release still running from the previous stop.
    release: Option<JoinHandle<Result<()>>>,
}

/// Internal shared state for the bridge.
pub(crate) struct BridgeInner {
    options: BridgeOptions,
    device: SharedDevice,
    span: Span,
    /// Serializes start and stop.
    lifecycle: AsyncMutex<Lifecycle>,
    snapshot: RwLock<Snapshot>,
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        if let Some(active) = self.lifecycle.get_mut().active.take() {
            warn!(parent: &self.span, "Bridge dropped while running, aborting");
            active.abort();
        }
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// Serial scale to WebSocket bridge.
///
/// Cloning is cheap; clones control the same bridge.
///
/// # Example
///
/// ```no_run
/// use serial_scale_bridge::Bridge;
///
/// # async fn example() -> serial_scale_bridge::Result<()> {
/// let bridge = Bridge::builder().port(8001).build()?;
///
/// bridge.start().await?;
/// println!("{:?}", bridge.status());
/// bridge.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Bridge {
    pub(crate) inner: Arc<BridgeInner>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Bridge - Public API
// ============================================================================

impl Bridge {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Creates a stopped bridge.
    ///
    /// Options are not validated here; [`BridgeBuilder::build`] does that.
    #[must_use]
    pub fn new(options: BridgeOptions, device: Box<dyn Device>, span: Span) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                options,
                device: Arc::new(Mutex::new(device)),
                span,
                lifecycle: AsyncMutex::new(Lifecycle::default()),
                snapshot: RwLock::new(Snapshot::default()),
            }),
        }
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    /// Starts serving and polling.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if a run is active
    /// - [`Error::Io`] if the listener cannot bind
    /// - Device errors from connecting; the run is unwound first
    pub async fn start(&self) -> Result<()> {
        self.start_inner().instrument(self.inner.span.clone()).await
    }

    /// Stops polling, closes every session and releases the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] if no run is active.
    pub async fn stop(&self) -> Result<()> {
        self.stop_inner().instrument(self.inner.span.clone()).await
    }

    /// Returns a status snapshot. Never blocks on the device.
    #[must_use]
    pub fn status(&self) -> BridgeStatus {
        let snapshot = self.inner.snapshot.read();
        BridgeStatus {
            state: snapshot.state,
            running: snapshot.state == BridgeState::Running,
            device_connected: snapshot.device_connected,
            session_count: snapshot.hub.as_ref().map_or(0, ConnectionHub::count),
            device_name: snapshot.device_name.clone(),
            listen_addr: snapshot.listen_addr,
        }
    }

    /// Returns `true` while running.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.snapshot.read().state == BridgeState::Running
    }

    /// Returns the hub of the current run.
    #[must_use]
    pub fn hub(&self) -> Option<ConnectionHub> {
        self.inner.snapshot.read().hub.clone()
    }

    /// Returns the listen address of the current run.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.snapshot.read().listen_addr
    }
}

// ============================================================================
// Bridge - Lifecycle
// ============================================================================

impl Bridge {
    async fn start_inner(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        if lifecycle.active.is_some() {
            warn!("Start requested while already running");
            return Err(Error::AlreadyRunning);
        }

        if let Some(release) = lifecycle.release.take() {
            debug!("Waiting for previous device release");
            let _ = release.await;
        }

        self.set_state(BridgeState::Starting);

        match self.launch().await {
            Ok((active, device_name)) => {
                let listen_addr = active.server.local_addr();
                {
                    let mut snapshot = self.inner.snapshot.write();
                    snapshot.state = BridgeState::Running;
                    snapshot.hub = Some(active.hub.clone());
                    snapshot.device_connected = true;
                    snapshot.device_name = Some(device_name.clone());
                    snapshot.listen_addr = Some(listen_addr);
                }
                lifecycle.active = Some(active);

                info!(%listen_addr, device = %device_name, "Bridge started");
                Ok(())
            }
            Err(e) => {
                *self.inner.snapshot.write() = Snapshot::default();
                error!(error = %e, "Bridge failed to start");
                Err(e)
            }
        }
    }

    /// Creates and wires the components of one run.
    async fn launch(&self) -> Result<(ActiveRun, String)> {
        let options = &self.inner.options;
        let span = &self.inner.span;

        let hub = ConnectionHub::new(info_span!(parent: span, "hub"));

        let pending = match PendingServer::bind(options.server.bind_addr).await {
            Ok(pending) => pending,
            Err(e) => {
                hub.shutdown();
                return Err(e);
            }
        };
        let server = pending.serve(
            hub.clone(),
            options.server.session,
            info_span!(parent: span, "http"),
        );
        info!(
            ws = %server.ws_url(),
            health = %format!("http://{}/health", server.local_addr()),
            "Listening for subscribers"
        );

        let device_name = match self.connect_device().await {
            Ok(name) => name,
            Err(e) => {
                hub.shutdown();
                server.shutdown(options.server.drain_timeout).await;
                return Err(e);
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let poll_task = tokio::spawn(
            run_poll_loop(
                Arc::clone(&self.inner.device),
                hub.clone(),
                stop_rx,
                options.polling.interval,
            )
            .instrument(info_span!(parent: span, "poll")),
        );

        let active = ActiveRun {
            hub,
            server,
            stop_tx,
            poll_task,
        };
        Ok((active, device_name))
    }

    /// Opens the device on a blocking thread and returns its name.
    async fn connect_device(&self) -> Result<String> {
        let device = Arc::clone(&self.inner.device);
        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut device = device.lock();
            device.connect()?;
            Ok(device.name().to_string())
        })
        .await?
    }

    async fn stop_inner(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let Some(active) = lifecycle.active.take() else {
            warn!("Stop requested while not running");
            return Err(Error::NotRunning);
        };

        self.set_state(BridgeState::Stopping);
        info!("Stopping bridge");

        let options = &self.inner.options;
        let ActiveRun {
            hub,
            server,
            stop_tx,
            mut poll_task,
        } = active;

        let _ = stop_tx.send(());
        match timeout(options.polling.stop_timeout, &mut poll_task).await {
            Ok(Ok(())) => debug!("Polling loop exited"),
            Ok(Err(e)) => error!(error = %e, "Polling loop task failed"),
            Err(_) => {
                warn!(
                    timeout_ms = options.polling.stop_timeout.as_millis() as u64,
                    "Timeout waiting for polling loop, aborting"
                );
                poll_task.abort();
            }
        }

        let closed = hub.shutdown();
        debug!(closed, "Sessions closed");

        server.shutdown(options.server.drain_timeout).await;

        lifecycle.release = self.release_device(options.polling.stop_timeout).await;

        *self.inner.snapshot.write() = Snapshot::default();
        info!("Bridge stopped");
        Ok(())
    }

    /// Disconnects the device, waiting at most `limit`.
    ///
    /// Returns the release task if it is still running.
    async fn release_device(&self, limit: Duration) -> Option<JoinHandle<Result<()>>> {
        let device = Arc::clone(&self.inner.device);
        let mut release = tokio::task::spawn_blocking(move || device.lock().disconnect());

        match timeout(limit, &mut release).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "Device release failed");
                None
            }
            Ok(Err(e)) => {
                error!(error = %e, "Device release task failed");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "Device release still blocked, continuing"
                );
                Some(release)
            }
        }
    }

    fn set_state(&self, state: BridgeState) {
        self.inner.snapshot.write().state = state;
    }
}

// ============================================================================
// Polling Loop
// ============================================================================

/// Result of one device poll.
enum DevicePoll {
    /// Device closed; nothing to read.
    NotConnected,
    /// Read timed out with no complete line.
    Idle,
    /// One trimmed line.
    Line { line: String, device_name: String },
}

/// Reads one line if the device is open. Runs on a blocking thread.
fn poll_device(device: &Mutex<Box<dyn Device>>) -> Result<DevicePoll> {
    let mut device = device.lock();
    if !device.is_connected() {
        return Ok(DevicePoll::NotConnected);
    }

    Ok(match device.read_line()? {
        Some(line) => DevicePoll::Line {
            line,
            device_name: device.name().to_string(),
        },
        None => DevicePoll::Idle,
    })
}

/// Reads, parses and broadcasts until stopped.
async fn run_poll_loop(
    device: SharedDevice,
    hub: ConnectionHub,
    mut stop_rx: oneshot::Receiver<()>,
    poll_interval: Duration,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(interval_ms = poll_interval.as_millis() as u64, "Polling loop started");

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {}
        }

        let device = Arc::clone(&device);
        let read = tokio::task::spawn_blocking(move || poll_device(&device));

        let polled = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            polled = read => polled,
        };

        match polled {
            Ok(Ok(DevicePoll::Line { line, device_name })) => {
                publish(&hub, &line, &device_name).await;
            }
            Ok(Ok(DevicePoll::Idle)) => {}
            Ok(Ok(DevicePoll::NotConnected)) => trace!("Device not connected, skipping tick"),
            Ok(Err(e @ Error::InvalidReading { .. })) => warn!(error = %e, "Dropping device line"),
            Ok(Err(e)) => debug!(error = %e, "Device read failed"),
            Err(e) => error!(error = %e, "Device read task failed"),
        }
    }

    info!("Stop signal received, polling loop exiting");
}

/// Parses one line and broadcasts it to every subscriber.
async fn publish(hub: &ConnectionHub, line: &str, device_name: &str) {
    let reading = match ScaleReading::parse(line) {
        Ok(reading) => reading,
        Err(e) => {
            warn!(error = %e, "Dropping unparseable line");
            return;
        }
    };

    let (value, unit) = (reading.value, reading.unit.clone());
    let message = Message::scale_data(ScaleDataPayload::now(reading, line, device_name));

    match hub.broadcast(message).await {
        Ok(recipients) => info!(value, unit = %unit, recipients, "Broadcast scale reading"),
        Err(e) => debug!(error = %e, "Broadcast skipped"),
    }
}

// ============================================================================
// Tests
// ============================================================================
