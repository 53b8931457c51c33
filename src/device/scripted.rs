//! In-memory device.
//!
//! [`ScriptedDevice`] serves lines pushed through a [`ScriptedFeed`]. It
//! stands in for a scale when none is attached.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};

use super::Device;

// ============================================================================
// ScriptedFeed
// ============================================================================

/// Shared state between a device and its feed handles.
#[derive(Debug, Default)]
struct FeedState {
    /// Lines waiting to be read.
    lines: Mutex<VecDeque<String>>,
    /// Fail the next connect attempts.
    refuse_connect: AtomicBool,
    /// Successful connect count.
    connects: AtomicUsize,
    /// Disconnect calls that released an open device.
    disconnects: AtomicUsize,
}

/// Handle for feeding lines into a [`ScriptedDevice`].
#[derive(Debug, Clone)]
pub struct ScriptedFeed {
    state: Arc<FeedState>,
}

impl ScriptedFeed {
    /// Queues one raw line.
    pub fn push(&self, line: impl Into<String>) {
        self.state.lines.lock().push_back(line.into());
    }

    /// Returns the number of lines not yet read.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lines.lock().len()
    }

    /// Makes connect attempts fail while `refuse` is set.
    pub fn refuse_connect(&self, refuse: bool) {
        self.state.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Returns how many times the device was connected.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Returns how many times an open device was released.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }
}

// ============================================================================
// ScriptedDevice
// ============================================================================

/// A device that reads lines from an in-memory queue.
///
/// # Example
///
/// ```
/// use serial_scale_bridge::device::{Device, ScriptedDevice};
///
/// let (mut device, feed) = ScriptedDevice::new("scripted0");
/// feed.push("WTST  1.50 kg\r\n");
///
/// device.connect().unwrap();
/// assert_eq!(device.read_line().unwrap().as_deref(), Some("WTST  1.50 kg"));
/// assert_eq!(device.read_line().unwrap(), None);
/// ```
#[derive(Debug)]
pub struct ScriptedDevice {
    name: String,
    connected: bool,
    state: Arc<FeedState>,
}

impl ScriptedDevice {
    /// Creates a disconnected device and its feed handle.
    #[must_use]
    pub fn new(name: impl Into<String>) -> (Self, ScriptedFeed) {
        let state = Arc::new(FeedState::default());
        let device = Self {
            name: name.into(),
            connected: false,
            state: Arc::clone(&state),
        };
        (device, ScriptedFeed { state })
    }
}

impl Device for ScriptedDevice {
    fn connect(&mut self) -> Result<()> {
        if self.state.refuse_connect.load(Ordering::SeqCst) {
            return Err(Error::device_open(&self.name, "connect refused"));
        }
        if !self.connected {
            self.connected = true;
            self.state.connects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        if !self.connected {
            return Err(Error::DeviceNotConnected);
        }

        let mut lines = self.state.lines.lock();
        while let Some(line) = lines.pop_front() {
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
        Ok(None)
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            self.connected = false;
            self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Tests
// ============================================================================
