//! USB serial scale.
//!
//! The scale is found by enumerating serial ports and matching a fixed USB
//! vendor/product pair (Prolific PL2303 by default). The first match wins;
//! additional matches are logged and ignored.
//!
//! Lines are framed on `\n`. Bytes of a line that is cut by a read timeout
//! stay buffered and are completed by the next read. A line longer than
//! [`MAX_LINE_LEN`] bytes is dropped.

// ============================================================================
// Imports
// ============================================================================

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortType};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::Device;

// ============================================================================
// Constants
// ============================================================================

/// Prolific Technology vendor ID.
pub const DEFAULT_VENDOR_ID: u16 = 0x067B;

/// PL2303 serial adapter product ID.
pub const DEFAULT_PRODUCT_ID: u16 = 0x2303;

/// Default line speed.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest accepted line, terminator included. Longer runs are discarded.
pub const MAX_LINE_LEN: usize = 4096;

// ============================================================================
// Framing Options
// ============================================================================

/// Parity checking mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One,
    /// Two stop bits.
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(stop_bits: StopBits) -> Self {
        match stop_bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

/// Maps a word size to the serialport type.
fn data_bits(bits: u8) -> Result<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(Error::config(format!("data bits must be 5..=8, got {other}"))),
    }
}

// ============================================================================
// SerialOptions
// ============================================================================

/// Serial port discovery and framing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialOptions {
    /// Explicit port path. Skips USB discovery when set.
    pub port_path: Option<String>,
    /// USB vendor ID to match.
    pub vendor_id: u16,
    /// USB product ID to match.
    pub product_id: u16,
    /// Line speed.
    pub baud_rate: u32,
    /// Word size, 5 to 8.
    pub data_bits: u8,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Upper bound for one blocking read.
    pub read_timeout: Duration,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            port_path: None,
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl SerialOptions {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid word size, zero baud rate
    /// or zero read timeout.
    pub fn validate(&self) -> Result<()> {
        data_bits(self.data_bits)?;

        if self.baud_rate == 0 {
            return Err(Error::config("baud rate must be positive"));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::config("serial read timeout must be positive"));
        }

        Ok(())
    }
}

// ============================================================================
// SerialDevice
// ============================================================================

/// A scale attached over a USB serial adapter.
pub struct SerialDevice {
    /// Discovery and framing configuration.
    options: SerialOptions,
    /// Port path of the last successful discovery.
    port_name: String,
    /// Buffered reader over the open port.
    reader: Option<BufReader<Box<dyn SerialPort>>>,
    /// Line buffer carried across reads.
    framer: LineFramer,
}

impl SerialDevice {
    /// Creates a disconnected device.
    #[must_use]
    pub fn new(options: SerialOptions) -> Self {
        let port_name = options.port_path.clone().unwrap_or_default();
        Self {
            options,
            port_name,
            reader: None,
            framer: LineFramer::default(),
        }
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &SerialOptions {
        &self.options
    }

    /// Finds the port path of the configured device.
    fn discover(&self) -> Result<String> {
        if let Some(path) = &self.options.port_path {
            return Ok(path.clone());
        }

        let ports = serialport::available_ports()?;
        let mut matches = ports.into_iter().filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb)
                if usb.vid == self.options.vendor_id && usb.pid == self.options.product_id =>
            {
                Some(port.port_name)
            }
            _ => None,
        });

        let first = matches.next().ok_or_else(|| {
            Error::device_not_found(self.options.vendor_id, self.options.product_id)
        })?;

        let ignored = matches.count();
        if ignored > 0 {
            warn!(port = %first, ignored, "Multiple matching serial devices, using first");
        }

        Ok(first)
    }
}

impl Device for SerialDevice {
    fn connect(&mut self) -> Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }

        let port_name = self.discover()?;
        let port = serialport::new(&port_name, self.options.baud_rate)
            .data_bits(data_bits(self.options.data_bits)?)
            .parity(self.options.parity.into())
            .stop_bits(self.options.stop_bits.into())
            .timeout(self.options.read_timeout)
            .open()
            .map_err(|e| Error::device_open(&port_name, e.to_string()))?;

        self.reader = Some(BufReader::new(port));
        self.framer.clear();
        self.port_name = port_name;

        info!(port = %self.port_name, baud = self.options.baud_rate, "Connected to serial device");
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let reader = self.reader.as_mut().ok_or(Error::DeviceNotConnected)?;
        self.framer.read_line(reader)
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.reader.take().is_some() {
            self.framer.clear();
            info!(port = %self.port_name, "Disconnected from serial device");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

// ============================================================================
// Line Framing
// ============================================================================

/// Splits a byte stream into `\n`-terminated lines across reads.
///
/// Bytes of an unfinished line are kept until the next read. A run of
/// [`MAX_LINE_LEN`] bytes without a terminator is discarded together with
/// everything up to the next `\n`.
#[derive(Debug, Default)]
pub(crate) struct LineFramer {
    /// Bytes of a line not yet terminated.
    pending: Vec<u8>,
    /// Skipping the tail of an oversized line.
    discarding: bool,
}

impl LineFramer {
    /// Drops buffered bytes.
    pub(crate) fn clear(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    /// Reads up to the next `\n`.
    ///
    /// Returns `Ok(None)` on timeout, end of stream, or a blank line.
    pub(crate) fn read_line<R: BufRead>(&mut self, reader: &mut R) -> Result<Option<String>> {
        let room = MAX_LINE_LEN.saturating_sub(self.pending.len()) as u64;
        let read = reader.by_ref().take(room).read_until(b'\n', &mut self.pending);
        let terminated = self.pending.last() == Some(&b'\n');

        if !terminated && self.pending.len() >= MAX_LINE_LEN {
            let dropped = self.pending.len();
            self.pending.clear();
            if !self.discarding {
                self.discarding = true;
                warn!(dropped, "Discarding unterminated device input");
                return Err(Error::invalid_reading(
                    "",
                    format!("no line terminator within {MAX_LINE_LEN} bytes"),
                ));
            }
            return Ok(None);
        }

        match read {
            Ok(_) if terminated => {
                let raw = std::mem::take(&mut self.pending);
                if std::mem::take(&mut self.discarding) {
                    debug!(dropped = raw.len(), "Dropped tail of oversized line");
                    return Ok(None);
                }
                decode_line(raw)
            }
            // end of stream with a partial line; keep it for the next read
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Decodes and trims one terminated line.
fn decode_line(raw: Vec<u8>) -> Result<Option<String>> {
    let line = String::from_utf8(raw).map_err(|e| {
        Error::invalid_reading(
            String::from_utf8_lossy(e.as_bytes()).trim(),
            "line is not valid UTF-8",
        )
    })?;

    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    debug!(line, "Read line from device");
    Ok(Some(line.to_string()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::io::{self, Cursor, Read};

    /// Reader that yields scripted chunks, then times out.
    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                None => Err(io::Error::new(ErrorKind::TimedOut, "timed out")),
            }
        }
    }

    #[test]
    fn test_default_options() {
        let options = SerialOptions::default();
        assert_eq!(options.vendor_id, 0x067B);
        assert_eq!(options.product_id, 0x2303);
        assert_eq!(options.baud_rate, 9600);
        assert_eq!(options.data_bits, 8);
        assert_eq!(options.parity, Parity::None);
        assert_eq!(options.stop_bits, StopBits::One);
        assert_eq!(options.read_timeout, Duration::from_secs(10));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_word_size() {
        let options = SerialOptions {
            data_bits: 9,
            ..SerialOptions::default()
        };
        assert!(matches!(options.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_options_deserialize_partial() {
        let options: SerialOptions =
            serde_json::from_str(r#"{"port_path":"/dev/ttyUSB3","parity":"even"}"#).unwrap();
        assert_eq!(options.port_path.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(options.parity, Parity::Even);
        assert_eq!(options.baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_read_before_connect() {
        let mut device = SerialDevice::new(SerialOptions::default());
        assert!(!device.is_connected());
        assert!(matches!(device.read_line(), Err(Error::DeviceNotConnected)));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut device = SerialDevice::new(SerialOptions::default());
        assert!(device.disconnect().is_ok());
        assert!(device.disconnect().is_ok());
    }

    #[test]
    fn test_name_uses_explicit_path() {
        let device = SerialDevice::new(SerialOptions {
            port_path: Some("/dev/ttyS9".into()),
            ..SerialOptions::default()
        });
        assert_eq!(device.name(), "/dev/ttyS9");
    }

    #[test]
    fn test_framed_lines() {
        let mut reader = Cursor::new(b"WTST   12.11   g\r\nWTUS    0.84   g\n".to_vec());
        let mut framer = LineFramer::default();

        assert_eq!(
            framer.read_line(&mut reader).unwrap().as_deref(),
            Some("WTST   12.11   g")
        );
        assert_eq!(
            framer.read_line(&mut reader).unwrap().as_deref(),
            Some("WTUS    0.84   g")
        );
        assert_eq!(framer.read_line(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_partial_line_survives_timeout() {
        let mut reader = BufReader::new(ChunkedReader {
            chunks: VecDeque::from([b"WTST  1".to_vec()]),
        });
        let mut framer = LineFramer::default();

        assert_eq!(framer.read_line(&mut reader).unwrap(), None);
        assert_eq!(framer.pending, b"WTST  1");

        reader.get_mut().chunks.push_back(b"2.5 g\n".to_vec());
        assert_eq!(
            framer.read_line(&mut reader).unwrap().as_deref(),
            Some("WTST  12.5 g")
        );
        assert!(framer.pending.is_empty());
    }

    #[test]
    fn test_blank_line_is_skipped() {
        let mut reader = Cursor::new(b"   \r\n".to_vec());
        let mut framer = LineFramer::default();
        assert_eq!(framer.read_line(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let mut reader = Cursor::new(vec![0x57, 0xFF, 0xFE, b'\n']);
        let mut framer = LineFramer::default();
        let err = framer.read_line(&mut reader).unwrap_err();
        assert!(matches!(err, Error::InvalidReading { .. }));
        assert!(framer.pending.is_empty());
    }

    #[test]
    fn test_unterminated_input_is_capped() {
        let mut reader = BufReader::new(ChunkedReader {
            chunks: VecDeque::from([vec![b'x'; MAX_LINE_LEN + 100]]),
        });
        let mut framer = LineFramer::default();

        let err = framer.read_line(&mut reader).unwrap_err();
        assert!(matches!(err, Error::InvalidReading { .. }));
        assert!(framer.pending.len() < MAX_LINE_LEN);

        reader.get_mut().chunks.push_back(b"xx\nWTST 1.0 g\n".to_vec());
        assert_eq!(framer.read_line(&mut reader).unwrap(), None);
        assert_eq!(
            framer.read_line(&mut reader).unwrap().as_deref(),
            Some("WTST 1.0 g")
        );
    }

    #[test]
    fn test_long_noise_reports_once() {
        let mut reader = BufReader::new(ChunkedReader {
            chunks: VecDeque::from([vec![b'~'; 3 * MAX_LINE_LEN]]),
        });
        let mut framer = LineFramer::default();

        assert!(framer.read_line(&mut reader).is_err());
        assert_eq!(framer.read_line(&mut reader).unwrap(), None);
        assert_eq!(framer.read_line(&mut reader).unwrap(), None);
        assert!(framer.pending.len() < MAX_LINE_LEN);
    }
}
