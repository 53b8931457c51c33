//! Scale readings decoded from device lines.
//!
//! The scale emits one line per measurement:
//!
//! ```text
//! WTST   12.11   g
//! WTUS    0.84   g
//! ```
//!
//! Format: `<TAG><ws><VALUE><ws><UNIT>`. Fields are separated by runs of
//! whitespace; the last field is the unit, the one before it the value and
//! the first one the tag.

// ============================================================================
// Imports
// ============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// ScaleReading
// ============================================================================

/// One decoded measurement.
///
/// # Format
///
/// ```json
/// { "value": 12.11, "unit": "g", "type": "WTST" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleReading {
    /// Measured value.
    pub value: f64,
    /// Unit as reported by the device (`g`, `kg`, `lb`...).
    pub unit: String,
    /// Leading status tag (`WTST` stable, `WTUS` unstable).
    #[serde(rename = "type")]
    pub tag: String,
}

impl ScaleReading {
    /// Parses a device line into a reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReading`] if the line has fewer than two
    /// fields or the value field is not a finite decimal number.
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();

        let [.., value, unit] = fields.as_slice() else {
            return Err(Error::invalid_reading(
                line.trim(),
                format!("expected at least 2 fields, got {}", fields.len()),
            ));
        };
        let tag = fields[0];

        let value: f64 = value.parse().map_err(|e| {
            Error::invalid_reading(line.trim(), format!("value {value:?} is not a number: {e}"))
        })?;

        if !value.is_finite() {
            return Err(Error::invalid_reading(line.trim(), "value is not finite"));
        }

        Ok(Self {
            value,
            unit: (*unit).to_string(),
            tag: tag.to_string(),
        })
    }
}

impl FromStr for ScaleReading {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ============================================================================
// ScaleDataPayload
// ============================================================================

/// Payload of the `scale_data` broadcast.
///
/// # Format
///
/// ```json
/// {
///   "scale_data": { "value": 12.11, "unit": "g", "type": "WTST" },
///   "raw_data": "WTST   12.11   g",
///   "timestamp": 1760652000,
///   "port": "/dev/ttyUSB0"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleDataPayload {
    /// The decoded reading.
    pub scale_data: ScaleReading,
    /// The line as read from the device.
    pub raw_data: String,
    /// Unix seconds at which the line was read.
    pub timestamp: i64,
    /// Device identifier (OS port path).
    pub port: String,
}

impl ScaleDataPayload {
    /// Wraps a reading with its source line, stamped with the current time.
    #[must_use]
    pub fn now(reading: ScaleReading, raw_line: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            scale_data: reading,
            raw_data: raw_line.into(),
            timestamp: chrono::Utc::now().timestamp(),
            port: port.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
