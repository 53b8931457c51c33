//! Wire envelope shared by every frame in both directions.
//!
//! # Format
//!
//! ```json
//! { "type": "scale_data", "payload": { ... } }
//! ```
//!
//! `payload` is optional. `type` is an open tag: kinds this crate does not
//! know decode into [`Message::Unknown`] with the raw payload preserved, so
//! they can be logged or passed through untouched.

// ============================================================================
// Imports
// ============================================================================

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;

use crate::error::{Error, Result};

use super::reading::ScaleDataPayload;

// ============================================================================
// Constants
// ============================================================================

/// Kind of the device reading broadcast.
pub const KIND_SCALE_DATA: &str = "scale_data";

/// Kind of a client liveness probe.
pub const KIND_PING: &str = "ping";

/// Kind of the reply to [`KIND_PING`].
pub const KIND_PONG: &str = "pong";

/// Kind of a client self-sync request.
pub const KIND_SYNC_TO_SELF: &str = "sync-to-self";

/// Kind of the reply to [`KIND_SYNC_TO_SELF`].
pub const KIND_SYNC_FROM_SELF: &str = "sync-from-self";

/// Payload carried by the `sync-from-self` reply.
const SYNC_REPLY_PAYLOAD: &str = r#""pong""#;

// ============================================================================
// Types
// ============================================================================

/// Opaque JSON payload, kept as the exact bytes received.
pub type RawPayload = Option<Box<RawValue>>;

// ============================================================================
// Message
// ============================================================================

/// A decoded envelope.
///
/// Known kinds get their own variant; anything else lands in
/// [`Message::Unknown`].
#[derive(Debug, Clone)]
pub enum Message {
    /// Device reading fan-out (`scale_data`).
    ScaleData(Box<ScaleDataPayload>),
    /// Liveness probe from a client (`ping`).
    Ping(RawPayload),
    /// Reply to `ping`, echoing its payload (`pong`).
    Pong(RawPayload),
    /// Self-sync request (`sync-to-self`).
    SyncToSelf(RawPayload),
    /// Self-sync reply or notice (`sync-from-self`).
    SyncFromSelf(RawPayload),
    /// Any other kind.
    Unknown {
        /// The `type` tag as received.
        kind: String,
        /// The payload as received.
        payload: RawPayload,
    },
}

/// Borrowed view used for decoding.
#[derive(Deserialize)]
struct WireEnvelope<'a> {
    #[serde(rename = "type", borrow)]
    kind: std::borrow::Cow<'a, str>,
    #[serde(default)]
    payload: RawPayload,
}

impl Message {
    /// Creates a `scale_data` broadcast.
    #[inline]
    #[must_use]
    pub fn scale_data(payload: ScaleDataPayload) -> Self {
        Self::ScaleData(Box::new(payload))
    }

    /// Creates the `sync-from-self` reply sent in answer to `sync-to-self`.
    #[must_use]
    pub fn sync_reply() -> Self {
        Self::SyncFromSelf(RawValue::from_string(SYNC_REPLY_PAYLOAD.to_string()).ok())
    }

    /// Returns the wire `type` tag.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::ScaleData(_) => KIND_SCALE_DATA,
            Self::Ping(_) => KIND_PING,
            Self::Pong(_) => KIND_PONG,
            Self::SyncToSelf(_) => KIND_SYNC_TO_SELF,
            Self::SyncFromSelf(_) => KIND_SYNC_FROM_SELF,
            Self::Unknown { kind, .. } => kind,
        }
    }

    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the frame is not a JSON object with a string `type`
    /// - [`Error::Json`] if a `scale_data` payload has the wrong shape
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: WireEnvelope<'_> = serde_json::from_str(text)?;

        let message = match envelope.kind.as_ref() {
            KIND_SCALE_DATA => {
                let raw = envelope
                    .payload
                    .ok_or_else(|| Error::protocol("scale_data without payload"))?;
                Self::scale_data(serde_json::from_str(raw.get())?)
            }
            KIND_PING => Self::Ping(envelope.payload),
            KIND_PONG => Self::Pong(envelope.payload),
            KIND_SYNC_TO_SELF => Self::SyncToSelf(envelope.payload),
            KIND_SYNC_FROM_SELF => Self::SyncFromSelf(envelope.payload),
            _ => Self::Unknown {
                kind: envelope.kind.into_owned(),
                payload: envelope.payload,
            },
        };

        Ok(message)
    }

    /// Encodes into a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the raw payload for opaque variants.
    #[must_use]
    pub fn raw_payload(&self) -> Option<&RawValue> {
        match self {
            Self::ScaleData(_) => None,
            Self::Ping(p) | Self::Pong(p) | Self::SyncToSelf(p) | Self::SyncFromSelf(p) => {
                p.as_deref()
            }
            Self::Unknown { payload, .. } => payload.as_deref(),
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Message", 2)?;
        state.serialize_field("type", self.kind())?;

        match self {
            Self::ScaleData(payload) => state.serialize_field("payload", payload)?,
            _ => match self.raw_payload() {
                Some(raw) => state.serialize_field("payload", raw)?,
                None => state.skip_field("payload")?,
            },
        }

        state.end()
    }
}

// ============================================================================
// Tests
// ============================================================================
