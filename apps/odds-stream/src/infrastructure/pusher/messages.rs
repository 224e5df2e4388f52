//! Pusher Wire Messages
//!
//! JSON text frames exchanged with a Pusher endpoint. Outbound frames are
//! serialized field by field in wire order:
//!
//! - Subscribe: `{"event":"pusher:subscribe","data":{"channel":"<channel>"}}`
//! - Ping: `{"event":"pusher:ping","data":"{}"}`
//!
//! Inbound frames carry an `event`, an optional `channel` and a `data` field
//! that Pusher usually double-encodes as a JSON string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::{ChannelProtocol, TransportError};
use crate::domain::channel::ChannelId;

/// Subscribe event name.
pub const SUBSCRIBE_EVENT: &str = "pusher:subscribe";
/// Keepalive ping event name.
pub const PING_EVENT: &str = "pusher:ping";
/// Keepalive pong event name.
pub const PONG_EVENT: &str = "pusher:pong";

#[derive(Serialize)]
struct OutboundFrame<'a, D: Serialize> {
    event: &'a str,
    data: D,
}

#[derive(Serialize)]
struct SubscribeData<'a> {
    channel: &'a str,
}

/// A decoded inbound Pusher frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PusherEvent {
    /// Event name, e.g. `pusher:connection_established`.
    pub event: String,
    /// Channel the event belongs to, when channel-scoped.
    #[serde(default)]
    pub channel: Option<String>,
    /// Event payload as sent.
    #[serde(default)]
    pub data: Option<Value>,
}

impl PusherEvent {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a Pusher event object.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Whether this is a protocol event rather than channel data.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        self.event.starts_with("pusher:") || self.event.starts_with("pusher_internal:")
    }

    /// Whether this is a keepalive pong.
    #[must_use]
    pub fn is_pong(&self) -> bool {
        self.event == PONG_EVENT
    }

    /// Payload with one level of string encoding removed.
    #[must_use]
    pub fn payload(&self) -> Option<Value> {
        match &self.data {
            Some(Value::String(s)) => {
                Some(serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())))
            }
            other => other.clone(),
        }
    }
}

/// Pusher implementation of [`ChannelProtocol`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PusherProtocol;

impl PusherProtocol {
    /// Create the protocol encoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn encode<D: Serialize>(event: &str, data: D) -> Result<String, TransportError> {
    serde_json::to_string(&OutboundFrame { event, data })
        .map_err(|e| TransportError::Encode(e.to_string()))
}

impl ChannelProtocol for PusherProtocol {
    fn subscribe_frame(&self, channel: &ChannelId) -> Result<String, TransportError> {
        encode(
            SUBSCRIBE_EVENT,
            SubscribeData {
                channel: channel.as_str(),
            },
        )
    }

    fn ping_frame(&self) -> Result<String, TransportError> {
        encode(PING_EVENT, "{}")
    }
}
