//! Transport Port (Driven Port)
//!
//! Interface for persistent frame connections and the push protocol spoken
//! over them. A connection is split into a sink and a stream so the
//! subscription state machine can read and write from separate tasks.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Sink, Stream};

use crate::domain::channel::ChannelId;

/// Transport failure. Terminates only the affected subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Reading a frame failed.
    #[error("read failed: {0}")]
    Read(String),

    /// Writing a frame failed.
    #[error("write failed: {0}")]
    Write(String),

    /// Outbound frame could not be encoded.
    #[error("frame encode failed: {0}")]
    Encode(String),
}

/// Status carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    /// Close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
}

impl CloseStatus {
    /// Normal closure code.
    pub const NORMAL: u16 = 1000;

    /// Normal closure with no reason.
    #[must_use]
    pub const fn normal() -> Self {
        Self {
            code: Self::NORMAL,
            reason: String::new(),
        }
    }
}

/// A single frame on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// Text frame.
    Text(String),
    /// Close frame.
    Close(Option<CloseStatus>),
}

impl WireFrame {
    /// Whether this is a close frame.
    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }
}

/// A text frame received on a subscription, tagged with its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Channel the frame arrived on.
    pub channel: ChannelId,
    /// Raw frame text.
    pub payload: String,
    /// Receive time.
    pub received_at: DateTime<Utc>,
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<WireFrame, Error = TransportError> + Send>>;

/// Inbound half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireFrame, TransportError>> + Send>>;

/// An open connection.
pub struct Connection {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames.
    pub stream: FrameStream,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Port for opening frame connections.
#[async_trait]
pub trait TransportPort: Send + Sync {
    /// Connect to `url` with the given handshake headers.
    async fn connect(&self, url: &str, headers: &[(String, String)])
    -> Result<Connection, TransportError>;
}

/// Push-protocol frames a subscription sends.
pub trait ChannelProtocol: Send + Sync {
    /// Frame that subscribes to `channel`; sent first after the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`] if the frame cannot be encoded.
    fn subscribe_frame(&self, channel: &ChannelId) -> Result<String, TransportError>;

    /// Keepalive frame sent after a quiet period.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`] if the frame cannot be encoded.
    fn ping_frame(&self) -> Result<String, TransportError>;
}
