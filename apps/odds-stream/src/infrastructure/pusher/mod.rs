//! Pusher Push Channel Adapters
//!
//! - [`PusherProtocol`]: subscribe and ping frame encoding
//! - [`PusherEvent`]: inbound frame decoding
//! - [`WebSocketTransport`]: tokio-tungstenite connection adapter

mod messages;
mod transport;

pub use messages::{PING_EVENT, PONG_EVENT, PusherEvent, PusherProtocol, SUBSCRIBE_EVENT};
pub use transport::WebSocketTransport;
