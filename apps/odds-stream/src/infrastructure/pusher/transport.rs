//! WebSocket Transport
//!
//! [`TransportPort`] adapter over `tokio-tungstenite`. Handshake headers are
//! attached to the upgrade request; the resulting socket is split so the
//! sink and stream can be driven from separate tasks. Ping and pong control
//! frames are answered by tungstenite and never surface as [`WireFrame`]s.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::application::ports::{CloseStatus, Connection, TransportError, TransportPort, WireFrame};

/// WebSocket implementation of [`TransportPort`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportPort for WebSocketTransport {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Connection, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Connect(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Connect(format!("header {name}: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(url, "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e: WsError| TransportError::Write(e.to_string()))
            .with(|frame: WireFrame| future::ready(Ok::<_, TransportError>(to_message(frame))));

        let stream = read.filter_map(|result| future::ready(from_message(result)));

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text.into()),
        WireFrame::Close(status) => Message::Close(status.map(|s| CloseFrame {
            code: CloseCode::from(s.code),
            reason: s.reason.into(),
        })),
    }
}

fn from_message(result: Result<Message, WsError>) -> Option<Result<WireFrame, TransportError>> {
    match result {
        Ok(Message::Text(text)) => Some(Ok(WireFrame::Text(text.to_string()))),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(WireFrame::Text(text))),
            Err(e) => Some(Err(TransportError::Read(format!("non-UTF-8 binary frame: {e}")))),
        },
        Ok(Message::Close(frame)) => Some(Ok(WireFrame::Close(frame.map(|f| CloseStatus {
            code: u16::from(f.code),
            reason: f.reason.to_string(),
        })))),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(TransportError::Read(e.to_string()))),
    }
}
