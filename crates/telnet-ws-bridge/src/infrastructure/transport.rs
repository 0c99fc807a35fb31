//! The client side of a session: where frames for the browser go.
//!
//! [`ClientTransport`] is the seam between the session bridge and the
//! WebSocket library.  The session asks the transport once, at construction,
//! whether it can carry binary frames, and encodes backend output
//! accordingly.  Tests substitute `RecordingTransport` from the test-only
//! `mock` module.
//!
//! A client that stops reading would otherwise block a send forever once the
//! TCP send buffer fills, so [`WsClientTransport`] can bound every send with
//! [`with_send_timeout`](WsClientTransport::with_send_timeout).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;

use crate::domain::{FrameMode, OutboundFrame, StatusFrame};

/// Errors from sending to the client.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The client has gone away.
    #[error("client connection closed")]
    Closed,

    /// The transport only carries text.  The rejected payload is handed back
    /// so the caller can fall back to a lossy text encoding.
    #[error("client transport cannot carry binary frames")]
    BinaryUnsupported(Vec<u8>),

    /// The client did not take a frame within the send timeout.
    #[error("client did not accept a frame within {0:?}")]
    TimedOut(Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(#[source] WsError),
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            other => Self::WebSocket(other),
        }
    }
}

/// Sends frames to one connected client.
///
/// Implementations must be safe to call from the session task and the
/// backend→client forwarding task at the same time.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Whether [`send`](Self::send) accepts [`OutboundFrame::Binary`].
    fn supports_binary(&self) -> bool;

    /// Sends one frame.
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError>;

    /// Sends a human-readable status line as a text frame.
    async fn send_status(&self, status: StatusFrame) -> Result<(), TransportError> {
        self.send(OutboundFrame::Text(status.to_string())).await
    }

    /// Sends a keepalive Ping.  The Pong comes back on the read side.
    async fn ping(&self) -> Result<(), TransportError>;

    /// Starts an orderly close of the client connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// [`ClientTransport`] over the write half of a tokio-tungstenite stream.
///
/// The sink sits behind a `tokio::sync::Mutex` because the session task
/// (status frames) and the forwarding task (backend output) both write to it.
pub struct WsClientTransport<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, WsMessage>>,
    frame_mode: FrameMode,
    send_timeout: Option<Duration>,
}

impl<S> WsClientTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(sink: SplitSink<WebSocketStream<S>, WsMessage>, frame_mode: FrameMode) -> Self {
        Self {
            sink: Mutex::new(sink),
            frame_mode,
            send_timeout: None,
        }
    }

    /// Fails any send (or close) that takes longer than `limit`, including
    /// the wait for the sink lock.
    pub fn with_send_timeout(mut self, limit: Duration) -> Self {
        self.send_timeout = Some(limit);
        self
    }

    async fn send_message(&self, message: WsMessage) -> Result<(), TransportError> {
        let send = async {
            let mut sink = self.sink.lock().await;
            sink.send(message).await
        };
        match self.send_timeout {
            Some(limit) => timeout(limit, send)
                .await
                .map_err(|_| TransportError::TimedOut(limit))?
                .map_err(TransportError::from),
            None => send.await.map_err(TransportError::from),
        }
    }
}

#[async_trait]
impl<S> ClientTransport for WsClientTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn supports_binary(&self) -> bool {
        self.frame_mode == FrameMode::Binary
    }

    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        let message = match frame {
            OutboundFrame::Text(text) => WsMessage::Text(text),
            OutboundFrame::Binary(bytes) if self.supports_binary() => WsMessage::Binary(bytes),
            OutboundFrame::Binary(bytes) => return Err(TransportError::BinaryUnsupported(bytes)),
        };
        self.send_message(message).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.send_message(WsMessage::Ping(Vec::new())).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Closing the sink sends a Close frame and flushes it.
        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        let result = match self.send_timeout {
            Some(limit) => timeout(limit, close)
                .await
                .map_err(|_| TransportError::TimedOut(limit))?,
            None => close.await,
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) => match TransportError::from(err) {
                TransportError::Closed => Ok(()),
                other => Err(other),
            },
        }
    }
}
