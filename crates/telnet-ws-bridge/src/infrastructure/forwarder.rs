//! Backend → client forwarding task.
//!
//! One of these runs per backend connection, spawned by the session bridge.
//! It reads the Telnet stream in bounded chunks and sends each chunk to the
//! client as it arrives.  No buffering beyond one read, no reordering.
//!
//! The task stops when:
//!
//! - the session cancels it (target switch or session end),
//! - the backend closes the stream (the client is told `[Telnet connection closed]`),
//! - a read fails or, under [`ReadTimeoutPolicy::Disconnect`], times out,
//! - the client can no longer be written to.
//!
//! Cancellation is only observed between I/O operations: a frame that is
//! already being written to the client is finished, so the WebSocket stream
//! never sees half a message.  The token is checked again after every read,
//! so at most the one chunk already inside `deliver` when the cancel fires
//! still reaches the client.  On a target switch that chunk belongs to the
//! old backend and always arrives before the new backend's first output,
//! because the session waits for this task to stop before connecting.  The
//! client's send timeout bounds how long that wait can last.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::{decode_lossy, OutboundEncoder};
use crate::domain::{BridgeConfig, OutboundFrame, ReadTimeoutPolicy, StatusFrame};
use crate::infrastructure::transport::{ClientTransport, TransportError};

/// Unrecoverable forwarding failures, in either direction.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("backend read failed: {0}")]
    BackendRead(#[source] io::Error),

    #[error("backend write failed: {0}")]
    BackendWrite(#[source] io::Error),

    #[error("client send failed: {0}")]
    Client(#[from] TransportError),
}

/// How a forwarding task ended.
#[derive(Debug)]
pub enum ForwardOutcome {
    /// Stopped by the session.
    Cancelled,
    /// The backend sent EOF.
    BackendClosed,
    /// No data within the read timeout, with the disconnect policy.
    ReadTimedOut,
    Failed(ForwardError),
    /// The task panicked.  Reported by the session, never returned by the task.
    Panicked,
}

/// Per-connection read settings.
#[derive(Debug, Clone, Copy)]
pub struct ForwardSettings {
    pub read_chunk_size: usize,
    pub read_timeout: Duration,
    pub read_timeout_policy: ReadTimeoutPolicy,
}

impl From<&BridgeConfig> for ForwardSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            read_chunk_size: config.read_chunk_size,
            read_timeout: config.read_timeout,
            read_timeout_policy: config.read_timeout_policy,
        }
    }
}

impl Default for ForwardSettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

/// Copies backend output to the client until one of the stop conditions in
/// the module docs occurs.
pub async fn forward_backend_to_client<R>(
    mut reader: R,
    transport: Arc<dyn ClientTransport>,
    settings: ForwardSettings,
    cancel: CancellationToken,
) -> ForwardOutcome
where
    R: AsyncRead + Unpin,
{
    let mut encoder = OutboundEncoder::new(transport.supports_binary());
    let mut buf = vec![0u8; settings.read_chunk_size.max(1)];

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ForwardOutcome::Cancelled,
            read = timeout(settings.read_timeout, reader.read(&mut buf)) => read,
        };

        match read {
            Err(_elapsed) => match settings.read_timeout_policy {
                ReadTimeoutPolicy::Retry => {
                    debug!("no backend data for {:?}; still waiting", settings.read_timeout);
                }
                ReadTimeoutPolicy::Disconnect => {
                    info!("backend read timed out after {:?}", settings.read_timeout);
                    notify(&*transport, StatusFrame::ReadTimedOut).await;
                    return ForwardOutcome::ReadTimedOut;
                }
            },
            Ok(Ok(0)) => {
                info!("Telnet server closed the connection");
                if let Some(tail) = encoder.finish() {
                    if let Err(e) = deliver(&*transport, tail).await {
                        debug!("could not deliver final backend output: {e}");
                    }
                }
                notify(&*transport, StatusFrame::BackendClosed).await;
                return ForwardOutcome::BackendClosed;
            }
            Ok(Ok(n)) => {
                if cancel.is_cancelled() {
                    return ForwardOutcome::Cancelled;
                }
                let Some(frame) = encoder.encode(&buf[..n]) else {
                    continue;
                };
                if let Err(e) = deliver(&*transport, frame).await {
                    debug!("client send failed: {e}");
                    return ForwardOutcome::Failed(ForwardError::Client(e));
                }
            }
            Ok(Err(e)) => {
                warn!("backend read failed: {e}");
                notify(&*transport, StatusFrame::BackendLost).await;
                return ForwardOutcome::Failed(ForwardError::BackendRead(e));
            }
        }
    }
}

/// Sends `frame`, retrying as lossy text if the transport turns binary down.
async fn deliver(transport: &dyn ClientTransport, frame: OutboundFrame) -> Result<(), TransportError> {
    match transport.send(frame).await {
        Err(TransportError::BinaryUnsupported(bytes)) => {
            debug!("binary frame refused; resending {} bytes as text", bytes.len());
            transport
                .send(OutboundFrame::Text(decode_lossy(&bytes).into_owned()))
                .await
        }
        other => other,
    }
}

/// Best-effort status frame.  The client may already be gone.
pub(crate) async fn notify(transport: &dyn ClientTransport, status: StatusFrame) {
    if let Err(e) = transport.send_status(status).await {
        debug!("could not deliver status frame: {e}");
    }
}
