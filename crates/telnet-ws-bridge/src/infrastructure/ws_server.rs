//! WebSocket server: accept loop and per-client task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from browsers.
//! 3. Upgrading each connection to a WebSocket, keeping the request URI from
//!    the HTTP handshake (the backend target is derived from it).
//! 4. Handing the connection to [`run_client_session`] in its own task,
//!    alongside a keepalive task that pings the client.
//! 5. Stopping the accept loop when the `running` flag is cleared.
//!
//! # Shutdown
//!
//! Once the accept loop stops, the context's shutdown token is cancelled.
//! Each running session sends `[Telnet bridge shutting down]`, closes its
//! backend and sends a Close frame.  [`serve`] returns when every session has
//! finished, or after `SHUTDOWN_GRACE` with a warning naming how many were
//! still running.
//!
//! # Panics inside a session
//!
//! The per-client future is run under `catch_unwind`.  A panic is logged, the
//! client is sent `[Internal server error]`, and the accept loop and other
//! sessions are unaffected.  The session's backend lease is released by
//! ownership during unwinding.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{FutureExt, Stream, StreamExt};
use telnet_bridge_core::LiveTargetRegistry;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::domain::{BridgeConfig, ClientMessage, StatusFrame};
use crate::infrastructure::keepalive::{run_keepalive, ClientActivity};
use crate::infrastructure::lifecycle::{run_client_session, BridgeContext, SessionOutcome};
use crate::infrastructure::transport::{ClientTransport, WsClientTransport};

/// How often the accept loop re-checks the `running` flag when idle.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// How long [`serve`] waits for sessions to close after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Client messages as a boxed stream, ending when the client goes away.
pub type ClientMessages = Pin<Box<dyn Stream<Item = ClientMessage> + Send>>;

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs the WebSocket accept loop until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(config: BridgeConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.ws_bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.ws_bind_addr))?;

    info!("Telnet bridge listening on ws://{}", config.ws_bind_addr);
    if let Some(target) = &config.default_target {
        info!("default Telnet target: {target}");
    }

    let registry = Arc::new(LiveTargetRegistry::new());
    let ctx = Arc::new(BridgeContext::new(&config, registry));
    serve(listener, ctx, running).await
}

/// Accepts connections on an already-bound listener.
///
/// Split from [`run_server`] so tests can bind `127.0.0.1:0` and supply
/// their own [`BridgeContext`].  After the `running` flag is cleared, running
/// sessions are told to shut down and given `SHUTDOWN_GRACE` to finish.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<BridgeContext>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    handle_client_connection(stream, peer_addr, ctx).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. out of file descriptors); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {
                // No connection within ACCEPT_POLL; re-check the flag.
            }
        }
    }

    ctx.shutdown.cancel();
    drain_sessions(&ctx).await;
    Ok(())
}

/// Waits for every session to finish, up to `SHUTDOWN_GRACE`.
async fn drain_sessions(ctx: &BridgeContext) {
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    loop {
        let remaining = ctx.connected_clients();
        if remaining == 0 {
            return;
        }
        if Instant::now() >= deadline {
            warn!("{remaining} session(s) still running after {SHUTDOWN_GRACE:?}; abandoning them");
            return;
        }
        sleep(DRAIN_POLL).await;
    }
}

// ── Per-client handler ────────────────────────────────────────────────────────

/// Task entry point for one accepted TCP connection.
///
/// Wraps [`serve_client`] and logs the outcome.
async fn handle_client_connection(stream: TcpStream, peer_addr: SocketAddr, ctx: Arc<BridgeContext>) {
    let client_id = Uuid::new_v4();
    let span = info_span!("client", id = %client_id, peer = %peer_addr);

    match serve_client(stream, client_id, ctx).instrument(span.clone()).await {
        Ok(outcome) => {
            span.in_scope(|| debug!("client {client_id} from {peer_addr} done: {outcome:?}"));
        }
        Err(e) => {
            span.in_scope(|| warn!("client {client_id} from {peer_addr}: {e:#}"));
        }
    }
}

/// Completes the WebSocket handshake and runs the client session.
///
/// Returns `Ok(None)` if the session panicked (already reported to the
/// client).
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails.
async fn serve_client(
    stream: TcpStream,
    client_id: Uuid,
    ctx: Arc<BridgeContext>,
) -> anyhow::Result<Option<SessionOutcome>> {
    let (uri_tx, uri_rx) = oneshot::channel::<String>();
    let capture_uri = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let _ = uri_tx.send(request.uri().to_string());
        Ok(response)
    };
    let ws_stream = accept_hdr_async(stream, capture_uri)
        .await
        .context("WebSocket handshake failed")?;
    let request_uri = uri_rx.await.unwrap_or_default();
    debug!("client {client_id}: WebSocket established for '{request_uri}'");

    let (ws_tx, ws_rx) = ws_stream.split();
    let transport: Arc<dyn ClientTransport> = Arc::new(
        WsClientTransport::new(ws_tx, ctx.frame_mode).with_send_timeout(ctx.keepalive.timeout),
    );
    let activity = Arc::new(ClientActivity::new());
    let mut messages = client_messages(ws_rx, client_id, Arc::clone(&activity));

    // Cancelled by the keepalive when the client goes silent; the guard stops
    // the keepalive when this function returns.
    let client_gone = CancellationToken::new();
    let _stop_keepalive = client_gone.clone().drop_guard();
    tokio::spawn(
        run_keepalive(
            Arc::clone(&transport),
            activity,
            ctx.keepalive,
            client_gone.clone(),
        )
        .in_current_span(),
    );

    let session = run_client_session(
        &ctx,
        client_id,
        &request_uri,
        Arc::clone(&transport),
        &mut messages,
        client_gone,
    );
    match AssertUnwindSafe(session).catch_unwind().await {
        Ok(outcome) => Ok(Some(outcome)),
        Err(_) => {
            error!("client {client_id}: session panicked");
            if let Err(e) = transport.send_status(StatusFrame::InternalError).await {
                debug!("client {client_id}: could not report internal error: {e}");
            }
            let _ = transport.close().await;
            Ok(None)
        }
    }
}

/// Adapts the WebSocket read half to a stream of [`ClientMessage`]s.
///
/// Ping/Pong and raw frames are skipped; a Close frame, a read error or the
/// end of the stream end it.  Every frame received, Pongs included, touches
/// `activity`.
pub fn client_messages<S>(ws_rx: S, client_id: Uuid, activity: Arc<ClientActivity>) -> ClientMessages
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin + Send + 'static,
{
    Box::pin(futures_util::stream::unfold(
        (ws_rx, activity),
        move |(mut rx, activity)| async move {
            loop {
                let frame = rx.next().await;
                if matches!(frame, Some(Ok(_))) {
                    activity.touch();
                }
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        return Some((ClientMessage::Text(text), (rx, activity)))
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        return Some((ClientMessage::Binary(bytes), (rx, activity)))
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!("client {client_id}: Close frame received");
                        return None;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/raw frame; tungstenite answers pings itself.
                    }
                    Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                        debug!("client {client_id}: WebSocket closed");
                        return None;
                    }
                    Some(Err(e)) => {
                        warn!("client {client_id}: WebSocket error: {e}");
                        return None;
                    }
                    None => return None,
                }
            }
        },
    ))
}
