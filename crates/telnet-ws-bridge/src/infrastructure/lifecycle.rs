//! Session lifecycle: everything that happens to one accepted client, from
//! target resolution to the last registry decrement.
//!
//! ```text
//! resolve ──✗──▶ "[Error: No target specified]" ──────────────┐
//!    │                                                         │
//! connect ──✗──▶ "[Error: connection refused by h:p]" ────────┤
//!    │                                                         ▼
//! Session::run ─▶ Session::terminate ──────────────────▶ close client
//! ```
//!
//! Every path ends at the same place: backend closed, lease returned, client
//! counter decremented, client sent a Close frame.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::Stream;
use telnet_bridge_core::{LiveTargetRegistry, ResolutionError, TargetResolver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{BridgeConfig, ClientMessage, FrameMode, StatusFrame};
use crate::infrastructure::connector::{BackendConnect, ConnectError, TcpConnector};
use crate::infrastructure::forwarder::notify;
use crate::infrastructure::keepalive::KeepaliveSettings;
use crate::infrastructure::session::{Session, SessionEnd, SessionSettings};
use crate::infrastructure::transport::ClientTransport;

/// State shared by every session of one server.
pub struct BridgeContext {
    pub resolver: TargetResolver,
    pub connector: Arc<dyn BackendConnect>,
    pub registry: Arc<LiveTargetRegistry>,
    pub settings: SessionSettings,
    pub keepalive: KeepaliveSettings,
    pub frame_mode: FrameMode,
    /// Cancelled when the server stops; every running session watches it.
    pub shutdown: CancellationToken,
    clients: AtomicUsize,
}

impl BridgeContext {
    /// Production wiring: TCP backends, resolver built from `config`.
    pub fn new(config: &BridgeConfig, registry: Arc<LiveTargetRegistry>) -> Self {
        let connector = Arc::new(TcpConnector::new(
            config.connect_timeout,
            Arc::clone(&registry),
        ));
        Self::with_connector(config, connector, registry)
    }

    /// Same as [`new`](Self::new) with a caller-supplied connector.
    pub fn with_connector(
        config: &BridgeConfig,
        connector: Arc<dyn BackendConnect>,
        registry: Arc<LiveTargetRegistry>,
    ) -> Self {
        Self {
            resolver: config.resolver(),
            connector,
            registry,
            settings: SessionSettings::from(config),
            keepalive: KeepaliveSettings::from(config),
            frame_mode: config.frame_mode,
            shutdown: CancellationToken::new(),
            clients: AtomicUsize::new(0),
        }
    }

    /// Clients currently inside [`run_client_session`].  Advisory.
    pub fn connected_clients(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

/// How a client session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// No usable target in the request.  No backend was contacted.
    Rejected(ResolutionError),
    /// The initial backend connect failed.
    ConnectFailed(ConnectError),
    /// The session ran and ended for this reason.
    Finished(SessionEnd),
}

/// Counts a client for as long as it lives.
struct ConnectedClient<'a> {
    ctx: &'a BridgeContext,
    id: Uuid,
}

impl<'a> ConnectedClient<'a> {
    fn register(ctx: &'a BridgeContext, id: Uuid) -> Self {
        let total = ctx.clients.fetch_add(1, Ordering::Relaxed) + 1;
        info!("client {id} connected. Total clients: {total}");
        Self { ctx, id }
    }
}

impl Drop for ConnectedClient<'_> {
    fn drop(&mut self) {
        let remaining = self.ctx.clients.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        info!(
            "client {} disconnected. Total clients: {remaining} | Active targets: {}",
            self.id,
            self.ctx.registry.snapshot()
        );
    }
}

/// Runs one client from resolution to cleanup.
///
/// `request_uri` is the path and query from the WebSocket handshake.
/// `messages` yields the client's messages and ends when the client leaves.
/// `client_gone` is cancelled by the keepalive when the client stops
/// answering.
pub async fn run_client_session<S>(
    ctx: &BridgeContext,
    client_id: Uuid,
    request_uri: &str,
    transport: Arc<dyn ClientTransport>,
    messages: &mut S,
    client_gone: CancellationToken,
) -> SessionOutcome
where
    S: Stream<Item = ClientMessage> + Unpin,
{
    let _client = ConnectedClient::register(ctx, client_id);

    let outcome = bridge_client(ctx, client_id, request_uri, &transport, messages, client_gone).await;

    if let Err(e) = transport.close().await {
        debug!("client {client_id}: close: {e}");
    }
    outcome
}

async fn bridge_client<S>(
    ctx: &BridgeContext,
    client_id: Uuid,
    request_uri: &str,
    transport: &Arc<dyn ClientTransport>,
    messages: &mut S,
    client_gone: CancellationToken,
) -> SessionOutcome
where
    S: Stream<Item = ClientMessage> + Unpin,
{
    let target = match ctx.resolver.resolve(request_uri) {
        Ok(target) => target,
        Err(err) => {
            warn!("client {client_id}: cannot resolve target from '{request_uri}': {err}");
            notify(&**transport, StatusFrame::from(&err)).await;
            return SessionOutcome::Rejected(err);
        }
    };
    info!("client {client_id}: '{request_uri}' resolved to {target}");

    let connection = match ctx.connector.connect(&target).await {
        Ok(connection) => connection,
        Err(err) => {
            warn!("client {client_id}: {err}");
            notify(&**transport, StatusFrame::from(&err)).await;
            return SessionOutcome::ConnectFailed(err);
        }
    };

    let mut session = Session::new(
        client_id,
        Arc::clone(transport),
        Arc::clone(&ctx.connector),
        ctx.settings,
    )
    .with_client_gone(client_gone)
    .with_shutdown(ctx.shutdown.clone());
    session.attach(connection).await;
    let end = session.run(messages).await;
    debug!("client {client_id}: session ended: {end:?}");
    session.terminate().await;

    SessionOutcome::Finished(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::stream;
    use telnet_bridge_core::Target;

    use crate::infrastructure::mock::{MemoryConnector, RecordingTransport};

    const WAIT: Duration = Duration::from_secs(2);

    fn context(config: &BridgeConfig) -> (BridgeContext, Arc<MemoryConnector>) {
        let registry = Arc::new(LiveTargetRegistry::new());
        let connector = Arc::new(MemoryConnector::new(Arc::clone(&registry)));
        let ctx = BridgeContext::with_connector(config, connector.clone(), registry);
        (ctx, connector)
    }

    #[tokio::test]
    async fn test_no_target_sends_error_and_never_connects() {
        // Arrange
        let (ctx, connector) = context(&BridgeConfig::default());
        let transport = Arc::new(RecordingTransport::binary());
        let mut messages = stream::empty::<ClientMessage>();

        // Act
        let outcome =
            run_client_session(&ctx, Uuid::new_v4(), "/", transport.clone(), &mut messages, CancellationToken::new()).await;

        // Assert
        assert!(matches!(
            outcome,
            SessionOutcome::Rejected(ResolutionError::NoTargetSpecified)
        ));
        assert_eq!(transport.texts(), vec!["[Error: No target specified]"]);
        assert_eq!(transport.close_count(), 1);
        assert_eq!(connector.attempts(), 0);
        assert_eq!(ctx.connected_clients(), 0);
    }

    #[tokio::test]
    async fn test_bad_port_in_subpath_is_invalid_format() {
        let (ctx, _) = context(&BridgeConfig::default());
        let transport = Arc::new(RecordingTransport::binary());
        let mut messages = stream::empty::<ClientMessage>();

        let outcome = run_client_session(
            &ctx,
            Uuid::new_v4(),
            "/ws/example.com/telnet",
            transport.clone(),
            &mut messages,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            outcome,
            SessionOutcome::Rejected(ResolutionError::InvalidTargetFormat(_))
        ));
        assert_eq!(transport.texts(), vec!["[Error: Invalid target format]"]);
    }

    #[tokio::test]
    async fn test_refused_backend_leaves_registry_untouched() {
        // Arrange
        let mut config = BridgeConfig::default();
        let nist: Target = "time.nist.gov:13".parse().unwrap();
        config.default_target = Some(nist.clone());
        let (ctx, connector) = context(&config);
        connector.refuse(&nist);
        let transport = Arc::new(RecordingTransport::binary());
        let mut messages = stream::empty::<ClientMessage>();

        // Act
        let outcome =
            run_client_session(&ctx, Uuid::new_v4(), "", transport.clone(), &mut messages, CancellationToken::new()).await;

        // Assert
        assert!(matches!(outcome, SessionOutcome::ConnectFailed(ConnectError::ConnectionRefused { .. })));
        assert_eq!(
            transport.texts(),
            vec!["[Error: connection refused by time.nist.gov:13]"]
        );
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_backend_eof_ends_session_and_releases_target() {
        // Arrange
        let (ctx, connector) = context(&BridgeConfig::default());
        let ctx = Arc::new(ctx);
        let transport = Arc::new(RecordingTransport::binary());
        let (client_tx, client_rx) = tokio::sync::mpsc::unbounded_channel::<ClientMessage>();

        let task = {
            let ctx = Arc::clone(&ctx);
            let transport = transport.clone();
            tokio::spawn(async move {
                let mut messages = Box::pin(stream::unfold(client_rx, |mut rx| async move {
                    rx.recv().await.map(|m| (m, rx))
                }));
                run_client_session(
                    &ctx,
                    Uuid::new_v4(),
                    "/ws/example.com/23",
                    transport,
                    &mut messages,
                    CancellationToken::new(),
                )
                .await
            })
        };

        // Act
        let (t, server) = connector.next_backend(WAIT).await.unwrap();
        assert_eq!(t.to_string(), "example.com:23");
        assert_eq!(ctx.registry.count(&t), 1);
        drop(server);
        let outcome = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        drop(client_tx);

        // Assert
        assert!(matches!(outcome, SessionOutcome::Finished(SessionEnd::BackendClosed)));
        assert_eq!(transport.texts(), vec!["[Telnet connection closed]"]);
        assert!(ctx.registry.is_empty());
        assert_eq!(ctx.connected_clients(), 0);
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_client_leaving_closes_backend() {
        let (ctx, connector) = context(&BridgeConfig::default());
        let transport = Arc::new(RecordingTransport::binary());
        let mut messages = stream::iter(vec![ClientMessage::Text("bye\r\n".to_string())]);

        let outcome = run_client_session(
            &ctx,
            Uuid::new_v4(),
            "/?target=bbs.example.org%3A23",
            transport.clone(),
            &mut messages,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, SessionOutcome::Finished(SessionEnd::ClientClosed)));
        let (t, _server) = connector.next_backend(WAIT).await.unwrap();
        assert_eq!(t.host(), "bbs.example.org");
        assert!(ctx.registry.is_empty());
    }
}
