//! Session bridge: one client connection bound to (at most) one backend.
//!
//! ```text
//!               ┌──────────────── Session ────────────────┐
//!  client msgs ─┼─▶ run() loop ── write_all + flush ──────▶│─▶ Telnet server
//!               │        ▲                                 │
//!  client  ◀────┼── forwarding task ◀── read (chunked) ────│◀─ Telnet server
//!               └─────────────────────────────────────────┘
//! ```
//!
//! The client → backend direction runs inline in [`Session::run`].  The
//! backend → client direction is a spawned task
//! ([`forward_backend_to_client`]) with its own [`CancellationToken`].
//!
//! # Switching targets
//!
//! `CONNECT host:port` from the client stops the forwarding task and waits
//! for it to finish, closes the old backend (returning its registry lease),
//! then connects to the new target.  Client messages are handled one at a
//! time, so nothing meant for the new backend can be written before the
//! switch completes.  If the connect fails the client gets an error frame and
//! the session carries on with no backend.
//!
//! # Interruption
//!
//! Two tokens can end a session from outside: `client_gone` (cancelled by
//! the keepalive when the client stops answering) and `shutdown` (cancelled
//! when the server stops).  Both are watched while waiting for client input
//! and while a write to the backend is in progress, so a backend that stops
//! reading cannot pin the session.
//!
//! # Termination
//!
//! [`Session::terminate`] runs the same close sequence and is idempotent.
//! If a session is dropped without it (for example while unwinding), `Drop`
//! cancels and aborts the forwarding task; the registry lease is returned
//! when the backend halves are dropped.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use telnet_bridge_core::{Target, TargetLease};
use tokio::io::AsyncWriteExt;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::application::{classify_client_message, enforce_max_len, InboundAction};
use crate::domain::{BridgeConfig, ClientMessage, StatusFrame};
use crate::infrastructure::connector::{BackendConnect, BackendConnection, BackendWriter, ConnectError};
use crate::infrastructure::forwarder::{
    forward_backend_to_client, notify, ForwardError, ForwardOutcome, ForwardSettings,
};
use crate::infrastructure::transport::{ClientTransport, TransportError};

/// Per-session limits.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_message_len: usize,
    pub forward: ForwardSettings,
}

impl From<&BridgeConfig> for SessionSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            max_message_len: config.max_message_len,
            forward: ForwardSettings::from(config),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

/// Why [`Session::run`] returned.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client closed its connection.
    ClientClosed,
    /// The backend sent EOF.
    BackendClosed,
    /// Backend read timeout under the disconnect policy.
    ReadTimedOut,
    /// Reading from or writing to the backend failed.
    BackendFailed(ForwardError),
    /// Sending to the client failed.
    ClientFailed(TransportError),
    /// The forwarding task panicked.
    Internal,
    /// The keepalive gave up on the client.
    ClientUnresponsive,
    /// The server is shutting down.
    Shutdown,
}

struct Forwarding {
    cancel: CancellationToken,
    task: JoinHandle<ForwardOutcome>,
}

impl Forwarding {
    /// Cancels the task and waits for it to stop.
    async fn stop(self) -> ForwardOutcome {
        self.cancel.cancel();
        join_outcome(self.task.await)
    }
}

struct ActiveBackend {
    writer: BackendWriter,
    lease: TargetLease,
    started_at: Instant,
    /// `None` once the task has finished on its own.
    forwarding: Option<Forwarding>,
}

impl ActiveBackend {
    fn target(&self) -> &Target {
        self.lease.target()
    }
}

/// One client connection and its current backend.
pub struct Session {
    client_id: Uuid,
    transport: Arc<dyn ClientTransport>,
    connector: Arc<dyn BackendConnect>,
    settings: SessionSettings,
    backend: Option<ActiveBackend>,
    client_gone: CancellationToken,
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(
        client_id: Uuid,
        transport: Arc<dyn ClientTransport>,
        connector: Arc<dyn BackendConnect>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            client_id,
            transport,
            connector,
            settings,
            backend: None,
            client_gone: CancellationToken::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Ends the session when `client_gone` is cancelled.
    pub fn with_client_gone(mut self, client_gone: CancellationToken) -> Self {
        self.client_gone = client_gone;
        self
    }

    /// Ends the session, telling the client why, when `shutdown` is
    /// cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// The target currently bound, if any.
    pub fn current_target(&self) -> Option<&Target> {
        self.backend.as_ref().map(ActiveBackend::target)
    }

    /// Binds an already-open backend connection and starts forwarding from
    /// it.  Any previous backend is closed first.
    pub async fn attach(&mut self, connection: BackendConnection) {
        self.detach().await;

        let (reader, writer, lease, started_at) = connection.into_parts();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            forward_backend_to_client(
                reader,
                Arc::clone(&self.transport),
                self.settings.forward,
                cancel.clone(),
            )
            .in_current_span(),
        );
        debug!("client {}: forwarding from {}", self.client_id, lease.target());

        self.backend = Some(ActiveBackend {
            writer,
            lease,
            started_at,
            forwarding: Some(Forwarding { cancel, task }),
        });
    }

    /// Closes the current backend (if any) and connects to `target`.
    ///
    /// On failure the client is sent the matching error frame and the session
    /// is left without a backend.
    pub async fn switch_target(&mut self, target: Target) -> Result<(), ConnectError> {
        info!("client {}: switching to {target}", self.client_id);
        self.detach().await;

        match self.connector.connect(&target).await {
            Ok(connection) => {
                self.attach(connection).await;
                Ok(())
            }
            Err(err) => {
                warn!("client {}: {err}", self.client_id);
                notify(&*self.transport, StatusFrame::from(&err)).await;
                Err(err)
            }
        }
    }

    /// Handles one client message.  Returns `Some` if the session must end.
    pub async fn handle_client_message(&mut self, message: ClientMessage) -> Option<SessionEnd> {
        let (message, truncated) = enforce_max_len(message, self.settings.max_message_len);
        if let Some(original) = truncated {
            warn!(
                "client {}: message of {original} bytes truncated to {} bytes",
                self.client_id,
                message.len()
            );
        }

        match classify_client_message(message) {
            InboundAction::Switch(target) => {
                // Failure has already been reported to the client.
                let _ = self.switch_target(target).await;
                None
            }
            InboundAction::Reject(frame) => {
                debug!("client {}: rejected control command", self.client_id);
                notify(&*self.transport, frame).await;
                None
            }
            InboundAction::Forward(bytes) => self.forward_to_backend(&bytes).await,
        }
    }

    /// Pumps client messages until the client leaves or the backend side
    /// ends the session.
    pub async fn run<S>(&mut self, messages: &mut S) -> SessionEnd
    where
        S: Stream<Item = ClientMessage> + Unpin,
    {
        loop {
            let event = tokio::select! {
                interrupt = interrupted(&self.client_gone, &self.shutdown) => Event::Interrupted(interrupt),
                outcome = forwarding_finished(self.backend.as_mut().map(|b| &mut b.forwarding)) => {
                    Event::Backend(outcome)
                }
                message = messages.next() => Event::Client(message),
            };

            let end = match event {
                Event::Interrupted(interrupt) => Some(self.on_interrupt(interrupt).await),
                Event::Backend(outcome) => self.on_forwarding_finished(outcome).await,
                Event::Client(Some(message)) => self.handle_client_message(message).await,
                Event::Client(None) => {
                    debug!("client {}: client stream ended", self.client_id);
                    Some(SessionEnd::ClientClosed)
                }
                Event::Written(_) => None,
            };
            if let Some(end) = end {
                return end;
            }
        }
    }

    /// Stops forwarding, closes the backend and returns its registry lease.
    ///
    /// Safe to call any number of times; only the first call with a backend
    /// attached does anything.
    pub async fn terminate(&mut self) {
        if self.detach().await.is_some() {
            debug!("client {}: session terminated", self.client_id);
        }
    }

    async fn forward_to_backend(&mut self, bytes: &[u8]) -> Option<SessionEnd> {
        let Some(backend) = self.backend.as_mut() else {
            debug!("client {}: input with no backend dropped", self.client_id);
            notify(&*self.transport, StatusFrame::NoActiveBackend).await;
            return None;
        };
        if bytes.is_empty() {
            return None;
        }

        let ActiveBackend {
            writer, forwarding, ..
        } = backend;
        let event = tokio::select! {
            biased;
            written = write_and_flush(writer, bytes) => Event::Written(written),
            outcome = forwarding_finished(Some(forwarding)) => Event::Backend(outcome),
            interrupt = interrupted(&self.client_gone, &self.shutdown) => Event::Interrupted(interrupt),
        };

        match event {
            Event::Written(Ok(())) => None,
            Event::Written(Err(e)) => {
                if let Some(target) = self.current_target() {
                    warn!("client {}: write to {target} failed: {e}", self.client_id);
                }
                notify(&*self.transport, StatusFrame::BackendLost).await;
                Some(SessionEnd::BackendFailed(ForwardError::BackendWrite(e)))
            }
            Event::Interrupted(interrupt) => {
                debug!("client {}: backend write abandoned", self.client_id);
                Some(self.on_interrupt(interrupt).await)
            }
            Event::Backend(outcome) => self.on_forwarding_finished(outcome).await,
            Event::Client(_) => None,
        }
    }

    async fn on_interrupt(&mut self, interrupt: Interrupt) -> SessionEnd {
        match interrupt {
            Interrupt::ClientGone => {
                warn!("client {}: client stopped responding", self.client_id);
                SessionEnd::ClientUnresponsive
            }
            Interrupt::Shutdown => {
                info!("client {}: closing for server shutdown", self.client_id);
                notify(&*self.transport, StatusFrame::ServerShutdown).await;
                SessionEnd::Shutdown
            }
        }
    }

    async fn on_forwarding_finished(&mut self, outcome: ForwardOutcome) -> Option<SessionEnd> {
        match outcome {
            ForwardOutcome::BackendClosed => Some(SessionEnd::BackendClosed),
            ForwardOutcome::ReadTimedOut => Some(SessionEnd::ReadTimedOut),
            ForwardOutcome::Failed(ForwardError::Client(e)) => Some(SessionEnd::ClientFailed(e)),
            ForwardOutcome::Failed(e) => Some(SessionEnd::BackendFailed(e)),
            ForwardOutcome::Panicked => {
                notify(&*self.transport, StatusFrame::InternalError).await;
                Some(SessionEnd::Internal)
            }
            ForwardOutcome::Cancelled => {
                debug!("client {}: forwarding stopped without a switch", self.client_id);
                None
            }
        }
    }

    /// Takes the backend out of the session and closes it.
    ///
    /// Returns `None` if there was no backend.
    async fn detach(&mut self) -> Option<ForwardOutcome> {
        let mut backend = self.backend.take()?;

        let outcome = match backend.forwarding.take() {
            Some(forwarding) => forwarding.stop().await,
            None => ForwardOutcome::Cancelled,
        };

        if let Err(e) = backend.writer.shutdown().await {
            debug!("client {}: backend shutdown: {e}", self.client_id);
        }
        let ActiveBackend {
            writer,
            lease,
            started_at,
            ..
        } = backend;
        let target = lease.target().clone();
        drop(writer);
        drop(lease);

        info!(
            "client {}: closed connection to {target} after {:.1?}",
            self.client_id,
            started_at.elapsed()
        );
        Some(outcome)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            if let Some(forwarding) = backend.forwarding.take() {
                forwarding.cancel.cancel();
                forwarding.task.abort();
            }
            debug!(
                "client {}: session dropped with {} still attached",
                self.client_id,
                backend.target()
            );
        }
    }
}

enum Event {
    Backend(ForwardOutcome),
    Client(Option<ClientMessage>),
    Written(io::Result<()>),
    Interrupted(Interrupt),
}

enum Interrupt {
    ClientGone,
    Shutdown,
}

async fn interrupted(client_gone: &CancellationToken, shutdown: &CancellationToken) -> Interrupt {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Interrupt::Shutdown,
        _ = client_gone.cancelled() => Interrupt::ClientGone,
    }
}

/// Resolves when the forwarding task finishes on its own.  Pending forever
/// while there is no task.
async fn forwarding_finished(slot: Option<&mut Option<Forwarding>>) -> ForwardOutcome {
    let Some(slot) = slot else {
        return std::future::pending().await;
    };
    let result = match slot.as_mut() {
        Some(forwarding) => (&mut forwarding.task).await,
        None => return std::future::pending().await,
    };
    // A finished JoinHandle must not be polled again.
    *slot = None;
    join_outcome(result)
}

fn join_outcome(result: Result<ForwardOutcome, JoinError>) -> ForwardOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            error!("forwarding task panicked: {e}");
            ForwardOutcome::Panicked
        }
        Err(_) => ForwardOutcome::Cancelled,
    }
}

async fn write_and_flush(writer: &mut BackendWriter, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}
