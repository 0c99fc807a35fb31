//! Opening backend (Telnet) connections.
//!
//! [`TcpConnector`] dials `host:port` under a connect timeout and, only once
//! the TCP handshake has succeeded, takes a [`TargetLease`] from the live
//! target registry.  The lease travels inside the returned
//! [`BackendConnection`], so the registry count for a target always equals
//! the number of open backend connections to it: dropping the connection
//! (or the session that owns it) gives the count back.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use telnet_bridge_core::{LiveTargetRegistry, Target, TargetLease};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::domain::StatusFrame;

/// Read half of a backend connection.
pub type BackendReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a backend connection.
pub type BackendWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Why a backend connection could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("timed out after {after:?} connecting to {target}")]
    Timeout { target: Target, after: Duration },

    #[error("connection refused by {target}")]
    ConnectionRefused { target: Target },

    /// DNS failure, unreachable network, and everything else.
    #[error("error connecting to {target}: {message}")]
    Other { target: Target, message: String },
}

impl ConnectError {
    pub fn target(&self) -> &Target {
        match self {
            Self::Timeout { target, .. }
            | Self::ConnectionRefused { target }
            | Self::Other { target, .. } => target,
        }
    }
}

impl From<&ConnectError> for StatusFrame {
    fn from(err: &ConnectError) -> Self {
        match err {
            ConnectError::Timeout { target, .. } => Self::ConnectTimeout(target.clone()),
            ConnectError::ConnectionRefused { target } => Self::ConnectionRefused(target.clone()),
            ConnectError::Other { target, message } => Self::ConnectFailed {
                target: target.clone(),
                message: message.clone(),
            },
        }
    }
}

/// An open backend connection and the registry lease that counts it.
pub struct BackendConnection {
    reader: BackendReader,
    writer: BackendWriter,
    lease: TargetLease,
    started_at: Instant,
}

impl BackendConnection {
    /// Wraps an already-open byte stream.  The target is taken from `lease`.
    pub fn new<R, W>(reader: R, writer: W, lease: TargetLease) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            lease,
            started_at: Instant::now(),
        }
    }

    pub fn target(&self) -> &Target {
        self.lease.target()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub(crate) fn into_parts(self) -> (BackendReader, BackendWriter, TargetLease, Instant) {
        (self.reader, self.writer, self.lease, self.started_at)
    }
}

impl fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConnection")
            .field("target", self.target())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// Opens backend connections.
///
/// Infrastructure implementation dials TCP; tests hand out in-memory streams.
#[async_trait]
pub trait BackendConnect: Send + Sync {
    /// Connects to `target`.  On success the target is already counted in the
    /// live target registry.
    async fn connect(&self, target: &Target) -> Result<BackendConnection, ConnectError>;
}

/// [`BackendConnect`] over real TCP sockets.
pub struct TcpConnector {
    connect_timeout: Duration,
    registry: Arc<LiveTargetRegistry>,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, registry: Arc<LiveTargetRegistry>) -> Self {
        Self {
            connect_timeout,
            registry,
        }
    }
}

#[async_trait]
impl BackendConnect for TcpConnector {
    async fn connect(&self, target: &Target) -> Result<BackendConnection, ConnectError> {
        debug!("connecting to {target} (timeout {:?})", self.connect_timeout);
        let stream = dial_with_timeout(
            target,
            self.connect_timeout,
            TcpStream::connect((target.host(), target.port())),
        )
        .await?;

        // Telnet traffic is interactive: single keystrokes must not wait for Nagle.
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY for {target}: {e}");
        }

        let lease = self.registry.acquire(target.clone());
        info!("connected to Telnet server {target}");

        let (reader, writer) = stream.into_split();
        Ok(BackendConnection::new(reader, writer, lease))
    }
}

/// Awaits `dial` for at most `limit` and maps the failure modes to
/// [`ConnectError`] variants.
async fn dial_with_timeout<T, F>(target: &Target, limit: Duration, dial: F) -> Result<T, ConnectError>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout(limit, dial).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
            Err(ConnectError::ConnectionRefused {
                target: target.clone(),
            })
        }
        Ok(Err(e)) => Err(ConnectError::Other {
            target: target.clone(),
            message: e.to_string(),
        }),
        Err(_) => Err(ConnectError::Timeout {
            target: target.clone(),
            after: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn target(s: &str) -> Target {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_dial_that_never_finishes_times_out() {
        let t = target("time.nist.gov:13");

        let result = dial_with_timeout(
            &t,
            Duration::from_millis(20),
            std::future::pending::<io::Result<()>>(),
        )
        .await;

        assert_eq!(
            result,
            Err(ConnectError::Timeout {
                target: t,
                after: Duration::from_millis(20)
            })
        );
    }

    #[tokio::test]
    async fn test_refused_error_kind_maps_to_connection_refused() {
        let t = target("time.nist.gov:13");

        let result = dial_with_timeout(&t, Duration::from_secs(1), async {
            Err::<(), _>(io::Error::from(io::ErrorKind::ConnectionRefused))
        })
        .await;

        assert_eq!(result, Err(ConnectError::ConnectionRefused { target: t }));
    }

    #[tokio::test]
    async fn test_other_error_keeps_message() {
        let t = target("nowhere.invalid:23");

        let result = dial_with_timeout(&t, Duration::from_secs(1), async {
            Err::<(), _>(io::Error::new(io::ErrorKind::Other, "no route to host"))
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(
            StatusFrame::from(&err).to_string(),
            "[Error connecting to nowhere.invalid:23: no route to host]"
        );
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_refused_and_not_counted() {
        // Arrange: grab a free port, then close the listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let registry = Arc::new(LiveTargetRegistry::new());
        let connector = TcpConnector::new(Duration::from_secs(2), Arc::clone(&registry));
        let t = Target::new("127.0.0.1", port).unwrap();

        // Act
        let result = connector.connect(&t).await;

        // Assert
        assert_eq!(result.unwrap_err(), ConnectError::ConnectionRefused { target: t });
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_successful_connect_is_counted_until_dropped() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let registry = Arc::new(LiveTargetRegistry::new());
        let connector = TcpConnector::new(Duration::from_secs(2), Arc::clone(&registry));
        let t = Target::new("127.0.0.1", port).unwrap();

        // Act
        let conn = connector.connect(&t).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        // Assert
        assert_eq!(conn.target(), &t);
        assert_eq!(registry.count(&t), 1);

        let (mut reader, mut writer, lease, _) = conn.into_parts();
        writer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        server.write_all(b"pong").await.unwrap();
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(lease);
        assert_eq!(registry.count(&t), 0);
    }
}
