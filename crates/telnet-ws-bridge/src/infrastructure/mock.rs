//! In-memory test doubles for the two session seams.
//!
//! - [`RecordingTransport`] stands in for the WebSocket client and records
//!   every frame it is asked to send.
//! - [`MemoryConnector`] stands in for TCP: each `connect` creates a
//!   `tokio::io::duplex` pair and hands the far end to the test as the
//!   "Telnet server".

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use telnet_bridge_core::{LiveTargetRegistry, Target};
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, Notify};

use crate::domain::OutboundFrame;
use crate::infrastructure::connector::{BackendConnect, BackendConnection, ConnectError};
use crate::infrastructure::transport::{ClientTransport, TransportError};

/// A [`ClientTransport`] that records what it is sent.
pub struct RecordingTransport {
    frames: Mutex<Vec<OutboundFrame>>,
    binary: bool,
    refuse_binary: bool,
    connected: AtomicBool,
    closes: AtomicUsize,
    pings: AtomicUsize,
    sent: Notify,
}

impl RecordingTransport {
    /// A client that accepts binary frames.
    pub fn binary() -> Self {
        Self::with_capability(true)
    }

    /// A client that only accepts text frames.
    pub fn text_only() -> Self {
        Self::with_capability(false)
    }

    fn with_capability(binary: bool) -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            binary,
            refuse_binary: false,
            connected: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            sent: Notify::new(),
        }
    }

    /// Advertises binary support but rejects binary frames on send.
    pub fn refusing_binary(mut self) -> Self {
        self.refuse_binary = true;
        self
    }

    /// Makes every later send fail with [`TransportError::Closed`].
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Text frames only, in order.
    pub fn texts(&self) -> Vec<String> {
        self.frames()
            .into_iter()
            .filter_map(|f| f.as_text().map(str::to_string))
            .collect()
    }

    /// Concatenated payload of all binary frames.
    pub fn binary_payload(&self) -> Vec<u8> {
        self.frames()
            .iter()
            .filter(|f| matches!(f, OutboundFrame::Binary(_)))
            .flat_map(|f| f.payload().to_vec())
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` frames were sent or `within` elapses, and
    /// returns the frames recorded so far.
    pub async fn wait_for_frames(&self, count: usize, within: Duration) -> Vec<OutboundFrame> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let frames = self.frames();
            if frames.len() >= count {
                return frames;
            }
            if tokio::time::timeout_at(deadline, self.sent.notified())
                .await
                .is_err()
            {
                return self.frames();
            }
        }
    }
}

#[async_trait]
impl ClientTransport for RecordingTransport {
    fn supports_binary(&self) -> bool {
        self.binary
    }

    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if let OutboundFrame::Binary(bytes) = frame {
            if !self.binary || self.refuse_binary {
                return Err(TransportError::BinaryUnsupported(bytes));
            }
            self.record(OutboundFrame::Binary(bytes));
        } else {
            self.record(frame);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl RecordingTransport {
    fn record(&self, frame: OutboundFrame) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
        self.sent.notify_one();
    }
}

/// A [`BackendConnect`] that connects to in-memory "servers".
pub struct MemoryConnector {
    registry: Arc<LiveTargetRegistry>,
    refused: Mutex<HashSet<Target>>,
    attempts: AtomicUsize,
    accepted_tx: mpsc::UnboundedSender<(Target, DuplexStream)>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Target, DuplexStream)>>,
}

impl MemoryConnector {
    pub fn new(registry: Arc<LiveTargetRegistry>) -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            refused: Mutex::new(HashSet::new()),
            attempts: AtomicUsize::new(0),
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
        }
    }

    /// Makes later connects to `target` fail with `ConnectionRefused`.
    pub fn refuse(&self, target: &Target) {
        self.refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.clone());
    }

    /// Number of `connect` calls so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The server end of the next successful connection, in connect order.
    ///
    /// Returns `None` if nothing connects within `within`.
    pub async fn next_backend(&self, within: Duration) -> Option<(Target, DuplexStream)> {
        let mut rx = self.accepted_rx.lock().await;
        tokio::time::timeout(within, rx.recv()).await.ok().flatten()
    }
}

#[async_trait]
impl BackendConnect for MemoryConnector {
    async fn connect(&self, target: &Target) -> Result<BackendConnection, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(target);
        if refused {
            return Err(ConnectError::ConnectionRefused {
                target: target.clone(),
            });
        }

        let (bridge_end, server_end) = tokio::io::duplex(64 * 1024);
        let lease = self.registry.acquire(target.clone());
        let (reader, writer) = tokio::io::split(bridge_end);
        // The test may not be interested in this backend; that is fine.
        let _ = self.accepted_tx.send((target.clone(), server_end));
        Ok(BackendConnection::new(reader, writer, lease))
    }
}
