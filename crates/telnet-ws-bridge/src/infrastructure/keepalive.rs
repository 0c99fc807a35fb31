//! WebSocket keepalive for one client.
//!
//! tokio-tungstenite answers pings from the browser but never sends its own,
//! so a client that vanished without a Close frame (NAT timeout, laptop lid
//! closed) looks idle forever.  The keepalive task sends a WebSocket Ping
//! every `interval` and watches [`ClientActivity`], which the read side
//! touches on every frame (Pongs included).  When nothing has arrived for
//! `timeout`, or a Ping cannot be sent, the task cancels the session's
//! `client_gone` token and exits.
//!
//! While a backend write is stalled the session does not read client frames,
//! so Pongs queue up unread.  A backend that stays stalled for longer than
//! `timeout` therefore also ends the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{interval_at, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::BridgeConfig;
use crate::infrastructure::transport::ClientTransport;

/// When the client last sent anything.
#[derive(Debug)]
pub struct ClientActivity {
    started: Instant,
    last_seen_ms: AtomicU64,
}

impl ClientActivity {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    /// Records traffic from the client.
    pub fn touch(&self) {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_seen_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Time since the last [`touch`](Self::touch), or since creation.
    pub fn idle_for(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last_seen)
    }
}

impl Default for ClientActivity {
    fn default() -> Self {
        Self::new()
    }
}

/// Ping cadence and the silence limit.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl From<&BridgeConfig> for KeepaliveSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            interval: config.ping_interval,
            timeout: config.ping_timeout,
        }
    }
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

/// Pings the client until it goes quiet or `client_gone` is cancelled.
///
/// Cancels `client_gone` itself when the client is judged dead.
pub async fn run_keepalive(
    transport: Arc<dyn ClientTransport>,
    activity: Arc<ClientActivity>,
    settings: KeepaliveSettings,
    client_gone: CancellationToken,
) {
    // The first tick is one interval out, not immediate.
    let start = tokio::time::Instant::now() + settings.interval;
    let mut ticker = interval_at(start, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = client_gone.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let idle = activity.idle_for();
        if idle >= settings.timeout {
            warn!("no client traffic for {idle:.1?}; treating client as gone");
            client_gone.cancel();
            return;
        }

        match timeout(settings.timeout, transport.ping()).await {
            Ok(Ok(())) => debug!("keepalive ping sent (idle {idle:.1?})"),
            Ok(Err(e)) => {
                debug!("keepalive ping failed: {e}");
                client_gone.cancel();
                return;
            }
            Err(_) => {
                warn!("keepalive ping not accepted within {:?}", settings.timeout);
                client_gone.cancel();
                return;
            }
        }
    }
}
