//! Telnet WebSocket Bridge entry point.
//!
//! Accepts WebSocket connections from browsers and connects each one to a
//! Telnet (raw TCP) server chosen from the request URI:
//!
//! ```text
//! ws://bridge:8123/nist                    exact mapping from the config file
//! ws://bridge:8123/ws/telehack.com/23      subpath convention
//! ws://bridge:8123/?target=bbs.example:23  query parameter
//! ws://bridge:8123/                        --default-target, if set
//! ```
//!
//! Once connected, the client can send `CONNECT host:port` to switch to a
//! different server without reconnecting the WebSocket.
//!
//! # Usage
//!
//! ```text
//! telnet-ws-bridge [OPTIONS]
//!
//! Options:
//!   --config <FILE>                 TOML config file
//!   --ws-host <IP>                  WebSocket bind address [default: 0.0.0.0]
//!   --ws-port <PORT>                WebSocket port [default: 8123]
//!   --default-target <HOST:PORT>    Backend when the URI names none
//!   --connect-timeout <SECS>        Backend connect timeout [default: 10]
//!   --read-timeout <SECS>           Backend read timeout [default: 30]
//!   --read-timeout-policy <POLICY>  retry | disconnect [default: retry]
//!   --ping-interval <SECS>          WebSocket Ping cadence [default: 20]
//!   --ping-timeout <SECS>           Silence before a client is dropped [default: 30]
//!   --max-message-len <BYTES>       Client message size cap [default: 4096]
//!   --frame-mode <MODE>             binary | text [default: binary]
//!   --query-target <MODE>           after-subpath | before-subpath | disabled
//!   --log-level <FILTER>            Used when RUST_LOG is unset [default: info]
//! ```
//!
//! Command-line values override the config file; anything given in neither
//! place takes the built-in default.
//!
//! Ctrl+C or SIGTERM stops the accept loop.  Connected clients are sent
//! `[Telnet bridge shutting down]` and a Close frame before the process
//! exits.
//!
//! # Environment variable overrides
//!
//! | Variable                       | Same as            |
//! |--------------------------------|--------------------|
//! | `TELNET_BRIDGE_CONFIG`         | `--config`         |
//! | `TELNET_BRIDGE_WS_HOST`        | `--ws-host`        |
//! | `TELNET_BRIDGE_WS_PORT`        | `--ws-port`        |
//! | `TELNET_BRIDGE_DEFAULT_TARGET` | `--default-target` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use telnet_bridge_core::QueryTargetMode;
use telnet_ws_bridge::domain::{BridgeConfig, ConfigFile, FrameMode, ReadTimeoutPolicy};
use telnet_ws_bridge::infrastructure::run_server;

const BANNER: &str = r"
  _____    _            _     ___      _    _
 |_   _|__| |_ _  ___ _| |_  | _ )_ _ (_)__| |__ _ ___
   | |/ -_) | ' \/ -_)  _|   | _ \ '_|| / _` / _` / -_)
   |_|\___|_|_||_\___|\__|   |___/_|  |_\__,_\__, \___|
                                             |___/
          WebSocket  <->  Telnet
";

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Telnet WebSocket bridge.
///
/// Every option is optional: unset options fall back to the config file, then
/// to the built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "telnet-ws-bridge",
    about = "WebSocket-to-Telnet bridge for browser terminal clients",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "TELNET_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the WebSocket server to.
    #[arg(long, env = "TELNET_BRIDGE_WS_HOST")]
    ws_host: Option<String>,

    /// TCP port for the WebSocket server.
    #[arg(long, env = "TELNET_BRIDGE_WS_PORT")]
    ws_port: Option<u16>,

    /// Backend used when the request URI names none, as `host:port`.
    #[arg(long, env = "TELNET_BRIDGE_DEFAULT_TARGET")]
    default_target: Option<String>,

    /// Backend connect timeout in seconds.
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Backend read timeout in seconds.
    #[arg(long)]
    read_timeout: Option<u64>,

    /// What a backend read timeout does: `retry` keeps waiting, `disconnect`
    /// ends the session.
    #[arg(long)]
    read_timeout_policy: Option<ReadTimeoutPolicy>,

    /// Seconds between WebSocket Pings to the client.
    #[arg(long)]
    ping_interval: Option<u64>,

    /// Seconds without any client traffic before the session is ended.
    #[arg(long)]
    ping_timeout: Option<u64>,

    /// Client messages longer than this many bytes are truncated.
    #[arg(long)]
    max_message_len: Option<usize>,

    /// `binary` sends backend output as binary frames, `text` as UTF-8 text.
    #[arg(long)]
    frame_mode: Option<FrameMode>,

    /// Where `?target=host:port` sits in the resolution order.
    #[arg(long)]
    query_target: Option<QueryTargetMode>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file (if any), applies the CLI overrides and
    /// validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if any
    /// setting is invalid (bad bind address, malformed target, zero timeout).
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let mut file = match &self.config {
            Some(path) => ConfigFile::load(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => ConfigFile::default(),
        };
        self.apply_overrides(&mut file);
        file.into_bridge_config().context("invalid configuration")
    }

    fn apply_overrides(self, file: &mut ConfigFile) {
        if let Some(host) = self.ws_host {
            file.server.ws_host = host;
        }
        if let Some(port) = self.ws_port {
            file.server.ws_port = port;
        }
        if let Some(target) = self.default_target {
            file.server.default_target = Some(target);
        }
        if let Some(mode) = self.frame_mode {
            file.server.frame_mode = mode;
        }
        if let Some(mode) = self.query_target {
            file.server.query_target = mode;
        }
        if let Some(level) = self.log_level {
            file.server.log_level = level;
        }
        if let Some(secs) = self.connect_timeout {
            file.timeouts.connect_secs = secs;
        }
        if let Some(secs) = self.read_timeout {
            file.timeouts.read_secs = secs;
        }
        if let Some(policy) = self.read_timeout_policy {
            file.timeouts.read_timeout_policy = policy;
        }
        if let Some(secs) = self.ping_interval {
            file.timeouts.ping_interval_secs = secs;
        }
        if let Some(secs) = self.ping_timeout {
            file.timeouts.ping_timeout_secs = secs;
        }
        if let Some(len) = self.max_message_len {
            file.limits.max_message_len = len;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. CLI arguments and the optional config file become a [`BridgeConfig`].
/// 2. `tracing_subscriber` is initialised; `RUST_LOG` wins over `--log-level`.
/// 3. The banner and listening URL are printed.
/// 4. A Ctrl+C / SIGTERM handler clears the shared `running` flag.
/// 5. [`run_server`] accepts clients until the flag is cleared, then closes
///    the sessions still running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_bridge_config()?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config.log_level))
        .init();

    print_banner(config.ws_bind_addr);

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(signal) => {
                info!("{signal} received; Telnet bridge is shutting down gracefully...");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for shutdown signals: {e}");
            }
        }
    });

    // ── Main server loop ──────────────────────────────────────────────────────
    run_server(config, running).await?;

    info!("Telnet bridge stopped");
    Ok(())
}

/// Resolves with the name of the first shutdown signal received.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "Ctrl+C"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
}

/// `RUST_LOG` if set, else `level` with the WebSocket library capped at warn.
fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{level},tokio_tungstenite=warn,tungstenite=warn")))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn print_banner(addr: SocketAddr) {
    println!("{BANNER}");
    println!("Listening on: ws://{addr}\n");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
