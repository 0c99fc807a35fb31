//! Bridge configuration types.
//!
//! Two layers:
//!
//! - [`ConfigFile`] mirrors the optional TOML file on disk.  Every field has a
//!   serde default, so a partial file (or no file at all) is valid.
//! - [`BridgeConfig`] is the validated runtime view: bind address parsed,
//!   configured targets parsed into [`Target`]s, timeouts as [`Duration`]s.
//!
//! `main.rs` loads the file (if any), applies CLI overrides on top of it, and
//! calls [`ConfigFile::into_bridge_config`] exactly once at startup.  Nothing
//! is re-read while the bridge is running.
//!
//! ```toml
//! [server]
//! ws_host = "0.0.0.0"
//! ws_port = 8123
//! default_target = "time.nist.gov:13"
//!
//! [timeouts]
//! connect_secs = 10
//! read_secs = 30
//! read_timeout_policy = "retry"
//! ping_interval_secs = 20
//! ping_timeout_secs = 30
//!
//! [mappings]
//! "/nist" = "time.nist.gov:13"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use telnet_bridge_core::{QueryTargetMode, Target, TargetParseError, TargetResolver};
use thiserror::Error;

/// Error type for loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `ws_host` is not an IP address.
    #[error("invalid bind host '{0}': expected an IPv4 or IPv6 address")]
    InvalidBindHost(String),

    /// A configured target (default target or mapping value) is malformed.
    #[error("invalid target for {setting}: {source}")]
    InvalidTarget {
        setting: String,
        #[source]
        source: TargetParseError,
    },

    /// A numeric setting is out of range.
    #[error("invalid value for {setting}: {reason}")]
    InvalidValue {
        setting: &'static str,
        reason: &'static str,
    },
}

// ── Policy enums ──────────────────────────────────────────────────────────────

/// What to do when a backend read produces nothing within the read timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadTimeoutPolicy {
    /// Keep waiting.  An idle Telnet server is not an error.
    #[default]
    Retry,
    /// Tell the client `[Telnet read timed out]` and end the session.
    Disconnect,
}

/// How backend output is framed towards the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameMode {
    /// Raw bytes in WebSocket binary frames.
    #[default]
    Binary,
    /// UTF-8 text frames, for clients that cannot handle binary frames.
    /// Invalid byte sequences become U+FFFD.
    Text,
}

/// Error returned when parsing an unknown policy or mode name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown value '{value}' (expected {expected})")]
pub struct ParseSettingError {
    value: String,
    expected: &'static str,
}

impl FromStr for ReadTimeoutPolicy {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(ParseSettingError {
                value: other.to_string(),
                expected: "retry or disconnect",
            }),
        }
    }
}

impl fmt::Display for ReadTimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Retry => "retry",
            Self::Disconnect => "disconnect",
        })
    }
}

impl FromStr for FrameMode {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "text" => Ok(Self::Text),
            other => Err(ParseSettingError {
                value: other.to_string(),
                expected: "binary or text",
            }),
        }
    }
}

impl fmt::Display for FrameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Binary => "binary",
            Self::Text => "text",
        })
    }
}

// ── Runtime configuration ─────────────────────────────────────────────────────

/// All runtime configuration for the bridge.
///
/// Build this once at startup and wrap it in an `Arc` so every session task
/// can share it.
///
/// # Example
///
/// ```rust
/// use telnet_ws_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 8123);
/// assert!(cfg.default_target.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// The address and port the WebSocket server binds to.
    pub ws_bind_addr: SocketAddr,

    /// Backend used when nothing in the request URI names one.
    pub default_target: Option<Target>,

    /// Exact request-path shortcuts, e.g. `/nist` → `time.nist.gov:13`.
    pub path_mappings: BTreeMap<String, Target>,

    /// Where `?target=` sits in the resolution order.
    pub query_target: QueryTargetMode,

    /// Upper bound on a backend TCP connect.
    pub connect_timeout: Duration,

    /// Upper bound on a single backend read.
    pub read_timeout: Duration,

    pub read_timeout_policy: ReadTimeoutPolicy,

    /// How often an idle client is sent a WebSocket Ping.
    pub ping_interval: Duration,

    /// A client that sends nothing (not even a Pong) for this long is
    /// dropped.  Also bounds a single send to the client.
    pub ping_timeout: Duration,

    /// Client messages longer than this (in bytes) are truncated.
    pub max_message_len: usize,

    /// Size of one backend read.
    pub read_chunk_size: usize,

    pub frame_mode: FrameMode,

    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl BridgeConfig {
    /// Builds the request-URI resolver from the configured mappings and
    /// default target.
    pub fn resolver(&self) -> TargetResolver {
        let mappings: HashMap<String, String> = self
            .path_mappings
            .iter()
            .map(|(path, target)| (path.clone(), target.to_string()))
            .collect();
        let fallback = self.default_target.as_ref().map(Target::to_string);
        TargetResolver::new(mappings, fallback).with_query_mode(self.query_target)
    }
}

impl Default for BridgeConfig {
    /// | Field               | Default        |
    /// |---------------------|----------------|
    /// | ws_bind_addr        | `0.0.0.0:8123` |
    /// | default_target      | none           |
    /// | connect_timeout     | 10 seconds     |
    /// | read_timeout        | 30 seconds     |
    /// | read_timeout_policy | retry          |
    /// | ping_interval       | 20 seconds     |
    /// | ping_timeout        | 30 seconds     |
    /// | max_message_len     | 4096 bytes     |
    /// | read_chunk_size     | 1024 bytes     |
    /// | frame_mode          | binary         |
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::new(IpAddr::from([0, 0, 0, 0]), default_ws_port()),
            default_target: None,
            path_mappings: BTreeMap::new(),
            query_target: QueryTargetMode::default(),
            connect_timeout: Duration::from_secs(default_connect_secs()),
            read_timeout: Duration::from_secs(default_read_secs()),
            read_timeout_policy: ReadTimeoutPolicy::default(),
            ping_interval: Duration::from_secs(default_ping_interval_secs()),
            ping_timeout: Duration::from_secs(default_ping_timeout_secs()),
            max_message_len: default_max_message_len(),
            read_chunk_size: default_read_chunk_size(),
            frame_mode: FrameMode::default(),
            log_level: default_log_level(),
        }
    }
}

// ── Config file schema ────────────────────────────────────────────────────────

/// The TOML configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub limits: LimitSection,
    /// Exact path → `host:port`.
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_ws_host")]
    pub ws_host: String,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target: Option<String>,
    #[serde(default)]
    pub frame_mode: FrameMode,
    #[serde(default)]
    pub query_target: QueryTargetMode,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// `[timeouts]` section.  Values are whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSection {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_read_secs")]
    pub read_secs: u64,
    #[serde(default)]
    pub read_timeout_policy: ReadTimeoutPolicy,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
}

/// `[limits]` section.  Values are bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitSection {
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

fn default_ws_host() -> String {
    "0.0.0.0".to_string()
}
fn default_ws_port() -> u16 {
    8123
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_connect_secs() -> u64 {
    10
}
fn default_read_secs() -> u64 {
    30
}
fn default_ping_interval_secs() -> u64 {
    20
}
fn default_ping_timeout_secs() -> u64 {
    30
}
fn default_max_message_len() -> usize {
    4096
}
fn default_read_chunk_size() -> usize {
    1024
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            ws_host: default_ws_host(),
            ws_port: default_ws_port(),
            default_target: None,
            frame_mode: FrameMode::default(),
            query_target: QueryTargetMode::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            read_secs: default_read_secs(),
            read_timeout_policy: ReadTimeoutPolicy::default(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
        }
    }
}

impl Default for LimitSection {
    fn default() -> Self {
        Self {
            max_message_len: default_max_message_len(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

impl ConfigFile {
    /// Reads and parses the TOML file at `path`.
    ///
    /// Unlike a settings file in a per-user config directory, this path was
    /// named explicitly by the operator, so a missing file is an error.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// if it is not valid TOML for this schema.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validates every setting and produces the runtime configuration.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidBindHost`] if `ws_host` is not an IP address.
    /// - [`ConfigError::InvalidTarget`] if the default target or any mapping
    ///   value is not `host:port`.
    /// - [`ConfigError::InvalidValue`] for zero timeouts or sizes.
    pub fn into_bridge_config(self) -> Result<BridgeConfig, ConfigError> {
        let ip: IpAddr = self
            .server
            .ws_host
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidBindHost(self.server.ws_host.clone()))?;

        let default_target = self
            .server
            .default_target
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<Target>().map_err(|source| ConfigError::InvalidTarget {
                    setting: "server.default_target".to_string(),
                    source,
                })
            })
            .transpose()?;

        let mut path_mappings = BTreeMap::new();
        for (path, value) in self.mappings {
            let target = value.parse::<Target>().map_err(|source| ConfigError::InvalidTarget {
                setting: format!("mappings.\"{path}\""),
                source,
            })?;
            path_mappings.insert(path, target);
        }

        if self.timeouts.connect_secs == 0 {
            return Err(ConfigError::InvalidValue {
                setting: "timeouts.connect_secs",
                reason: "must be at least 1",
            });
        }
        if self.timeouts.read_secs == 0 {
            return Err(ConfigError::InvalidValue {
                setting: "timeouts.read_secs",
                reason: "must be at least 1",
            });
        }
        if self.timeouts.ping_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                setting: "timeouts.ping_interval_secs",
                reason: "must be at least 1",
            });
        }
        if self.timeouts.ping_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                setting: "timeouts.ping_timeout_secs",
                reason: "must be at least 1",
            });
        }
        if self.limits.max_message_len == 0 {
            return Err(ConfigError::InvalidValue {
                setting: "limits.max_message_len",
                reason: "must be at least 1",
            });
        }
        if self.limits.read_chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                setting: "limits.read_chunk_size",
                reason: "must be at least 1",
            });
        }

        Ok(BridgeConfig {
            ws_bind_addr: SocketAddr::new(ip, self.server.ws_port),
            default_target,
            path_mappings,
            query_target: self.server.query_target,
            connect_timeout: Duration::from_secs(self.timeouts.connect_secs),
            read_timeout: Duration::from_secs(self.timeouts.read_secs),
            read_timeout_policy: self.timeouts.read_timeout_policy,
            ping_interval: Duration::from_secs(self.timeouts.ping_interval_secs),
            ping_timeout: Duration::from_secs(self.timeouts.ping_timeout_secs),
            max_message_len: self.limits.max_message_len,
            read_chunk_size: self.limits.read_chunk_size,
            frame_mode: self.server.frame_mode,
            log_level: self.server.log_level,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
