//! The [`Target`] value object: the `(host, port)` pair of a backend Telnet
//! server.
//!
//! A target has a canonical string form, `"host:port"`, which is what users
//! type in URLs and config files and what the registry uses as its key.  Two
//! targets are equal exactly when their canonical forms are equal.
//!
//! IPv6 literals are written in brackets (`"[::1]:23"`) and stored without
//! them, so the host can be handed straight to the socket API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a string is not a valid `host:port` target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid target format '{input}': {reason}")]
pub struct TargetParseError {
    /// The rejected input, verbatim.
    pub input: String,
    /// Short human-readable reason.
    pub reason: &'static str,
}

impl TargetParseError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// A backend Telnet endpoint.
///
/// Immutable once constructed: the fields are private and only readable
/// through [`Target::host`] and [`Target::port`].
///
/// # Example
///
/// ```rust
/// use telnet_bridge_core::Target;
///
/// let target: Target = "time.nist.gov:13".parse().unwrap();
/// assert_eq!(target.host(), "time.nist.gov");
/// assert_eq!(target.port(), 13);
/// assert_eq!(target.to_string(), "time.nist.gov:13");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    host: String,
    port: u16,
}

impl Target {
    /// Builds a target from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`TargetParseError`] if `host` is empty, contains whitespace or
    /// one of `[`, `]`, `/`, or if `port` is zero.  IPv6 hosts are passed
    /// without brackets.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, TargetParseError> {
        let host = host.into();
        if host.is_empty() {
            return Err(TargetParseError::new(&format!("{host}:{port}"), "empty host"));
        }
        if host.chars().any(char::is_whitespace) {
            return Err(TargetParseError::new(&host, "host contains whitespace"));
        }
        if host.contains(['[', ']', '/']) {
            return Err(TargetParseError::new(&host, "host contains '[', ']' or '/'"));
        }
        if port == 0 {
            return Err(TargetParseError::new(&format!("{host}:{port}"), "port must be 1-65535"));
        }
        Ok(Self { host, port })
    }

    /// Builds a target from a host and a port that is still a string, as it
    /// arrives from a URL segment.
    ///
    /// # Errors
    ///
    /// Returns [`TargetParseError`] if the port is not an integer in
    /// `1..=65535` or the host is invalid.
    pub fn from_parts(host: &str, port: &str) -> Result<Self, TargetParseError> {
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| TargetParseError::new(&format!("{host}:{port}"), "port is not an integer in 1-65535"))?;
        Self::new(host.trim(), port)
    }

    /// Hostname or IP address (IPv6 literals without brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Target {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        // Bracketed IPv6 literal: "[::1]:23".
        if let Some(rest) = trimmed.strip_prefix('[') {
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| TargetParseError::new(s, "expected '[ipv6]:port'"))?;
            return Self::from_parts(host, port).map_err(|e| TargetParseError::new(s, e.reason));
        }

        let (host, port) = trimmed
            .split_once(':')
            .ok_or_else(|| TargetParseError::new(s, "expected 'host:port'"))?;
        if port.contains(':') {
            return Err(TargetParseError::new(s, "too many ':' separators"));
        }
        Self::from_parts(host, port).map_err(|e| TargetParseError::new(s, e.reason))
    }
}

impl TryFrom<String> for Target {
    type Error = TargetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
