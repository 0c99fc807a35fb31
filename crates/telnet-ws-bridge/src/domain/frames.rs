//! Human-readable status frames sent to the client.
//!
//! These are plain text lines in square brackets, interleaved with the Telnet
//! output the client is already displaying:
//!
//! ```text
//! [Error: connection refused by time.nist.gov:13]
//! [Telnet connection closed]
//! ```
//!
//! They are advisory, not a structured protocol.  The exact strings are kept
//! stable because existing browser front-ends match on some of them.

use std::fmt;

use telnet_bridge_core::{CommandError, ResolutionError, Target};

/// A status message for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFrame {
    /// Nothing in the request (or configuration) named a backend.
    NoTargetSpecified,
    /// A target string was not `host:port`.
    InvalidTargetFormat,
    /// The backend did not accept the connection within the connect timeout.
    ConnectTimeout(Target),
    /// The backend actively refused the connection.
    ConnectionRefused(Target),
    /// Any other connect failure, with the OS message.
    ConnectFailed { target: Target, message: String },
    /// The backend closed the connection (EOF).
    BackendClosed,
    /// A backend read timed out and the configured policy is to disconnect.
    ReadTimedOut,
    /// Reading from or writing to the backend failed.
    BackendLost,
    /// Client input arrived while no backend is connected.
    NoActiveBackend,
    /// Something unexpected went wrong inside the bridge.
    InternalError,
    /// The bridge process is stopping.
    ServerShutdown,
}

impl fmt::Display for StatusFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTargetSpecified => f.write_str("[Error: No target specified]"),
            Self::InvalidTargetFormat => f.write_str("[Error: Invalid target format]"),
            Self::ConnectTimeout(target) => write!(f, "[Error: timeout connecting to {target}]"),
            Self::ConnectionRefused(target) => {
                write!(f, "[Error: connection refused by {target}]")
            }
            Self::ConnectFailed { target, message } => {
                write!(f, "[Error connecting to {target}: {message}]")
            }
            Self::BackendClosed => f.write_str("[Telnet connection closed]"),
            Self::ReadTimedOut => f.write_str("[Telnet read timed out]"),
            Self::BackendLost => f.write_str("[Error: Telnet connection lost]"),
            Self::NoActiveBackend => f.write_str("[Error: no active Telnet connection]"),
            Self::InternalError => f.write_str("[Internal server error]"),
            Self::ServerShutdown => f.write_str("[Telnet bridge shutting down]"),
        }
    }
}

impl From<&ResolutionError> for StatusFrame {
    fn from(err: &ResolutionError) -> Self {
        match err {
            ResolutionError::NoTargetSpecified => Self::NoTargetSpecified,
            ResolutionError::InvalidTargetFormat(_) => Self::InvalidTargetFormat,
        }
    }
}

impl From<&CommandError> for StatusFrame {
    fn from(_: &CommandError) -> Self {
        Self::InvalidTargetFormat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nist() -> Target {
        "time.nist.gov:13".parse().unwrap()
    }

    #[test]
    fn test_connection_refused_names_the_target() {
        let frame = StatusFrame::ConnectionRefused(nist());
        assert_eq!(frame.to_string(), "[Error: connection refused by time.nist.gov:13]");
    }

    #[test]
    fn test_timeout_names_the_target() {
        let frame = StatusFrame::ConnectTimeout(nist());
        assert_eq!(frame.to_string(), "[Error: timeout connecting to time.nist.gov:13]");
    }

    #[test]
    fn test_other_connect_failure_carries_message() {
        let frame = StatusFrame::ConnectFailed {
            target: nist(),
            message: "network is unreachable".to_string(),
        };
        assert_eq!(
            frame.to_string(),
            "[Error connecting to time.nist.gov:13: network is unreachable]"
        );
    }

    #[test]
    fn test_backend_closed_text() {
        assert_eq!(StatusFrame::BackendClosed.to_string(), "[Telnet connection closed]");
    }

    #[test]
    fn test_every_frame_is_bracketed() {
        let frames = [
            StatusFrame::NoTargetSpecified,
            StatusFrame::InvalidTargetFormat,
            StatusFrame::ConnectTimeout(nist()),
            StatusFrame::ConnectionRefused(nist()),
            StatusFrame::ConnectFailed {
                target: nist(),
                message: "x".to_string(),
            },
            StatusFrame::BackendClosed,
            StatusFrame::ReadTimedOut,
            StatusFrame::BackendLost,
            StatusFrame::NoActiveBackend,
            StatusFrame::InternalError,
            StatusFrame::ServerShutdown,
        ];
        for frame in frames {
            let text = frame.to_string();
            assert!(text.starts_with('[') && text.ends_with(']'), "{text}");
        }
    }

    #[test]
    fn test_resolution_errors_map_to_frames() {
        assert_eq!(
            StatusFrame::from(&ResolutionError::NoTargetSpecified),
            StatusFrame::NoTargetSpecified
        );
        let invalid = ResolutionError::from("bad".parse::<Target>().unwrap_err());
        assert_eq!(StatusFrame::from(&invalid), StatusFrame::InvalidTargetFormat);
    }
}
