//! Domain layer for telnet-ws-bridge.
//!
//! Pure types with no I/O: runtime configuration, the messages exchanged with
//! the WebSocket client, and the human-readable status frames the bridge
//! sends when something happens to the backend connection.
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - File I/O (reading the TOML file is done by [`config::ConfigFile::load`],
//!   which only touches `std::fs`, and by `main.rs`)

pub mod config;
pub mod frames;
pub mod messages;

pub use config::{BridgeConfig, ConfigError, ConfigFile, FrameMode, ReadTimeoutPolicy};
pub use frames::StatusFrame;
pub use messages::{ClientMessage, OutboundFrame};
