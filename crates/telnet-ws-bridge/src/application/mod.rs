//! Application layer for telnet-ws-bridge.
//!
//! Decides *what* happens to each piece of traffic without touching a socket:
//!
//! - [`inbound`]: client messages are size-checked and classified as raw
//!   input for the backend or as a `CONNECT host:port` target switch.
//! - [`outbound`]: backend byte chunks are turned into client frames,
//!   binary or UTF-8 text depending on what the client transport carries.
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or listening for connections (that is infrastructure)
//! - Tokio task spawning and cancellation (session bridge, infrastructure)
//! - WebSocket framing (handled by tokio-tungstenite)

pub mod inbound;
pub mod outbound;

pub use inbound::{classify_client_message, enforce_max_len, InboundAction};
pub use outbound::{decode_lossy, OutboundEncoder};
