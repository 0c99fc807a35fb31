//! Infrastructure layer for telnet-ws-bridge.
//!
//! Everything that touches a socket or a task lives here.
//!
//! # Responsibilities
//!
//! - Binding the WebSocket listener and running the accept loop ([`ws_server`])
//! - Running one client from resolution to cleanup ([`lifecycle`])
//! - Bridging bytes between client and backend, and target switches ([`session`])
//! - The backend→client forwarding task ([`forwarder`])
//! - Dialling backends under a timeout ([`connector`])
//! - Sending frames to the WebSocket client ([`transport`])
//! - Pinging idle clients and dropping silent ones ([`keepalive`])
//!
//! # What does NOT belong here?
//!
//! - Target resolution rules (`telnet-bridge-core`)
//! - Truncation, command detection, text encoding (the application layer)
//! - Configuration parsing (the domain layer and `main.rs`)

pub mod connector;
pub mod forwarder;
pub mod keepalive;
pub mod lifecycle;
#[cfg(test)]
pub mod mock;
pub mod session;
pub mod transport;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use lifecycle::{run_client_session, BridgeContext, SessionOutcome};
pub use ws_server::{run_server, serve};
