//! telnet-ws-bridge library crate.
//!
//! Lets WebSocket clients (typically a terminal emulator in a browser) talk to
//! line-oriented TCP services such as Telnet BBSes and MUDs.  Bytes are passed
//! through untouched in both directions; the bridge does not interpret Telnet
//! option negotiation.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (WebSocket)
//!         ↕
//! [telnet-ws-bridge]
//!   ├── domain/           Pure types: BridgeConfig, client messages, status frames
//!   ├── application/      Truncation, CONNECT detection, UTF-8 framing
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop, handshake (tokio-tungstenite)
//!         ├── lifecycle/  Resolve → connect → bridge → cleanup, per client
//!         ├── session/    Bidirectional forwarding and target switching
//!         └── connector/  TCP to the Telnet server
//!         ↕
//! Telnet server (raw TCP)
//! ```
//!
//! Target resolution, the live target registry and the `CONNECT` command
//! parser live in `telnet-bridge-core` so they can be tested without a runtime.
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `telnet-bridge-core` only.
//! - `infrastructure` depends on all other layers plus `tokio` and `tungstenite`.

/// Domain layer: configuration and message types (no I/O).
pub mod domain;

/// Application layer: per-message decisions.
pub mod application;

/// Infrastructure layer: WebSocket server, sessions, and backend connections.
pub mod infrastructure;
