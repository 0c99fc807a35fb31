//! # telnet-bridge-core
//!
//! Shared library for the Telnet WebSocket bridge containing the pure pieces
//! of the connection-bridge subsystem: the [`Target`] value object, the
//! request-to-target resolver, the live target registry, and the in-band
//! control command parser.
//!
//! This crate has zero dependencies on sockets or an async runtime.  Every
//! function here is either pure or guarded by a plain mutex, which keeps the
//! bridge's decision logic testable without opening a single connection.
//!
//! # Architecture overview
//!
//! A browser cannot open a raw TCP socket, so it cannot talk to a Telnet
//! server directly.  The bridge accepts a WebSocket connection instead, works
//! out which Telnet server the browser wants (the *target*), opens a TCP
//! connection to it, and shovels bytes in both directions.
//!
//! - **`domain`** – The [`Target`] value object and the [`LiveTargetRegistry`]
//!   that counts how many sessions currently use each target.
//!
//! - **`routing`** – [`TargetResolver`]: turns the WebSocket request URI into a
//!   target using explicit path mappings, the `/ws/host/port` subpath
//!   convention, the `?target=host:port` query parameter, and a fallback.
//!
//! - **`protocol`** – The in-band `CONNECT host:port` command a client sends to
//!   switch targets mid-session.

pub mod domain;
pub mod protocol;
pub mod routing;

pub use domain::registry::{LiveTargetRegistry, RegistrySnapshot, TargetLease};
pub use domain::target::{Target, TargetParseError};
pub use protocol::command::{parse_control_command, CommandError, ControlCommand};
pub use routing::resolver::{
    resolve, ParseQueryTargetModeError, QueryTargetMode, ResolutionError, TargetResolver,
};
