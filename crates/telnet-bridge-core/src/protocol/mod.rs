//! In-band control protocol spoken by clients on top of the byte stream.

pub mod command;

pub use command::{parse_control_command, CommandError, ControlCommand};
