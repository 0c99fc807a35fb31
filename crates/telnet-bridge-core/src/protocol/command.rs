//! Control commands a client can send in-band to steer its own session.
//!
//! The only command is a target switch:
//!
//! ```text
//! CONNECT host:port
//! PROXY:CONNECT host:port      (older clients)
//! ```
//!
//! Commands are recognised only in text messages, only when the keyword is
//! the first word of the message, and case-sensitively.  Anything else is
//! ordinary terminal input and is forwarded to the backend untouched.

use thiserror::Error;

use crate::domain::target::{Target, TargetParseError};

const CONNECT_KEYWORD: &str = "CONNECT";
const LEGACY_PREFIX: &str = "PROXY:";

/// A parsed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Drop the current backend and bridge to this target instead.
    Connect(Target),
}

/// A message that looks like a command but cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("CONNECT requires a host:port argument")]
    MissingTarget,

    #[error(transparent)]
    InvalidTarget(#[from] TargetParseError),
}

/// Classifies a client text message.
///
/// Returns `None` if the message is not a control command, `Some(Ok(..))` for
/// a well-formed command, and `Some(Err(..))` for a malformed one.
///
/// # Example
///
/// ```rust
/// use telnet_bridge_core::{parse_control_command, ControlCommand};
///
/// let cmd = parse_control_command("CONNECT bbs.example.org:23\r\n");
/// assert!(matches!(cmd, Some(Ok(ControlCommand::Connect(_)))));
/// assert!(parse_control_command("ls -la\r\n").is_none());
/// ```
pub fn parse_control_command(text: &str) -> Option<Result<ControlCommand, CommandError>> {
    let line = text.trim();
    let line = line.strip_prefix(LEGACY_PREFIX).unwrap_or(line);

    let rest = line.strip_prefix(CONNECT_KEYWORD)?;
    // "CONNECTED" or "CONNECT:" is not the keyword.
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let argument = rest.trim();
    if argument.is_empty() {
        return Some(Err(CommandError::MissingTarget));
    }
    Some(
        argument
            .parse::<Target>()
            .map(ControlCommand::Connect)
            .map_err(CommandError::from),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_with_target() {
        let cmd = parse_control_command("CONNECT otherhost:2323");
        assert_eq!(
            cmd,
            Some(Ok(ControlCommand::Connect("otherhost:2323".parse().unwrap())))
        );
    }

    #[test]
    fn test_connect_tolerates_line_ending() {
        let cmd = parse_control_command("CONNECT otherhost:2323\r\n");
        assert!(matches!(cmd, Some(Ok(ControlCommand::Connect(_)))));
    }

    #[test]
    fn test_legacy_proxy_prefix_is_accepted() {
        let cmd = parse_control_command("PROXY:CONNECT otherhost:2323");
        assert_eq!(
            cmd,
            Some(Ok(ControlCommand::Connect("otherhost:2323".parse().unwrap())))
        );
    }

    #[test]
    fn test_connect_without_argument_is_malformed() {
        assert_eq!(
            parse_control_command("CONNECT"),
            Some(Err(CommandError::MissingTarget))
        );
        assert_eq!(
            parse_control_command("CONNECT   \n"),
            Some(Err(CommandError::MissingTarget))
        );
    }

    #[test]
    fn test_connect_with_bad_target_is_malformed() {
        let cmd = parse_control_command("CONNECT otherhost:telnet");
        assert!(matches!(cmd, Some(Err(CommandError::InvalidTarget(_)))));
    }

    #[test]
    fn test_ordinary_input_is_not_a_command() {
        assert!(parse_control_command("hello world").is_none());
        assert!(parse_control_command("").is_none());
        assert!(parse_control_command("\r\n").is_none());
    }

    #[test]
    fn test_keyword_must_be_a_whole_word() {
        assert!(parse_control_command("CONNECTED to host").is_none());
        assert!(parse_control_command("CONNECT:host:23").is_none());
    }

    #[test]
    fn test_keyword_is_case_sensitive() {
        assert!(parse_control_command("connect host:23").is_none());
    }

    #[test]
    fn test_keyword_must_start_the_message() {
        assert!(parse_control_command("say CONNECT host:23").is_none());
    }
}
