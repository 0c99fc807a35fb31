//! Client → backend direction: what to do with one client message.
//!
//! ```text
//! ClientMessage ─ enforce_max_len ─▶ ClientMessage ─ classify_client_message ─▶ InboundAction
//!                                                                                 ├─ Forward(bytes)
//!                                                                                 ├─ Switch(target)
//!                                                                                 └─ Reject(frame)
//! ```
//!
//! Both steps are pure; the session bridge logs truncations and carries out
//! the resulting action.

use telnet_bridge_core::{parse_control_command, ControlCommand, Target};

use crate::domain::{ClientMessage, StatusFrame};

/// What the session should do with one client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundAction {
    /// Write these bytes to the backend as-is.
    Forward(Vec<u8>),
    /// Close the current backend and connect to this one.
    Switch(Target),
    /// A malformed control command.  Send the frame, change nothing.
    Reject(StatusFrame),
}

/// Truncates `message` to at most `max_len` bytes.
///
/// Returns the (possibly shortened) message and, if it was cut, its original
/// length.  Text is cut at the last character boundary at or below the limit,
/// so the result is always valid UTF-8 and may be a few bytes shorter than
/// `max_len`.
pub fn enforce_max_len(message: ClientMessage, max_len: usize) -> (ClientMessage, Option<usize>) {
    let original = message.len();
    if original <= max_len {
        return (message, None);
    }

    let truncated = match message {
        ClientMessage::Text(mut text) => {
            let mut cut = max_len;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            ClientMessage::Text(text)
        }
        ClientMessage::Binary(mut bytes) => {
            bytes.truncate(max_len);
            ClientMessage::Binary(bytes)
        }
    };
    (truncated, Some(original))
}

/// Classifies one client message.
///
/// Only text messages can carry a `CONNECT host:port` command.  Everything
/// else, including binary frames that happen to start with `CONNECT`, is
/// forwarded byte-for-byte without adding or stripping line endings.
pub fn classify_client_message(message: ClientMessage) -> InboundAction {
    match message {
        ClientMessage::Binary(bytes) => InboundAction::Forward(bytes),
        ClientMessage::Text(text) => match parse_control_command(&text) {
            Some(Ok(ControlCommand::Connect(target))) => InboundAction::Switch(target),
            Some(Err(err)) => InboundAction::Reject(StatusFrame::from(&err)),
            None => InboundAction::Forward(text.into_bytes()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_is_untouched() {
        let (msg, cut) = enforce_max_len(ClientMessage::Text("look\r\n".to_string()), 4096);
        assert_eq!(msg, ClientMessage::Text("look\r\n".to_string()));
        assert_eq!(cut, None);
    }

    #[test]
    fn test_message_at_limit_is_untouched() {
        let (msg, cut) = enforce_max_len(ClientMessage::Binary(vec![7; 16]), 16);
        assert_eq!(msg.len(), 16);
        assert_eq!(cut, None);
    }

    #[test]
    fn test_oversized_binary_is_truncated_to_limit() {
        // Arrange
        let big = ClientMessage::Binary(vec![b'x'; 5000]);

        // Act
        let (msg, cut) = enforce_max_len(big, 4096);

        // Assert
        assert_eq!(msg.len(), 4096);
        assert_eq!(cut, Some(5000));
    }

    #[test]
    fn test_text_truncation_respects_char_boundary() {
        // Arrange: "é" is two bytes, so a 5-byte limit falls inside the third one.
        let text = ClientMessage::Text("ééé".to_string());

        // Act
        let (msg, cut) = enforce_max_len(text, 5);

        // Assert
        assert_eq!(msg, ClientMessage::Text("éé".to_string()));
        assert_eq!(cut, Some(6));
    }

    #[test]
    fn test_plain_text_is_forwarded_verbatim() {
        let action = classify_client_message(ClientMessage::Text("say hi\r\n".to_string()));
        assert_eq!(action, InboundAction::Forward(b"say hi\r\n".to_vec()));
    }

    #[test]
    fn test_binary_is_forwarded_verbatim() {
        // IAC WILL ECHO, passed through untouched.
        let action = classify_client_message(ClientMessage::Binary(vec![0xFF, 0xFB, 0x01]));
        assert_eq!(action, InboundAction::Forward(vec![0xFF, 0xFB, 0x01]));
    }

    #[test]
    fn test_connect_command_switches_target() {
        let action = classify_client_message(ClientMessage::Text("CONNECT otherhost:2323".to_string()));
        assert_eq!(action, InboundAction::Switch("otherhost:2323".parse().unwrap()));
    }

    #[test]
    fn test_legacy_proxy_connect_switches_target() {
        let action =
            classify_client_message(ClientMessage::Text("PROXY:CONNECT otherhost:2323\n".to_string()));
        assert_eq!(action, InboundAction::Switch("otherhost:2323".parse().unwrap()));
    }

    #[test]
    fn test_malformed_connect_is_rejected() {
        let action = classify_client_message(ClientMessage::Text("CONNECT otherhost".to_string()));
        assert_eq!(action, InboundAction::Reject(StatusFrame::InvalidTargetFormat));
    }

    #[test]
    fn test_binary_connect_is_not_a_command() {
        let action = classify_client_message(ClientMessage::Binary(b"CONNECT a:1".to_vec()));
        assert_eq!(action, InboundAction::Forward(b"CONNECT a:1".to_vec()));
    }
}
