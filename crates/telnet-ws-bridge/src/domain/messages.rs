//! Messages exchanged with the WebSocket client.
//!
//! The bridge is byte-transparent: it does not define a message protocol of
//! its own beyond the `CONNECT host:port` command and the bracketed status
//! frames.  These two enums only record whether a WebSocket payload was text
//! or binary, because that decides how it is encoded on the other side.
//!
//! ```text
//! Browser → Bridge:  WebSocket text/binary frame  →  ClientMessage  →  raw bytes to Telnet
//! Bridge  → Browser: raw bytes from Telnet  →  OutboundFrame  →  WebSocket text/binary frame
//! ```

/// One message received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// A WebSocket text frame.  May carry a control command.
    Text(String),
    /// A WebSocket binary frame.  Always forwarded byte-for-byte.
    Binary(Vec<u8>),
}

impl ClientMessage {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One message to send to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl OutboundFrame {
    /// Returns the text payload, if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the raw payload bytes regardless of frame kind.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_len_counts_bytes() {
        assert_eq!(ClientMessage::Text("héllo".to_string()).len(), 6);
        assert_eq!(ClientMessage::Binary(vec![0xFF, 0xFB, 0x01]).len(), 3);
        assert!(ClientMessage::Text(String::new()).is_empty());
    }

    #[test]
    fn test_outbound_payload_is_raw_bytes() {
        assert_eq!(OutboundFrame::Text("ok".to_string()).payload(), b"ok");
        assert_eq!(OutboundFrame::Binary(vec![1, 2]).payload(), &[1, 2]);
        assert_eq!(OutboundFrame::Binary(vec![1]).as_text(), None);
    }
}
