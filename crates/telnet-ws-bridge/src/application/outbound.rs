//! Backend → client direction: turning raw byte chunks into client frames.
//!
//! A Telnet server sends bytes, not characters.  When the client transport
//! carries binary frames, each chunk goes out untouched.  When it only carries
//! text, the bytes are decoded as UTF-8, and a multi-byte character that
//! straddles two TCP reads must not be turned into two replacement
//! characters.  [`OutboundEncoder`] holds back an incomplete trailing sequence
//! (at most 3 bytes) and prepends it to the next chunk.

use std::borrow::Cow;

use crate::domain::OutboundFrame;

/// Longest prefix of a UTF-8 sequence that can still be incomplete.
const MAX_CARRY: usize = 3;

/// Stateful chunk → frame encoder for one backend connection.
#[derive(Debug)]
pub struct OutboundEncoder {
    binary: bool,
    carry: Vec<u8>,
}

impl OutboundEncoder {
    /// `binary` is the client transport's capability, fixed for the session.
    pub fn new(binary: bool) -> Self {
        Self {
            binary,
            carry: Vec::with_capacity(MAX_CARRY),
        }
    }

    /// Encodes one chunk read from the backend.
    ///
    /// Returns `None` when the whole chunk was held back as an incomplete
    /// character (text mode only).
    pub fn encode(&mut self, chunk: &[u8]) -> Option<OutboundFrame> {
        if self.binary {
            return Some(OutboundFrame::Binary(chunk.to_vec()));
        }

        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(chunk);

        let cut = incomplete_tail_start(&buf);
        self.carry.extend_from_slice(&buf[cut..]);
        if cut == 0 {
            return None;
        }
        Some(OutboundFrame::Text(decode_lossy(&buf[..cut]).into_owned()))
    }

    /// Flushes held-back bytes when the backend stream ends.
    ///
    /// An incomplete sequence at end of stream can never be completed, so it
    /// is emitted as U+FFFD.
    pub fn finish(&mut self) -> Option<OutboundFrame> {
        if self.carry.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.carry);
        Some(OutboundFrame::Text(decode_lossy(&tail).into_owned()))
    }

    /// Number of bytes currently held back.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// Decodes bytes as UTF-8, replacing invalid sequences with U+FFFD.
pub fn decode_lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// Index where a truncated multi-byte sequence at the end of `buf` starts,
/// or `buf.len()` if the buffer does not end mid-character.
fn incomplete_tail_start(buf: &[u8]) -> usize {
    let len = buf.len();
    for back in 1..=MAX_CARRY.min(len) {
        let byte = buf[len - back];
        if byte & 0xC0 == 0x80 {
            // continuation byte, keep looking for the lead byte
            continue;
        }
        let needed = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { len - back } else { len };
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(frame: Option<OutboundFrame>) -> String {
        match frame {
            Some(OutboundFrame::Text(t)) => t,
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_binary_mode_passes_bytes_through() {
        let mut enc = OutboundEncoder::new(true);
        let frame = enc.encode(&[0xFF, 0xFD, 0x18, b'h', b'i']);
        assert_eq!(frame, Some(OutboundFrame::Binary(vec![0xFF, 0xFD, 0x18, b'h', b'i'])));
        assert_eq!(enc.finish(), None);
    }

    #[test]
    fn test_ascii_text_is_emitted_whole() {
        let mut enc = OutboundEncoder::new(false);
        assert_eq!(text(enc.encode(b"Welcome\r\n")), "Welcome\r\n");
        assert_eq!(enc.pending(), 0);
    }

    #[test]
    fn test_split_multibyte_char_is_reassembled() {
        // Arrange: "€" is E2 82 AC, split across two reads.
        let mut enc = OutboundEncoder::new(false);

        // Act
        let first = enc.encode(&[b'a', 0xE2, 0x82]);
        let second = enc.encode(&[0xAC, b'b']);

        // Assert
        assert_eq!(text(first), "a");
        assert_eq!(text(second), "€b");
        assert_eq!(enc.pending(), 0);
    }

    #[test]
    fn test_chunk_of_only_partial_bytes_emits_nothing() {
        let mut enc = OutboundEncoder::new(false);
        assert_eq!(enc.encode(&[0xF0, 0x9F]), None);
        assert_eq!(enc.pending(), 2);
        assert_eq!(text(enc.encode(&[0x98, 0x80])), "😀");
    }

    #[test]
    fn test_invalid_bytes_become_replacement_chars() {
        let mut enc = OutboundEncoder::new(false);
        assert_eq!(text(enc.encode(&[b'a', 0xFF, b'b'])), "a\u{FFFD}b");
    }

    #[test]
    fn test_finish_flushes_incomplete_tail_as_replacement() {
        let mut enc = OutboundEncoder::new(false);
        let _ = enc.encode(&[b'x', 0xE2]);
        assert_eq!(text(enc.finish()), "\u{FFFD}");
        assert_eq!(enc.finish(), None);
    }

    #[test]
    fn test_complete_trailing_char_is_not_held_back() {
        let mut enc = OutboundEncoder::new(false);
        assert_eq!(text(enc.encode("naïve".as_bytes())), "naïve");
        assert_eq!(enc.pending(), 0);
    }
}
