//! Line echo handler.

use super::parser::{self, ParseResult};
use crate::error::HandlerError;
use crate::handler::Handler;
use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

/// Echoes complete lines, trimmed, one `\n` each.
#[derive(Debug, Default)]
pub struct LineEcho {
    /// Bytes of a line whose newline has not arrived yet.
    pending: BytesMut,
}

impl LineEcho {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes buffered while waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Handler for LineEcho {
    fn handle(&mut self, inbound: &[u8]) -> Result<Bytes, HandlerError> {
        self.pending.extend_from_slice(inbound);

        let mut output = BytesMut::new();
        loop {
            let consumed = match parser::parse(&self.pending) {
                ParseResult::Complete { line, consumed } => {
                    let text = std::str::from_utf8(line)?.trim();
                    output.extend_from_slice(text.as_bytes());
                    output.extend_from_slice(b"\n");
                    consumed
                }
                ParseResult::Incomplete => break,
                ParseResult::TooLong => {
                    return Err(HandlerError::invalid_input(format!(
                        "line exceeds {} bytes",
                        parser::MAX_LINE_LENGTH
                    )));
                }
            };
            self.pending.advance(consumed);
        }

        trace!(pending = self.pending.len(), out = output.len(), "Line echo");
        Ok(output.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut handler = LineEcho::new();
        let out = handler.handle(b"  hello world \r\n").unwrap();
        assert_eq!(&out[..], b"hello world\n");
        assert_eq!(handler.pending_len(), 0);
    }

    #[test]
    fn test_partial_line_is_buffered() {
        let mut handler = LineEcho::new();
        assert!(handler.handle(b"hel").unwrap().is_empty());
        assert_eq!(handler.pending_len(), 3);

        let out = handler.handle(b"lo\nwor").unwrap();
        assert_eq!(&out[..], b"hello\n");
        assert_eq!(handler.pending_len(), 3);
    }

    #[test]
    fn test_multiple_lines() {
        let mut handler = LineEcho::new();
        let out = handler.handle(b"a\n b \n\n").unwrap();
        assert_eq!(&out[..], b"a\nb\n\n");
    }

    #[test]
    fn test_invalid_utf8() {
        let mut handler = LineEcho::new();
        let err = handler.handle(&[0xff, 0xfe, b'\n']).unwrap_err();
        assert!(matches!(err, HandlerError::Utf8(_)));
    }

    #[test]
    fn test_line_too_long() {
        let mut handler = LineEcho::new();
        let input = vec![b'x'; parser::MAX_LINE_LENGTH + 1];
        let err = handler.handle(&input).unwrap_err();
        assert!(matches!(err, HandlerError::InvalidInput(_)));
    }
}
