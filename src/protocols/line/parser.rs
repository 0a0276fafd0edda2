//! Line framing.

/// Maximum length of a single line, excluding the newline.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult<'a> {
    /// A complete line, without its trailing `\n`.
    Complete {
        line: &'a [u8],
        /// Bytes consumed including the newline.
        consumed: usize,
    },
    /// No newline yet.
    Incomplete,
    /// The pending line already exceeds `MAX_LINE_LENGTH`.
    TooLong,
}

/// Extract the first line from `input`.
pub fn parse(input: &[u8]) -> ParseResult<'_> {
    match find_lf(input) {
        Some(pos) if pos > MAX_LINE_LENGTH => ParseResult::TooLong,
        Some(pos) => ParseResult::Complete {
            line: &input[..pos],
            consumed: pos + 1,
        },
        None if input.len() > MAX_LINE_LENGTH => ParseResult::TooLong,
        None => ParseResult::Incomplete,
    }
}

fn find_lf(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        match parse(b"hello\nworld") {
            ParseResult::Complete { line, consumed } => {
                assert_eq!(line, b"hello");
                assert_eq!(consumed, 6);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_line() {
        assert_eq!(
            parse(b"\n"),
            ParseResult::Complete {
                line: b"",
                consumed: 1
            }
        );
    }

    #[test]
    fn test_incomplete() {
        assert_eq!(parse(b"no newline"), ParseResult::Incomplete);
        assert_eq!(parse(b""), ParseResult::Incomplete);
    }

    #[test]
    fn test_too_long() {
        let input = vec![b'a'; MAX_LINE_LENGTH + 1];
        assert_eq!(parse(&input), ParseResult::TooLong);
    }
}
