//! Echo handler.

use crate::error::HandlerError;
use crate::handler::Handler;
use bytes::Bytes;

/// Returns its input unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

impl Handler for Echo {
    fn handle(&mut self, inbound: &[u8]) -> Result<Bytes, HandlerError> {
        Ok(Bytes::copy_from_slice(inbound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_is_identity() {
        let mut echo = Echo;
        let inputs: [&[u8]; 4] = [b"", b"x", b"hello\n", &[0u8, 255, 10, 13]];
        for input in inputs {
            assert_eq!(&echo.handle(input).unwrap()[..], input);
        }
    }

    #[test]
    fn test_echo_large_input() {
        let mut echo = Echo;
        let input: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
        assert_eq!(echo.handle(&input).unwrap(), Bytes::from(input));
    }
}
