//! Error types for the server core.
//!
//! Only bind failures and fatal multiplexer errors ever reach the caller.
//! Per-connection failures (read, write, handler) are recovered inside the
//! event loop by tearing down the affected connection.

use std::io;
use thiserror::Error;

/// Every address candidate for the listening socket failed.
#[derive(Debug, Error)]
#[error("failed to bind {host:?} port {port}: {source}")]
pub struct BindError {
    /// Host as given by the caller (empty means all interfaces).
    pub host: String,
    /// Requested port.
    pub port: u16,
    /// Error from the last candidate tried.
    #[source]
    pub source: io::Error,
}

/// Fatal errors surfaced by the server façade.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Bind(#[from] BindError),

    /// The multiplexer itself failed (not a per-connection error).
    #[error("event loop failed: {0}")]
    Io(#[from] io::Error),
}

/// A handler could not transform its inbound data.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("inbound data is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    /// Sending the handler's output failed.
    #[error("send failed: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        HandlerError::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        HandlerError::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let err = BindError {
            host: String::new(),
            port: 8000,
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        let msg = err.to_string();
        assert!(msg.contains("\"\""));
        assert!(msg.contains("8000"));

        let server_err: ServerError = err.into();
        assert!(matches!(server_err, ServerError::Bind(_)));
    }

    #[test]
    fn test_handler_error_from_utf8() {
        let bytes = [0xffu8, 0xfe];
        let err: HandlerError = std::str::from_utf8(&bytes).unwrap_err().into();
        assert!(matches!(err, HandlerError::Utf8(_)));
    }

    #[test]
    fn test_handler_error_from_io() {
        let err: HandlerError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, HandlerError::Io(_)));
        assert!(err.to_string().starts_with("send failed"));
    }
}
