//! Multiplexer token assignment.
//!
//! Connection tokens are the connection's slab key, so a readiness event
//! maps straight back to its registry entry. The two highest token values
//! are reserved for the listening socket and the cross-thread waker.

use mio::Token;

/// Token of the listening socket.
pub(crate) const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Token of the waker used by `ShutdownHandle`.
pub(crate) const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// The source a readiness event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Listener,
    Waker,
    /// Connection with the given registry key.
    Connection(usize),
}

impl From<Token> for Source {
    fn from(token: Token) -> Self {
        match token {
            LISTENER_TOKEN => Source::Listener,
            WAKER_TOKEN => Source::Waker,
            Token(conn_id) => Source::Connection(conn_id),
        }
    }
}

/// Token for a connection key.
pub(crate) fn connection_token(conn_id: usize) -> Token {
    debug_assert!(conn_id < WAKER_TOKEN.0, "connection key collides with reserved token");
    Token(conn_id)
}
