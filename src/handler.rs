//! Per-connection request handling strategy.
//!
//! A `HandlerFactory` is the only coupling between the server core and
//! application logic. On every admitted connection the factory produces one
//! `Handler`, which lives exactly as long as the connection.
//!
//! Handlers run on the event loop thread. `handle` must be computation only:
//! no socket access, no sleeping, no blocking I/O.

use crate::error::HandlerError;
use bytes::Bytes;
use std::net::SocketAddr;

/// Identity of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    /// Registry key of the connection (stable for its lifetime).
    pub conn_id: usize,
    /// Remote address.
    pub peer_addr: SocketAddr,
    /// Local address the connection was accepted on.
    pub local_addr: SocketAddr,
}

/// Transforms inbound bytes into outbound bytes for one connection.
pub trait Handler {
    /// Transform one chunk of inbound data.
    ///
    /// An empty result means "nothing to send"; the connection keeps
    /// waiting for more input.
    fn handle(&mut self, inbound: &[u8]) -> Result<Bytes, HandlerError>;

    /// Called once when `handle` fails or its output cannot be sent, right
    /// before the connection is torn down.
    fn on_error(&mut self, _error: &HandlerError) {}
}

/// Produces a handler for every admitted connection.
pub trait HandlerFactory {
    type Handler: Handler;

    /// Build the handler for a freshly accepted connection.
    fn create(&mut self, peer: &PeerInfo) -> Self::Handler;

    /// Decide whether a just-accepted connection is admitted.
    ///
    /// Rejected sockets are closed immediately and no handler is created.
    fn verify_connection(&mut self, _peer: &PeerInfo) -> bool {
        true
    }

    /// Called when a wait with a timeout elapses without any events.
    fn on_timeout(&mut self) {}
}

impl<F, H> HandlerFactory for F
where
    F: FnMut(&PeerInfo) -> H,
    H: Handler,
{
    type Handler = H;

    fn create(&mut self, peer: &PeerInfo) -> H {
        self(peer)
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn handle(&mut self, inbound: &[u8]) -> Result<Bytes, HandlerError> {
        (**self).handle(inbound)
    }

    fn on_error(&mut self, error: &HandlerError) {
        (**self).on_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl Handler for Upper {
        fn handle(&mut self, inbound: &[u8]) -> Result<Bytes, HandlerError> {
            Ok(Bytes::from(inbound.to_ascii_uppercase()))
        }
    }

    fn peer() -> PeerInfo {
        PeerInfo {
            conn_id: 3,
            peer_addr: "127.0.0.1:50000".parse().unwrap(),
            local_addr: "127.0.0.1:8000".parse().unwrap(),
        }
    }

    #[test]
    fn test_closure_factory() {
        let mut created = Vec::new();
        let mut factory = |p: &PeerInfo| {
            created.push(p.conn_id);
            Upper
        };

        assert!(factory.verify_connection(&peer()));
        let mut handler = factory.create(&peer());
        assert_eq!(&handler.handle(b"abc").unwrap()[..], b"ABC");
        drop(factory);
        assert_eq!(created, vec![3]);
    }

    #[test]
    fn test_boxed_handler() {
        let mut handler: Box<dyn Handler> = Box::new(Upper);
        assert_eq!(&handler.handle(b"x").unwrap()[..], b"X");
    }
}
