//! Per-connection state and the connection registry.
//!
//! Each connection owns its socket, its handler and a FIFO of outbound
//! messages. A connection is registered with the multiplexer for exactly
//! one direction at a time: READABLE while its queue is empty, WRITABLE
//! while anything is queued.

use crate::handler::PeerInfo;
use crate::runtime::token::connection_token;
use bytes::Bytes;
use mio::net::TcpStream;
use mio::{Interest, Registry};
use slab::Slab;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use tracing::debug;

/// A single accepted client connection.
pub(crate) struct Connection<H> {
    stream: TcpStream,
    peer: PeerInfo,
    handler: H,
    /// Pending outbound messages, oldest first.
    outbound: VecDeque<Bytes>,
    /// Bytes of the front message already sent.
    written: usize,
    /// Interest currently registered with the multiplexer.
    interest: Interest,
}

impl<H> Connection<H> {
    /// Create a connection in the initial reading state.
    pub fn new(stream: TcpStream, peer: PeerInfo, handler: H) -> Self {
        Self {
            stream,
            peer,
            handler,
            outbound: VecDeque::new(),
            written: 0,
            interest: Interest::READABLE,
        }
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    #[cfg(test)]
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Number of queued messages (including a partially sent one).
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Register the socket under its connection token.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(
            &mut self.stream,
            connection_token(self.peer.conn_id),
            self.interest,
        )
    }

    /// Re-register with `interest`.
    ///
    /// Always issues the re-registration, even when the interest is
    /// unchanged: readiness is edge-triggered and re-arming is what makes
    /// data already buffered in the kernel produce a new event.
    pub fn set_interest(&mut self, registry: &Registry, interest: Interest) -> io::Result<()> {
        registry.reregister(
            &mut self.stream,
            connection_token(self.peer.conn_id),
            interest,
        )?;
        self.interest = interest;
        Ok(())
    }

    /// Non-blocking receive into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    /// Append a message to the outbound queue. Empty messages are dropped.
    pub fn enqueue(&mut self, message: Bytes) {
        if !message.is_empty() {
            self.outbound.push_back(message);
        }
    }

    /// Send as much of the front message as the socket accepts.
    ///
    /// Returns `Ok(None)` when nothing is queued. A fully sent message is
    /// popped; a partially sent one keeps its offset for the next call.
    pub fn write_front(&mut self) -> io::Result<Option<usize>> {
        let Some(front) = self.outbound.front() else {
            return Ok(None);
        };

        let n = self.stream.write(&front[self.written..])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
        }

        self.written += n;
        if self.written >= front.len() {
            self.outbound.pop_front();
            self.written = 0;
        }
        Ok(Some(n))
    }

    /// First half of teardown: stop readiness delivery, then half-close.
    ///
    /// The socket itself is closed when the connection is dropped.
    pub fn release(&mut self, registry: &Registry) {
        if let Err(e) = registry.deregister(&mut self.stream) {
            debug!(conn_id = self.peer.conn_id, error = %e, "Deregister failed");
        }
        half_close(&self.stream);
    }
}

/// Best-effort shutdown of the write side. "Not connected" is expected
/// when the peer is already gone.
pub(crate) fn half_close(stream: &TcpStream) {
    match stream.shutdown(Shutdown::Write) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
        Err(e) => debug!(error = %e, "Shutdown failed"),
    }
}

/// Registry of live connections using slab allocation.
///
/// Keys are stable for a connection's lifetime and double as multiplexer
/// tokens. Provides O(1) insert, lookup, and remove operations.
pub(crate) struct ConnectionRegistry<H> {
    connections: Slab<Connection<H>>,
    max_connections: usize,
}

impl<H> ConnectionRegistry<H> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Key the next inserted connection will receive.
    pub fn vacant_key(&self) -> usize {
        self.connections.vacant_key()
    }

    /// Insert a new connection, returning its key.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<H>) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get(&self, id: usize) -> Option<&Connection<H>> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<H>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection. Removing an unknown key is a no-op.
    pub fn remove(&mut self, id: usize) -> Option<Connection<H>> {
        self.connections.try_remove(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Keys of all live connections.
    pub fn keys(&self) -> Vec<usize> {
        self.connections.iter().map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection<H>)> {
        self.connections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{SocketAddr, TcpListener};

    /// Connected (server side, client side) pair over loopback.
    fn socket_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    fn peer(conn_id: usize) -> PeerInfo {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        PeerInfo {
            conn_id,
            peer_addr: addr,
            local_addr: addr,
        }
    }

    #[test]
    fn test_connection_queue() {
        let (stream, mut client) = socket_pair();
        let mut conn = Connection::new(stream, peer(0), ());

        assert_eq!(conn.interest(), Interest::READABLE);
        assert!(conn.write_front().unwrap().is_none());

        conn.enqueue(Bytes::new());
        assert!(!conn.has_pending());

        conn.enqueue(Bytes::from_static(b"first "));
        conn.enqueue(Bytes::from_static(b"second"));
        assert_eq!(conn.queued(), 2);

        assert_eq!(conn.write_front().unwrap(), Some(6));
        assert_eq!(conn.queued(), 1);
        assert_eq!(conn.write_front().unwrap(), Some(6));
        assert!(!conn.has_pending());

        let mut buf = [0u8; 12];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"first second");
    }

    #[test]
    fn test_connection_interest() {
        let poll = mio::Poll::new().unwrap();
        let (stream, _client) = socket_pair();
        let mut conn = Connection::new(stream, peer(7), ());

        conn.register(poll.registry()).unwrap();
        conn.set_interest(poll.registry(), Interest::WRITABLE).unwrap();
        assert_eq!(conn.interest(), Interest::WRITABLE);

        conn.release(poll.registry());
        // Releasing twice only logs.
        conn.release(poll.registry());
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new(2);
        assert_eq!(registry.len(), 0);

        let key = registry.vacant_key();
        let (s1, _c1) = socket_pair();
        let id1 = registry.insert(Connection::new(s1, peer(key), "a")).unwrap();
        assert_eq!(id1, key);

        let (s2, _c2) = socket_pair();
        let id2 = registry.insert(Connection::new(s2, peer(1), "b")).unwrap();

        // At capacity
        let (s3, _c3) = socket_pair();
        assert!(registry.is_full());
        assert!(registry.insert(Connection::new(s3, peer(2), "c")).is_none());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(id1).unwrap().peer().conn_id, key);
        assert_eq!(*registry.get_mut(id2).unwrap().handler_mut(), "b");
        assert_eq!(registry.keys(), vec![id1, id2]);

        assert!(registry.remove(id1).is_some());
        assert!(registry.get(id1).is_none());
        assert!(registry.remove(id1).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.iter().count(), 1);
    }
}
