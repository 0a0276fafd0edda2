//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. Uses epoll on Linux, kqueue
//! on macOS.
//!
//! Every connection alternates between two registrations:
//!
//! ```text
//! READABLE --read n>0, handler output--> WRITABLE
//! WRITABLE --queue drained------------> READABLE
//! any      --EOF / error / failure----> torn down
//! ```
//!
//! All per-connection failures end in `teardown` for that connection only;
//! the loop itself fails only when the multiplexer does.

use crate::error::HandlerError;
use crate::handler::{Handler, HandlerFactory, PeerInfo};
use crate::runtime::connection::{half_close, Connection, ConnectionRegistry};
use crate::runtime::token::{Source, LISTENER_TOKEN, WAKER_TOKEN};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Readiness flags copied out of a mio event.
#[derive(Debug, Clone, Copy)]
struct Ready {
    token: Token,
    readable: bool,
    writable: bool,
    error: bool,
}

impl From<&Event> for Ready {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable() || event.is_read_closed(),
            writable: event.is_writable() || event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

/// Whether a connection survives an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Close,
}

/// Summary of one wait + dispatch cycle.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Turn {
    /// Events dispatched in this cycle.
    pub events: usize,
    /// The waker fired.
    pub woken: bool,
}

/// Driver of the multiplexer and all connection state.
pub(crate) struct EventLoop<F: HandlerFactory> {
    poll: Poll,
    events: Events,
    ready: Vec<Ready>,
    connections: ConnectionRegistry<F::Handler>,
    factory: F,
    /// Per-read scratch buffer shared by all connections.
    read_buf: Vec<u8>,
}

impl<F: HandlerFactory> EventLoop<F> {
    pub fn new(
        factory: F,
        buffer_size: usize,
        max_connections: usize,
        events_capacity: usize,
    ) -> io::Result<Self> {
        // A zero-sized event buffer makes the wait fail with EINVAL.
        let events_capacity = events_capacity.max(1);
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(events_capacity),
            ready: Vec::with_capacity(events_capacity),
            connections: ConnectionRegistry::new(max_connections),
            factory,
            read_buf: vec![0u8; buffer_size.max(1)],
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    pub fn waker(&self) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), WAKER_TOKEN)
    }

    pub fn connections(&self) -> &ConnectionRegistry<F::Handler> {
        &self.connections
    }

    /// Get a reference to the factory for testing
    #[cfg(test)]
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Block until readiness (or `timeout`), then dispatch every event.
    pub fn turn(
        &mut self,
        mut listener: Option<&mut TcpListener>,
        timeout: Option<Duration>,
    ) -> io::Result<Turn> {
        debug!(
            connections = self.connections.len(),
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            "Waiting for events"
        );
        self.wait(timeout)?;

        self.ready.clear();
        self.ready.extend(self.events.iter().map(Ready::from));

        let mut turn = Turn::default();
        for i in 0..self.ready.len() {
            let ready = self.ready[i];
            match Source::from(ready.token) {
                Source::Listener => {
                    if ready.error {
                        warn!("Exceptional condition on listening socket");
                    }
                    if let Some(listener) = listener.as_deref_mut() {
                        self.accept_connections(listener);
                    }
                }
                Source::Waker => turn.woken = true,
                Source::Connection(conn_id) => self.connection_event(conn_id, ready),
            }
            turn.events += 1;
        }

        if turn.events == 0 && timeout.is_some() {
            debug!("Wait timed out");
            self.factory.on_timeout();
        }

        Ok(turn)
    }

    /// Poll, retrying transparently when interrupted by a signal.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!("Wait interrupted, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Accept until the listener would block.
    ///
    /// Readiness is edge-triggered, so connections left in the backlog
    /// would not raise another event. For the same reason the listener is
    /// re-armed after a hard accept error (e.g. EMFILE), so the backlog is
    /// retried on the next wait.
    fn accept_connections(&mut self, listener: &mut TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, peer_addr)) => self.admit(stream, peer_addr, listener),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    warn!(error = %e, "Transient accept error");
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    if let Err(e) = self
                        .poll
                        .registry()
                        .reregister(listener, LISTENER_TOKEN, Interest::READABLE)
                    {
                        error!(error = %e, "Failed to re-arm listener");
                    }
                    break;
                }
            }
        }
    }

    /// Verify, then register a freshly accepted socket.
    fn admit(&mut self, stream: TcpStream, peer_addr: SocketAddr, listener: &TcpListener) {
        let local_addr = match stream.local_addr().or_else(|_| listener.local_addr()) {
            Ok(addr) => addr,
            Err(e) => {
                error!(peer = %peer_addr, error = %e, "Failed to read local address");
                return;
            }
        };

        if self.connections.is_full() {
            warn!(peer = %peer_addr, "Connection limit reached");
            half_close(&stream);
            return;
        }

        let peer = PeerInfo {
            conn_id: self.connections.vacant_key(),
            peer_addr,
            local_addr,
        };

        if !self.factory.verify_connection(&peer) {
            info!(peer = %peer_addr, "Connection rejected");
            half_close(&stream);
            return;
        }

        let handler = self.factory.create(&peer);
        let mut conn = Connection::new(stream, peer, handler);
        if let Err(e) = conn.register(self.poll.registry()) {
            // Dropping the connection closes the socket.
            error!(peer = %peer_addr, error = %e, "Failed to register connection");
            return;
        }

        match self.connections.insert(conn) {
            Some(conn_id) => {
                debug_assert_eq!(conn_id, peer.conn_id);
                info!(conn_id, peer = %peer_addr, "Accepted connection");
            }
            None => warn!(peer = %peer_addr, "Connection limit reached"),
        }
    }

    fn connection_event(&mut self, conn_id: usize, ready: Ready) {
        // Stale: torn down earlier in this cycle.
        let Some(conn) = self.connections.get(conn_id) else {
            return;
        };

        if ready.error {
            warn!(conn_id, peer = %conn.peer().peer_addr, "Exceptional condition on socket");
            self.teardown(conn_id);
            return;
        }

        let interest = conn.interest();
        let status = if interest == Interest::READABLE && ready.readable {
            self.handle_readable(conn_id)
        } else if interest == Interest::WRITABLE && ready.writable {
            self.handle_writable(conn_id)
        } else {
            Status::Open
        };

        if status == Status::Close {
            self.teardown(conn_id);
        }
    }

    /// Read once, feed the handler, queue its output.
    fn handle_readable(&mut self, conn_id: usize) -> Status {
        let registry = self.poll.registry();
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Status::Open;
        };

        let n = match conn.read(&mut self.read_buf) {
            Ok(0) => {
                info!(conn_id, peer = %conn.peer().peer_addr, "Connection closed by peer");
                return Status::Close;
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Status::Open,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                return rearm(conn, registry, conn_id, Interest::READABLE);
            }
            Err(e) => {
                error!(conn_id, error = %e, "Receive failed");
                return Status::Close;
            }
        };

        debug!(conn_id, bytes = n, "Received");

        let output = match conn.handler_mut().handle(&self.read_buf[..n]) {
            Ok(output) => output,
            Err(e) => {
                warn!(conn_id, error = %e, "Handler failed");
                conn.handler_mut().on_error(&e);
                return Status::Close;
            }
        };

        conn.enqueue(output);
        let next = if conn.has_pending() {
            Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        rearm(conn, registry, conn_id, next)
    }

    /// Send the front message; revert to reading once the queue drains.
    fn handle_writable(&mut self, conn_id: usize) -> Status {
        let registry = self.poll.registry();
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Status::Open;
        };

        match conn.write_front() {
            Ok(Some(n)) => debug!(conn_id, bytes = n, "Sent"),
            Ok(None) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Status::Open,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                error!(conn_id, error = %e, "Send failed");
                conn.handler_mut().on_error(&HandlerError::from(e));
                return Status::Close;
            }
        }

        let next = if conn.has_pending() {
            Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        rearm(conn, registry, conn_id, next)
    }

    /// Deregister, half-close, close, forget. Unknown keys are ignored.
    fn teardown(&mut self, conn_id: usize) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        conn.release(self.poll.registry());
        let peer_addr = conn.peer().peer_addr;

        // Dropping the connection closes its socket.
        drop(self.connections.remove(conn_id));
        info!(conn_id, peer = %peer_addr, "Connection closed");
    }

    /// Tear down every live connection.
    pub fn close_all(&mut self) {
        for conn_id in self.connections.keys() {
            self.teardown(conn_id);
        }
    }
}

/// Re-register `conn`, closing it if the multiplexer refuses.
fn rearm<H>(
    conn: &mut Connection<H>,
    registry: &Registry,
    conn_id: usize,
    interest: Interest,
) -> Status {
    match conn.set_interest(registry, interest) {
        Ok(()) => Status::Open,
        Err(e) => {
            error!(conn_id, error = %e, "Failed to update interest");
            Status::Close
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::echo::Echo;
    use crate::runtime::listener::bind;
    use bytes::Bytes;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    const STEP: Option<Duration> = Some(Duration::from_millis(10));

    /// Echo handler counting `on_error` calls.
    struct Counting {
        errors: Arc<AtomicUsize>,
    }

    impl Handler for Counting {
        fn handle(&mut self, inbound: &[u8]) -> Result<Bytes, HandlerError> {
            Ok(Bytes::copy_from_slice(inbound))
        }

        fn on_error(&mut self, _error: &HandlerError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn listen<F: HandlerFactory>(event_loop: &EventLoop<F>) -> TcpListener {
        let mut listener = bind("127.0.0.1", 0, false).unwrap();
        event_loop
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .unwrap();
        listener
    }

    fn turn_until<F: HandlerFactory>(
        event_loop: &mut EventLoop<F>,
        listener: &mut TcpListener,
        mut done: impl FnMut(&EventLoop<F>) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(event_loop) {
            assert!(Instant::now() < deadline, "timed out driving event loop");
            event_loop.turn(Some(&mut *listener), STEP).unwrap();
        }
    }

    #[test]
    fn test_zero_events_capacity() {
        let mut event_loop = EventLoop::new(|_: &PeerInfo| Echo, 64, 16, 0).unwrap();
        let turn = event_loop.turn(None, Some(Duration::ZERO)).unwrap();
        assert_eq!(turn.events, 0);
    }

    #[test]
    fn test_send_failure_reaches_on_error() {
        let errors = Arc::new(AtomicUsize::new(0));
        let factory = {
            let errors = Arc::clone(&errors);
            move |_: &PeerInfo| Counting {
                errors: Arc::clone(&errors),
            }
        };
        let mut event_loop = EventLoop::new(factory, 64, 16, 16).unwrap();
        let mut listener = listen(&event_loop);

        let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        turn_until(&mut event_loop, &mut listener, |el| el.connections().len() == 1);
        let conn_id = event_loop.connections().keys()[0];

        // The read turn queues the reply and arms WRITABLE.
        client.write_all(b"ping").unwrap();
        turn_until(&mut event_loop, &mut listener, |el| {
            el.connections()
                .get(conn_id)
                .is_some_and(|conn| conn.has_pending())
        });

        // Shut the server side for writing so the send fails with EPIPE.
        half_close(event_loop.connections().get(conn_id).unwrap().stream());
        turn_until(&mut event_loop, &mut listener, |el| el.connections().len() == 0);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }
}
