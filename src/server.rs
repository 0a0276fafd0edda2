//! TCP server façade.
//!
//! Owns the listening socket and the event loop and exposes the server
//! lifecycle: bind, run (or step with `serve_once`), close.
//!
//! ```no_run
//! use muxserve::protocols::echo::Echo;
//! use muxserve::{PeerInfo, Server, ServerOptions};
//!
//! let mut server = Server::bind(("", 8000), |_: &PeerInfo| Echo, ServerOptions::default())?;
//! server.run()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{BindError, ServerError};
use crate::handler::{HandlerFactory, PeerInfo};
use crate::runtime::{self, EventLoop, LISTENER_TOKEN};
use mio::net::TcpListener;
use mio::{Interest, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Dispatch};

/// Default read size per readiness event.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default maximum number of concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Default capacity of the readiness event batch.
pub const DEFAULT_EVENTS_CAPACITY: usize = 128;

/// Server tuning and collaborators.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Prefer an IPv6 socket that also accepts IPv4 peers.
    pub dual_stack: bool,
    /// Maximum bytes received per readiness event.
    pub buffer_size: usize,
    /// Accepted sockets beyond this are closed immediately.
    pub max_connections: usize,
    /// Readiness events fetched per wait.
    pub events_capacity: usize,
    /// Wait timeout used by `run`; `None` blocks until an event arrives.
    pub poll_timeout: Option<Duration>,
    /// Logging sink. `None` uses the dispatcher current at bind time.
    pub logger: Option<Dispatch>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            dual_stack: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            poll_timeout: None,
            logger: None,
        }
    }
}

/// Observable state of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub peer: PeerInfo,
    /// Registered for WRITABLE (otherwise READABLE).
    pub writable: bool,
    /// Messages waiting to be sent.
    pub queued: usize,
}

struct ShutdownState {
    requested: AtomicBool,
    waker: Waker,
}

/// Requests `close()` from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>,
}

impl ShutdownHandle {
    /// Ask the server to close and wake it if it is waiting.
    pub fn close(&self) -> io::Result<()> {
        self.state.requested.store(true, Ordering::Release);
        self.state.waker.wake()
    }

    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("requested", &self.is_requested())
            .finish()
    }
}

/// Single-threaded, readiness-multiplexed TCP server.
pub struct Server<F: HandlerFactory> {
    event_loop: EventLoop<F>,
    /// `None` once closed.
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    host_name: String,
    poll_timeout: Option<Duration>,
    shutdown: Arc<ShutdownState>,
    logger: Dispatch,
}

impl<F: HandlerFactory> Server<F> {
    /// Bind a listening socket on `(host, port)`.
    ///
    /// An empty host binds all interfaces. Port 0 picks an ephemeral port;
    /// see `local_addr` for the result.
    pub fn bind(
        (host, port): (&str, u16),
        factory: F,
        options: ServerOptions,
    ) -> Result<Self, BindError> {
        let logger = options
            .logger
            .clone()
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone));

        tracing::dispatcher::with_default(&logger, || {
            Self::bind_inner(host, port, factory, &options, logger.clone())
        })
    }

    fn bind_inner(
        host: &str,
        port: u16,
        factory: F,
        options: &ServerOptions,
        logger: Dispatch,
    ) -> Result<Self, BindError> {
        let bind_error = |source| BindError {
            host: host.to_string(),
            port,
            source,
        };

        let mut listener = runtime::bind(host, port, options.dual_stack)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let event_loop = EventLoop::new(
            factory,
            options.buffer_size,
            options.max_connections,
            options.events_capacity,
        )
        .map_err(bind_error)?;
        event_loop
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(bind_error)?;
        let waker = event_loop.waker().map_err(bind_error)?;

        let host_name = runtime::host_name(host);
        info!(
            addr = %local_addr,
            host_name = %host_name,
            dual_stack = options.dual_stack,
            "Server listening"
        );

        Ok(Server {
            event_loop,
            listener: Some(listener),
            local_addr,
            host_name,
            poll_timeout: options.poll_timeout,
            shutdown: Arc::new(ShutdownState {
                requested: AtomicBool::new(false),
                waker,
            }),
            logger,
        })
    }

    /// Address the listening socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Host name derived from the bind address.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Handle for closing the server from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            state: Arc::clone(&self.shutdown),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_none()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.event_loop.connections().len()
    }

    /// Snapshot of every live connection, in registry order.
    pub fn connections(&self) -> Vec<ConnectionStatus> {
        self.event_loop
            .connections()
            .iter()
            .map(|(_, conn)| ConnectionStatus {
                peer: *conn.peer(),
                writable: conn.interest() == Interest::WRITABLE,
                queued: conn.queued(),
            })
            .collect()
    }

    /// Serve until closed.
    ///
    /// Returns `Ok(())` once a `ShutdownHandle` requested close, or an
    /// error if the multiplexer itself fails. Per-connection failures never
    /// end the loop.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let logger = self.logger.clone();
        tracing::dispatcher::with_default(&logger, || {
            let result = self.run_inner();
            self.close_inner();
            result
        })
    }

    fn run_inner(&mut self) -> Result<(), ServerError> {
        while !self.is_closed() {
            if self.shutdown_requested() {
                debug!("Shutdown requested");
                break;
            }
            self.event_loop
                .turn(self.listener.as_mut(), self.poll_timeout)?;
        }
        Ok(())
    }

    /// Run one wait + dispatch cycle; returns the number of events handled.
    ///
    /// A pending shutdown request closes the server instead. Calling this
    /// on a closed server does nothing.
    pub fn serve_once(&mut self, timeout: Option<Duration>) -> Result<usize, ServerError> {
        let logger = self.logger.clone();
        tracing::dispatcher::with_default(&logger, || {
            if self.is_closed() {
                return Ok(0);
            }
            if self.shutdown_requested() {
                self.close_inner();
                return Ok(0);
            }
            let turn = self.event_loop.turn(self.listener.as_mut(), timeout)?;
            if turn.woken && self.shutdown_requested() {
                self.close_inner();
            }
            Ok(turn.events)
        })
    }

    /// Release every connection and the listening socket. Idempotent.
    pub fn close(&mut self) {
        let logger = self.logger.clone();
        tracing::dispatcher::with_default(&logger, || self.close_inner());
    }

    fn close_inner(&mut self) {
        let Some(mut listener) = self.listener.take() else {
            return;
        };

        self.event_loop.close_all();
        if let Err(e) = self.event_loop.registry().deregister(&mut listener) {
            debug!(error = %e, "Deregister listener failed");
        }
        drop(listener);
        info!(addr = %self.local_addr, "Server closed");
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.requested.load(Ordering::Acquire)
    }
}

impl<F: HandlerFactory> Drop for Server<F> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<F: HandlerFactory> std::fmt::Debug for Server<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("host_name", &self.host_name)
            .field("connections", &self.connection_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::echo::Echo;

    fn echo_factory(_: &PeerInfo) -> Echo {
        Echo
    }

    #[test]
    fn test_default_options() {
        let options = ServerOptions::default();
        assert!(options.dual_stack);
        assert_eq!(options.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(options.poll_timeout.is_none());
        assert!(options.logger.is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut server =
            Server::bind(("127.0.0.1", 0), echo_factory, ServerOptions::default()).unwrap();
        assert!(!server.is_closed());

        server.close();
        assert!(server.is_closed());
        server.close();
        assert!(server.is_closed());
        assert_eq!(server.connection_count(), 0);

        // Stepping or running a closed server is a no-op.
        assert_eq!(server.serve_once(Some(Duration::ZERO)).unwrap(), 0);
        server.run().unwrap();
    }

    #[test]
    fn test_shutdown_handle_before_serve() {
        let mut server =
            Server::bind(("127.0.0.1", 0), echo_factory, ServerOptions::default()).unwrap();
        let handle = server.shutdown_handle();
        handle.close().unwrap();
        assert!(handle.is_requested());

        server.serve_once(None).unwrap();
        assert!(server.is_closed());
    }

    #[test]
    fn test_timeout_hook() {
        struct Counting {
            timeouts: usize,
        }

        impl HandlerFactory for Counting {
            type Handler = Echo;

            fn create(&mut self, _peer: &PeerInfo) -> Echo {
                Echo
            }

            fn on_timeout(&mut self) {
                self.timeouts += 1;
            }
        }

        let mut server = Server::bind(
            ("127.0.0.1", 0),
            Counting { timeouts: 0 },
            ServerOptions::default(),
        )
        .unwrap();

        assert_eq!(server.serve_once(Some(Duration::from_millis(1))).unwrap(), 0);
        assert_eq!(server.event_loop.factory().timeouts, 1);
    }
}
