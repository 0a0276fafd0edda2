//! muxserve: a single-threaded, readiness-multiplexed TCP server.
//!
//! One listening socket and any number of client connections are driven
//! cooperatively on one thread by a mio event loop. Each connection owns
//! a FIFO of outbound messages and a handler produced by the application's
//! `HandlerFactory`; the handler turns inbound bytes into outbound bytes
//! and never touches the socket itself.
//!
//! Features:
//! - Dual-stack (IPv6 + IPv4-mapped) bind with IPv4 fallback
//! - Per-connection admission hook and connection limit
//! - Isolated per-connection failures: read, write and handler errors only
//!   tear down the affected connection
//! - Explicitly injected `tracing` dispatcher for all log output
//! - Cross-thread close via `ShutdownHandle`

pub mod config;
pub mod error;
pub mod handler;
pub mod protocols;
mod runtime;
pub mod server;

pub use error::{BindError, HandlerError, ServerError};
pub use handler::{Handler, HandlerFactory, PeerInfo};
pub use server::{ConnectionStatus, Server, ServerOptions, ShutdownHandle};
