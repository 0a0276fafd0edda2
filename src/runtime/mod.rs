//! Single-threaded readiness runtime.
//!
//! - `listener`: dual-stack bind of the listening socket
//! - `connection`: per-connection state and the slab-backed registry
//! - `token`: mapping of multiplexer tokens to event sources
//! - `event_loop`: the wait + dispatch state machine

mod connection;
mod event_loop;
mod listener;
mod token;

pub(crate) use event_loop::EventLoop;
pub(crate) use listener::{bind, host_name};
pub(crate) use token::LISTENER_TOKEN;
