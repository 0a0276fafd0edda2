//! Listening socket setup with dual-stack support.
//!
//! Candidates are tried in order and the first one that binds and listens
//! wins. With dual-stack enabled, IPv6 candidates come first and accept
//! IPv4-mapped peers too; IPv4 candidates remain as a fallback for hosts
//! without IPv6.

use crate::error::BindError;
use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use tracing::debug;

/// Listen backlog for not-yet-accepted connections.
pub(crate) const BACKLOG: i32 = 5;

/// Resolve `(host, port)` into the ordered list of addresses to try.
///
/// An empty host means all interfaces.
pub(crate) fn candidates(host: &str, port: u16, dual_stack: bool) -> io::Result<Vec<SocketAddr>> {
    if host.is_empty() {
        let v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        if dual_stack {
            let v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
            return Ok(vec![v6, v4]);
        }
        return Ok(vec![v4]);
    }

    let mut addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    order_by_family(&mut addrs, dual_stack);
    addrs.dedup();
    Ok(addrs)
}

/// Put the preferred family first. Stable, so resolver order is kept
/// within each family.
fn order_by_family(addrs: &mut [SocketAddr], prefer_ipv6: bool) {
    addrs.sort_by_key(|addr| addr.is_ipv6() != prefer_ipv6);
}

/// Bind the first working candidate.
pub(crate) fn bind(host: &str, port: u16, dual_stack: bool) -> Result<TcpListener, BindError> {
    let bind_error = |source| BindError {
        host: host.to_string(),
        port,
        source,
    };

    let addrs = candidates(host, port, dual_stack).map_err(bind_error)?;

    let mut last_error =
        io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses");
    for addr in addrs {
        match bind_candidate(addr, dual_stack) {
            Ok(listener) => return Ok(TcpListener::from_std(listener)),
            Err(e) => {
                debug!(addr = %addr, error = %e, "Bind candidate failed");
                last_error = e;
            }
        }
    }

    Err(bind_error(last_error))
}

/// Create a non-blocking listening socket on `addr`.
fn bind_candidate(addr: SocketAddr, dual_stack: bool) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if addr.is_ipv6() {
        socket.set_only_v6(!dual_stack)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

/// Host name to report for a server bound on `host`.
///
/// Falls back to the machine's host name when bound on all interfaces.
pub(crate) fn host_name(host: &str) -> String {
    if !host.is_empty() {
        return host.to_string();
    }
    system_host_name().unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn system_host_name() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes; gethostname writes at most that many.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8(buf[..len].to_vec()).ok()?;
    (!name.is_empty()).then_some(name)
}

#[cfg(not(unix))]
fn system_host_name() -> Option<String> {
    None
}
