//! UDP socket construction helpers
//!
//! Both halves of the tunnel build their UDP sockets through this module so
//! the option discipline stays in one place:
//!
//! - listener sockets (client): send/receive buffers sized for a full UDP
//!   datagram, broadcast off, permissive fragmentation on replies;
//! - upstream sockets (server): ephemeral port, broadcast off,
//!   Don't-Fragment set on the path to the resolver.
//!
//! Fragmentation policy is applied through `IP_MTU_DISCOVER` on Linux and is
//! a no-op elsewhere.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};

use crate::frame::MAX_DATAGRAM_LEN;

/// Kernel buffer size requested for listener sockets. Must hold at least one
/// maximum-size datagram; the kernel may round up.
pub const UDP_BUFFER_SIZE: usize = 2 * MAX_DATAGRAM_LEN;

/// Outbound fragmentation policy for a UDP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragmentation {
    /// Allow the kernel to fragment large datagrams (loopback replies).
    Permit,
    /// Set Don't-Fragment (upstream resolver path).
    Forbid,
}

/// Build a bound, non-blocking UDP listener socket for the client pool.
///
/// # Errors
///
/// Returns the underlying `io::Error` if socket creation, option setup, or
/// the bind fails.
pub fn listener_socket(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = new_udp_socket(addr)?;
    socket.set_recv_buffer_size(UDP_BUFFER_SIZE)?;
    socket.set_send_buffer_size(UDP_BUFFER_SIZE)?;
    set_fragmentation(&socket, addr, Fragmentation::Permit)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Build an ephemeral-port UDP socket for one upstream exchange.
///
/// The socket is bound to the wildcard address of the upstream's family with
/// port 0 and has Don't-Fragment set.
///
/// # Errors
///
/// Returns the underlying `io::Error` if socket creation, option setup, or
/// the bind fails.
pub fn upstream_socket(upstream: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let bind_addr: SocketAddr = match upstream {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = new_udp_socket(bind_addr)?;
    set_fragmentation(&socket, bind_addr, Fragmentation::Forbid)?;
    socket.bind(&bind_addr.into())?;
    Ok(socket.into())
}

fn new_udp_socket(addr: SocketAddr) -> io::Result<Socket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(false)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Apply the fragmentation policy. Only meaningful for IPv4 on Linux;
/// everywhere else this is a no-op.
#[cfg(target_os = "linux")]
fn set_fragmentation(
    socket: &Socket,
    addr: SocketAddr,
    policy: Fragmentation,
) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    if addr.is_ipv6() {
        return Ok(());
    }

    let value: libc::c_int = match policy {
        Fragmentation::Forbid => libc::IP_PMTUDISC_DO,
        Fragmentation::Permit => libc::IP_PMTUDISC_DONT,
    };
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MTU_DISCOVER,
            std::ptr::addr_of!(value).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_fragmentation(
    _socket: &Socket,
    _addr: SocketAddr,
    _policy: Fragmentation,
) -> io::Result<()> {
    Ok(())
}
