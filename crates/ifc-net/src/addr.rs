// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer addresses and host resolution.
//!
//! A [`PeerAddr`] is an IPv4 address kept as a host-order `u32` plus a port.
//! That is the form the rest of the layer stores, compares and hands to
//! callbacks; conversions to the `std::net` types are provided for the OS calls.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{Result, SocketError};

/// Remote endpoint: IPv4 address (host byte order) and port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddr {
    /// IPv4 address in host byte order (`0x7f000001` is 127.0.0.1)
    pub ip: u32,
    /// Port number
    pub port: u16,
}

impl PeerAddr {
    /// Create a peer address from a host-order IP and a port.
    pub const fn new(ip: u32, port: u16) -> Self {
        Self { ip, port }
    }

    /// Loopback address with the given port.
    pub const fn localhost(port: u16) -> Self {
        Self::new(0x7f00_0001, port)
    }

    /// IP as [`Ipv4Addr`].
    pub fn ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }

    /// Dotted-quad text of the IP (`"%u.%u.%u.%u"`).
    pub fn ip_string(&self) -> String {
        let [a, b, c, d] = self.ip.to_be_bytes();
        format!("{}.{}.{}.{}", a, b, c, d)
    }

    /// As a `std` socket address.
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ipv4(), self.port))
    }

    /// Convert an OS socket address, rejecting non-IPv4 families.
    pub(crate) fn from_sock_addr(addr: &SockAddr) -> Option<Self> {
        addr.as_socket().and_then(|a| Self::try_from(a).ok())
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_string(), self.port)
    }
}

impl From<SocketAddrV4> for PeerAddr {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(u32::from(*addr.ip()), addr.port())
    }
}

impl From<PeerAddr> for SocketAddrV4 {
    fn from(addr: PeerAddr) -> Self {
        SocketAddrV4::new(addr.ipv4(), addr.port)
    }
}

impl From<PeerAddr> for SocketAddr {
    fn from(addr: PeerAddr) -> Self {
        addr.to_socket_addr()
    }
}

impl From<PeerAddr> for SockAddr {
    fn from(addr: PeerAddr) -> Self {
        SockAddr::from(addr.to_socket_addr())
    }
}

impl TryFrom<SocketAddr> for PeerAddr {
    type Error = SocketError;

    fn try_from(addr: SocketAddr) -> Result<Self> {
        match addr {
            SocketAddr::V4(v4) => Ok(v4.into()),
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(ip) => Ok(Self::new(u32::from(ip), v6.port())),
                None => Err(SocketError::invalid(format!(
                    "IPv6 address {} is not supported",
                    addr
                ))),
            },
        }
    }
}

/// Resolve a host name or dotted-quad literal to its first IPv4 address.
///
/// Blocks for the duration of the DNS lookup.
pub fn resolve_ipv4(host: &str) -> Result<Ipv4Addr> {
    if host.is_empty() {
        return Err(SocketError::invalid("empty host name"));
    }
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let addrs = (host, 0u16)
        .to_socket_addrs()
        .map_err(|e| SocketError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    for addr in addrs {
        if let IpAddr::V4(ip) = addr.ip() {
            return Ok(ip);
        }
    }

    Err(SocketError::Resolve {
        host: host.to_string(),
        reason: "no IPv4 address".to_string(),
    })
}

/// Resolve `host` and pair it with `port`.
pub fn resolve_peer(host: &str, port: u16) -> Result<PeerAddr> {
    let ip = resolve_ipv4(host)?;
    log::debug!("[net] resolved {} -> {}", host, ip);
    Ok(PeerAddr::new(u32::from(ip), port))
}

/// Ask the OS for a currently unused TCP port.
///
/// The port is released before returning, so another process may still grab
/// it; good enough for tests and tools that then bind it immediately.
pub fn free_port() -> Result<u16> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    let any = SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&any)?;
    let local = socket.local_addr()?;
    local
        .as_socket()
        .map(|a| a.port())
        .ok_or_else(|| SocketError::invalid("bound address is not an inet address"))
}
