// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket primitive.
//!
//! [`Socket`] owns at most one OS socket handle. It remembers the domain,
//! type, protocol and blocking mode it was configured with, so it can be
//! closed and opened again, or adopt a handle produced elsewhere (`accept`).
//!
//! Every `Socket` holds a [`NetworkGuard`], which keeps the OS network
//! subsystem alive for as long as any socket object exists.

use std::net::Shutdown;

use socket2::{Domain, Protocol, SockAddr, Type};

use crate::addr::PeerAddr;
use crate::error::{Result, SocketError};
use crate::net_init::NetworkGuard;

/// Owner of one OS socket handle.
#[derive(Debug)]
pub struct Socket {
    domain: Domain,
    ty: Type,
    protocol: Option<Protocol>,
    /// Live handle, `None` while closed
    inner: Option<socket2::Socket>,
    /// Blocking mode applied on open and adopt
    blocking: bool,
    _net: NetworkGuard,
}

impl Socket {
    /// Create an inactive socket of the given kind.
    pub fn new(domain: Domain, ty: Type, protocol: Option<Protocol>) -> Result<Self> {
        Ok(Self {
            domain,
            ty,
            protocol,
            inner: None,
            blocking: true,
            _net: NetworkGuard::acquire()?,
        })
    }

    /// Inactive IPv4 TCP socket.
    pub fn tcp() -> Result<Self> {
        Self::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
    }

    /// Inactive IPv4 UDP socket.
    pub fn udp() -> Result<Self> {
        Self::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
    }

    /// Create the OS handle. No-op if already open.
    pub fn open(&mut self) -> Result<()> {
        if self.inner.is_some() {
            return Ok(());
        }

        let socket = socket2::Socket::new(self.domain, self.ty, self.protocol).map_err(|e| {
            log::debug!("[socket] create failed: {}", e);
            SocketError::from(e)
        })?;
        socket.set_nonblocking(!self.blocking)?;
        self.inner = Some(socket);
        Ok(())
    }

    /// Shut down and release the handle. Idempotent.
    pub fn close(&mut self) {
        if let Some(socket) = self.inner.take() {
            // Listening and unconnected sockets report ENOTCONN here.
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    /// Set the blocking mode, applying it to the live handle if open.
    ///
    /// The setting is remembered and applied on every later `open` or
    /// `set_handle`.
    pub fn set_block_mode(&mut self, blocking: bool) -> Result<()> {
        self.blocking = blocking;
        if let Some(socket) = &self.inner {
            socket.set_nonblocking(!blocking)?;
        }
        Ok(())
    }

    /// Remembered blocking mode.
    pub fn block_mode(&self) -> bool {
        self.blocking
    }

    /// Adopt an existing handle, closing the currently owned one first.
    pub fn set_handle(&mut self, handle: socket2::Socket) -> Result<()> {
        self.close();
        handle.set_nonblocking(!self.blocking)?;
        self.inner = Some(handle);
        Ok(())
    }

    /// True while a handle is owned.
    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// Borrow the live handle.
    pub fn handle(&self) -> Result<&socket2::Socket> {
        self.inner.as_ref().ok_or(SocketError::NotOpen)
    }

    /// Locally bound address.
    pub fn local_addr(&self) -> Result<PeerAddr> {
        let addr = self.handle()?.local_addr()?;
        PeerAddr::from_sock_addr(&addr)
            .ok_or_else(|| SocketError::invalid("local address is not IPv4"))
    }

    /// Bind to `addr`, setting `SO_REUSEADDR` first when `force_bind` is set.
    pub fn bind(&self, addr: PeerAddr, force_bind: bool) -> Result<()> {
        let socket = self.handle()?;
        if force_bind {
            socket.set_reuse_address(true)?;
        }
        socket.bind(&SockAddr::from(addr)).map_err(|e| {
            log::debug!("[socket] bind {} failed: {}", addr, e);
            SocketError::from(e)
        })
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_sequence() {
        let mut socket = Socket::udp().unwrap();
        assert!(!socket.is_active());
        assert!(matches!(socket.handle(), Err(SocketError::NotOpen)));

        socket.open().unwrap();
        assert!(socket.is_active());
        // Second open keeps the same handle
        socket.open().unwrap();
        assert!(socket.is_active());

        socket.close();
        assert!(!socket.is_active());
        socket.close();
        assert!(!socket.is_active());

        socket.open().unwrap();
        assert!(socket.is_active());
    }

    #[test]
    fn test_block_mode_is_remembered() {
        let mut socket = Socket::tcp().unwrap();
        assert!(socket.block_mode());
        socket.set_block_mode(false).unwrap();
        assert!(!socket.block_mode());
        socket.open().unwrap();
        assert!(!socket.block_mode());
    }

    #[test]
    fn test_bind_and_local_addr() {
        let mut socket = Socket::udp().unwrap();
        socket.open().unwrap();
        socket.bind(PeerAddr::localhost(0), false).unwrap();
        let local = socket.local_addr().unwrap();
        assert_eq!(local.ip, PeerAddr::localhost(0).ip);
        assert_ne!(local.port, 0);
    }

    #[test]
    fn test_bind_requires_open() {
        let socket = Socket::udp().unwrap();
        assert!(matches!(
            socket.bind(PeerAddr::localhost(0), false),
            Err(SocketError::NotOpen)
        ));
        assert!(socket.local_addr().is_err());
    }

    #[test]
    fn test_set_handle_replaces_owned_handle() {
        let mut socket = Socket::udp().unwrap();
        socket.open().unwrap();

        let other = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        other.bind(&SockAddr::from(PeerAddr::localhost(0))).unwrap();
        let other_port = PeerAddr::from_sock_addr(&other.local_addr().unwrap())
            .unwrap()
            .port;

        socket.set_handle(other).unwrap();
        assert!(socket.is_active());
        assert_eq!(socket.local_addr().unwrap().port, other_port);
    }
}
