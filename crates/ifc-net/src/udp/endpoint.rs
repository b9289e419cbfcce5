// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connectionless UDP endpoint.

use std::mem::MaybeUninit;
use std::net::Ipv4Addr;

use crate::addr::PeerAddr;
use crate::error::{is_transient_io, Result};
use crate::socket::Socket;

/// UDP socket with peer-addressed send and receive.
///
/// Receive and send take `&self`, so one bound endpoint can be shared between
/// several listener threads behind an `Arc`.
#[derive(Debug)]
pub struct UdpEndpoint {
    socket: Socket,
}

impl UdpEndpoint {
    /// Create a closed endpoint.
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: Socket::udp()?,
        })
    }

    /// Open the socket.
    ///
    /// Also turns off ICMP port-unreachable reporting on the socket, so one
    /// unreachable peer cannot make the next receive fail.
    pub fn open(&mut self) -> Result<()> {
        if self.socket.is_active() {
            return Ok(());
        }
        self.socket.open()?;
        if let Err(e) = platform::disable_connreset(self.socket.handle()?) {
            self.socket.close();
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the socket. Idempotent.
    pub fn close(&mut self) {
        self.socket.close();
    }

    /// True while open.
    pub fn is_open(&self) -> bool {
        self.socket.is_active()
    }

    /// Bind to `port` on all interfaces.
    pub fn bind(&self, port: u16, force_bind: bool) -> Result<()> {
        self.bind_addr(Ipv4Addr::UNSPECIFIED, port, force_bind)
    }

    /// Bind to `ip:port`.
    pub fn bind_addr(&self, ip: Ipv4Addr, port: u16, force_bind: bool) -> Result<()> {
        let addr = PeerAddr::new(u32::from(ip), port);
        self.socket.bind(addr, force_bind)?;
        log::debug!("[udp] bound {}", addr);
        Ok(())
    }

    /// Set blocking mode (remembered across open/close).
    pub fn set_block_mode(&mut self, blocking: bool) -> Result<()> {
        self.socket.set_block_mode(blocking)
    }

    /// Locally bound address.
    pub fn local_addr(&self) -> Result<PeerAddr> {
        self.socket.local_addr()
    }

    /// Allow sending to broadcast addresses.
    pub fn set_broadcast(&self, enable: bool) -> Result<()> {
        self.socket.handle()?.set_broadcast(enable)?;
        Ok(())
    }

    /// Set `SO_RCVBUF`.
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<()> {
        self.socket.handle()?.set_recv_buffer_size(size)?;
        Ok(())
    }

    /// Set `SO_SNDBUF`.
    pub fn set_send_buffer_size(&self, size: usize) -> Result<()> {
        self.socket.handle()?.set_send_buffer_size(size)?;
        Ok(())
    }

    /// Current `SO_RCVBUF` as reported by the OS.
    pub fn recv_buffer_size(&self) -> Result<usize> {
        Ok(self.socket.handle()?.recv_buffer_size()?)
    }

    pub(crate) fn handle(&self) -> Result<&socket2::Socket> {
        self.socket.handle()
    }

    /// Receive one datagram into `buf`, discarding the sender.
    ///
    /// `Ok(0)` means no datagram was available.
    pub fn recv_buffer(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.recv_buffer_from(buf)?.map_or(0, |(n, _)| n))
    }

    /// Receive one datagram into `buf` together with its sender.
    ///
    /// `Ok(None)` means no datagram was available (would block or
    /// interrupted). A datagram longer than `buf` is truncated.
    pub fn recv_buffer_from(&self, buf: &mut [u8]) -> Result<Option<(usize, PeerAddr)>> {
        let socket = self.socket.handle()?;

        // SAFETY: `buf` is initialized memory; recv_from only writes into it
        // and `MaybeUninit<u8>` has the same layout as `u8`.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };

        match socket.recv_from(uninit) {
            Ok((n, from)) => {
                let peer = PeerAddr::from_sock_addr(&from).unwrap_or_default();
                Ok(Some((n, peer)))
            }
            Err(e) if is_transient_io(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Send `buf` to `peer`, `send_times` times in a row (at least once).
    ///
    /// Returns the byte count of the last attempt; an attempt that would
    /// block counts as 0.
    pub fn send_buffer(&self, buf: &[u8], peer: PeerAddr, send_times: u32) -> Result<usize> {
        let socket = self.socket.handle()?;
        let dest = socket2::SockAddr::from(peer);

        let mut last = 0;
        for _ in 0..send_times.max(1) {
            last = match socket.send_to(buf, &dest) {
                Ok(n) => n,
                Err(e) if is_transient_io(&e) => 0,
                Err(e) => {
                    log::debug!("[udp] send to {} failed: {}", peer, e);
                    return Err(e.into());
                }
            };
        }
        Ok(last)
    }
}

#[cfg(unix)]
mod platform {
    use std::io;

    /// Unconnected UDP sockets never report ICMP errors on Unix.
    pub fn disable_connreset(_socket: &socket2::Socket) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use std::io;
    use std::os::windows::io::AsRawSocket;
    use std::ptr;

    const SIO_UDP_CONNRESET: u32 = 0x9800_000C;
    const SOCKET_ERROR: i32 = -1;

    #[link(name = "ws2_32")]
    extern "system" {
        fn WSAIoctl(
            s: usize,
            dwIoControlCode: u32,
            lpvInBuffer: *const std::ffi::c_void,
            cbInBuffer: u32,
            lpvOutBuffer: *mut std::ffi::c_void,
            cbOutBuffer: u32,
            lpcbBytesReturned: *mut u32,
            lpOverlapped: *mut std::ffi::c_void,
            lpCompletionRoutine: *mut std::ffi::c_void,
        ) -> i32;
    }

    pub fn disable_connreset(socket: &socket2::Socket) -> io::Result<()> {
        let new_behavior: i32 = 0;
        let mut returned: u32 = 0;
        // SAFETY: input is a live 4-byte BOOL, no output buffer, no overlapped I/O.
        let res = unsafe {
            WSAIoctl(
                socket.as_raw_socket() as usize,
                SIO_UDP_CONNRESET,
                ptr::addr_of!(new_behavior).cast(),
                std::mem::size_of::<i32>() as u32,
                ptr::null_mut(),
                0,
                &mut returned,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if res == SOCKET_ERROR {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
