// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One established TCP stream.
//!
//! The socket is always non-blocking. Two I/O styles sit on top of it:
//!
//! - **Sync** (`send_sync` / `recv_sync`): loop until the whole buffer moved,
//!   the connection dropped, or the optional timeout elapsed. Each iteration
//!   waits at most 250 ms for readiness.
//! - **Async** (`send_async` / `recv_async`): a single non-blocking attempt;
//!   `Ok(0)` means "nothing moved, try again later".
//!
//! Any hard error, or a zero-byte read, disconnects the connection. A
//! disconnected connection is retired for good.

use std::any::Any;
use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::addr::PeerAddr;
use crate::config::SYNC_IO_SLICE;
use crate::error::{is_transient_io, Result, SocketError};
use crate::poll::{self, Interest};
use crate::socket::Socket;

/// Live `TcpConnection` objects in the process.
static LIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// How `send_buffer` / `recv_buffer` move data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Loop until complete, disconnected, or `timeout` elapsed (`None` waits forever)
    Sync {
        /// Overall deadline for the call
        timeout: Option<Duration>,
    },
    /// Single non-blocking attempt
    Async,
}

#[derive(Clone, Copy)]
enum Direction {
    Send,
    Recv,
}

impl Direction {
    fn interest(self) -> Interest {
        match self {
            Direction::Send => Interest::Writable,
            Direction::Recv => Interest::Readable,
        }
    }
}

/// Buffer borrowed for one transfer direction.
enum IoBuf<'a> {
    Send(&'a [u8]),
    Recv(&'a mut [u8]),
}

impl IoBuf<'_> {
    fn len(&self) -> usize {
        match self {
            IoBuf::Send(b) => b.len(),
            IoBuf::Recv(b) => b.len(),
        }
    }

    fn direction(&self) -> Direction {
        match self {
            IoBuf::Send(_) => Direction::Send,
            IoBuf::Recv(_) => Direction::Recv,
        }
    }

    /// One syscall on the unmoved tail of the buffer.
    fn transfer(&mut self, socket: &socket2::Socket, offset: usize) -> std::io::Result<usize> {
        let mut stream = socket;
        match self {
            IoBuf::Send(b) => stream.write(&b[offset..]),
            IoBuf::Recv(b) => stream.read(&mut b[offset..]),
        }
    }
}

/// An established TCP connection.
pub struct TcpConnection {
    id: ConnectionId,
    socket: Socket,
    peer: PeerAddr,
    /// Set once a live socket was closed; the connection cannot be reopened
    retired: bool,
    custom_data: Option<Box<dyn Any + Send>>,
}

impl TcpConnection {
    /// Create an unconnected connection object.
    pub fn new() -> Result<Self> {
        let mut socket = Socket::tcp()?;
        socket.set_block_mode(false)?;
        LIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        Ok(Self {
            id: ConnectionId::next(),
            socket,
            peer: PeerAddr::default(),
            retired: false,
            custom_data: None,
        })
    }

    /// Wrap a socket returned by `accept`.
    ///
    /// This is the default connection factory of [`TcpServer`](crate::TcpServer).
    pub fn from_accepted(handle: socket2::Socket, peer: PeerAddr) -> Result<Self> {
        let mut conn = Self::new()?;
        conn.socket.set_handle(handle)?;
        conn.peer = peer;
        Ok(conn)
    }

    /// Number of `TcpConnection` objects alive in the process.
    pub fn live_count() -> usize {
        LIVE_CONNECTIONS.load(Ordering::Relaxed)
    }

    /// Process-unique id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// True while the socket is open.
    pub fn is_connected(&self) -> bool {
        self.socket.is_active()
    }

    /// True once the connection was closed and cannot be reused.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Remote address.
    pub fn peer_addr(&self) -> PeerAddr {
        self.peer
    }

    /// Override the remote address.
    pub fn set_peer_addr(&mut self, peer: PeerAddr) {
        self.peer = peer;
    }

    /// Locally bound address.
    pub fn local_addr(&self) -> Result<PeerAddr> {
        self.socket.local_addr()
    }

    /// Set `TCP_NODELAY`.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        self.socket.handle()?.set_nodelay(nodelay)?;
        Ok(())
    }

    /// Set `SO_KEEPALIVE`.
    pub fn set_keepalive(&self, keepalive: bool) -> Result<()> {
        self.socket.handle()?.set_keepalive(keepalive)?;
        Ok(())
    }

    /// Close the socket and retire the connection. Idempotent.
    pub fn disconnect(&mut self) {
        if self.socket.is_active() {
            log::debug!("[tcp] {} disconnect from {}", self.id, self.peer);
            self.socket.close();
        }
        self.retired = true;
    }

    // ========================================================================
    // Socket access for the client
    // ========================================================================

    /// Open a fresh socket for a connect attempt.
    pub(crate) fn open_for_connect(&mut self) -> Result<()> {
        if self.retired {
            return Err(SocketError::Retired);
        }
        self.socket.close();
        self.socket.open()
    }

    /// Close after a failed connect attempt without retiring.
    pub(crate) fn abort_connect(&mut self) {
        self.socket.close();
    }

    pub(crate) fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }

    pub(crate) fn handle(&self) -> Result<&socket2::Socket> {
        self.socket.handle()
    }

    // ========================================================================
    // Custom data
    // ========================================================================

    /// Attach user data, returning the previous value.
    pub fn set_custom_data<T: Any + Send>(&mut self, data: T) -> Option<Box<dyn Any + Send>> {
        self.custom_data.replace(Box::new(data))
    }

    /// Borrow the user data if it is a `T`.
    pub fn custom_data<T: Any>(&self) -> Option<&T> {
        self.custom_data.as_deref()?.downcast_ref()
    }

    /// Mutably borrow the user data if it is a `T`.
    pub fn custom_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.custom_data.as_deref_mut()?.downcast_mut()
    }

    /// Detach the user data.
    pub fn take_custom_data(&mut self) -> Option<Box<dyn Any + Send>> {
        self.custom_data.take()
    }

    // ========================================================================
    // I/O
    // ========================================================================

    /// Send all of `buf`, waiting up to `timeout` (`None` = forever).
    ///
    /// Returns the bytes sent, which is short of `buf.len()` if the timeout
    /// elapsed or the connection dropped midway. Fails with
    /// [`SocketError::Disconnected`] if the connection dropped before any
    /// byte was sent.
    pub fn send_sync(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<usize> {
        self.sync_io(IoBuf::Send(buf), timeout)
    }

    /// Fill all of `buf`, waiting up to `timeout` (`None` = forever).
    ///
    /// Same contract as [`send_sync`](Self::send_sync). `Ok(0)` means the
    /// timeout elapsed with no data.
    pub fn recv_sync(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        self.sync_io(IoBuf::Recv(buf), timeout)
    }

    /// One non-blocking send attempt. `Ok(0)` means the socket was not ready.
    pub fn send_async(&mut self, buf: &[u8]) -> Result<usize> {
        self.async_io(IoBuf::Send(buf))
    }

    /// One non-blocking receive attempt. `Ok(0)` means no data was pending.
    pub fn recv_async(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.async_io(IoBuf::Recv(buf))
    }

    /// Send with the given I/O mode.
    pub fn send_buffer(&mut self, buf: &[u8], mode: IoMode) -> Result<usize> {
        match mode {
            IoMode::Sync { timeout } => self.send_sync(buf, timeout),
            IoMode::Async => self.send_async(buf),
        }
    }

    /// Receive with the given I/O mode.
    pub fn recv_buffer(&mut self, buf: &mut [u8], mode: IoMode) -> Result<usize> {
        match mode {
            IoMode::Sync { timeout } => self.recv_sync(buf, timeout),
            IoMode::Async => self.recv_async(buf),
        }
    }

    fn async_io(&mut self, mut buf: IoBuf<'_>) -> Result<usize> {
        let socket = self.socket.handle().map_err(|_| SocketError::Disconnected)?;
        if buf.len() == 0 {
            return Ok(0);
        }

        match buf.transfer(socket, 0) {
            Ok(0) => {
                self.disconnect();
                Err(SocketError::Disconnected)
            }
            Ok(n) => Ok(n),
            Err(e) if is_transient_io(&e) => Ok(0),
            Err(e) => {
                log::debug!("[tcp] {} async I/O failed: {}", self.id, e);
                self.disconnect();
                Err(SocketError::Disconnected)
            }
        }
    }

    fn sync_io(&mut self, mut buf: IoBuf<'_>, timeout: Option<Duration>) -> Result<usize> {
        if !self.socket.is_active() {
            return Err(SocketError::Disconnected);
        }

        let len = buf.len();
        let interest = buf.direction().interest();
        let deadline = timeout.map(|t| Instant::now() + t);
        let expired = || deadline.is_some_and(|d| Instant::now() >= d);

        let mut done = 0;
        let mut dropped = false;

        while done < len {
            let slice = match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()).min(SYNC_IO_SLICE),
                None => SYNC_IO_SLICE,
            };

            let socket = match self.socket.handle() {
                Ok(socket) => socket,
                Err(_) => {
                    dropped = true;
                    break;
                }
            };

            match poll::wait(socket, interest, slice) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    if expired() {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    log::debug!("[tcp] {} poll failed: {}", self.id, e);
                    dropped = true;
                    break;
                }
            }

            match buf.transfer(socket, done) {
                Ok(0) => {
                    dropped = true;
                    break;
                }
                Ok(n) => done += n,
                Err(e) if is_transient_io(&e) => {}
                Err(e) => {
                    log::debug!("[tcp] {} sync I/O failed: {}", self.id, e);
                    dropped = true;
                    break;
                }
            }

            if done < len && expired() {
                break;
            }
        }

        if dropped {
            self.disconnect();
            if done == 0 {
                return Err(SocketError::Disconnected);
            }
        }
        Ok(done)
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .field("retired", &self.retired)
            .field("custom_data", &self.custom_data.is_some())
            .finish()
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        LIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    }
}
