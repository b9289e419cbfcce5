// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound TCP connections.
//!
//! [`TcpClient`] is a [`TcpConnection`] plus the state of its connect
//! attempt. It supports a blocking connect and a non-blocking connect that
//! is driven by [`check_async_connect_state`](TcpClient::check_async_connect_state),
//! which is what the connector pool uses to run many attempts from one thread.

use std::io;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use socket2::SockAddr;

use crate::addr::{resolve_peer, PeerAddr};
use crate::config::CONNECT_POLL_SLICE;
use crate::error::{Result, SocketError};
use crate::poll::{self, Interest};
use crate::tcp::{AsyncConnectState, TcpConnection};

/// TCP connection that knows how to connect itself.
#[derive(Debug)]
pub struct TcpClient {
    conn: TcpConnection,
    state: AsyncConnectState,
}

impl TcpClient {
    /// Create an unconnected client.
    pub fn new() -> Result<Self> {
        Ok(Self {
            conn: TcpConnection::new()?,
            state: AsyncConnectState::Idle,
        })
    }

    /// State of the current (or last) connect attempt.
    pub fn async_state(&self) -> AsyncConnectState {
        self.state
    }

    /// True once a connect attempt succeeded and the socket is still open.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected() && self.conn.is_connected()
    }

    /// Give up the client wrapper and keep the connection.
    pub fn into_connection(self) -> TcpConnection {
        self.conn
    }

    /// Blocking connect to `host:port`.
    ///
    /// The socket runs in blocking mode for the duration of the connect only.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        let peer = resolve_peer(host, port)?;
        self.connect_peer(peer)
    }

    /// Blocking connect to an already resolved peer.
    pub fn connect_peer(&mut self, peer: PeerAddr) -> Result<()> {
        self.start_attempt(peer)?;

        let result = self.blocking_connect(peer);
        match result {
            Ok(()) => {
                self.advance(AsyncConnectState::Connected);
                log::debug!("[tcp] {} connected to {}", self.conn.id(), peer);
                Ok(())
            }
            Err(e) => {
                log::debug!("[tcp] {} connect to {} failed: {}", self.conn.id(), peer, e);
                self.fail();
                Err(e)
            }
        }
    }

    fn blocking_connect(&mut self, peer: PeerAddr) -> Result<()> {
        let socket = self.conn.socket_mut();
        socket.set_block_mode(true)?;
        let connected = socket.handle()?.connect(&SockAddr::from(peer));
        // Restore the remembered mode before looking at the outcome.
        socket.set_block_mode(false)?;
        connected.map_err(SocketError::from)
    }

    /// Connect with an overall timeout.
    ///
    /// Fails with [`SocketError::Timeout`] if the attempt is still pending
    /// when `timeout` elapses, and with [`SocketError::ConnectFailed`] if it
    /// was refused or errored.
    pub fn connect_timeout(&mut self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        match self.async_connect(host, port, timeout)? {
            AsyncConnectState::Connected => Ok(()),
            AsyncConnectState::Connecting => {
                self.fail();
                Err(SocketError::Timeout)
            }
            state => Err(SocketError::ConnectFailed(format!(
                "{}:{} ended {}",
                host, port, state
            ))),
        }
    }

    /// Non-blocking connect to `host:port`, then wait up to `timeout` for it.
    ///
    /// Returns `Connecting` if the attempt is still pending after `timeout`;
    /// keep calling [`check_async_connect_state`](Self::check_async_connect_state).
    pub fn async_connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<AsyncConnectState> {
        let peer = resolve_peer(host, port)?;
        let state = self.begin_connect(peer);
        if state == AsyncConnectState::Connecting {
            return Ok(self.check_async_connect_state(timeout));
        }
        Ok(state)
    }

    /// Issue a non-blocking connect to `peer` without waiting.
    pub fn begin_connect(&mut self, peer: PeerAddr) -> AsyncConnectState {
        if let Err(e) = self.start_attempt(peer) {
            log::debug!("[tcp] {} cannot start connect to {}: {}", self.conn.id(), peer, e);
            self.state = AsyncConnectState::Failed;
            return self.state;
        }

        let issued = match self.conn.handle() {
            Ok(socket) => socket.connect(&SockAddr::from(peer)),
            Err(_) => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };

        match issued {
            Ok(()) => self.advance(AsyncConnectState::Connected),
            Err(e) if connect_in_progress(&e) => self.advance(AsyncConnectState::Connecting),
            Err(e) => {
                log::debug!("[tcp] {} connect to {} failed: {}", self.conn.id(), peer, e);
                self.fail();
            }
        }
        self.state
    }

    /// Wait up to `timeout` for a pending connect to complete.
    ///
    /// Waits in 100 ms slices. If the attempt is not `Connecting` the current
    /// state is returned unchanged; a timeout leaves it `Connecting`.
    pub fn check_async_connect_state(&mut self, timeout: Duration) -> AsyncConnectState {
        if self.state != AsyncConnectState::Connecting {
            return self.state;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let slice = deadline
                .saturating_duration_since(Instant::now())
                .min(CONNECT_POLL_SLICE);

            let socket = match self.conn.handle() {
                Ok(socket) => socket,
                Err(_) => {
                    self.fail();
                    return self.state;
                }
            };

            match poll::wait(socket, Interest::Both, slice) {
                Ok(Some(_)) => {
                    self.finish_connect();
                    return self.state;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return self.state;
                    }
                }
                Err(e) => {
                    log::debug!("[tcp] {} connect poll failed: {}", self.conn.id(), e);
                    self.fail();
                    return self.state;
                }
            }
        }
    }

    /// Give up on a pending connect, closing its socket.
    pub(crate) fn abandon_connect(&mut self) {
        if self.state == AsyncConnectState::Connecting {
            self.fail();
        }
    }

    /// Tell a completed connect from a failed one once the socket is ready.
    fn finish_connect(&mut self) {
        let outcome = self.conn.handle().and_then(|socket| {
            if let Some(err) = socket.take_error()? {
                return Err(err.into());
            }
            socket.peer_addr()?;
            Ok(())
        });

        match outcome {
            Ok(()) => {
                log::debug!("[tcp] {} connected to {}", self.conn.id(), self.conn.peer_addr());
                self.advance(AsyncConnectState::Connected);
            }
            Err(e) => {
                log::debug!(
                    "[tcp] {} connect to {} failed: {}",
                    self.conn.id(),
                    self.conn.peer_addr(),
                    e
                );
                self.fail();
            }
        }
    }

    /// Reset for a new attempt on a fresh socket.
    fn start_attempt(&mut self, peer: PeerAddr) -> Result<()> {
        self.state = AsyncConnectState::Idle;
        self.conn.set_peer_addr(peer);
        self.conn.open_for_connect()
    }

    fn advance(&mut self, next: AsyncConnectState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "connect state {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    fn fail(&mut self) {
        self.conn.abort_connect();
        self.advance(AsyncConnectState::Failed);
    }
}

impl Deref for TcpClient {
    type Target = TcpConnection;

    fn deref(&self) -> &TcpConnection {
        &self.conn
    }
}

impl DerefMut for TcpClient {
    fn deref_mut(&mut self) -> &mut TcpConnection {
        &mut self.conn
    }
}

impl From<TcpClient> for TcpConnection {
    fn from(client: TcpClient) -> Self {
        client.into_connection()
    }
}

/// True if a non-blocking `connect` returned "still in progress".
fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || os_in_progress(err)
}

#[cfg(unix)]
fn os_in_progress(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::EINPROGRESS || code == libc::EINTR)
}

#[cfg(not(unix))]
fn os_in_progress(_err: &io::Error) -> bool {
    false
}
