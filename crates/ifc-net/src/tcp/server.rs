// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listening TCP server with one accept thread.
//!
//! The listener thread waits for acceptability in 100 ms slices. Each accepted
//! socket is wrapped by the connection factory (by default
//! [`TcpConnection::from_accepted`]) and handed, by value, to the accepted
//! callback on the listener thread. Without a callback the connection is
//! dropped, which closes it.

use std::net::Ipv4Addr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::addr::PeerAddr;
use crate::config::{LISTENER_POLL_SLICE, LISTEN_BACKLOG};
use crate::error::{is_transient_io, Result, SocketError};
use crate::metrics::{TcpServerMetrics, TcpServerMetricsSnapshot};
use crate::poll::{self, Interest};
use crate::socket::Socket;
use crate::tcp::TcpConnection;
use crate::thread::{StopToken, WorkerThread};

/// Accepted-connection handler. Owns the connection from then on.
pub type TcpAcceptedCallback = Arc<dyn Fn(TcpConnection) + Send + Sync>;

/// Connection factory for accepted sockets.
pub type TcpCreateConnectionCallback =
    Arc<dyn Fn(socket2::Socket, PeerAddr) -> Result<TcpConnection> + Send + Sync>;

/// TCP server configuration.
#[derive(Clone, Debug)]
pub struct TcpServerConfig {
    /// Port to listen on (must be non-zero)
    pub port: u16,

    /// Interface to bind
    pub bind_address: Ipv4Addr,

    /// Set `SO_REUSEADDR` before binding
    pub force_bind: bool,

    /// Listen backlog
    pub backlog: i32,

    /// Readiness slice of the listener thread
    pub poll_interval: Duration,

    /// Set `TCP_NODELAY` on accepted connections
    pub nodelay: bool,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_address: Ipv4Addr::UNSPECIFIED,
            force_bind: false,
            backlog: LISTEN_BACKLOG,
            poll_interval: LISTENER_POLL_SLICE,
            nodelay: false,
        }
    }
}

impl TcpServerConfig {
    /// Default configuration on `port`.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Set the bind interface.
    pub fn with_bind_address(mut self, addr: Ipv4Addr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set `SO_REUSEADDR` before binding.
    pub fn with_force_bind(mut self, force: bool) -> Self {
        self.force_bind = force;
        self
    }

    /// Set the listen backlog.
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// Set the listener poll slice.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set `TCP_NODELAY` on accepted connections.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

/// Callbacks shared with the listener thread.
#[derive(Default)]
struct Handlers {
    accepted: Option<TcpAcceptedCallback>,
    create: Option<TcpCreateConnectionCallback>,
}

/// TCP server: one listening socket, one accept thread.
pub struct TcpServer {
    config: TcpServerConfig,
    socket: Option<Arc<Socket>>,
    listener: Option<WorkerThread>,
    handlers: Arc<parking_lot::RwLock<Handlers>>,
    metrics: Arc<TcpServerMetrics>,
}

impl TcpServer {
    /// Create a closed server.
    pub fn new(config: TcpServerConfig) -> Self {
        Self {
            config,
            socket: None,
            listener: None,
            handlers: Arc::new(parking_lot::RwLock::new(Handlers::default())),
            metrics: Arc::new(TcpServerMetrics::new()),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &TcpServerConfig {
        &self.config
    }

    /// Set the accepted-connection handler.
    pub fn on_accepted(&self, callback: TcpAcceptedCallback) {
        self.handlers.write().accepted = Some(callback);
    }

    /// Replace the connection factory used for accepted sockets.
    pub fn on_create_connection(&self, callback: TcpCreateConnectionCallback) {
        self.handlers.write().create = Some(callback);
    }

    /// Bind, listen and start the listener thread.
    ///
    /// Port 0 is rejected; pick a port with [`free_port`](crate::free_port).
    /// On failure the socket is closed again.
    pub fn open(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        if self.config.port == 0 {
            return Err(SocketError::invalid("TCP server port must be non-zero"));
        }

        let socket = Arc::new(self.listen()?);

        let listener = Listener {
            socket: Arc::clone(&socket),
            handlers: Arc::clone(&self.handlers),
            metrics: Arc::clone(&self.metrics),
            poll_interval: self.config.poll_interval,
            nodelay: self.config.nodelay,
        };
        let worker = WorkerThread::spawn(
            format!("ifc-tcp-accept-{}", self.config.port),
            move |stop| listener.run(stop),
        )?;

        self.socket = Some(socket);
        self.listener = Some(worker);
        log::info!(
            "[tcp] server listening on {}:{}",
            self.config.bind_address,
            self.config.port
        );
        Ok(())
    }

    fn listen(&self) -> Result<Socket> {
        let mut socket = Socket::tcp()?;
        socket.set_block_mode(false)?;
        socket.open()?;

        let addr = PeerAddr::new(u32::from(self.config.bind_address), self.config.port);
        socket.bind(addr, self.config.force_bind)?;
        socket.handle()?.listen(self.config.backlog).map_err(|e| {
            log::debug!("[tcp] listen on {} failed: {}", addr, e);
            SocketError::from(e)
        })?;
        Ok(socket)
    }

    /// Stop the listener thread and close the socket. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.terminate();
            if let Err(e) = listener.join() {
                log::warn!("[tcp] {}", e);
            }
        }
        if self.socket.take().is_some() {
            log::info!("[tcp] server on port {} closed", self.config.port);
        }
    }

    /// True while listening.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<PeerAddr> {
        self.socket.as_ref().ok_or(SocketError::NotOpen)?.local_addr()
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> TcpServerMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Listener thread
// ============================================================================

struct Listener {
    socket: Arc<Socket>,
    handlers: Arc<parking_lot::RwLock<Handlers>>,
    metrics: Arc<TcpServerMetrics>,
    poll_interval: Duration,
    nodelay: bool,
}

impl Listener {
    fn run(self, stop: StopToken) {
        let socket = match self.socket.handle() {
            Ok(socket) => socket,
            Err(e) => {
                log::error!("[tcp] listener started without socket: {}", e);
                return;
            }
        };

        while !stop.is_stopped() {
            match poll::wait(socket, Interest::Readable, self.poll_interval) {
                Ok(Some(_)) => {}
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("[tcp] accept poll failed: {}", e);
                    thread::sleep(self.poll_interval);
                    continue;
                }
            }

            match socket.accept() {
                Ok((handle, addr)) => {
                    let peer = PeerAddr::from_sock_addr(&addr).unwrap_or_default();
                    self.handle_accepted(handle, peer);
                }
                Err(e) if is_transient_io(&e) => {}
                Err(e) => {
                    self.metrics.record_accept_error();
                    log::debug!("[tcp] accept failed: {}", e);
                }
            }
        }

        log::debug!("[tcp] listener exiting");
    }

    fn handle_accepted(&self, handle: socket2::Socket, peer: PeerAddr) {
        let (accepted, create) = {
            let handlers = self.handlers.read();
            (handlers.accepted.clone(), handlers.create.clone())
        };

        let created = match create {
            Some(create) => match catch_unwind(AssertUnwindSafe(|| create(handle, peer))) {
                Ok(result) => result,
                Err(_) => {
                    self.metrics.record_callback_panic();
                    log::warn!("[tcp] connection factory panicked for {}", peer);
                    return;
                }
            },
            None => TcpConnection::from_accepted(handle, peer),
        };

        let conn = match created {
            Ok(conn) => conn,
            Err(e) => {
                self.metrics.record_create_error();
                log::warn!("[tcp] cannot create connection for {}: {}", peer, e);
                return;
            }
        };

        if self.nodelay {
            if let Err(e) = conn.set_nodelay(true) {
                log::debug!("[tcp] {} set_nodelay failed: {}", conn.id(), e);
            }
        }

        self.metrics.record_accepted();
        log::debug!("[tcp] accepted {} from {}", conn.id(), peer);

        let Some(accepted) = accepted else {
            self.metrics.record_dropped();
            return;
        };

        if catch_unwind(AssertUnwindSafe(|| accepted(conn))).is_err() {
            self.metrics.record_callback_panic();
            log::warn!("[tcp] accepted handler panicked for {}", peer);
        }
    }
}
