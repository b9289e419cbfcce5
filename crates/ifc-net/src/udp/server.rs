// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP server with a fixed pool of listener threads.
//!
//! All listener threads share one bound, non-blocking socket. Each thread
//! waits for readability in short slices, then tries `recvfrom`; the OS hands
//! every datagram to exactly one caller, and the threads that lose the race
//! see would-block and go back to waiting. There is no ordering across
//! threads.
//!
//! ```text
//!               +---------------------------+
//!               |  UdpEndpoint (Arc, bound)  |
//!               +---------------------------+
//!                  ^          ^          ^
//!            poll+recv   poll+recv   poll+recv
//!                  |          |          |
//!             ifc-udp-0  ifc-udp-1  ifc-udp-N
//!                  |          |          |
//!                  +----> on_receive(data, peer)
//! ```

use std::net::Ipv4Addr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;

use crate::addr::PeerAddr;
use crate::config::{
    env_u64, DEFAULT_UDP_RECV_BUFFER, DEFAULT_UDP_THREADS, LISTENER_POLL_SLICE,
    STOP_GRACE_PERIOD, STOP_POLL_INTERVAL,
};
use crate::error::{Result, SocketError};
use crate::metrics::{UdpServerMetrics, UdpServerMetricsSnapshot};
use crate::poll::{self, Interest};
use crate::thread::{StopToken, ThreadRegistry, WorkerThread};
use crate::udp::UdpEndpoint;

/// Receive handler, invoked on a listener thread for every datagram.
pub type UdpReceiveCallback = Arc<dyn Fn(&[u8], PeerAddr) + Send + Sync>;

// ============================================================================
// Configuration
// ============================================================================

/// UDP server configuration.
#[derive(Clone, Debug)]
pub struct UdpServerConfig {
    /// Port to bind (0 lets the OS pick one, see [`UdpServer::local_addr`])
    pub port: u16,

    /// Interface to bind
    pub bind_address: Ipv4Addr,

    /// Set `SO_REUSEADDR` before binding
    pub force_bind: bool,

    /// Number of listener threads (at least 1)
    pub thread_count: usize,

    /// Per-thread receive buffer; longer datagrams are truncated
    pub recv_buffer_size: usize,

    /// Readiness slice of the listener threads
    pub poll_interval: Duration,

    /// Enable `SO_BROADCAST`
    pub broadcast: bool,
}

impl Default for UdpServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_address: Ipv4Addr::UNSPECIFIED,
            force_bind: false,
            thread_count: DEFAULT_UDP_THREADS,
            recv_buffer_size: DEFAULT_UDP_RECV_BUFFER,
            poll_interval: LISTENER_POLL_SLICE,
            broadcast: false,
        }
    }
}

impl UdpServerConfig {
    /// Defaults, with `IFC_UDP_THREADS` overriding the thread count.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(threads) = env_u64("IFC_UDP_THREADS") {
            config.thread_count = usize::try_from(threads).unwrap_or(DEFAULT_UDP_THREADS);
        }
        config
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
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

    /// Set the listener thread count (clamped to at least 1).
    pub fn with_thread_count(mut self, count: usize) -> Self {
        self.thread_count = count.max(1);
        self
    }

    /// Set the per-thread receive buffer size.
    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size.max(1);
        self
    }

    /// Set the listener poll slice.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enable broadcast sends.
    pub fn with_broadcast(mut self, enable: bool) -> Self {
        self.broadcast = enable;
        self
    }
}

// ============================================================================
// Server
// ============================================================================

/// UDP server: one bound socket, N listener threads, one receive callback.
pub struct UdpServer {
    config: UdpServerConfig,
    endpoint: Option<Arc<UdpEndpoint>>,
    callback: Arc<RwLock<Option<UdpReceiveCallback>>>,
    workers: Vec<WorkerThread>,
    registry: Arc<ThreadRegistry>,
    metrics: Arc<UdpServerMetrics>,
}

impl UdpServer {
    /// Create a closed server.
    pub fn new(config: UdpServerConfig) -> Self {
        Self {
            config,
            endpoint: None,
            callback: Arc::new(RwLock::new(None)),
            workers: Vec::new(),
            registry: Arc::new(ThreadRegistry::new()),
            metrics: Arc::new(UdpServerMetrics::new()),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &UdpServerConfig {
        &self.config
    }

    /// Set the receive handler. Takes effect for the next datagram.
    pub fn on_receive(&self, callback: UdpReceiveCallback) {
        *self.callback.write() = Some(callback);
    }

    /// Number of listener threads `start_threads` spawns.
    pub fn max_thread_count(&self) -> usize {
        self.config.thread_count.max(1)
    }

    /// Listener threads currently registered as running.
    pub fn running_threads(&self) -> usize {
        self.registry.running()
    }

    /// Bind the socket and start the listener threads.
    ///
    /// On failure everything opened so far is closed again.
    pub fn open(&mut self) -> Result<()> {
        if self.endpoint.is_some() {
            return Ok(());
        }

        let endpoint = self.bind_endpoint()?;
        self.endpoint = Some(Arc::new(endpoint));

        if let Err(e) = self.start_threads() {
            self.close();
            return Err(e);
        }

        log::info!(
            "[udp] server listening on {} with {} threads",
            self.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            self.max_thread_count()
        );
        Ok(())
    }

    fn bind_endpoint(&self) -> Result<UdpEndpoint> {
        let mut endpoint = UdpEndpoint::new()?;
        endpoint.set_block_mode(false)?;
        endpoint.open()?;
        endpoint.bind_addr(self.config.bind_address, self.config.port, self.config.force_bind)?;
        if self.config.broadcast {
            endpoint.set_broadcast(true)?;
        }
        Ok(endpoint)
    }

    /// Stop the listener threads and close the socket. Idempotent.
    pub fn close(&mut self) {
        self.stop_threads();
        if self.endpoint.take().is_some() {
            log::info!("[udp] server closed");
        }
    }

    /// True while the socket is bound.
    pub fn is_open(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<PeerAddr> {
        self.endpoint()?.local_addr()
    }

    /// Send `buf` to `peer` from the server socket, `send_times` times.
    pub fn send_to(&self, buf: &[u8], peer: PeerAddr, send_times: u32) -> Result<usize> {
        self.endpoint()?.send_buffer(buf, peer, send_times)
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> UdpServerMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn endpoint(&self) -> Result<&Arc<UdpEndpoint>> {
        self.endpoint.as_ref().ok_or(SocketError::NotOpen)
    }

    /// Spawn `max_thread_count()` listener threads on the bound socket.
    ///
    /// No-op if they are already running.
    pub fn start_threads(&mut self) -> Result<()> {
        if !self.workers.is_empty() {
            return Ok(());
        }
        let endpoint = Arc::clone(self.endpoint()?);

        for index in 0..self.max_thread_count() {
            let listener = Listener {
                index,
                endpoint: Arc::clone(&endpoint),
                callback: Arc::clone(&self.callback),
                registry: Arc::clone(&self.registry),
                metrics: Arc::clone(&self.metrics),
                poll_interval: self.config.poll_interval,
                buf_size: self.config.recv_buffer_size.max(1),
            };

            match WorkerThread::spawn(format!("ifc-udp-{}", index), move |stop| listener.run(stop)) {
                Ok(worker) => self.workers.push(worker),
                Err(e) => {
                    self.stop_threads();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Signal every listener thread to stop and wait for them.
    ///
    /// Waits up to 3 s for the threads to deregister; threads still running
    /// after that are detached and logged.
    pub fn stop_threads(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        for worker in &self.workers {
            worker.terminate();
        }

        let workers = &self.workers;
        let all_stopped = self.registry.wait_until(STOP_GRACE_PERIOD, STOP_POLL_INTERVAL, |registry| {
            registry.running() == 0 && workers.iter().all(WorkerThread::is_finished)
        });
        if !all_stopped {
            log::warn!(
                "[udp] {} listener threads still running after {:?}",
                self.registry.running(),
                STOP_GRACE_PERIOD
            );
        }

        for mut worker in self.workers.drain(..) {
            if worker.is_finished() {
                if let Err(e) = worker.join() {
                    log::warn!("[udp] {}", e);
                }
            } else {
                log::warn!("[udp] detaching unresponsive listener {}", worker.name());
                worker.detach();
            }
        }
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Listener thread
// ============================================================================

struct Listener {
    index: usize,
    endpoint: Arc<UdpEndpoint>,
    callback: Arc<RwLock<Option<UdpReceiveCallback>>>,
    registry: Arc<ThreadRegistry>,
    metrics: Arc<UdpServerMetrics>,
    poll_interval: Duration,
    buf_size: usize,
}

impl Listener {
    fn run(self, stop: StopToken) {
        let _registration = self.registry.register(self.index);
        let mut buf = vec![0u8; self.buf_size];

        while !stop.is_stopped() {
            let socket = match self.endpoint.handle() {
                Ok(socket) => socket,
                Err(_) => break,
            };

            match poll::wait(socket, Interest::Readable, self.poll_interval) {
                Ok(Some(_)) => {}
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("[udp] listener {} poll failed: {}", self.index, e);
                    thread::sleep(self.poll_interval);
                    continue;
                }
            }

            match self.endpoint.recv_buffer_from(&mut buf) {
                Ok(Some((len, peer))) => self.dispatch(&buf[..len], peer),
                Ok(None) => self.metrics.record_lost_race(),
                Err(e) => {
                    self.metrics.record_recv_error();
                    log::debug!("[udp] listener {} receive failed: {}", self.index, e);
                }
            }
        }

        log::debug!("[udp] listener {} exiting", self.index);
    }

    fn dispatch(&self, data: &[u8], peer: PeerAddr) {
        // Clone out so the lock is not held while the handler runs.
        let Some(handler) = self.callback.read().clone() else {
            log::trace!("[udp] no handler, dropping {} bytes from {}", data.len(), peer);
            return;
        };

        self.metrics.record_datagram(data.len());
        let result = catch_unwind(AssertUnwindSafe(|| handler(data, peer)));
        if result.is_err() {
            self.metrics.record_callback_panic();
            log::warn!("[udp] receive handler panicked on datagram from {}", peer);
        }
    }
}
