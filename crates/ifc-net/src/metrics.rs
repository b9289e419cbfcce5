// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Diagnostic counters for the servers and the connector pool.
//!
//! All counters are relaxed atomics updated from the listener/worker threads;
//! callers read them through `snapshot()`.
//!
//! # Example
//!
//! ```
//! use ifc_net::metrics::UdpServerMetrics;
//!
//! let metrics = UdpServerMetrics::new();
//! metrics.record_datagram(512);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.datagrams_received, 1);
//! assert_eq!(snapshot.bytes_received, 512);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

// ============================================================================
// UDP server
// ============================================================================

/// Counters for a [`UdpServer`](crate::UdpServer).
#[derive(Debug)]
pub struct UdpServerMetrics {
    /// Datagrams handed to the receive callback
    datagrams_received: AtomicU64,

    /// Payload bytes handed to the receive callback
    bytes_received: AtomicU64,

    /// Receive attempts that lost the race to another listener thread
    lost_races: AtomicU64,

    /// Receive errors reported by the OS
    recv_errors: AtomicU64,

    /// Receive callbacks that panicked
    callback_panics: AtomicU64,

    start_time: Instant,
}

impl UdpServerMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            datagrams_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            lost_races: AtomicU64::new(0),
            recv_errors: AtomicU64::new(0),
            callback_panics: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one datagram dispatched to the callback.
    pub fn record_datagram(&self, bytes: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a readiness wake-up that found no datagram.
    pub fn record_lost_race(&self) {
        self.lost_races.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a receive error.
    pub fn record_recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a panicking receive callback.
    pub fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> UdpServerMetricsSnapshot {
        UdpServerMetricsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            lost_races: self.lost_races.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for UdpServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`UdpServerMetrics`].
#[derive(Clone, Debug, Default)]
pub struct UdpServerMetricsSnapshot {
    /// Datagrams received
    pub datagrams_received: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Wake-ups that found no datagram
    pub lost_races: u64,
    /// Receive errors
    pub recv_errors: u64,
    /// Callback panics
    pub callback_panics: u64,
    /// Uptime in seconds
    pub uptime_secs: f64,
}

impl UdpServerMetricsSnapshot {
    /// Datagrams per second since the server was created.
    pub fn datagram_rate(&self) -> f64 {
        if self.uptime_secs > 0.0 {
            self.datagrams_received as f64 / self.uptime_secs
        } else {
            0.0
        }
    }
}

// ============================================================================
// TCP server
// ============================================================================

/// Counters for a [`TcpServer`](crate::TcpServer).
#[derive(Debug, Default)]
pub struct TcpServerMetrics {
    accepted: AtomicU64,
    dropped: AtomicU64,
    accept_errors: AtomicU64,
    create_errors: AtomicU64,
    callback_panics: AtomicU64,
}

impl TcpServerMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted connection.
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection dropped because no accept callback was set.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed `accept`.
    pub fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed connection-creation override.
    pub fn record_create_error(&self) {
        self.create_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a panicking callback.
    pub fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> TcpServerMetricsSnapshot {
        TcpServerMetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            create_errors: self.create_errors.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`TcpServerMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TcpServerMetricsSnapshot {
    /// Connections accepted
    pub accepted: u64,
    /// Connections dropped without a handler
    pub dropped: u64,
    /// Accept failures
    pub accept_errors: u64,
    /// Connection-creation failures
    pub create_errors: u64,
    /// Callback panics
    pub callback_panics: u64,
}

// ============================================================================
// Connector pool
// ============================================================================

/// Counters for a [`ConnectorPool`](crate::ConnectorPool).
#[derive(Debug, Default)]
pub struct ConnectorMetrics {
    tasks_added: AtomicU64,
    connected: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    resolve_failures: AtomicU64,
    cancelled: AtomicU64,
    callback_panics: AtomicU64,
}

impl ConnectorMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_task_added(&self) {
        self.tasks_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connected(&self) {
        self.connected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resolve_failure(&self) {
        self.resolve_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self, count: usize) {
        self.cancelled.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> ConnectorMetricsSnapshot {
        ConnectorMetricsSnapshot {
            tasks_added: self.tasks_added.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            resolve_failures: self.resolve_failures.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`ConnectorMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectorMetricsSnapshot {
    /// Tasks accepted by `add_task`
    pub tasks_added: u64,
    /// Tasks completed with a connected client
    pub connected: u64,
    /// Tasks completed as failed (includes timeouts and resolve failures)
    pub failed: u64,
    /// Failed tasks whose timeout elapsed
    pub timed_out: u64,
    /// Failed tasks whose host could not be resolved
    pub resolve_failures: u64,
    /// Tasks removed before completion
    pub cancelled: u64,
    /// Completion callbacks that panicked
    pub callback_panics: u64,
}

impl ConnectorMetricsSnapshot {
    /// Tasks that reached a completion callback.
    pub fn completed(&self) -> u64 {
        self.connected + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_metrics_snapshot() {
        let metrics = UdpServerMetrics::new();
        metrics.record_datagram(10);
        metrics.record_datagram(20);
        metrics.record_lost_race();
        metrics.record_callback_panic();

        let snap = metrics.snapshot();
        assert_eq!(snap.datagrams_received, 2);
        assert_eq!(snap.bytes_received, 30);
        assert_eq!(snap.lost_races, 1);
        assert_eq!(snap.recv_errors, 0);
        assert_eq!(snap.callback_panics, 1);
        assert!(snap.datagram_rate() >= 0.0);
    }

    #[test]
    fn test_tcp_server_metrics_snapshot() {
        let metrics = TcpServerMetrics::new();
        metrics.record_accepted();
        metrics.record_accepted();
        metrics.record_dropped();

        let snap = metrics.snapshot();
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.accept_errors, 0);
    }

    #[test]
    fn test_connector_completed_counts() {
        let metrics = ConnectorMetrics::new();
        metrics.record_task_added();
        metrics.record_task_added();
        metrics.record_task_added();
        metrics.record_connected();
        metrics.record_failed();
        metrics.record_timed_out();
        metrics.record_cancelled(1);

        let snap = metrics.snapshot();
        assert_eq!(snap.tasks_added, 3);
        assert_eq!(snap.completed(), 2);
        assert_eq!(snap.timed_out, 1);
        assert_eq!(snap.cancelled, 1);
    }
}
