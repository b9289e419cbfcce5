// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timing and sizing constants shared by the socket layer.
//!
//! Every blocking point in the layer is a bounded readiness wait, so these
//! slices also bound how long a stop request can go unnoticed.

use std::time::Duration;

/// Readiness slice for synchronous send/receive loops.
pub const SYNC_IO_SLICE: Duration = Duration::from_millis(250);

/// Readiness slice for listener threads (TCP accept, UDP receive).
pub const LISTENER_POLL_SLICE: Duration = Duration::from_millis(100);

/// Readiness slice while checking a non-blocking connect.
pub const CONNECT_POLL_SLICE: Duration = Duration::from_millis(100);

/// Connector pool worker cadence.
pub const CONNECTOR_CYCLE: Duration = Duration::from_millis(10);

/// How long `stop_threads` waits for listener threads to deregister.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Poll interval while waiting for listener threads to deregister.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// TCP listen backlog.
pub const LISTEN_BACKLOG: i32 = 30;

/// Default UDP listener thread count.
pub const DEFAULT_UDP_THREADS: usize = 2;

/// Default receive buffer per UDP listener thread (max datagram size).
pub const DEFAULT_UDP_RECV_BUFFER: usize = 64 * 1024;

/// Default timeout for connector pool tasks.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse a positive integer from an environment variable.
pub(crate) fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            log::warn!("[config] ignoring {}={:?} (expected positive integer)", name, raw);
            None
        }
    }
}
