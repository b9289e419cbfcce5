// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One outbound connect driven by the connector pool worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::addr::resolve_peer;
use crate::metrics::ConnectorMetrics;
use crate::tcp::{AsyncConnectState, ConnectionId, TcpClient};

use super::ConnectorCallback;

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Connected,
    Failed,
    TimedOut,
}

impl Outcome {
    pub(crate) fn success(self) -> bool {
        self == Outcome::Connected
    }
}

pub(crate) struct ConnectTask {
    pub(crate) id: ConnectionId,
    pub(crate) client: TcpClient,
    host: String,
    port: u16,
    timeout: Duration,
    /// Set when the worker takes the task over
    started: Option<Instant>,
    /// Progress of this task's attempt; the client may carry an older state
    state: AsyncConnectState,
    pub(crate) callback: ConnectorCallback,
}

impl ConnectTask {
    pub(crate) fn new(
        client: TcpClient,
        host: String,
        port: u16,
        timeout: Duration,
        callback: ConnectorCallback,
    ) -> Self {
        Self {
            id: client.id(),
            client,
            host,
            port,
            timeout,
            started: None,
            state: AsyncConnectState::Idle,
            callback,
        }
    }

    pub(crate) fn start_clock(&mut self, now: Instant) {
        self.started.get_or_insert(now);
    }

    pub(crate) fn state(&self) -> AsyncConnectState {
        self.state
    }

    /// True if this task was registered with `callback`.
    pub(crate) fn has_callback(&self, callback: &ConnectorCallback) -> bool {
        same_callback(&self.callback, callback)
    }

    /// Move the connect forward without blocking on the network.
    ///
    /// Host resolution is the one step that may block.
    pub(crate) fn advance(&mut self, metrics: &ConnectorMetrics) {
        let next = match self.state {
            AsyncConnectState::Idle => match resolve_peer(&self.host, self.port) {
                Ok(peer) => self.client.begin_connect(peer),
                Err(e) => {
                    log::debug!("[connector] {} {}", self.id, e);
                    metrics.record_resolve_failure();
                    AsyncConnectState::Failed
                }
            },
            AsyncConnectState::Connecting => self.client.check_async_connect_state(Duration::ZERO),
            done => done,
        };

        debug_assert!(self.state.can_advance_to(next), "{} -> {}", self.state, next);
        self.state = next;
    }

    /// Final outcome, or `None` while the attempt is still pending.
    pub(crate) fn outcome(&self, now: Instant) -> Option<Outcome> {
        match self.state {
            AsyncConnectState::Connected => Some(Outcome::Connected),
            AsyncConnectState::Failed => Some(Outcome::Failed),
            _ if self.is_expired(now) => Some(Outcome::TimedOut),
            _ => None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.started
            .is_some_and(|started| now.saturating_duration_since(started) >= self.timeout)
    }

    /// Hand the client to its callback.
    pub(crate) fn into_parts(mut self, outcome: Outcome) -> (TcpClient, ConnectorCallback) {
        if outcome == Outcome::TimedOut {
            self.client.abandon_connect();
        }
        (self.client, self.callback)
    }
}

/// Callback identity: same closure allocation.
pub(crate) fn same_callback(a: &ConnectorCallback, b: &ConnectorCallback) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
