// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connector pool service and its worker loop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{env_u64, CONNECTOR_CYCLE, DEFAULT_CONNECT_TIMEOUT};
use crate::error::{Result, SocketError};
use crate::metrics::{ConnectorMetrics, ConnectorMetricsSnapshot};
use crate::tcp::{ConnectionId, TcpClient};
use crate::thread::{StopToken, WorkerThread};

use super::task::{ConnectTask, Outcome};
use super::ConnectorCallback;

/// Connector pool configuration.
#[derive(Clone, Debug)]
pub struct ConnectorPoolConfig {
    /// Worker cadence
    pub cycle: Duration,

    /// Timeout for tasks added without one
    pub default_timeout: Duration,
}

impl Default for ConnectorPoolConfig {
    fn default() -> Self {
        Self {
            cycle: CONNECTOR_CYCLE,
            default_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectorPoolConfig {
    /// Defaults, with `IFC_CONNECT_TIMEOUT_MS` overriding the default timeout.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_u64("IFC_CONNECT_TIMEOUT_MS") {
            config.default_timeout = Duration::from_millis(ms);
        }
        config
    }

    /// Set the worker cadence.
    pub fn with_cycle(mut self, cycle: Duration) -> Self {
        self.cycle = cycle;
        self
    }

    /// Set the default task timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Producer side of the pool, guarded by one lock.
#[derive(Default)]
struct Queue {
    /// Tasks not yet taken over by the worker
    incoming: Vec<ConnectTask>,
    /// Working tasks to drop at the next cycle
    cancel_ids: Vec<ConnectionId>,
    cancel_callbacks: Vec<ConnectorCallback>,
}

impl Queue {
    fn is_cancelled(&self, task: &ConnectTask) -> bool {
        self.cancel_ids.contains(&task.id)
            || self.cancel_callbacks.iter().any(|cb| task.has_callback(cb))
    }
}

struct Shared {
    queue: Mutex<Queue>,
    /// Tasks currently owned by the worker
    working: AtomicUsize,
    metrics: ConnectorMetrics,
}

/// Drives many non-blocking outbound connects from one worker thread.
///
/// Each task resolves its host, issues a non-blocking connect and is polled
/// once per cycle until it connects, fails, or times out. Its callback then
/// receives the client and the outcome on the worker thread. A task removed
/// before its completion starts never sees its callback.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use ifc_net::{ConnectorPool, ConnectorPoolConfig, TcpClient};
///
/// let pool = ConnectorPool::new(ConnectorPoolConfig::default());
/// pool.start().unwrap();
///
/// let on_done = Arc::new(|client: TcpClient, ok: bool| {
///     println!("{} connected: {}", client.peer_addr(), ok);
/// });
/// pool.add_task(TcpClient::new().unwrap(), "127.0.0.1", 8080, on_done, Some(Duration::from_millis(500)))
///     .unwrap();
/// ```
pub struct ConnectorPool {
    config: ConnectorPoolConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerThread>>,
}

impl ConnectorPool {
    /// Create a stopped pool.
    pub fn new(config: ConnectorPoolConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue::default()),
                working: AtomicUsize::new(0),
                metrics: ConnectorMetrics::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start the worker thread. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let cycle = self.config.cycle;
        *worker = Some(WorkerThread::spawn("ifc-connector", move |stop| {
            run_worker(&shared, &stop, cycle)
        })?);
        log::debug!("[connector] pool started");
        Ok(())
    }

    /// Stop and join the worker thread.
    ///
    /// Tasks the worker had taken over complete as failed; tasks still queued
    /// stay queued for the next `start`.
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.terminate();
            if let Err(e) = worker.join() {
                log::warn!("[connector] {}", e);
            }
            log::debug!("[connector] pool stopped");
        }
    }

    /// True while the worker thread runs.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Queue a connect of `client` to `host:port`. Returns immediately.
    ///
    /// `timeout` defaults to the configured one. The returned id identifies
    /// the task for [`remove_task`](Self::remove_task).
    pub fn add_task(
        &self,
        client: TcpClient,
        host: &str,
        port: u16,
        callback: ConnectorCallback,
        timeout: Option<Duration>,
    ) -> Result<ConnectionId> {
        if host.is_empty() {
            return Err(SocketError::invalid("connector task needs a host"));
        }
        if port == 0 {
            return Err(SocketError::invalid("connector task needs a non-zero port"));
        }
        if client.is_retired() {
            return Err(SocketError::Retired);
        }

        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let task = ConnectTask::new(client, host.to_string(), port, timeout, callback);
        let id = task.id;

        self.shared.queue.lock().incoming.push(task);
        self.shared.metrics.record_task_added();
        log::debug!("[connector] {} queued for {}:{} ({:?})", id, host, port, timeout);
        Ok(id)
    }

    /// Cancel the task for client `id`.
    ///
    /// A task the worker has not taken over yet is removed right away and its
    /// client handed back. A task already in progress is dropped at the
    /// worker's next cycle and `None` is returned.
    pub fn remove_task(&self, id: ConnectionId) -> Option<TcpClient> {
        let mut queue = self.shared.queue.lock();
        if let Some(pos) = queue.incoming.iter().position(|task| task.id == id) {
            let task = queue.incoming.remove(pos);
            drop(queue);
            self.shared.metrics.record_cancelled(1);
            log::debug!("[connector] {} removed before start", id);
            return Some(task.client);
        }

        queue.cancel_ids.push(id);
        None
    }

    /// Cancel every task registered with `callback`.
    ///
    /// Queued tasks are removed right away and their clients returned; tasks
    /// in progress are dropped at the worker's next cycle.
    pub fn remove_tasks(&self, callback: &ConnectorCallback) -> Vec<TcpClient> {
        let mut queue = self.shared.queue.lock();
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut queue.incoming)
            .into_iter()
            .partition(|task| task.has_callback(callback));
        queue.incoming = kept;
        queue.cancel_callbacks.push(Arc::clone(callback));
        drop(queue);

        if !removed.is_empty() {
            self.shared.metrics.record_cancelled(removed.len());
            log::debug!("[connector] {} queued tasks removed by callback", removed.len());
        }
        removed.into_iter().map(|task| task.client).collect()
    }

    /// Tasks not yet completed (queued plus in progress).
    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().incoming.len() + self.shared.working.load(Ordering::Acquire)
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> ConnectorMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl Drop for ConnectorPool {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Worker
// ============================================================================

fn run_worker(shared: &Shared, stop: &StopToken, cycle: Duration) {
    let mut working: Vec<ConnectTask> = Vec::new();

    while !stop.is_stopped() {
        take_over(shared, &mut working);

        for task in working.iter_mut() {
            task.advance(&shared.metrics);
        }

        let now = Instant::now();
        let mut index = 0;
        while index < working.len() {
            match working[index].outcome(now) {
                Some(outcome) => {
                    let task = working.swap_remove(index);
                    shared.working.store(working.len(), Ordering::Release);
                    complete(shared, task, outcome);
                }
                None => index += 1,
            }
        }

        thread::sleep(cycle);
    }

    // Whatever the worker owns completes as failed, unless cancelled.
    take_cancellations(shared, &mut working);
    let remaining = working.len();
    for task in working.drain(..) {
        complete(shared, task, Outcome::Failed);
    }
    shared.working.store(0, Ordering::Release);
    if remaining > 0 {
        log::debug!("[connector] worker stopped with {} tasks in progress", remaining);
    }
}

/// Apply pending cancellations, then move incoming tasks to the working list.
fn take_over(shared: &Shared, working: &mut Vec<ConnectTask>) {
    let cancelled = {
        let mut queue = shared.queue.lock();
        let cancelled = apply_cancellations(&mut queue, working);

        let now = Instant::now();
        for mut task in queue.incoming.drain(..) {
            task.start_clock(now);
            working.push(task);
        }
        shared.working.store(working.len(), Ordering::Release);
        cancelled
    };

    // Closing sockets happens outside the lock.
    if !cancelled.is_empty() {
        shared.metrics.record_cancelled(cancelled.len());
        log::debug!("[connector] {} tasks cancelled in progress", cancelled.len());
    }
}

fn take_cancellations(shared: &Shared, working: &mut Vec<ConnectTask>) {
    let cancelled = apply_cancellations(&mut shared.queue.lock(), working);
    if !cancelled.is_empty() {
        shared.metrics.record_cancelled(cancelled.len());
    }
}

fn apply_cancellations(queue: &mut Queue, working: &mut Vec<ConnectTask>) -> Vec<ConnectTask> {
    let mut cancelled = Vec::new();
    if !queue.cancel_ids.is_empty() || !queue.cancel_callbacks.is_empty() {
        let mut index = 0;
        while index < working.len() {
            if queue.is_cancelled(&working[index]) {
                cancelled.push(working.swap_remove(index));
            } else {
                index += 1;
            }
        }
    }
    queue.cancel_ids.clear();
    queue.cancel_callbacks.clear();
    cancelled
}

/// Invoke the task's callback unless it was cancelled meanwhile.
fn complete(shared: &Shared, task: ConnectTask, outcome: Outcome) {
    {
        let queue = shared.queue.lock();
        if queue.is_cancelled(&task) {
            drop(queue);
            shared.metrics.record_cancelled(1);
            log::debug!("[connector] {} cancelled before completion", task.id);
            return;
        }
    }

    match outcome {
        Outcome::Connected => shared.metrics.record_connected(),
        Outcome::Failed => shared.metrics.record_failed(),
        Outcome::TimedOut => {
            shared.metrics.record_failed();
            shared.metrics.record_timed_out();
        }
    }

    let id = task.id;
    log::debug!("[connector] {} completed: {:?} ({})", id, outcome, task.state());
    let (client, callback) = task.into_parts(outcome);
    if catch_unwind(AssertUnwindSafe(|| callback(client, outcome.success()))).is_err() {
        shared.metrics.record_callback_panic();
        log::warn!("[connector] completion callback for {} panicked", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> ConnectorCallback {
        Arc::new(|_: TcpClient, _: bool| {})
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectorPoolConfig::default();
        assert_eq!(config.cycle, Duration::from_millis(10));
        assert_eq!(config.default_timeout, Duration::from_secs(5));
        let config = config.with_default_timeout(Duration::from_millis(250));
        assert_eq!(config.default_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_add_task_validation() {
        let pool = ConnectorPool::new(ConnectorPoolConfig::default());
        assert!(matches!(
            pool.add_task(TcpClient::new().unwrap(), "", 80, noop(), None),
            Err(SocketError::InvalidArgument(_))
        ));
        assert!(matches!(
            pool.add_task(TcpClient::new().unwrap(), "localhost", 0, noop(), None),
            Err(SocketError::InvalidArgument(_))
        ));

        let mut retired = TcpClient::new().unwrap();
        retired.disconnect();
        assert!(matches!(
            pool.add_task(retired, "localhost", 80, noop(), None),
            Err(SocketError::Retired)
        ));
        assert_eq!(pool.pending_count(), 0);
    }

    #[test]
    fn test_remove_queued_task_returns_client() {
        let pool = ConnectorPool::new(ConnectorPoolConfig::default());
        let client = TcpClient::new().unwrap();
        let client_id = client.id();

        let id = pool
            .add_task(client, "127.0.0.1", 9, noop(), None)
            .unwrap();
        assert_eq!(id, client_id);
        assert_eq!(pool.pending_count(), 1);

        let returned = pool.remove_task(id).expect("queued task");
        assert_eq!(returned.id(), client_id);
        assert_eq!(pool.pending_count(), 0);
        assert!(pool.remove_task(id).is_none());
        assert_eq!(pool.metrics().cancelled, 1);
    }

    #[test]
    fn test_remove_tasks_by_callback() {
        let pool = ConnectorPool::new(ConnectorPoolConfig::default());
        let ours = noop();
        let theirs = noop();

        pool.add_task(TcpClient::new().unwrap(), "127.0.0.1", 9, Arc::clone(&ours), None)
            .unwrap();
        pool.add_task(TcpClient::new().unwrap(), "127.0.0.1", 9, Arc::clone(&theirs), None)
            .unwrap();
        pool.add_task(TcpClient::new().unwrap(), "127.0.0.1", 9, Arc::clone(&ours), None)
            .unwrap();

        let removed = pool.remove_tasks(&ours);
        assert_eq!(removed.len(), 2);
        assert_eq!(pool.pending_count(), 1);
    }

    #[test]
    fn test_start_stop() {
        let pool = ConnectorPool::new(ConnectorPoolConfig::default());
        assert!(!pool.is_running());
        pool.start().unwrap();
        pool.start().unwrap();
        assert!(pool.is_running());
        pool.stop();
        assert!(!pool.is_running());
        pool.stop();
    }
}
