// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker threads with cooperative stop.
//!
//! [`WorkerThread`] is the start / terminate / join abstraction the listeners
//! and the connector pool run on. Termination only raises a flag: thread
//! bodies check their [`StopToken`] once per poll slice, so a stop request is
//! noticed within one slice.
//!
//! [`ThreadRegistry`] is the lock-guarded list of running threads a pool
//! keeps. A thread registers itself when its body starts and the returned
//! [`Registration`] removes it again when dropped, including on unwind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, SocketError};

/// Shared stop flag handed to a thread body.
#[derive(Clone, Debug, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    /// Fresh, un-stopped token.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once termination was requested.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Request termination.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Named OS thread with a cooperative stop flag.
///
/// Dropping a `WorkerThread` terminates and joins it.
#[derive(Debug)]
pub struct WorkerThread {
    name: String,
    stop: StopToken,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Spawn `body` on a new thread called `name`.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let name = name.into();
        let stop = StopToken::new();
        let token = stop.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(token))
            .map_err(|e| SocketError::Thread(format!("failed to spawn {}: {}", name, e)))?;

        log::debug!("[thread] {} started", name);
        Ok(Self {
            name,
            stop,
            handle: Some(handle),
        })
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the thread to stop. Does not wait.
    pub fn terminate(&self) {
        self.stop.stop();
    }

    /// True once the thread body returned (or the thread was detached).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the thread to exit.
    ///
    /// Joining from the thread itself is skipped, since it could never return.
    pub fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        if handle.thread().id() == thread::current().id() {
            log::debug!("[thread] {} dropped from its own body, detaching", self.name);
            return Ok(());
        }

        handle
            .join()
            .map_err(|_| SocketError::Thread(format!("{} panicked", self.name)))?;
        log::debug!("[thread] {} joined", self.name);
        Ok(())
    }

    /// Give up on the thread. It keeps running until its body returns.
    pub fn detach(mut self) {
        self.handle.take();
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.terminate();
        if let Err(e) = self.join() {
            log::warn!("[thread] {}", e);
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Lock-guarded list of the pool threads currently running.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    running: Mutex<Vec<usize>>,
}

impl ThreadRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register thread `index`; it stays listed until the guard drops.
    pub fn register(self: &Arc<Self>, index: usize) -> Registration {
        self.running.lock().push(index);
        Registration {
            registry: Arc::clone(self),
            index,
        }
    }

    /// Number of registered threads.
    pub fn running(&self) -> usize {
        self.running.lock().len()
    }

    /// True if thread `index` is registered.
    pub fn contains(&self, index: usize) -> bool {
        self.running.lock().contains(&index)
    }

    /// Poll every `interval` until `done` holds or `grace` elapsed.
    ///
    /// Returns the final value of `done`.
    pub fn wait_until(&self, grace: Duration, interval: Duration, done: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            if done(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(interval.min(deadline - now));
        }
    }

    fn deregister(&self, index: usize) {
        let mut running = self.running.lock();
        if let Some(pos) = running.iter().position(|&i| i == index) {
            running.swap_remove(pos);
        }
    }
}

/// Registration of one running thread. Dropping it deregisters the thread.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ThreadRegistry>,
    index: usize,
}

impl Registration {
    /// Index the thread registered under.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.index);
    }
}
