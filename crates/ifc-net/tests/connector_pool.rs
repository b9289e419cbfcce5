// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Connector pool tests.
//!
//! Drives real non-blocking connects against loopback listeners, closed
//! ports, saturated accept queues and unresolvable hosts, and checks that
//! cancellation keeps callbacks from firing.

use crossbeam::channel::{unbounded, Receiver};
use ifc_net::{free_port, ConnectorCallback, ConnectorPool, ConnectorPoolConfig, TcpClient};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn started_pool() -> ConnectorPool {
    let pool = ConnectorPool::new(ConnectorPoolConfig::default());
    pool.start().unwrap();
    pool
}

/// Callback that forwards every completion to a channel.
fn channel_callback() -> (ConnectorCallback, Receiver<(TcpClient, bool)>) {
    let (tx, rx) = unbounded();
    let callback: ConnectorCallback = Arc::new(move |client: TcpClient, ok: bool| {
        let _ = tx.send((client, ok));
    });
    (callback, rx)
}

/// Callback that only counts its invocations.
fn counting_callback() -> (ConnectorCallback, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let callback: ConnectorCallback = Arc::new(move |_: TcpClient, _: bool| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (callback, calls)
}

fn wait_idle(pool: &ConnectorPool) -> bool {
    let deadline = Instant::now() + WAIT;
    while pool.pending_count() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    pool.pending_count() == 0
}

/// Loopback listener with a full accept queue: new connects stay pending.
fn saturated_listener() -> (Socket, Vec<Socket>, u16) {
    let listener = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
    listener
        .bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)))
        .unwrap();
    listener.listen(0).unwrap();
    let addr = listener.local_addr().unwrap();
    let port = addr.as_socket().unwrap().port();

    // Never accepted, so they hold the queue.
    let fillers = (0..4)
        .map(|_| {
            let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
            socket.set_nonblocking(true).unwrap();
            let _ = socket.connect(&addr);
            socket
        })
        .collect();
    thread::sleep(Duration::from_millis(50));
    (listener, fillers, port)
}

#[test]
fn test_connects_to_local_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let pool = started_pool();
    let (callback, done) = channel_callback();
    let client = TcpClient::new().unwrap();
    let client_id = client.id();

    let id = pool
        .add_task(client, "127.0.0.1", port, callback, Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(id, client_id);

    let (client, ok) = done.recv_timeout(WAIT).unwrap();
    assert!(ok);
    assert_eq!(client.id(), client_id);
    assert!(client.is_connected());
    assert_eq!(client.peer_addr().port, port);

    // Exactly once.
    assert!(done.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(wait_idle(&pool));

    let metrics = pool.metrics();
    assert_eq!(metrics.tasks_added, 1);
    assert_eq!(metrics.connected, 1);
    assert_eq!(metrics.completed(), 1);
}

#[test]
fn test_refused_port_reports_failure() {
    let port = free_port().unwrap();
    let pool = started_pool();
    let (callback, done) = channel_callback();

    pool.add_task(TcpClient::new().unwrap(), "127.0.0.1", port, callback, Some(Duration::from_secs(2)))
        .unwrap();

    let (client, ok) = done.recv_timeout(WAIT).unwrap();
    assert!(!ok);
    assert!(!client.is_connected());
    // A failed attempt leaves the client reusable.
    assert!(!client.is_retired());
    assert!(done.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(pool.metrics().failed, 1);
}

#[test]
fn test_stalled_connect_times_out() {
    let (_listener, _fillers, port) = saturated_listener();
    let pool = started_pool();
    let (callback, done) = channel_callback();
    let timeout = Duration::from_millis(500);

    let start = Instant::now();
    pool.add_task(TcpClient::new().unwrap(), "127.0.0.1", port, callback, Some(timeout))
        .unwrap();

    let (client, ok) = done.recv_timeout(WAIT).unwrap();
    let elapsed = start.elapsed();
    assert!(!ok);
    assert!(!client.is_connected());
    assert!(elapsed >= timeout, "completed early: {:?}", elapsed);
    assert!(elapsed < timeout + Duration::from_millis(250), "completed late: {:?}", elapsed);

    // Exactly once.
    assert!(done.recv_timeout(Duration::from_millis(300)).is_err());
    let metrics = pool.metrics();
    assert_eq!(metrics.timed_out, 1);
    assert_eq!(metrics.failed, 1);
}

#[test]
fn test_resolve_failure_reports_failure() {
    let pool = started_pool();
    let (callback, done) = channel_callback();

    pool.add_task(
        TcpClient::new().unwrap(),
        "no-such-host.invalid",
        80,
        callback,
        Some(Duration::from_secs(1)),
    )
    .unwrap();

    // The lookup itself may block on the resolver.
    let (_client, ok) = done.recv_timeout(Duration::from_secs(30)).unwrap();
    assert!(!ok);
    assert_eq!(pool.metrics().resolve_failures, 1);
    assert_eq!(pool.metrics().failed, 1);
}

#[test]
fn test_remove_task_before_start() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let pool = ConnectorPool::new(ConnectorPoolConfig::default());
    let (callback, calls) = counting_callback();
    let client = TcpClient::new().unwrap();

    let id = pool.add_task(client, "127.0.0.1", port, callback, None).unwrap();
    assert_eq!(pool.pending_count(), 1);

    let returned = pool.remove_task(id).expect("queued task returns its client");
    assert_eq!(returned.id(), id);
    assert_eq!(pool.pending_count(), 0);

    pool.start().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(pool.metrics().cancelled, 1);

    // Unknown ids are ignored.
    assert!(pool.remove_task(id).is_none());
}

#[test]
fn test_remove_tasks_by_callback() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let pool = ConnectorPool::new(ConnectorPoolConfig::default());
    let (cancelled_cb, cancelled_calls) = counting_callback();
    let (kept_cb, done) = channel_callback();

    for _ in 0..3 {
        pool.add_task(TcpClient::new().unwrap(), "127.0.0.1", port, Arc::clone(&cancelled_cb), None)
            .unwrap();
    }
    pool.add_task(TcpClient::new().unwrap(), "127.0.0.1", port, kept_cb, None)
        .unwrap();

    let removed = pool.remove_tasks(&cancelled_cb);
    assert_eq!(removed.len(), 3);
    assert_eq!(pool.pending_count(), 1);

    pool.start().unwrap();
    let (_client, ok) = done.recv_timeout(WAIT).unwrap();
    assert!(ok);
    assert!(wait_idle(&pool));
    assert_eq!(cancelled_calls.load(Ordering::SeqCst), 0);
    assert_eq!(pool.metrics().cancelled, 3);
}

#[test]
fn test_remove_task_in_progress() {
    let (_listener, _fillers, port) = saturated_listener();
    let pool = started_pool();
    let (callback, calls) = counting_callback();

    let id = pool
        .add_task(TcpClient::new().unwrap(), "127.0.0.1", port, callback, Some(Duration::from_millis(500)))
        .unwrap();
    // Let the worker take the task over and start connecting.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(pool.pending_count(), 1);

    assert!(pool.remove_task(id).is_none());
    assert!(wait_idle(&pool));

    // Well past the task timeout: a surviving task would have completed by now.
    thread::sleep(Duration::from_millis(700));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let metrics = pool.metrics();
    assert_eq!(metrics.cancelled, 1);
    assert_eq!(metrics.completed(), 0);
}

#[test]
fn test_remove_tasks_in_progress() {
    let (_listener, _fillers, port) = saturated_listener();
    let pool = started_pool();
    let (callback, calls) = counting_callback();

    for _ in 0..2 {
        pool.add_task(
            TcpClient::new().unwrap(),
            "127.0.0.1",
            port,
            Arc::clone(&callback),
            Some(Duration::from_millis(500)),
        )
        .unwrap();
    }
    thread::sleep(Duration::from_millis(100));
    assert_eq!(pool.pending_count(), 2);

    assert!(pool.remove_tasks(&callback).is_empty());
    assert!(wait_idle(&pool));

    thread::sleep(Duration::from_millis(700));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(pool.metrics().cancelled, 2);
    assert_eq!(pool.metrics().completed(), 0);
}

#[test]
fn test_callback_panic_keeps_worker_running() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let pool = started_pool();

    let panicking: ConnectorCallback = Arc::new(|_: TcpClient, _: bool| panic!("completion failure"));
    pool.add_task(TcpClient::new().unwrap(), "127.0.0.1", port, panicking, None)
        .unwrap();
    assert!(wait_idle(&pool));

    let deadline = Instant::now() + WAIT;
    while pool.metrics().callback_panics == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(pool.metrics().callback_panics, 1);
    assert!(pool.is_running());

    let (callback, done) = channel_callback();
    pool.add_task(TcpClient::new().unwrap(), "127.0.0.1", port, callback, None)
        .unwrap();
    let (_client, ok) = done.recv_timeout(WAIT).unwrap();
    assert!(ok);
}

#[test]
fn test_many_tasks_complete_once_each() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let refused = free_port().unwrap();

    let pool = started_pool();
    let (callback, done) = channel_callback();

    let mut expected = Vec::new();
    for i in 0..10 {
        let target = if i % 2 == 0 { port } else { refused };
        let client = TcpClient::new().unwrap();
        expected.push((client.id(), target == port));
        pool.add_task(client, "127.0.0.1", target, Arc::clone(&callback), Some(Duration::from_secs(2)))
            .unwrap();
    }

    let mut results = Vec::new();
    for _ in 0..10 {
        let (client, ok) = done.recv_timeout(WAIT).unwrap();
        results.push((client.id(), ok));
    }
    assert!(done.recv_timeout(Duration::from_millis(200)).is_err());

    results.sort_by_key(|(id, _)| id.get());
    expected.sort_by_key(|(id, _)| id.get());
    assert_eq!(results, expected);
    assert!(wait_idle(&pool));
}

#[test]
fn test_stop_keeps_queued_tasks() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let pool = ConnectorPool::new(ConnectorPoolConfig::default());
    pool.start().unwrap();
    pool.stop();
    assert!(!pool.is_running());

    let (callback, done) = channel_callback();
    pool.add_task(TcpClient::new().unwrap(), "127.0.0.1", port, callback, None)
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(pool.pending_count(), 1);
    assert!(done.try_recv().is_err());

    pool.start().unwrap();
    let (_client, ok) = done.recv_timeout(WAIT).unwrap();
    assert!(ok);
}
