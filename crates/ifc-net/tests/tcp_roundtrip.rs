// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! TCP client/server round-trip tests over loopback.
//!
//! Covers connect/accept, sync transfers from 1 byte to several MB, timeout
//! bounds, async I/O and peer-close detection.

use crossbeam::channel::{unbounded, Receiver};
use ifc_net::{
    free_port, IoMode, PeerAddr, SocketError, TcpClient, TcpConnection, TcpServer,
    TcpServerConfig,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const ACCEPT_WAIT: Duration = Duration::from_secs(3);

/// Start a loopback server that forwards accepted connections to a channel.
fn start_server() -> (TcpServer, u16, Receiver<TcpConnection>) {
    let port = free_port().expect("free port");
    let mut server =
        TcpServer::new(TcpServerConfig::new(port).with_bind_address(Ipv4Addr::LOCALHOST));

    let (tx, rx) = unbounded();
    server.on_accepted(Arc::new(move |conn: TcpConnection| {
        let _ = tx.send(conn);
    }));
    server.open().expect("server open");
    (server, port, rx)
}

fn connect_pair() -> (TcpServer, TcpClient, TcpConnection) {
    let (server, port, accepted) = start_server();
    let mut client = TcpClient::new().unwrap();
    client.connect("127.0.0.1", port).expect("connect");
    let conn = accepted.recv_timeout(ACCEPT_WAIT).expect("accepted connection");
    (server, client, conn)
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut rng = fastrand::Rng::with_seed(len as u64);
    (0..len).map(|_| rng.u8(..)).collect()
}

#[test]
fn test_client_connects_and_server_accepts() {
    let (server, client, conn) = connect_pair();

    assert!(client.is_connected());
    assert!(conn.is_connected());
    assert_eq!(client.peer_addr(), server.local_addr().unwrap());
    assert_eq!(conn.peer_addr(), client.local_addr().unwrap());
    assert_eq!(conn.peer_addr().ip, PeerAddr::localhost(0).ip);
    assert_ne!(client.id(), conn.id());
    assert_eq!(server.metrics().accepted, 1);
}

#[test]
fn test_sync_roundtrip_sizes() {
    let (_server, client, mut conn) = connect_pair();
    let mut client = Some(client);

    for &size in &[1usize, 17, 4096, 65_536, 3 * 1024 * 1024] {
        let payload = random_payload(size);

        // Large payloads fill the socket buffers, so the sender runs on its
        // own thread while this one drains.
        let mut sender = client.take().unwrap();
        let outgoing = payload.clone();
        let handle = thread::spawn(move || {
            let sent = sender.send_sync(&outgoing, Some(Duration::from_secs(20)));
            (sender, sent)
        });

        let mut received = vec![0u8; size];
        let n = conn
            .recv_sync(&mut received, Some(Duration::from_secs(20)))
            .unwrap();
        let (sender, sent) = handle.join().unwrap();
        assert_eq!(sent.unwrap(), size);
        assert_eq!(n, size);
        assert!(received == payload, "payload mismatch at {} bytes", size);

        // Echo back
        let mut sender = sender;
        let echo = thread::spawn(move || {
            let mut back = vec![0u8; size];
            let n = sender.recv_sync(&mut back, Some(Duration::from_secs(20)));
            (sender, n, back)
        });
        assert_eq!(conn.send_sync(&received, Some(Duration::from_secs(20))).unwrap(), size);
        let (sender, n, back) = echo.join().unwrap();
        assert_eq!(n.unwrap(), size);
        assert!(back == payload);
        client = Some(sender);
    }
}

#[test]
fn test_recv_timeout_is_bounded() {
    let (_server, mut client, _conn) = connect_pair();
    let mut buf = [0u8; 16];

    let timeout = Duration::from_millis(300);
    let start = Instant::now();
    let n = client.recv_sync(&mut buf, Some(timeout)).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(n, 0);
    assert!(elapsed >= Duration::from_millis(280), "returned early: {:?}", elapsed);
    assert!(elapsed < timeout + Duration::from_millis(250) + Duration::from_millis(500));
    assert!(client.is_connected());
}

#[test]
fn test_partial_recv_on_timeout() {
    let (_server, mut client, mut conn) = connect_pair();
    conn.send_sync(b"abc", None).unwrap();

    let mut buf = [0u8; 10];
    let n = client
        .recv_sync(&mut buf, Some(Duration::from_millis(300)))
        .unwrap();
    assert_eq!(n, 3);
    assert_eq!(&buf[..3], b"abc");
    assert!(client.is_connected());
}

#[test]
fn test_peer_close_is_detected() {
    let (_server, mut client, conn) = connect_pair();
    drop(conn);

    let mut buf = [0u8; 8];
    let result = client.recv_sync(&mut buf, Some(Duration::from_secs(2)));
    assert!(matches!(result, Err(SocketError::Disconnected) | Ok(0)));
    assert!(!client.is_connected());
    assert!(client.is_retired());

    // A retired connection stays down.
    assert!(matches!(client.send_async(b"x"), Err(SocketError::Disconnected)));
    assert!(matches!(
        client.connect("127.0.0.1", 1),
        Err(SocketError::Retired)
    ));
}

#[test]
fn test_async_io() {
    let (_server, mut client, mut conn) = connect_pair();

    let mut buf = [0u8; 32];
    assert_eq!(client.recv_async(&mut buf).unwrap(), 0);

    let mut sent = 0;
    while sent == 0 {
        sent = conn.send_async(b"async hello").unwrap();
    }
    assert_eq!(sent, 11);

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut got = Vec::new();
    while got.len() < 11 && Instant::now() < deadline {
        let n = client.recv_async(&mut buf).unwrap();
        got.extend_from_slice(&buf[..n]);
        if n == 0 {
            thread::sleep(Duration::from_millis(5));
        }
    }
    assert_eq!(got, b"async hello");
}

#[test]
fn test_async_recv_after_peer_close() {
    let (_server, mut client, mut conn) = connect_pair();
    conn.disconnect();
    assert!(!conn.is_connected());

    let mut buf = [0u8; 8];
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut result = client.recv_async(&mut buf);
    while matches!(result, Ok(0)) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
        result = client.recv_async(&mut buf);
    }
    assert!(matches!(result, Err(SocketError::Disconnected)));
    assert!(!client.is_connected());
}

#[test]
fn test_io_mode_dispatch() {
    let (_server, mut client, mut conn) = connect_pair();

    let sync = IoMode::Sync {
        timeout: Some(Duration::from_secs(2)),
    };
    assert_eq!(client.send_buffer(b"mode", sync).unwrap(), 4);

    let mut buf = [0u8; 4];
    assert_eq!(conn.recv_buffer(&mut buf, sync).unwrap(), 4);
    assert_eq!(&buf, b"mode");

    assert_eq!(conn.recv_buffer(&mut buf, IoMode::Async).unwrap(), 0);
}

#[test]
fn test_connect_timeout_and_socket_options() {
    let (_server, port, accepted) = start_server();

    let mut client = TcpClient::new().unwrap();
    client
        .connect_timeout("127.0.0.1", port, Duration::from_secs(2))
        .unwrap();
    client.set_nodelay(true).unwrap();
    client.set_keepalive(true).unwrap();

    let conn = accepted.recv_timeout(ACCEPT_WAIT).unwrap();
    assert!(conn.is_connected());
}

#[test]
fn test_connect_refused_reports_failure() {
    let port = free_port().unwrap();
    let mut client = TcpClient::new().unwrap();
    let err = client
        .connect_timeout("127.0.0.1", port, Duration::from_secs(2))
        .unwrap_err();
    assert!(matches!(err, SocketError::ConnectFailed(_) | SocketError::Timeout));
    assert!(!client.is_connected());
}

#[test]
fn test_live_count_follows_objects() {
    let (_server, client, conn) = connect_pair();
    assert!(TcpConnection::live_count() >= 2);
    drop(client);
    drop(conn);
}
