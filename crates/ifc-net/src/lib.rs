// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # ifc-net - threaded TCP/UDP socket layer
//!
//! Blocking-thread socket building blocks: a socket primitive, a UDP endpoint
//! and multi-threaded UDP server, TCP connections with deadline-bounded and
//! single-shot I/O, a TCP client with blocking and non-blocking connect, a TCP
//! server with one accept thread, and a connector pool that runs many outbound
//! connects from one worker.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ifc_net::{free_port, Result, TcpClient, TcpConnection, TcpServer, TcpServerConfig};
//!
//! fn main() -> Result<()> {
//!     let port = free_port()?;
//!     let mut server = TcpServer::new(TcpServerConfig::new(port));
//!     server.on_accepted(Arc::new(|mut conn: TcpConnection| {
//!         let mut buf = [0u8; 5];
//!         if let Ok(n) = conn.recv_sync(&mut buf, Some(Duration::from_secs(1))) {
//!             let _ = conn.send_sync(&buf[..n], None);
//!         }
//!     }));
//!     server.open()?;
//!
//!     let mut client = TcpClient::new()?;
//!     client.connect("127.0.0.1", port)?;
//!     client.send_sync(b"hello", None)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |   ConnectorPool (1 worker)   TcpServer (1 accept)   UdpServer (N)   |
//! +---------------------------------------------------------------------+
//! |        TcpClient -> TcpConnection             UdpEndpoint           |
//! +---------------------------------------------------------------------+
//! |     Socket (owned handle)  |  poll (bounded wait)  |  thread        |
//! +---------------------------------------------------------------------+
//! |                 NetworkGuard (OS subsystem lifetime)                |
//! +---------------------------------------------------------------------+
//! ```
//!
//! Every blocking point is a bounded readiness wait (100 ms or 250 ms), so
//! stop requests and I/O timeouts are honoured within one slice.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`TcpConnection`] | Established stream with sync and async I/O |
//! | [`TcpClient`] | Connection plus blocking / non-blocking connect |
//! | [`TcpServer`] | Listening socket with an accept thread |
//! | [`UdpServer`] | Bound UDP socket with N listener threads |
//! | [`ConnectorPool`] | Background driver for many outbound connects |

/// Peer addresses and host resolution.
pub mod addr;
/// Timing and sizing constants.
pub mod config;
/// TCP connector pool.
pub mod connector;
/// Error type.
pub mod error;
/// Diagnostic counters.
pub mod metrics;
/// Network subsystem lifetime.
pub mod net_init;
/// Bounded readiness wait.
pub mod poll;
/// Socket primitive.
pub mod socket;
/// TCP connection, client and server.
pub mod tcp;
/// Worker threads and thread registry.
pub mod thread;
/// UDP endpoint and server.
pub mod udp;

pub use addr::{free_port, resolve_ipv4, resolve_peer, PeerAddr};
pub use connector::{ConnectorCallback, ConnectorPool, ConnectorPoolConfig};
pub use error::{Result, SocketError};
pub use net_init::NetworkGuard;
pub use socket::Socket;
pub use tcp::{
    AsyncConnectState, ConnectionId, IoMode, TcpAcceptedCallback, TcpClient, TcpConnection,
    TcpCreateConnectionCallback, TcpServer, TcpServerConfig,
};
pub use udp::{UdpEndpoint, UdpReceiveCallback, UdpServer, UdpServerConfig};
