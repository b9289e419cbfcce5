// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP connections, clients and the listening server.
//!
//! # Architecture
//!
//! ```text
//! +------------------+      accept       +-------------------+
//! |    TcpServer     | ----------------> |   TcpConnection   |
//! | (listener thread)|   on_accepted()   | sync / async I/O  |
//! +------------------+                   +-------------------+
//!                                                  ^
//!                                                  | Deref
//!                                        +-------------------+
//!                                        |     TcpClient     |
//!                                        | blocking / async  |
//!                                        |      connect      |
//!                                        +-------------------+
//! ```

mod client;
mod connection;
mod server;
mod state;

pub use client::TcpClient;
pub use connection::{ConnectionId, IoMode, TcpConnection};
pub use server::{TcpAcceptedCallback, TcpCreateConnectionCallback, TcpServer, TcpServerConfig};
pub use state::AsyncConnectState;
