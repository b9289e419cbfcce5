// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP endpoint and threaded UDP server.

mod endpoint;
mod server;

pub use endpoint::UdpEndpoint;
pub use server::{UdpReceiveCallback, UdpServer, UdpServerConfig};
