// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP connector pool.
//!
//! Many outbound connects are run from one worker thread. Callers hand a
//! [`TcpClient`](crate::TcpClient) over with `add_task` and get it back in the
//! completion callback, or from `remove_task` if they cancel first.
//!
//! # Architecture
//!
//! ```text
//!  add_task ----> +-----------+   take over    +-----------+
//!                 | incoming  | -------------> |  working  |  (worker only)
//!  remove_task -> | cancels   |   every 10 ms  +-----------+
//!                 +-----------+                      |
//!                  (one lock)      resolve / connect / poll
//!                                                    |
//!                                                    v
//!                                     callback(client, success)
//! ```

mod pool;
mod task;

use std::sync::Arc;

use crate::tcp::TcpClient;

pub use pool::{ConnectorPool, ConnectorPoolConfig};

/// Completion handler: receives the client back and whether it connected.
pub type ConnectorCallback = Arc<dyn Fn(TcpClient, bool) + Send + Sync>;
