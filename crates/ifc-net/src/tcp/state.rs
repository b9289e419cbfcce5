// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking connect state machine.

/// Progress of one non-blocking connect attempt.
///
/// Transitions only move forward:
///
/// ```text
/// Idle --> Connecting --> Connected
///   |          |
///   +----------+--------> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AsyncConnectState {
    /// No connect issued yet
    #[default]
    Idle,

    /// Connect issued, completion not observed yet
    Connecting,

    /// Connection established
    Connected,

    /// Connect or host resolution failed (terminal)
    Failed,
}

impl AsyncConnectState {
    /// Check if the attempt reached a final outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected | Self::Failed)
    }

    /// Check if the attempt ended with a live connection.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if moving to `next` keeps the machine monotonic.
    pub fn can_advance_to(&self, next: Self) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (Self::Idle, _) => true,
            (Self::Connecting, Self::Connected | Self::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AsyncConnectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}
