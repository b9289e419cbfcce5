// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the socket layer.
//!
//! Setup failures (socket creation, bind, listen, connect) are returned as
//! [`SocketError`]. Steady-state I/O never reports `WouldBlock` or
//! `Interrupted`; a connection that drops surfaces as
//! [`SocketError::Disconnected`].

use std::io;

/// Socket layer errors.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Error reported by the operating system.
    #[error("socket error {code}: {message}")]
    Os {
        /// Raw OS error code (`errno` / `WSAGetLastError`), -1 if unknown
        code: i32,
        /// Portable classification of the error
        kind: io::ErrorKind,
        /// Human readable description
        message: String,
    },

    /// Operation needs an open socket.
    #[error("socket is not open")]
    NotOpen,

    /// The connection was closed once and cannot be reopened.
    #[error("connection was closed and cannot be reused")]
    Retired,

    /// The peer closed the connection or the connection failed.
    #[error("connection closed")]
    Disconnected,

    /// A bounded wait elapsed before the operation completed.
    #[error("operation timed out")]
    Timeout,

    /// An outbound connection attempt failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Host name resolution failed.
    #[error("cannot resolve host '{host}': {reason}")]
    Resolve {
        /// Host that was looked up
        host: String,
        /// Resolver message
        reason: String,
    },

    /// Caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A worker thread could not be spawned.
    #[error("thread error: {0}")]
    Thread(String),
}

impl SocketError {
    /// Build an invalid-argument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Raw OS error code, if this error came from the OS.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::Os { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Portable error kind, if this error came from the OS.
    pub fn kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Os { kind, .. } => Some(*kind),
            Self::Timeout => Some(io::ErrorKind::TimedOut),
            _ => None,
        }
    }

    /// True when a bind failed because the address is taken.
    pub fn is_addr_in_use(&self) -> bool {
        self.kind() == Some(io::ErrorKind::AddrInUse)
    }

    /// True for conditions the I/O loops treat as "no progress, retry".
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            Some(io::ErrorKind::WouldBlock) | Some(io::ErrorKind::Interrupted)
        )
    }
}

impl From<io::Error> for SocketError {
    fn from(err: io::Error) -> Self {
        Self::Os {
            code: err.raw_os_error().unwrap_or(-1),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A specialized Result type for socket operations.
pub type Result<T> = std::result::Result<T, SocketError>;

/// True for `WouldBlock` / `Interrupted` I/O errors.
pub(crate) fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_error_keeps_kind() {
        let err: SocketError = io::Error::from(io::ErrorKind::AddrInUse).into();
        assert!(err.is_addr_in_use());
        assert_eq!(err.os_code(), Some(-1));
    }

    #[test]
    #[cfg(unix)]
    fn test_from_raw_os_error_keeps_code() {
        let err: SocketError = io::Error::from_raw_os_error(libc::EADDRINUSE).into();
        assert_eq!(err.os_code(), Some(libc::EADDRINUSE));
        assert!(err.is_addr_in_use());
        assert!(err.to_string().starts_with("socket error"));
    }

    #[test]
    fn test_transient_classification() {
        let would_block: SocketError = io::Error::from(io::ErrorKind::WouldBlock).into();
        let refused: SocketError = io::Error::from(io::ErrorKind::ConnectionRefused).into();
        assert!(would_block.is_transient());
        assert!(!refused.is_transient());
        assert!(!SocketError::Disconnected.is_transient());
        assert!(is_transient_io(&io::Error::from(io::ErrorKind::Interrupted)));
    }

    #[test]
    fn test_display() {
        assert_eq!(SocketError::NotOpen.to_string(), "socket is not open");
        assert_eq!(
            SocketError::invalid("port 0").to_string(),
            "invalid argument: port 0"
        );
        let err = SocketError::Resolve {
            host: "nowhere".into(),
            reason: "no address".into(),
        };
        assert_eq!(err.to_string(), "cannot resolve host 'nowhere': no address");
    }
}
