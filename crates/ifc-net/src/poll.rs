// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded readiness wait on a single socket.
//!
//! Every loop in the layer is built from short waits on one socket: the sync
//! I/O loops wait in 250 ms slices, listener threads and connect checks in
//! 100 ms slices. Between slices the caller re-checks its deadline and stop
//! flag, which is what makes cancellation cooperative and timeouts bounded.
//!
//! - On Unix: `poll(2)`
//! - On Windows: `WSAPoll`

use std::io;
use std::time::Duration;

use socket2::Socket;

/// Which readiness to wait for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
    /// Data (or a pending connection) can be read
    Readable,
    /// Data can be written (or a connect completed)
    Writable,
    /// Either of the above
    Both,
}

impl Interest {
    fn wants_read(self) -> bool {
        matches!(self, Interest::Readable | Interest::Both)
    }

    fn wants_write(self) -> bool {
        matches!(self, Interest::Writable | Interest::Both)
    }
}

/// Readiness reported by a successful wait.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Socket is readable
    pub readable: bool,
    /// Socket is writable
    pub writable: bool,
    /// Error or hang-up condition pending on the socket
    pub error: bool,
}

impl Readiness {
    /// True if any condition was reported.
    pub fn any(&self) -> bool {
        self.readable || self.writable || self.error
    }
}

/// Wait up to `timeout` for `interest` on `socket`.
///
/// Returns `Ok(None)` when the timeout elapsed or the wait was interrupted by
/// a signal; both mean "no progress this slice".
pub fn wait(socket: &Socket, interest: Interest, timeout: Duration) -> io::Result<Option<Readiness>> {
    let ready = platform::wait(socket, interest, timeout_millis(timeout))?;
    Ok(ready.filter(Readiness::any))
}

/// Timeout in whole milliseconds, rounded up so a sub-millisecond remainder
/// still waits instead of spinning.
fn timeout_millis(timeout: Duration) -> i32 {
    let mut ms = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }
    i32::try_from(ms).unwrap_or(i32::MAX)
}

#[cfg(unix)]
mod platform {
    use std::io;
    use std::os::unix::io::AsRawFd;

    use socket2::Socket;

    use super::{Interest, Readiness};

    pub fn wait(socket: &Socket, interest: Interest, timeout_ms: i32) -> io::Result<Option<Readiness>> {
        let mut events: libc::c_short = 0;
        if interest.wants_read() {
            events |= libc::POLLIN;
        }
        if interest.wants_write() {
            events |= libc::POLLOUT;
        }

        let mut pollfd = libc::pollfd {
            fd: socket.as_raw_fd(),
            events,
            revents: 0,
        };

        // SAFETY: pollfd is a single stack-allocated entry that outlives the call.
        let res = unsafe { libc::poll(std::ptr::addr_of_mut!(pollfd), 1, timeout_ms) };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err);
        }
        if res == 0 {
            return Ok(None);
        }

        let revents = pollfd.revents;
        Ok(Some(Readiness {
            readable: revents & libc::POLLIN != 0,
            writable: revents & libc::POLLOUT != 0,
            error: revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
        }))
    }
}

#[cfg(windows)]
mod platform {
    use std::io;
    use std::os::windows::io::AsRawSocket;

    use socket2::Socket;

    use super::{Interest, Readiness};

    const POLLRDNORM: i16 = 0x0100;
    const POLLWRNORM: i16 = 0x0010;
    const POLLERR: i16 = 0x0001;
    const POLLHUP: i16 = 0x0002;
    const POLLNVAL: i16 = 0x0004;
    const SOCKET_ERROR: i32 = -1;

    #[repr(C)]
    struct WsaPollFd {
        fd: usize,
        events: i16,
        revents: i16,
    }

    #[link(name = "ws2_32")]
    extern "system" {
        fn WSAPoll(fd_array: *mut WsaPollFd, fds: u32, timeout: i32) -> i32;
    }

    pub fn wait(socket: &Socket, interest: Interest, timeout_ms: i32) -> io::Result<Option<Readiness>> {
        let mut events: i16 = 0;
        if interest.wants_read() {
            events |= POLLRDNORM;
        }
        if interest.wants_write() {
            events |= POLLWRNORM;
        }

        let mut pollfd = WsaPollFd {
            fd: socket.as_raw_socket() as usize,
            events,
            revents: 0,
        };

        // SAFETY: pollfd is a single stack-allocated entry that outlives the call.
        let res = unsafe { WSAPoll(&mut pollfd, 1, timeout_ms) };
        if res == SOCKET_ERROR {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err);
        }
        if res == 0 {
            return Ok(None);
        }

        let revents = pollfd.revents;
        Ok(Some(Readiness {
            readable: revents & POLLRDNORM != 0,
            writable: revents & POLLWRNORM != 0,
            error: revents & (POLLERR | POLLHUP | POLLNVAL) != 0,
        }))
    }
}
