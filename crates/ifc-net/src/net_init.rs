// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference-counted network subsystem lifetime.
//!
//! Every [`Socket`](crate::Socket) holds a [`NetworkGuard`]. The first guard
//! starts the OS network subsystem (Winsock on Windows, nothing on Unix) and
//! the last guard to drop tears it down again.

use parking_lot::Mutex;

use crate::error::{Result, SocketError};

/// Number of live guards. Mutated only while holding the lock so startup and
/// cleanup never race with each other.
static USERS: Mutex<usize> = parking_lot::const_mutex(0);

/// Scoped handle on the network subsystem.
#[derive(Debug)]
pub struct NetworkGuard {
    _private: (),
}

impl NetworkGuard {
    /// Acquire the network subsystem, starting it if this is the first user.
    pub fn acquire() -> Result<Self> {
        let mut users = USERS.lock();
        if *users == 0 {
            platform::startup().map_err(|e| {
                log::error!("[net] network subsystem startup failed: {}", e);
                SocketError::from(e)
            })?;
            log::debug!("[net] network subsystem started");
        }
        *users += 1;
        Ok(Self { _private: () })
    }

    /// Number of guards currently alive in the process.
    pub fn active_users() -> usize {
        *USERS.lock()
    }
}

impl Clone for NetworkGuard {
    fn clone(&self) -> Self {
        // The subsystem is already up while `self` lives.
        *USERS.lock() += 1;
        Self { _private: () }
    }
}

impl Drop for NetworkGuard {
    fn drop(&mut self) {
        let mut users = USERS.lock();
        *users = users.saturating_sub(1);
        if *users == 0 {
            platform::cleanup();
            log::debug!("[net] network subsystem released");
        }
    }
}

#[cfg(unix)]
mod platform {
    use std::io;

    pub fn startup() -> io::Result<()> {
        Ok(())
    }

    pub fn cleanup() {}
}

#[cfg(windows)]
mod platform {
    use std::io;

    /// Winsock 2.2
    const WINSOCK_VERSION: u16 = 0x0202;

    /// Large enough for WSADATA on both 32 and 64 bit targets.
    #[repr(C, align(8))]
    struct WsaData([u8; 512]);

    #[link(name = "ws2_32")]
    extern "system" {
        fn WSAStartup(wVersionRequested: u16, lpWSAData: *mut WsaData) -> i32;
        fn WSACleanup() -> i32;
    }

    pub fn startup() -> io::Result<()> {
        let mut data = WsaData([0; 512]);
        // SAFETY: WSAStartup writes at most sizeof(WSADATA) bytes into `data`.
        let ret = unsafe { WSAStartup(WINSOCK_VERSION, &mut data) };
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }
        Ok(())
    }

    pub fn cleanup() {
        // SAFETY: balanced with the successful WSAStartup in `startup`.
        unsafe {
            WSACleanup();
        }
    }
}
