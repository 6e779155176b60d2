//! Exclusive write lock: `flock(2)` on the bus file.
//!
//! Each handle owns its own open file description, so the lock excludes
//! other handles in this process as well as other processes. The kernel
//! drops the lock if the holder dies.

use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use nix::errno::Errno;
use tracing::warn;

use crate::error::{BusError, Result};

/// Held while broadcasting; unlocks on drop.
pub(crate) struct WriteLock {
    fd: RawFd,
}

impl WriteLock {
    /// Take the lock.
    ///
    /// `nowait` fails with `WouldBlock` when another handle holds it;
    /// `interruptible` fails with `Interrupted` on `EINTR` instead of retrying.
    pub(crate) fn acquire(
        file: &File,
        path: &Path,
        nowait: bool,
        interruptible: bool,
    ) -> Result<Self> {
        let fd = file.as_raw_fd();
        let op = if nowait {
            libc::LOCK_EX | libc::LOCK_NB
        } else {
            libc::LOCK_EX
        };

        loop {
            // Safety: fd is owned by `file`, which outlives the guard.
            if unsafe { libc::flock(fd, op) } == 0 {
                return Ok(Self { fd });
            }
            match Errno::last() {
                Errno::EINTR if !interruptible => continue,
                Errno::EINTR => return Err(BusError::Interrupted),
                Errno::EWOULDBLOCK => return Err(BusError::WouldBlock),
                errno => return Err(BusError::from_errno(errno, path)),
            }
        }
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        // Safety: fd is still open; the guard never outlives its file.
        if unsafe { libc::flock(self.fd, libc::LOCK_UN) } != 0 {
            warn!(error = %Errno::last(), "Failed to release bus write lock");
        }
    }
}
