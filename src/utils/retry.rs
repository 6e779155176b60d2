//! Retry utilities: transparent restart of system calls cut short by signals.
//!
//! Every blocking entry point takes an `INTR` flag. Without it, `EINTR` is
//! swallowed and the call restarted; with it, the interruption surfaces to
//! the caller as `Interrupted`.

use std::io;

/// Run `op`, restarting it on `ErrorKind::Interrupted` unless
/// `interruptible` is set.
pub fn retry_interrupted<T, F>(interruptible: bool, mut op: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted && !interruptible => continue,
            other => return other,
        }
    }
}
