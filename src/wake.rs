//! Cross-process wait/wake on a 32-bit word in shared memory.
//!
//! On Linux this is a shared (non-private) futex, so waiters in different
//! processes mapping the same file page are woken together. Other unix
//! targets re-check the word every millisecond.

use std::sync::atomic::AtomicU32;

use nix::errno::Errno;

/// Block while `*word == expected`.
///
/// Returns `Ok(())` when woken, when the word already differs, or on a
/// spurious wakeup; callers re-check their condition. `Err(Errno::EINTR)` is
/// returned when a signal handler ran.
#[cfg(target_os = "linux")]
pub(crate) fn wait(word: &AtomicU32, expected: u32) -> Result<(), Errno> {
    // Safety: word points into a live mapping for the duration of the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        )
    };
    if rc == 0 {
        return Ok(());
    }
    match Errno::last() {
        Errno::EAGAIN => Ok(()),
        errno => Err(errno),
    }
}

/// Wake every waiter blocked on `word`.
#[cfg(target_os = "linux")]
pub(crate) fn wake_all(word: &AtomicU32) {
    // Safety: see `wait`.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE,
            i32::MAX,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn wait(word: &AtomicU32, expected: u32) -> Result<(), Errno> {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    if word.load(Ordering::Acquire) == expected {
        std::thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn wake_all(_word: &AtomicU32) {}
