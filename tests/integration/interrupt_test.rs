//! Signals arriving while a call is blocked.
//!
//! A no-op `SIGUSR1` handler is installed without `SA_RESTART`, so blocking
//! system calls in the signalled thread return `EINTR`. The signal is resent
//! until the target returns, since it may land before the thread blocks.

use std::os::unix::thread::JoinHandleExt;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Once};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use buscast::{BusError, BusHandle, CreateFlags, Delivery, Flow, IoFlags, OpenFlags, Registry};
use tempfile::TempDir;

extern "C" fn on_signal(_: libc::c_int) {}

fn install_handler() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Safety: the handler is async-signal-safe (it does nothing) and the
        // sigaction struct is fully initialized before use.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            assert_eq!(
                libc::sigaction(libc::SIGUSR1, &action, std::ptr::null_mut()),
                0
            );
        }
    });
}

/// Signal `target` until it finishes.
fn interrupt_until_finished<T>(target: &JoinHandle<T>) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !target.is_finished() {
        assert!(Instant::now() < deadline, "call never returned");
        // Safety: the thread is not joined yet, so its id stays valid.
        unsafe {
            libc::pthread_kill(target.as_pthread_t(), libc::SIGUSR1);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Signal `target` a few times without expecting it to return.
fn interrupt_repeatedly<T>(target: &JoinHandle<T>, times: usize) {
    for _ in 0..times {
        // Safety: see `interrupt_until_finished`.
        unsafe {
            libc::pthread_kill(target.as_pthread_t(), libc::SIGUSR1);
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn bus(dir: &TempDir) -> PathBuf {
    Registry::new()
        .with_delivery(Delivery::Acknowledged)
        .create_at(dir.path().join("bus"), CreateFlags::EXCL)
        .unwrap()
}

/// Spawn a listener that waits in `poll(flags)`; returns once it is registered.
fn spawn_poller(
    path: &Path,
    flags: IoFlags,
) -> JoinHandle<(BusHandle, buscast::Result<Vec<u8>>)> {
    let (ready_tx, ready_rx) = mpsc::channel();
    let path = path.to_path_buf();
    let poller = thread::spawn(move || {
        let mut handle = BusHandle::connect(&path, OpenFlags::RDONLY).unwrap();
        handle.poll_start().unwrap();
        ready_tx.send(()).unwrap();
        let result = handle.poll(flags);
        (handle, result)
    });
    ready_rx.recv().unwrap();
    poller
}

#[test]
fn test_interruptible_poll_returns_interrupted() {
    install_handler();
    let dir = TempDir::new().unwrap();
    let path = bus(&dir);

    let poller = spawn_poller(&path, IoFlags::INTR);
    interrupt_until_finished(&poller);

    let (mut handle, result) = poller.join().unwrap();
    assert!(matches!(result.unwrap_err(), BusError::Interrupted));
    assert!(handle.is_listening());
    handle.poll_stop().unwrap();
}

#[test]
fn test_poll_without_intr_keeps_waiting_through_signals() {
    install_handler();
    let dir = TempDir::new().unwrap();
    let path = bus(&dir);

    let poller = spawn_poller(&path, IoFlags::empty());
    interrupt_repeatedly(&poller, 5);
    assert!(!poller.is_finished());

    let mut writer = BusHandle::connect(&path, OpenFlags::WRONLY).unwrap();
    writer.write("after signals", IoFlags::empty()).unwrap();

    let (_handle, result) = poller.join().unwrap();
    assert_eq!(result.unwrap(), b"after signals".to_vec());
}

#[test]
fn test_interrupted_read_loop_deregisters() {
    install_handler();
    let dir = TempDir::new().unwrap();
    let path = bus(&dir);

    let (ready_tx, ready_rx) = mpsc::channel();
    let reader = {
        let path = path.clone();
        thread::spawn(move || {
            let mut handle = BusHandle::connect(&path, OpenFlags::RDONLY).unwrap();
            handle.read(IoFlags::INTR, |message| {
                if message.is_none() {
                    ready_tx.send(()).unwrap();
                }
                Ok::<_, BusError>(Flow::Continue)
            })
        })
    };
    ready_rx.recv().unwrap();
    interrupt_until_finished(&reader);

    assert!(matches!(reader.join().unwrap().unwrap_err(), BusError::Interrupted));
    let probe = BusHandle::connect(&path, OpenFlags::RDONLY).unwrap();
    assert_eq!(probe.listener_count().unwrap(), 0);
}

#[test]
fn test_interruptible_write_leaves_previous_message_in_place() {
    install_handler();
    let dir = TempDir::new().unwrap();
    let path = bus(&dir);
    let mut listener = BusHandle::connect(&path, OpenFlags::RDONLY).unwrap();
    listener.poll_start().unwrap();

    let mut writer = BusHandle::connect(&path, OpenFlags::WRONLY).unwrap();
    writer.write("first", IoFlags::empty()).unwrap();

    // The listener owes an acknowledgment, so the next write waits for it.
    let blocked = thread::spawn(move || {
        let result = writer.write("second", IoFlags::INTR);
        (writer, result)
    });
    interrupt_until_finished(&blocked);

    let (mut writer, result) = blocked.join().unwrap();
    assert!(matches!(result.unwrap_err(), BusError::Interrupted));
    assert_eq!(listener.poll(IoFlags::NOWAIT).unwrap(), b"first".to_vec());

    writer.write("second", IoFlags::NOWAIT).unwrap();
    assert_eq!(listener.poll(IoFlags::NOWAIT).unwrap(), b"second".to_vec());
    listener.poll_stop().unwrap();
}

#[test]
fn test_write_without_intr_retries_until_acknowledged() {
    install_handler();
    let dir = TempDir::new().unwrap();
    let path = bus(&dir);
    let mut listener = BusHandle::connect(&path, OpenFlags::RDONLY).unwrap();
    listener.poll_start().unwrap();

    let mut writer = BusHandle::connect(&path, OpenFlags::WRONLY).unwrap();
    writer.write("first", IoFlags::empty()).unwrap();

    let blocked = thread::spawn(move || writer.write("second", IoFlags::empty()));
    interrupt_repeatedly(&blocked, 5);
    assert!(!blocked.is_finished());

    assert_eq!(listener.poll(IoFlags::empty()).unwrap(), b"first".to_vec());
    blocked.join().unwrap().unwrap();
    assert_eq!(listener.poll(IoFlags::empty()).unwrap(), b"second".to_vec());
    listener.poll_stop().unwrap();
}
