//! Broadcaster: the write path.
//!
//! Under the exclusive lock a broadcast first makes sure the slot is free:
//! under [`Delivery::Acknowledged`] every listener counted for the previous
//! broadcast must have copied it out. It then stores the message, bumps the
//! roster generation (which fixes the set of listeners it must reach),
//! records how many acknowledgments that set owes, publishes the wake word
//! and wakes every waiter. The call returns without waiting for listeners.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use nix::errno::Errno;
use tracing::trace;

use crate::error::{BusError, Result};
use crate::flags::IoFlags;
use crate::handle::BusHandle;
use crate::lock::WriteLock;
use crate::object::{Delivery, SharedState, MESSAGE_MAX};
use crate::wake;

impl BusHandle {
    /// Broadcast `message` to every registered listener.
    ///
    /// `NOWAIT` fails with `WouldBlock` when another broadcaster holds the
    /// lock or a listener has not yet copied the previous message; `INTR`
    /// fails with `Interrupted` if a signal arrives while waiting for either.
    /// Oversized messages are rejected before the bus is touched.
    ///
    /// A handle that is itself listening receives its own broadcast from
    /// `poll` but is not waited on for it.
    pub fn write(&mut self, message: impl AsRef<[u8]>, flags: IoFlags) -> Result<()> {
        let message = message.as_ref();
        if message.len() > MESSAGE_MAX {
            return Err(BusError::MessageTooLarge {
                size: message.len(),
                limit: MESSAGE_MAX,
            });
        }

        let binding = self.binding_mut()?;
        if !binding.access.can_write() {
            return Err(BusError::PermissionDenied(format!(
                "{} is not open for writing",
                binding.path.display()
            )));
        }

        let _lock = WriteLock::acquire(
            &binding.file,
            &binding.path,
            flags.contains(IoFlags::NOWAIT),
            flags.contains(IoFlags::INTR),
        )?;

        let state = binding.mapping.state();
        if binding.delivery == Delivery::Acknowledged {
            await_acknowledgments(state, &binding.path, flags)?;
        }

        let (current, _) = state.snapshot();
        state.store_message(current.wrapping_add(1), message);
        state.ack_word().store(0, Ordering::SeqCst);

        let (generation, counted) = state.advance();
        let expected = match binding.listener.as_mut() {
            Some(listener) => {
                listener.own = Some(generation);
                counted.saturating_sub(1)
            }
            None => counted,
        };
        state.set_expected_acks(expected);
        state.wake_word().store(generation, Ordering::Release);
        wake::wake_all(state.wake_word());

        trace!(
            bus = %binding.path.display(),
            generation,
            listeners = counted,
            expected,
            len = message.len(),
            "Broadcast message"
        );
        Ok(())
    }
}

/// Wait until every listener counted for the previous broadcast acknowledged.
///
/// Nothing has been written yet, so `NOWAIT` and `INTR` can give up safely.
fn await_acknowledgments(state: &SharedState, path: &Path, flags: IoFlags) -> Result<()> {
    let expected = state.expected_acks();
    loop {
        let seen = state.ack_word().load(Ordering::Acquire);
        if seen >= expected {
            return Ok(());
        }
        if flags.contains(IoFlags::NOWAIT) {
            return Err(BusError::WouldBlock);
        }
        match wake::wait(state.ack_word(), seen) {
            Ok(()) => {}
            Err(Errno::EINTR) if flags.contains(IoFlags::INTR) => {
                return Err(BusError::Interrupted)
            }
            Err(Errno::EINTR) => {}
            Err(errno) => return Err(BusError::from_errno(errno, path)),
        }
    }
}

/// Record that one counted listener copied the current message.
pub(crate) fn acknowledge(acked: &AtomicU32) {
    acked.fetch_add(1, Ordering::AcqRel);
    wake::wake_all(acked);
}
