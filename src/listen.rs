//! Listener registry and the two-phase wait.
//!
//! `poll_start` increments the roster before the caller waits. Every
//! broadcast whose generation bump lands after that increment counts this
//! handle and changes the generation it compares against, so a broadcast in
//! the gap between registering and calling `poll` is never missed.

use std::sync::atomic::Ordering;

use nix::errno::Errno;
use tracing::{debug, trace};

use crate::broadcast::acknowledge;
use crate::error::{BusError, Result};
use crate::flags::IoFlags;
use crate::handle::{Binding, BusHandle, Listener};
use crate::object::Delivery;
use crate::wake;

impl BusHandle {
    /// Register this handle as a listener. No-op if already registered.
    pub fn poll_start(&mut self) -> Result<()> {
        let binding = self.binding_mut()?;
        if !binding.access.can_read() {
            return Err(BusError::PermissionDenied(format!(
                "{} is not open for reading",
                binding.path.display()
            )));
        }
        if binding.listener.is_some() {
            return Ok(());
        }

        let last_seen = binding.mapping.state().register();
        binding.listener = Some(Listener {
            last_seen,
            own: None,
        });
        debug!(bus = %binding.path.display(), generation = last_seen, "Listener registered");
        Ok(())
    }

    /// Wait for the next broadcast and return a copy of it.
    ///
    /// `NOWAIT` returns `WouldBlock` when nothing is pending; `INTR` returns
    /// `Interrupted` if a signal arrives while waiting.
    pub fn poll(&mut self, flags: IoFlags) -> Result<Vec<u8>> {
        let binding = self.binding_mut()?;
        let Binding {
            path,
            mapping,
            delivery,
            listener,
            ..
        } = binding;
        let listener = listener.as_mut().ok_or(BusError::NotListening)?;
        let state = mapping.state();

        loop {
            let wake_seen = state.wake_word().load(Ordering::Acquire);
            let (generation, _) = state.snapshot();

            if generation != listener.last_seen {
                let (message_generation, message) = state.load_message();
                // Under fire-and-forget the slot may already hold a message
                // whose generation bump has not landed yet; skip duplicates.
                if message_generation != listener.last_seen {
                    listener.last_seen = message_generation;
                    if *delivery == Delivery::Acknowledged
                        && listener.own != Some(message_generation)
                    {
                        acknowledge(state.ack_word());
                    }
                    trace!(
                        bus = %path.display(),
                        generation = message_generation,
                        len = message.len(),
                        "Received message"
                    );
                    return Ok(message);
                }
            }

            if flags.contains(IoFlags::NOWAIT) {
                return Err(BusError::WouldBlock);
            }

            match wake::wait(state.wake_word(), wake_seen) {
                Ok(()) => {}
                Err(Errno::EINTR) if flags.contains(IoFlags::INTR) => {
                    return Err(BusError::Interrupted)
                }
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(BusError::from_errno(errno, path)),
            }
        }
    }

    /// Deregister this handle.
    pub fn poll_stop(&mut self) -> Result<()> {
        let binding = self.binding_mut()?;
        if binding.listener.is_none() {
            return Err(BusError::NotListening);
        }
        binding.stop_listening();
        Ok(())
    }

    /// `true` between `poll_start` and `poll_stop`.
    pub fn is_listening(&self) -> bool {
        self.binding()
            .map(|b| b.listener.is_some())
            .unwrap_or(false)
    }
}

impl Binding {
    /// Leave the roster, acknowledging a broadcast that counted this handle
    /// but was never polled.
    pub(crate) fn stop_listening(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let state = self.mapping.state();
        let generation = state.deregister();
        if self.delivery == Delivery::Acknowledged
            && generation != listener.last_seen
            && listener.own != Some(generation)
        {
            acknowledge(state.ack_word());
        }
        debug!(bus = %self.path.display(), generation, "Listener deregistered");
    }
}
