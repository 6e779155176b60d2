//! Poll loop: register, announce readiness, deliver until told to stop.

use tracing::debug;

use crate::error::{BusError, HandlerError, Result};
use crate::flags::IoFlags;
use crate::handle::BusHandle;

/// What a handler wants the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Deregister and return.
    Stop,
    /// Wait for the next message.
    Continue,
}

impl BusHandle {
    /// Listen in a loop, handing every message to `handler`.
    ///
    /// `handler(None)` is called once right after registration: from then on
    /// broadcasts are guaranteed to reach this handle. Every later call gets
    /// `Some(message)`; the slice is only valid for the duration of the call.
    /// Returning [`Flow::Stop`] or an error ends the loop; the handle is
    /// deregistered exactly once either way, and errors come back as
    /// [`BusError::Handler`]. State the handler needs is whatever it captures.
    pub fn read<F, E>(&mut self, flags: IoFlags, mut handler: F) -> Result<()>
    where
        F: FnMut(Option<&[u8]>) -> std::result::Result<Flow, E>,
        E: Into<HandlerError>,
    {
        self.poll_start()?;

        let outcome = self.deliver(flags, &mut handler);

        self.poll_stop()?;
        if let Some(path) = self.path() {
            debug!(bus = %path.display(), ok = outcome.is_ok(), "Poll loop finished");
        }
        outcome
    }

    fn deliver<F, E>(&mut self, flags: IoFlags, handler: &mut F) -> Result<()>
    where
        F: FnMut(Option<&[u8]>) -> std::result::Result<Flow, E>,
        E: Into<HandlerError>,
    {
        if handler(None).map_err(|e| BusError::Handler(e.into()))? == Flow::Stop {
            return Ok(());
        }
        loop {
            let message = self.poll(flags)?;
            match handler(Some(&message)).map_err(|e| BusError::Handler(e.into()))? {
                Flow::Stop => return Ok(()),
                Flow::Continue => continue,
            }
        }
    }
}
