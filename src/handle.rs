//! Handle lifecycle: binding a process to a backing object.
//!
//! A [`BusHandle`] is reusable. `open` on a bound handle closes the previous
//! binding first; `close` is idempotent and also runs on drop.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BusError, Result};
use crate::flags::{Access, OpenFlags};
use crate::object::{self, Delivery, Mapping};
use crate::utils::retry::retry_interrupted;

/// Per-process state of a bound handle.
pub(crate) struct Binding {
    pub(crate) path: PathBuf,
    pub(crate) file: File,
    pub(crate) mapping: Mapping,
    pub(crate) access: Access,
    pub(crate) delivery: Delivery,
    /// Set between `poll_start` and `poll_stop`.
    pub(crate) listener: Option<Listener>,
}

/// Registration state of a listening handle.
pub(crate) struct Listener {
    /// Generation of the last message delivered (or the registration point).
    pub(crate) last_seen: u32,
    /// Generation of the latest broadcast this handle sent while listening.
    /// Its own registration is not counted for it, so it never acknowledges it.
    pub(crate) own: Option<u32>,
}

/// A process-local binding to a bus.
///
/// Operations take `&mut self`: one handle is driven by one thread at a
/// time. Use one handle per thread (or per process) for concurrency; the
/// handle is `Send`, so registration and waiting may happen on different
/// threads.
#[derive(Default)]
pub struct BusHandle {
    binding: Option<Binding>,
}

impl std::fmt::Debug for BusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusHandle")
            .field("path", &self.path())
            .field("access", &self.access())
            .field("listening", &self.is_listening())
            .finish()
    }
}

impl BusHandle {
    /// Create an unbound handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle and open the bus at `name`.
    pub fn connect(name: impl AsRef<Path>, flags: OpenFlags) -> Result<Self> {
        let mut handle = Self::new();
        handle.open(name, flags)?;
        Ok(handle)
    }

    /// Bind to the bus at `name`; `RDONLY` selects read-only access,
    /// anything else read-write.
    pub fn open(&mut self, name: impl AsRef<Path>, flags: OpenFlags) -> Result<()> {
        self.open_with_access(name, Access::from(flags), flags)
    }

    /// Bind to the bus at `name` with an explicit access mode.
    ///
    /// The `RDONLY` bit of `flags` is ignored in favor of `access`.
    pub fn open_with_access(
        &mut self,
        name: impl AsRef<Path>,
        access: Access,
        flags: OpenFlags,
    ) -> Result<()> {
        self.close();

        let path = name.as_ref();
        // Listeners mutate the roster too, so every mode maps read-write.
        let file = retry_interrupted(flags.contains(OpenFlags::INTR), || {
            OpenOptions::new().read(true).write(true).open(path)
        })
        .map_err(|e| BusError::from_io(e, path))?;
        let (mapping, delivery) = object::attach(&file, path)?;

        debug!(bus = %path.display(), ?access, ?delivery, "Opened bus");

        self.binding = Some(Binding {
            path: path.to_path_buf(),
            file,
            mapping,
            access,
            delivery,
            listener: None,
        });
        Ok(())
    }

    /// Release the binding. Deregisters first if still listening.
    pub fn close(&mut self) {
        if let Some(mut binding) = self.binding.take() {
            if binding.listener.is_some() {
                binding.stop_listening();
            }
            debug!(bus = %binding.path.display(), "Closed bus");
        }
    }

    pub fn is_open(&self) -> bool {
        self.binding.is_some()
    }

    /// Path of the bound bus.
    pub fn path(&self) -> Option<&Path> {
        self.binding.as_ref().map(|b| b.path.as_path())
    }

    pub fn access(&self) -> Option<Access> {
        self.binding.as_ref().map(|b| b.access)
    }

    /// Delivery policy recorded in the bound bus.
    pub fn delivery(&self) -> Option<Delivery> {
        self.binding.as_ref().map(|b| b.delivery)
    }

    /// Number of handles currently registered as listeners on the bus.
    pub fn listener_count(&self) -> Result<u32> {
        Ok(self.binding()?.mapping.state().snapshot().1)
    }

    pub(crate) fn binding(&self) -> Result<&Binding> {
        self.binding.as_ref().ok_or(BusError::NotOpen)
    }

    pub(crate) fn binding_mut(&mut self) -> Result<&mut Binding> {
        self.binding.as_mut().ok_or(BusError::NotOpen)
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.close();
    }
}
