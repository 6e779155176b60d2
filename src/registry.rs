//! Registry: creation and removal of backing objects.
//!
//! A new object is staged as a fully-initialized temporary file in the target
//! directory and hard-linked into place. The link fails if the name is taken,
//! so concurrent creators never see a half-built bus and never clobber one.

use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::flags::CreateFlags;
use crate::object::{self, Delivery};
use crate::utils::retry::retry_interrupted;

/// Directory name for anonymous buses under the runtime directory.
pub const BUS_DIR_NAME: &str = "buscast";
/// Prefix of generated bus names.
pub const ANONYMOUS_PREFIX: &str = "bus-";
/// File mode of new buses.
pub const DEFAULT_MODE: u32 = 0o600;

const STAGING_PREFIX: &str = ".buscast-";

/// Default location for anonymous buses: `$XDG_RUNTIME_DIR/buscast`,
/// falling back to the system temp directory.
pub fn default_bus_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(BUS_DIR_NAME),
        _ => std::env::temp_dir().join(BUS_DIR_NAME),
    }
}

/// Creates and removes buses.
#[derive(Debug, Clone)]
pub struct Registry {
    bus_dir: PathBuf,
    delivery: Delivery,
    mode: u32,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            bus_dir: default_bus_dir(),
            delivery: Delivery::default(),
            mode: DEFAULT_MODE,
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from loaded configuration.
    pub fn from_config(config: &BusConfig) -> std::result::Result<Self, crate::config::ConfigError> {
        Ok(Self {
            bus_dir: config.bus_dir.clone().unwrap_or_else(default_bus_dir),
            delivery: config.delivery,
            mode: config.file_mode()?,
        })
    }

    /// Directory used for anonymous buses.
    pub fn with_bus_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bus_dir = dir.into();
        self
    }

    /// Delivery policy recorded in buses created from now on.
    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    /// File mode of buses created from now on.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode & 0o7777;
        self
    }

    pub fn bus_dir(&self) -> &Path {
        &self.bus_dir
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Create a bus and return its name.
    ///
    /// Without a name, a unique one is generated in the bus directory. With
    /// a name, an existing object is an error under `EXCL` and left
    /// untouched otherwise.
    pub fn create(&self, name: Option<&Path>, flags: CreateFlags) -> Result<PathBuf> {
        match name {
            Some(path) => self.create_named(path, flags),
            None => self.create_anonymous(flags),
        }
    }

    /// Create a bus at `name`.
    pub fn create_at(&self, name: impl AsRef<Path>, flags: CreateFlags) -> Result<PathBuf> {
        self.create_named(name.as_ref(), flags)
    }

    /// Create a bus under a generated name in the bus directory.
    pub fn create_anonymous(&self, flags: CreateFlags) -> Result<PathBuf> {
        let interruptible = flags.contains(CreateFlags::INTR);
        retry_interrupted(interruptible, || fs::create_dir_all(&self.bus_dir))
            .map_err(|e| BusError::from_io(e, &self.bus_dir))?;

        let staged = self.stage(&self.bus_dir, interruptible)?;
        loop {
            let candidate = self
                .bus_dir
                .join(format!("{}{}", ANONYMOUS_PREFIX, Uuid::new_v4().simple()));
            match retry_interrupted(interruptible, || fs::hard_link(staged.path(), &candidate)) {
                Ok(()) => {
                    info!(bus = %candidate.display(), delivery = ?self.delivery, "Created bus");
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(bus = %candidate.display(), "Generated name taken, retrying");
                }
                Err(e) => return Err(BusError::from_io(e, &candidate)),
            }
        }
    }

    fn create_named(&self, path: &Path, flags: CreateFlags) -> Result<PathBuf> {
        let interruptible = flags.contains(CreateFlags::INTR);
        let exclusive = flags.contains(CreateFlags::EXCL);
        if !exclusive && fs::symlink_metadata(path).is_ok() {
            debug!(bus = %path.display(), "Bus already exists, leaving it untouched");
            return Ok(path.to_path_buf());
        }
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let staged = self.stage(dir, interruptible)?;
        match retry_interrupted(interruptible, || fs::hard_link(staged.path(), path)) {
            Ok(()) => {
                info!(bus = %path.display(), delivery = ?self.delivery, "Created bus");
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && !exclusive => {
                debug!(bus = %path.display(), "Bus already exists, leaving it untouched");
            }
            Err(e) => return Err(BusError::from_io(e, path)),
        }
        Ok(path.to_path_buf())
    }

    /// Write an initialized object to a temporary file in `dir`.
    fn stage(&self, dir: &Path, interruptible: bool) -> Result<NamedTempFile> {
        let staged = retry_interrupted(interruptible, || {
            tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempfile_in(dir)
        })
        .map_err(|e| BusError::from_io(e, dir))?;

        object::initialize(staged.as_file(), self.delivery)
            .and_then(|()| {
                staged
                    .as_file()
                    .set_permissions(Permissions::from_mode(self.mode))
            })
            .map_err(|e| BusError::from_io(e, staged.path()))?;
        Ok(staged)
    }

    /// Remove the bus at `name`. Bound handles keep their mapping.
    pub fn unlink(&self, name: impl AsRef<Path>) -> Result<()> {
        unlink(name)
    }
}

/// Create a bus with the default registry.
pub fn create(name: Option<&Path>, flags: CreateFlags) -> Result<PathBuf> {
    Registry::new().create(name, flags)
}

/// Remove the bus at `name`.
pub fn unlink(name: impl AsRef<Path>) -> Result<()> {
    let path = name.as_ref();
    fs::remove_file(path).map_err(|e| BusError::from_io(e, path))?;
    info!(bus = %path.display(), "Unlinked bus");
    Ok(())
}
