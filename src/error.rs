//! Error taxonomy for bus operations.
//!
//! Every failure is reported as a [`BusError`]. Variants line up with an
//! OS-style error-code domain so thin bindings can surface them as `errno`
//! values via [`BusError::raw_os_error`].

use std::io;
use std::path::{Path, PathBuf};

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Boxed error returned by poll loop handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("No bus at '{}'", path.display())]
    NotFound { path: PathBuf },

    #[error("Bus already exists at '{}'", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("Operation would block")]
    WouldBlock,

    #[error("Interrupted by signal")]
    Interrupted,

    #[error("Message is {size} bytes, at most {limit} allowed")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("'{}' is not a bus: {reason}", path.display())]
    InvalidObject { path: PathBuf, reason: String },

    #[error("Handle is not open")]
    NotOpen,

    #[error("Handle is not registered as a listener")]
    NotListening,

    #[error("Message handler failed: {0}")]
    Handler(#[source] HandlerError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BusError {
    /// Classify an I/O error raised while operating on the object at `path`.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => BusError::NotFound {
                path: path.to_path_buf(),
            },
            io::ErrorKind::AlreadyExists => BusError::AlreadyExists {
                path: path.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => {
                BusError::PermissionDenied(format!("{}: {}", path.display(), err))
            }
            io::ErrorKind::WouldBlock => BusError::WouldBlock,
            io::ErrorKind::Interrupted => BusError::Interrupted,
            _ => BusError::Io(err),
        }
    }

    /// Classify a raw errno from a libc call on the object at `path`.
    #[cfg(unix)]
    pub(crate) fn from_errno(errno: nix::errno::Errno, path: &Path) -> Self {
        Self::from_io(io::Error::from(errno), path)
    }

    /// `true` for conditions the caller may retry (WouldBlock, Interrupted).
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::WouldBlock | BusError::Interrupted)
    }

    /// The `errno` value a C-level caller would see for this error.
    #[cfg(unix)]
    pub fn raw_os_error(&self) -> i32 {
        match self {
            BusError::NotFound { .. } => libc::ENOENT,
            BusError::AlreadyExists { .. } => libc::EEXIST,
            BusError::WouldBlock => libc::EAGAIN,
            BusError::Interrupted => libc::EINTR,
            BusError::MessageTooLarge { .. } => libc::EMSGSIZE,
            BusError::PermissionDenied(_) => libc::EACCES,
            BusError::InvalidObject { .. } => libc::EINVAL,
            BusError::NotOpen => libc::EBADF,
            BusError::NotListening => libc::EINVAL,
            BusError::Handler(_) => libc::ECANCELED,
            BusError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// Path of the missing bus, for not-found conditions.
    pub fn path(&self) -> Option<&Path> {
        match self {
            BusError::NotFound { path }
            | BusError::AlreadyExists { path }
            | BusError::InvalidObject { path, .. } => Some(path),
            _ => None,
        }
    }
}
