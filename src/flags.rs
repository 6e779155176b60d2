//! Operation flags.
//!
//! The numeric values overlap across operations (`RDONLY` and `NOWAIT` are
//! both `1`), so each operation gets its own flag type. Raw values coming
//! from bindings convert with `from_bits_truncate`.

use bitflags::bitflags;

bitflags! {
    /// Flags accepted by `create`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CreateFlags: u32 {
        /// Fail if an object already exists at the name.
        const EXCL = 2;
        /// Fail with `Interrupted` instead of retrying on `EINTR`.
        const INTR = 4;
    }
}

bitflags! {
    /// Flags accepted by `open`.
    ///
    /// `WRONLY` and `RDWR` share the empty bit pattern; use
    /// [`crate::BusHandle::open_with_access`] to ask for write-only access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        /// Open for reading only.
        const RDONLY = 1;
        /// Fail with `Interrupted` instead of retrying on `EINTR`.
        const INTR = 4;
    }
}

impl OpenFlags {
    /// Open for writing only (same bits as `RDWR`).
    pub const WRONLY: OpenFlags = OpenFlags::empty();
    /// Open for reading and writing.
    pub const RDWR: OpenFlags = OpenFlags::empty();
}

bitflags! {
    /// Flags accepted by `write`, `poll` and `read`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IoFlags: u32 {
        /// Return `WouldBlock` instead of suspending.
        const NOWAIT = 1;
        /// Fail with `Interrupted` instead of retrying on `EINTR`.
        const INTR = 4;
    }
}

/// Access mode of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn can_read(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

impl From<OpenFlags> for Access {
    fn from(flags: OpenFlags) -> Self {
        if flags.contains(OpenFlags::RDONLY) {
            Access::ReadOnly
        } else {
            Access::ReadWrite
        }
    }
}
