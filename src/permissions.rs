//! Ownership and permission adjustment of backing objects.
//!
//! Thin wrappers over `chmod(2)`/`chown(2)`. The mode transform is a pure
//! function so it can be checked without touching the filesystem.

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::unistd::{Gid, Group, Uid, User};
use tracing::info;

use crate::error::{BusError, Result};

const CLASSES: [u32; 3] = [0o700, 0o070, 0o007];
const READ_WRITE: u32 = 0o666;

/// Fold a requested mode into the current one.
///
/// Non-permission bits of `current` (file type, setuid, sticky) are kept.
/// For each principal class (owner, group, others), any requested bit grants
/// the class read and write access; a class with no requested bits loses
/// access. Execute is never granted: a bus is not a program, and a listener
/// needs write access to register.
pub fn fold_mode(current: u32, requested: u32) -> u32 {
    let permissions = CLASSES
        .iter()
        .filter(|class| requested & **class != 0)
        .fold(0, |acc, class| acc | (class & READ_WRITE));
    (current & !0o777) | permissions
}

/// Change the permissions of the bus at `name`; returns the applied mode.
pub fn chmod(name: impl AsRef<Path>, mode: u32) -> Result<u32> {
    let path = name.as_ref();
    let current = fs::metadata(path)
        .map_err(|e| BusError::from_io(e, path))?
        .permissions()
        .mode();
    let applied = fold_mode(current, mode) & 0o7777;
    fs::set_permissions(path, Permissions::from_mode(applied))
        .map_err(|e| BusError::from_io(e, path))?;
    info!(bus = %path.display(), mode = %format!("{:o}", applied), "Changed bus mode");
    Ok(applied)
}

/// Change the owner and/or group of the bus at `name`.
pub fn chown(name: impl AsRef<Path>, owner: Option<Uid>, group: Option<Gid>) -> Result<()> {
    let path = name.as_ref();
    nix::unistd::chown(path, owner, group).map_err(|errno| BusError::from_errno(errno, path))?;
    info!(bus = %path.display(), ?owner, ?group, "Changed bus ownership");
    Ok(())
}

/// Resolve a user name or numeric id.
pub fn resolve_user(name: &str) -> Result<Uid> {
    if let Ok(id) = name.parse::<u32>() {
        return Ok(Uid::from_raw(id));
    }
    match User::from_name(name) {
        Ok(Some(user)) => Ok(user.uid),
        Ok(None) => Err(BusError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unknown user '{}'", name),
        ))),
        Err(errno) => Err(BusError::Io(errno.into())),
    }
}

/// Resolve a group name or numeric id.
pub fn resolve_group(name: &str) -> Result<Gid> {
    if let Ok(id) = name.parse::<u32>() {
        return Ok(Gid::from_raw(id));
    }
    match Group::from_name(name) {
        Ok(Some(group)) => Ok(group.gid),
        Ok(None) => Err(BusError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unknown group '{}'", name),
        ))),
        Err(errno) => Err(BusError::Io(errno.into())),
    }
}
