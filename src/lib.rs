//! buscast - named, persistent, cross-process broadcast bus
//!
//! A bus is a small memory-mapped file. Any number of processes open it by
//! name; broadcasters write one message at a time and every registered
//! listener receives it.
//!
//! ```no_run
//! use buscast::{create, BusHandle, CreateFlags, IoFlags, OpenFlags};
//!
//! let path = create(Some("/tmp/events".as_ref()), CreateFlags::empty())?;
//! let mut bus = BusHandle::connect(&path, OpenFlags::RDWR)?;
//! bus.write("hello", IoFlags::empty())?;
//! # Ok::<(), buscast::BusError>(())
//! ```

#[cfg(not(unix))]
compile_error!("buscast requires a unix target");

mod broadcast;
pub mod config;
pub mod error;
pub mod flags;
mod handle;
mod listen;
mod lock;
mod object;
pub mod permissions;
mod poll_loop;
pub mod registry;
pub mod subscription;
pub mod utils;
mod wake;

pub use error::{BusError, HandlerError, Result};
pub use flags::{Access, CreateFlags, IoFlags, OpenFlags};
pub use handle::BusHandle;
pub use object::{Delivery, MESSAGE_MAX};
pub use permissions::{chmod, chown, fold_mode};
pub use poll_loop::Flow;
pub use registry::{create, unlink, Registry};
pub use subscription::{publish, subscribe, Subscription};
