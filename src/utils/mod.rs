//! Small helpers shared by the library and the `buscast` binary.

pub mod bootstrap;
pub mod retry;
