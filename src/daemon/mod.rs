//! Daemon subsystem: bootstrap, main loop, supervised workers, signal handling.

pub mod bootstrap;
pub mod loop_main;
#[cfg(feature = "daemon")]
pub mod signals;
pub mod supervisor;
