//! IP reputation daemon: monitors connection tables and log files and reports
//! per-address reputation to a reputation store.

pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod store;

#[cfg(feature = "cli")]
pub mod cli_app;
