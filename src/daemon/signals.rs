//! SIGINT/SIGTERM handling: a dedicated thread turns the first termination
//! signal into a cooperative shutdown request.

use std::thread;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

use super::supervisor::Shutdown;
use crate::core::errors::{IprepError, Result};

/// Register the handlers and spawn the listener thread.
pub fn install(shutdown: Shutdown) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).map_err(|err| IprepError::io("<signals>", err))?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "termination signal received; shutting down");
                shutdown.trigger();
            }
        })
        .map_err(|source| IprepError::Spawn {
            name: "signals".to_string(),
            source,
        })?;
    Ok(())
}
