//! Daemon main loop: wire the store, install signal handling, bootstrap the
//! monitors, then wait for shutdown or an unrecoverable worker fault.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{error, info};

use super::bootstrap::{Bootstrap, BootstrapOutcome};
use super::supervisor::{WorkerFault, WorkerRuntime};
use crate::core::config::{ConfigSource, DaemonSettings, StoreKind};
use crate::core::errors::Result;
use crate::store::ConnectorFactory;
use crate::store::spool::SpoolFactory;

/// How often the idle main thread re-checks the shutdown flag.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Build the connector factory named by the daemon settings.
#[must_use]
pub fn connector_factory(settings: &DaemonSettings) -> Arc<dyn ConnectorFactory> {
    match settings.store_kind {
        StoreKind::Spool => Arc::new(SpoolFactory::from_settings(settings)),
    }
}

/// Run the daemon until SIGINT/SIGTERM. Returns the fault of the first worker
/// that failed unrecoverably.
pub fn run_daemon(source: &ConfigSource) -> Result<()> {
    let settings = DaemonSettings::from_source(source)?;
    let factory = connector_factory(&settings);
    let (runtime, faults) = WorkerRuntime::new();
    #[cfg(feature = "daemon")]
    super::signals::install(runtime.shutdown().clone())?;
    run_with(source, factory, settings.error_sleep, &runtime, &faults)
}

/// Bootstrap and supervise with explicit collaborators.
pub fn run_with(
    source: &ConfigSource,
    factory: Arc<dyn ConnectorFactory>,
    backoff: Duration,
    runtime: &WorkerRuntime,
    faults: &Receiver<WorkerFault>,
) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "iprepd starting");
    match Bootstrap::new(source, factory, backoff).run(runtime)? {
        BootstrapOutcome::Started { monitors, .. } => {
            info!(monitors, workers = runtime.worker_count(), "daemon running");
        }
        BootstrapOutcome::ShutdownRequested => {
            info!("shutdown requested during bootstrap");
            runtime.shutdown().trigger();
            runtime.join_all();
            return Ok(());
        }
    }

    let result = loop {
        match faults.recv_timeout(IDLE_POLL) {
            Ok(fault) => {
                error!(worker = %fault.worker, code = fault.error.code(), error = %fault.error, "worker failed unrecoverably; stopping");
                break Err(fault.error);
            }
            Err(RecvTimeoutError::Timeout) => {
                if runtime.shutdown().is_triggered() {
                    break Ok(());
                }
            }
            Err(RecvTimeoutError::Disconnected) => break Ok(()),
        }
    };

    runtime.shutdown().trigger();
    runtime.join_all();
    info!("iprepd stopped");
    result
}
