//! Daemon bootstrap: construct and start every configured monitor, retrying the
//! ones that failed until all of them have started once.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use super::supervisor::WorkerRuntime;
use crate::core::config::ConfigSource;
use crate::core::errors::{IprepError, Result};
use crate::monitor::{Monitor, build_monitor};
use crate::store::ConnectorFactory;

/// Signature of the monitor constructor the bootstrap calls per ordinal.
pub type BuildFn =
    fn(Arc<dyn ConnectorFactory>, &ConfigSource, usize) -> Result<Box<dyn Monitor>>;

/// How a bootstrap run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Every configured monitor is running. `passes` counts connection attempts.
    Started { monitors: usize, passes: usize },
    /// Shutdown was requested before every monitor had started.
    ShutdownRequested,
}

/// Bootstrap over one configuration and one connector factory.
pub struct Bootstrap<'a, B = BuildFn> {
    source: &'a ConfigSource,
    factory: Arc<dyn ConnectorFactory>,
    backoff: Duration,
    builder: B,
}

impl<'a> Bootstrap<'a, BuildFn> {
    /// Bootstrap using the compiled-in monitor registry.
    #[must_use]
    pub fn new(source: &'a ConfigSource, factory: Arc<dyn ConnectorFactory>, backoff: Duration) -> Self {
        Self::with_builder(source, factory, backoff, build_monitor)
    }
}

impl<'a, B> Bootstrap<'a, B>
where
    B: FnMut(Arc<dyn ConnectorFactory>, &ConfigSource, usize) -> Result<Box<dyn Monitor>>,
{
    #[must_use]
    pub fn with_builder(
        source: &'a ConfigSource,
        factory: Arc<dyn ConnectorFactory>,
        backoff: Duration,
        builder: B,
    ) -> Self {
        Self {
            source,
            factory,
            backoff,
            builder,
        }
    }

    /// Start every monitor, blocking until all have started or shutdown is
    /// requested. A monitor that started is never constructed again.
    pub fn run(&mut self, runtime: &WorkerRuntime) -> Result<BootstrapOutcome> {
        let ordinals = self.source.monitor_ordinals();
        if ordinals.is_empty() {
            return Err(IprepError::NoMonitors);
        }
        let shutdown = runtime.shutdown();
        let mut started = vec![false; ordinals.len()];
        let mut passes = 0;

        loop {
            if shutdown.is_triggered() {
                return Ok(BootstrapOutcome::ShutdownRequested);
            }
            passes += 1;
            if let Err(err) = self.factory.connect() {
                warn!(pass = passes, code = err.code(), error = %err, "reputation store unavailable; retrying");
                if shutdown.sleep(self.backoff) {
                    return Ok(BootstrapOutcome::ShutdownRequested);
                }
                continue;
            }

            let mut failures = 0_usize;
            for (slot, &ordinal) in started.iter_mut().zip(&ordinals) {
                if *slot {
                    continue;
                }
                match self.start_one(ordinal, runtime) {
                    Ok(()) => *slot = true,
                    Err(err) => {
                        failures += 1;
                        error!(monitor = ordinal, code = err.code(), error = %err, "monitor failed to start");
                    }
                }
            }

            if failures == 0 {
                info!(monitors = ordinals.len(), passes, "all monitors started");
                return Ok(BootstrapOutcome::Started {
                    monitors: ordinals.len(),
                    passes,
                });
            }
            warn!(
                failures,
                backoff_ms = u64::try_from(self.backoff.as_millis()).unwrap_or(u64::MAX),
                "some monitors failed to start; retrying"
            );
            if shutdown.sleep(self.backoff) {
                return Ok(BootstrapOutcome::ShutdownRequested);
            }
        }
    }

    fn start_one(&mut self, ordinal: usize, runtime: &WorkerRuntime) -> Result<()> {
        let monitor = (self.builder)(Arc::clone(&self.factory), self.source, ordinal)?;
        monitor.start(runtime)?;
        info!(
            monitor = ordinal,
            kind = %monitor.kind(),
            target = %monitor.describe(),
            "monitor started"
        );
        Ok(())
    }
}

/// Validation result for one configured monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorCheck {
    pub ordinal: usize,
    pub kind: Option<String>,
    pub target: Option<String>,
    pub error: Option<String>,
}

impl MonitorCheck {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Construct every configured monitor without starting it.
pub fn check_monitors(
    source: &ConfigSource,
    factory: &Arc<dyn ConnectorFactory>,
) -> Result<Vec<MonitorCheck>> {
    let ordinals = source.monitor_ordinals();
    if ordinals.is_empty() {
        return Err(IprepError::NoMonitors);
    }
    Ok(ordinals
        .into_iter()
        .map(|ordinal| match build_monitor(Arc::clone(factory), source, ordinal) {
            Ok(monitor) => MonitorCheck {
                ordinal,
                kind: Some(monitor.kind().to_string()),
                target: Some(monitor.describe()),
                error: None,
            },
            Err(err) => MonitorCheck {
                ordinal,
                kind: None,
                target: None,
                error: Some(err.to_string()),
            },
        })
        .collect())
}

/// Fail with a configuration error naming the first broken ordinal when any
/// check failed.
pub fn require_valid(checks: &[MonitorCheck]) -> Result<()> {
    let mut failures = checks.iter().filter(|check| !check.is_ok());
    let Some(first) = failures.next() else {
        return Ok(());
    };
    Err(IprepError::MisconfiguredMonitors {
        failed: 1 + failures.count(),
        total: checks.len(),
        first: first.ordinal,
    })
}
