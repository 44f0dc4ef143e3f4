//! Monitors: the capability every monitor kind implements, the closed registry
//! of kinds selected by `className`, and the building blocks they share.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::core::config::{ConfigSource, MonitorOptions};
use crate::core::errors::{IprepError, Result};
use crate::daemon::supervisor::WorkerRuntime;
use crate::store::ConnectorFactory;

pub mod accumulator;
pub mod extract;
pub mod follower;
pub mod log_tail;
pub mod netstat;

/// A unit of independent, self-restarting background work.
///
/// Implementations validate their options when constructed. `start` spawns the
/// worker threads and returns without blocking; a started monitor is never
/// stopped other than by daemon shutdown.
pub trait Monitor: Send + Sync {
    fn kind(&self) -> MonitorKind;

    /// 1-based configuration ordinal.
    fn ordinal(&self) -> usize;

    /// Short human-readable target, e.g. `/var/log/secure -> ssh`.
    fn describe(&self) -> String;

    fn start(&self, runtime: &WorkerRuntime) -> Result<()>;
}

/// Every monitor kind compiled into the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorKind {
    /// Follows a log file and commits aggregated matches on a schedule.
    LogTail,
    /// Samples the connection table and reports established peers.
    ConnectionTable,
}

impl MonitorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LogTail => "log",
            Self::ConnectionTable => "netstat",
        }
    }

    /// Resolve the `className` of monitor `ordinal`.
    pub fn for_monitor(options: MonitorOptions<'_>) -> Result<Self> {
        let class_name = options.required("className")?;
        class_name
            .parse()
            .map_err(|()| IprepError::UnknownMonitorKind {
                key: options.key("className"),
                class_name: class_name.to_string(),
            })
    }
}

impl FromStr for MonitorKind {
    type Err = ();

    /// Short names are matched case-insensitively; the fully-qualified class
    /// names of older deployments are accepted verbatim.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "com.aoindustries.ipreputation.LogMonitor" => return Ok(Self::LogTail),
            "com.aoindustries.ipreputation.NetstatMonitor" => return Ok(Self::ConnectionTable),
            _ => {}
        }
        match s.to_ascii_lowercase().as_str() {
            "log" | "logmonitor" | "log_tail" | "logtail" => Ok(Self::LogTail),
            "netstat" | "netstatmonitor" | "connection_table" | "connectiontable" => {
                Ok(Self::ConnectionTable)
            }
            _ => Err(()),
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construct monitor `ordinal` from the configuration, dispatching on its kind.
pub fn build_monitor(
    factory: Arc<dyn ConnectorFactory>,
    source: &ConfigSource,
    ordinal: usize,
) -> Result<Box<dyn Monitor>> {
    match MonitorKind::for_monitor(source.monitor(ordinal))? {
        MonitorKind::LogTail => Ok(Box::new(log_tail::LogTailMonitor::new(
            factory, source, ordinal,
        )?)),
        MonitorKind::ConnectionTable => Ok(Box::new(netstat::ConnectionTableMonitor::new(
            factory, source, ordinal,
        )?)),
    }
}

/// Per-monitor chatter: `info` when the monitor's `debug` option is set,
/// `debug` otherwise.
pub(crate) fn detail(verbose: bool, ordinal: usize, message: fmt::Arguments<'_>) {
    if verbose {
        info!(monitor = ordinal, "{message}");
    } else {
        debug!(monitor = ordinal, "{message}");
    }
}
