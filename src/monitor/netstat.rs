//! Connection table monitor: samples `netstat`, keeps established TCP sessions on
//! the configured local ports and reports each distinct foreign address once per
//! sample. The sample interval is the report interval.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::accumulator::{Accumulator, AggregationPolicy};
use super::{Monitor, MonitorKind, detail};
use crate::core::config::{ConfigSource, MonitorOptions, split_list};
use crate::core::errors::{IprepError, Result};
use crate::core::reputation::{
    AddReputation, ConfidenceType, IpV4, ReputationType, ScoreDefaults,
};
use crate::daemon::supervisor::{Shutdown, WorkerRuntime, supervise};
use crate::store::ConnectorFactory;

/// Header and banner prefixes emitted by the various `netstat` flavors.
const BANNER_PREFIXES: [&str; 2] = ["Active ", "Proto "];

/// Produces the raw text of one connection-table sample.
pub trait TableSource: Send + Sync {
    fn sample(&self) -> Result<String>;
}

/// Runs the host's `netstat`. A spawn failure or non-zero exit is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetstatCommand {
    program: String,
    args: Vec<String>,
}

impl NetstatCommand {
    /// `netstat -n -p TCP` on Windows, `netstat -n -t` elsewhere.
    #[must_use]
    pub fn for_host() -> Self {
        let args: &[&str] = if cfg!(windows) {
            &["-n", "-p", "TCP"]
        } else {
            &["-n", "-t"]
        };
        Self::new("netstat", args)
    }

    #[must_use]
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|arg| (*arg).to_string()).collect(),
        }
    }

    fn display(&self) -> String {
        let mut text = self.program.clone();
        for arg in &self.args {
            let _ = write!(text, " {arg}");
        }
        text
    }
}

impl TableSource for NetstatCommand {
    fn sample(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|err| IprepError::Command {
                command: self.display(),
                details: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(IprepError::Command {
                command: self.display(),
                details: format!(
                    "non-zero exit value: {}; stderr={}",
                    output
                        .status
                        .code()
                        .map_or_else(|| "signal".to_string(), |code| code.to_string()),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// One row of the connection table, whatever the column layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRow<'a> {
    pub proto: &'a str,
    pub local: &'a str,
    pub foreign: &'a str,
    pub state: &'a str,
}

/// Classification of one line of `netstat` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowParse<'a> {
    /// Blank, header or banner line.
    Skip,
    Row(ConnectionRow<'a>),
    /// Neither the 4-column nor the 6-column layout.
    Unparsable,
}

/// Split a trimmed line into a row. Four fields are `proto local foreign state`;
/// six fields are `proto recv-q send-q local foreign state`.
#[must_use]
pub fn parse_row(line: &str) -> RowParse<'_> {
    let line = line.trim();
    if line.is_empty() || BANNER_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
        return RowParse::Skip;
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    match *fields.as_slice() {
        [proto, local, foreign, state] | [proto, _, _, local, foreign, state] => {
            RowParse::Row(ConnectionRow {
                proto,
                local,
                foreign,
                state,
            })
        }
        _ => RowParse::Unparsable,
    }
}

/// Split `host:port` at the last colon.
fn split_host_port(address: &str) -> Option<(&str, &str)> {
    address.rfind(':').map(|pos| (&address[..pos], &address[pos + 1..]))
}

/// Result of filtering one table sample.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableScan {
    /// Distinct foreign addresses in first-seen order.
    pub addresses: Vec<IpV4>,
    /// Lines skipped as unparsable.
    pub rejected: usize,
}

/// Filters samples down to the foreign addresses worth reporting.
#[derive(Debug, Clone)]
pub struct TableFilter {
    ordinal: usize,
    local_ports: BTreeSet<u16>,
    debug: bool,
}

impl TableFilter {
    #[must_use]
    pub const fn new(ordinal: usize, local_ports: BTreeSet<u16>, debug: bool) -> Self {
        Self {
            ordinal,
            local_ports,
            debug,
        }
    }

    #[must_use]
    pub const fn local_ports(&self) -> &BTreeSet<u16> {
        &self.local_ports
    }

    /// Established TCP sessions on a configured local port, deduplicated by
    /// foreign host.
    #[must_use]
    pub fn scan(&self, output: &str) -> TableScan {
        let mut unique = Accumulator::new(AggregationPolicy::Coalesce, 1);
        let mut rejected = 0;
        for line in output.lines() {
            let row = match parse_row(line) {
                RowParse::Skip => continue,
                RowParse::Row(row) => row,
                RowParse::Unparsable => {
                    self.reject(line, "unexpected column count");
                    rejected += 1;
                    continue;
                }
            };
            if !row.proto.eq_ignore_ascii_case("TCP")
                || !row.state.eq_ignore_ascii_case("ESTABLISHED")
            {
                continue;
            }
            let Some((_, port)) = split_host_port(row.local) else {
                self.reject(line, "local address has no port");
                rejected += 1;
                continue;
            };
            let Ok(port) = port.parse::<u16>() else {
                self.reject(line, "local port is not a number");
                rejected += 1;
                continue;
            };
            if !self.local_ports.contains(&port) {
                continue;
            }
            let Some((host, _)) = split_host_port(row.foreign) else {
                self.reject(line, "foreign address has no port");
                rejected += 1;
                continue;
            };
            match IpV4::parse(host) {
                Ok(ip) => {
                    detail(self.debug, self.ordinal, format_args!("Parsing {host}"));
                    unique.observe(ip);
                }
                Err(_) => {
                    self.reject(line, "foreign host is not an IPv4 address");
                    rejected += 1;
                }
            }
        }
        TableScan {
            addresses: unique.addresses().collect(),
            rejected,
        }
    }

    fn reject(&self, line: &str, reason: &str) {
        warn!(monitor = self.ordinal, line = line.trim(), reason, "cannot parse line");
    }
}

/// Validated options of one connection table monitor.
#[derive(Debug, Clone)]
pub struct ConnectionTableConfig {
    pub ordinal: usize,
    pub set_name: String,
    pub filter: TableFilter,
    pub check_interval: Duration,
    pub error_sleep: Duration,
    pub defaults: ScoreDefaults,
    pub debug: bool,
}

impl ConnectionTableConfig {
    pub fn from_options(options: MonitorOptions<'_>) -> Result<Self> {
        let set_name = options.required("setName")?.to_string();
        let ports_key = options.key("localPorts");
        let mut local_ports = BTreeSet::new();
        for value in split_list(options.required("localPorts")?) {
            let port = value
                .parse::<u16>()
                .map_err(|err| IprepError::invalid(&ports_key, format!("{value}: {err}")))?;
            local_ports.insert(port);
        }
        if local_ports.is_empty() {
            return Err(IprepError::MissingOption { key: ports_key });
        }
        let debug = options.bool_or("debug", false)?;
        Ok(Self {
            ordinal: options.ordinal(),
            set_name,
            filter: TableFilter::new(options.ordinal(), local_ports, debug),
            check_interval: options.millis_or("checkInterval", 30_000)?,
            error_sleep: options.millis_or("errorSleep", 30_000)?,
            defaults: ScoreDefaults {
                score: options.parse_or("score", 1)?,
                confidence: options.parse_or("confidenceType", ConfidenceType::Uncertain)?,
                reputation: options.parse_or("reputationType", ReputationType::Good)?,
            },
            debug,
        })
    }

    fn describe(&self) -> String {
        let ports: Vec<String> = self
            .filter
            .local_ports()
            .iter()
            .map(u16::to_string)
            .collect();
        format!("[{}] -> {}", ports.join(", "), self.set_name)
    }

    /// One entry per address with the fixed score.
    #[must_use]
    pub fn batch(&self, addresses: &[IpV4]) -> Vec<AddReputation> {
        addresses
            .iter()
            .map(|ip| self.defaults.entry(*ip, self.defaults.score))
            .collect()
    }
}

/// Connection table monitor bound to a connector factory and a table source.
pub struct ConnectionTableMonitor {
    config: Arc<ConnectionTableConfig>,
    factory: Arc<dyn ConnectorFactory>,
    source: Arc<dyn TableSource>,
}

impl ConnectionTableMonitor {
    pub fn new(
        factory: Arc<dyn ConnectorFactory>,
        source: &ConfigSource,
        ordinal: usize,
    ) -> Result<Self> {
        let config = ConnectionTableConfig::from_options(source.monitor(ordinal))?;
        Ok(Self::with_source(
            factory,
            config,
            Arc::new(NetstatCommand::for_host()),
        ))
    }

    #[must_use]
    pub fn with_source(
        factory: Arc<dyn ConnectorFactory>,
        config: ConnectionTableConfig,
        source: Arc<dyn TableSource>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            factory,
            source,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionTableConfig {
        &self.config
    }
}

impl Monitor for ConnectionTableMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::ConnectionTable
    }

    fn ordinal(&self) -> usize {
        self.config.ordinal
    }

    fn describe(&self) -> String {
        self.config.describe()
    }

    fn start(&self, runtime: &WorkerRuntime) -> Result<()> {
        let name = format!("netstat({})", self.config.describe());
        let config = Arc::clone(&self.config);
        let factory = Arc::clone(&self.factory);
        let source = Arc::clone(&self.source);
        let worker = name.clone();
        runtime.spawn(name, move |shutdown| {
            supervise(&worker, config.error_sleep, shutdown, || {
                sample_loop(&config, factory.as_ref(), source.as_ref(), shutdown)
            })
        })
    }
}

/// One outer attempt: resolve the set, then sample/report/sleep until shutdown.
pub fn sample_loop(
    config: &ConnectionTableConfig,
    factory: &dyn ConnectorFactory,
    source: &dyn TableSource,
    shutdown: &Shutdown,
) -> Result<()> {
    let set = factory.connect()?.reputation_set(&config.set_name)?;
    loop {
        if shutdown.is_triggered() {
            return Ok(());
        }
        let scan = config.filter.scan(&source.sample()?);
        detail(
            config.debug,
            config.ordinal,
            format_args!(
                "Adding {} new reputations to {}",
                scan.addresses.len(),
                config.set_name
            ),
        );
        if !scan.addresses.is_empty() {
            set.add_reputation(&config.batch(&scan.addresses))?;
        }
        if shutdown.sleep(config.check_interval) {
            return Ok(());
        }
    }
}
