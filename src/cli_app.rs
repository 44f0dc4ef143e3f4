//! Top-level CLI definition and dispatch.

use std::collections::BTreeSet;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::core::config::{ConfigSource, DaemonSettings, split_list};
use crate::core::errors::{IprepError, Result};
use crate::daemon::bootstrap::{check_monitors, require_valid};
use crate::daemon::loop_main::{connector_factory, run_daemon};
use crate::monitor::netstat::TableFilter;
use crate::store::ConnectorFactory;

/// iprepd: feeds IP reputation from log files and connection tables.
#[derive(Parser)]
#[command(name = "iprepd", version, about)]
pub struct Cli {
    /// Configuration file (TOML, or `.properties`).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground (the default).
    Run,
    /// Validate the configuration and every monitor without starting them.
    Check {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Filter a captured netstat table and print the reportable addresses.
    ParseTable {
        /// Table file; stdin when omitted.
        file: Option<PathBuf>,
        /// Local ports to match, comma separated.
        #[arg(long, required = true)]
        ports: String,
    },
}

/// Dispatch CLI commands.
///
/// # Errors
/// Returns an error if the subcommand fails.
pub fn run(cli: &Cli) -> Result<()> {
    match cli.command.as_ref().unwrap_or(&Command::Run) {
        Command::Run => run_daemon(&load_config(cli)?),
        Command::Check { json } => check(&load_config(cli)?, *json),
        Command::ParseTable { file, ports } => parse_table(file.as_deref(), ports),
    }
}

fn load_config(cli: &Cli) -> Result<ConfigSource> {
    let path = ConfigSource::resolve_path(cli.config.as_deref());
    ConfigSource::load(&path)
}

fn check(source: &ConfigSource, json: bool) -> Result<()> {
    let settings = DaemonSettings::from_source(source)?;
    let factory: Arc<dyn ConnectorFactory> = connector_factory(&settings);
    let checks = check_monitors(source, &factory)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checks)?);
    } else {
        for check in &checks {
            match (&check.error, &check.kind, &check.target) {
                (Some(err), _, _) => println!("monitor {:>3}  FAIL  {err}", check.ordinal),
                (None, Some(kind), Some(target)) => {
                    println!("monitor {:>3}  ok    {kind:<8} {target}", check.ordinal);
                }
                _ => println!("monitor {:>3}  ok", check.ordinal),
            }
        }
    }

    require_valid(&checks)
}

fn parse_table(file: Option<&std::path::Path>, ports: &str) -> Result<()> {
    let local_ports = split_list(ports)
        .iter()
        .map(|port| {
            port.parse::<u16>()
                .map_err(|err| IprepError::invalid("--ports", format!("{port}: {err}")))
        })
        .collect::<Result<BTreeSet<u16>>>()?;
    if local_ports.is_empty() {
        return Err(IprepError::MissingOption {
            key: "--ports".to_string(),
        });
    }

    let output = match file {
        Some(path) => std::fs::read_to_string(path).map_err(|err| IprepError::io(path, err))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|err| IprepError::io("<stdin>", err))?;
            buf
        }
    };

    let scan = TableFilter::new(0, local_ports, false).scan(&output);
    for address in &scan.addresses {
        println!("{address}");
    }
    if scan.rejected > 0 {
        eprintln!("{} unparsable line(s) skipped", scan.rejected);
    }
    Ok(())
}
