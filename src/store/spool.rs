//! JSONL spool store: every submitted batch becomes one JSON line, appended to a
//! file or written to stdout, for a downstream shipper to forward.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::{Connector, ConnectorFactory, ReputationSet};
use crate::core::config::DaemonSettings;
use crate::core::errors::{IprepError, Result};
use crate::core::reputation::AddReputation;

#[derive(Debug, Serialize)]
struct SpoolRecord<'a> {
    set: &'a str,
    at: DateTime<Utc>,
    entries: &'a [AddReputation],
}

enum Sink {
    Stdout,
    File { path: PathBuf, file: Mutex<File> },
}

impl Sink {
    fn write_line(&self, line: &str) -> Result<()> {
        match self {
            Self::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(line.as_bytes())
                    .and_then(|()| out.flush())
                    .map_err(|err| IprepError::io("<stdout>", err))
            }
            Self::File { path, file } => {
                // One write per line so concurrent appenders never interleave.
                file.lock()
                    .write_all(line.as_bytes())
                    .map_err(|err| IprepError::io(path, err))
            }
        }
    }
}

/// Opens the spool destination on every `connect`.
#[derive(Debug, Clone)]
pub struct SpoolFactory {
    path: Option<PathBuf>,
    sets: Option<Arc<HashSet<String>>>,
}

impl SpoolFactory {
    #[must_use]
    pub fn new(path: Option<PathBuf>, sets: Option<Vec<String>>) -> Self {
        Self {
            path,
            sets: sets.map(|names| Arc::new(names.into_iter().collect())),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &DaemonSettings) -> Self {
        Self::new(settings.store_path.clone(), settings.store_sets.clone())
    }
}

impl ConnectorFactory for SpoolFactory {
    fn connect(&self) -> Result<Arc<dyn Connector>> {
        let sink = match &self.path {
            None => Sink::Stdout,
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|err| IprepError::io(path, err))?;
                Sink::File {
                    path: path.clone(),
                    file: Mutex::new(file),
                }
            }
        };
        Ok(Arc::new(SpoolConnector {
            sink: Arc::new(sink),
            sets: self.sets.clone(),
        }))
    }
}

struct SpoolConnector {
    sink: Arc<Sink>,
    sets: Option<Arc<HashSet<String>>>,
}

impl Connector for SpoolConnector {
    fn reputation_set(&self, name: &str) -> Result<Arc<dyn ReputationSet>> {
        if self.sets.as_ref().is_some_and(|sets| !sets.contains(name)) {
            return Err(IprepError::SetNotFound {
                name: name.to_string(),
            });
        }
        Ok(Arc::new(SpoolSet {
            name: name.to_string(),
            sink: Arc::clone(&self.sink),
        }))
    }
}

struct SpoolSet {
    name: String,
    sink: Arc<Sink>,
}

impl ReputationSet for SpoolSet {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_reputation(&self, batch: &[AddReputation]) -> Result<()> {
        let record = SpoolRecord {
            set: &self.name,
            at: Utc::now(),
            entries: batch,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        self.sink.write_line(&line)
    }
}
