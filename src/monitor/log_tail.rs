//! Log tail monitor: a reader thread follows one file and buffers extracted
//! addresses; a committer thread drains the buffer on its own schedule,
//! aggregates per address and submits one batch per interval.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::accumulator::{Accumulator, AggregationPolicy, PendingBuffer};
use super::extract::{Extraction, ExtractorError, LineExtractor};
use super::follower::{Charset, LogFollower};
use super::{Monitor, MonitorKind, detail};
use crate::core::config::{ConfigSource, MonitorOptions};
use crate::core::errors::{IprepError, Result};
use crate::core::reputation::{ConfidenceType, ReputationType, ScoreDefaults};
use crate::daemon::supervisor::{Shutdown, WorkerRuntime, supervise};
use crate::store::{ConnectorFactory, ReputationSet};

/// Validated options of one log tail monitor.
#[derive(Debug, Clone)]
pub struct LogTailConfig {
    pub ordinal: usize,
    pub set_name: String,
    pub path: PathBuf,
    pub extractor: LineExtractor,
    pub poll_interval: Duration,
    pub commit_interval: Duration,
    pub policy: AggregationPolicy,
    pub charset: Charset,
    pub error_sleep: Duration,
    pub defaults: ScoreDefaults,
    pub debug: bool,
}

impl LogTailConfig {
    pub fn from_options(options: MonitorOptions<'_>) -> Result<Self> {
        let set_name = options.required("setName")?.to_string();
        let path = PathBuf::from(options.required("path")?);
        let pattern = options.required("pattern")?;
        let group: usize = options.parse_or("group", 0)?;
        let extractor = LineExtractor::new(pattern, group).map_err(|err| {
            let option = match err {
                ExtractorError::Pattern(_) => "pattern",
                ExtractorError::Group { .. } => "group",
            };
            IprepError::invalid(options.key(option), err.to_string())
        })?;
        let charset = match options.get("charset") {
            None => Charset::default(),
            Some(raw) => raw
                .parse()
                .map_err(|err: String| IprepError::invalid(options.key("charset"), err))?,
        };
        Ok(Self {
            ordinal: options.ordinal(),
            set_name,
            path,
            extractor,
            poll_interval: options.millis_or("pollInterval", 5000)?,
            commit_interval: options.millis_or("commitInterval", 30_000)?,
            policy: AggregationPolicy::from_coalesce(options.bool_or("coalesce", false)?),
            charset,
            error_sleep: options.millis_or("errorSleep", 30_000)?,
            defaults: ScoreDefaults {
                score: options.parse_or("score", 1)?,
                confidence: options.parse_or("confidenceType", ConfidenceType::Uncertain)?,
                reputation: options.parse_or("reputationType", ReputationType::Good)?,
            },
            debug: options.bool_or("debug", false)?,
        })
    }

    fn describe(&self) -> String {
        format!("{} -> {}", self.path.display(), self.set_name)
    }
}

/// Log tail monitor bound to a connector factory.
pub struct LogTailMonitor {
    config: Arc<LogTailConfig>,
    factory: Arc<dyn ConnectorFactory>,
}

impl LogTailMonitor {
    pub fn new(
        factory: Arc<dyn ConnectorFactory>,
        source: &ConfigSource,
        ordinal: usize,
    ) -> Result<Self> {
        Ok(Self::from_config(
            factory,
            LogTailConfig::from_options(source.monitor(ordinal))?,
        ))
    }

    #[must_use]
    pub fn from_config(factory: Arc<dyn ConnectorFactory>, config: LogTailConfig) -> Self {
        Self {
            config: Arc::new(config),
            factory,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LogTailConfig {
        &self.config
    }
}

impl Monitor for LogTailMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::LogTail
    }

    fn ordinal(&self) -> usize {
        self.config.ordinal
    }

    fn describe(&self) -> String {
        self.config.describe()
    }

    fn start(&self, runtime: &WorkerRuntime) -> Result<()> {
        let buffer = Arc::new(PendingBuffer::new());

        let reader_name = format!("log-reader({})", self.config.describe());
        let config = Arc::clone(&self.config);
        let reader_buffer = Arc::clone(&buffer);
        let worker = reader_name.clone();
        runtime.spawn(reader_name, move |shutdown| {
            let mut reader = LogReader::new(&config, &reader_buffer);
            supervise(&worker, config.error_sleep, shutdown, || reader.follow(shutdown))
        })?;

        let commit_name = format!("log-commit({})", self.config.describe());
        let config = Arc::clone(&self.config);
        let factory = Arc::clone(&self.factory);
        let worker = commit_name.clone();
        runtime.spawn(commit_name, move |shutdown| {
            let mut committer = Committer::new(&config, &buffer);
            supervise(&worker, config.error_sleep, shutdown, || {
                committer.run(factory.as_ref(), shutdown)
            })
        })
    }
}

/// What happened to one line offered to the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Buffered,
    Ignored,
    Rejected,
}

/// Reader half: follow the file, extract, append to the shared buffer.
pub struct LogReader<'a> {
    config: &'a LogTailConfig,
    buffer: &'a PendingBuffer,
    matches: u64,
}

impl<'a> LogReader<'a> {
    #[must_use]
    pub const fn new(config: &'a LogTailConfig, buffer: &'a PendingBuffer) -> Self {
        Self {
            config,
            buffer,
            matches: 0,
        }
    }

    /// One outer attempt: open the file and ingest lines until shutdown.
    pub fn follow(&mut self, shutdown: &Shutdown) -> Result<()> {
        let mut follower =
            LogFollower::open(&self.config.path, self.config.poll_interval, self.config.charset)?;
        debug!(
            monitor = self.config.ordinal,
            path = %follower.path().display(),
            pattern = self.config.extractor.pattern(),
            group = self.config.extractor.group(),
            "following log file"
        );
        while let Some(line) = follower.next_line(shutdown)? {
            self.ingest(&line);
        }
        Ok(())
    }

    pub fn ingest(&mut self, line: &str) -> LineOutcome {
        match self.config.extractor.extract(line) {
            Extraction::NoMatch => LineOutcome::Ignored,
            Extraction::Observed {
                observation,
                matched,
            } => {
                self.matches += 1;
                detail(
                    self.config.debug,
                    self.config.ordinal,
                    format_args!("Matched {}: {matched}", self.matches),
                );
                self.buffer.push(observation);
                LineOutcome::Buffered
            }
            Extraction::Unparsable { matched, error } => {
                self.matches += 1;
                warn!(
                    monitor = self.config.ordinal,
                    matched,
                    error = %error,
                    "matched text is not an IPv4 address; line dropped"
                );
                LineOutcome::Rejected
            }
        }
    }

    #[must_use]
    pub const fn match_count(&self) -> u64 {
        self.matches
    }
}

/// Committer half: drain, aggregate, submit.
pub struct Committer<'a> {
    config: &'a LogTailConfig,
    buffer: &'a PendingBuffer,
    accumulator: Accumulator,
}

impl<'a> Committer<'a> {
    #[must_use]
    pub fn new(config: &'a LogTailConfig, buffer: &'a PendingBuffer) -> Self {
        Self {
            config,
            buffer,
            accumulator: Accumulator::new(config.policy, config.defaults.score),
        }
    }

    /// One outer attempt: resolve the set, then commit every interval. A final
    /// commit is made when shutdown interrupts the wait.
    pub fn run(&mut self, factory: &dyn ConnectorFactory, shutdown: &Shutdown) -> Result<()> {
        let set = factory.connect()?.reputation_set(&self.config.set_name)?;
        loop {
            if shutdown.sleep(self.config.commit_interval) {
                self.commit(set.as_ref())?;
                return Ok(());
            }
            self.commit(set.as_ref())?;
        }
    }

    /// Drain the buffer and submit its aggregation. Returns the number of
    /// entries submitted; an empty window submits nothing.
    pub fn commit(&mut self, set: &dyn ReputationSet) -> Result<usize> {
        let snapshot = self.buffer.drain();
        let drained = snapshot.len();
        self.accumulator.clear();
        self.accumulator.extend(snapshot);
        detail(
            self.config.debug,
            self.config.ordinal,
            format_args!(
                "Adding {} new reputations to {} from {drained} observations",
                self.accumulator.len(),
                self.config.set_name
            ),
        );
        if self.accumulator.is_empty() {
            return Ok(0);
        }
        let batch = self.accumulator.batch(&self.config.defaults);
        set.add_reputation(&batch)?;
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{Committer, LineOutcome, LogReader, LogTailConfig};
    use crate::core::config::ConfigSource;
    use crate::core::errors::IprepError;
    use crate::core::reputation::{IpV4, Observation, ReputationType};
    use crate::monitor::accumulator::{AggregationPolicy, PendingBuffer};
    use crate::monitor::follower::Charset;
    use crate::store::{Connector, ConnectorFactory};
    use crate::store::memory::MemoryStore;

    fn config(extra: &[(&str, &str)]) -> LogTailConfig {
        let mut pairs = vec![
            ("monitor.1.className", "log"),
            ("monitor.1.setName", "ssh"),
            ("monitor.1.path", "/var/log/secure"),
            ("monitor.1.pattern", r".*from (\S+)$"),
            ("monitor.1.group", "1"),
        ];
        pairs.extend_from_slice(extra);
        LogTailConfig::from_options(ConfigSource::from_pairs(pairs).monitor(1)).expect("valid config")
    }

    #[test]
    fn defaults_follow_the_documented_values() {
        let config = config(&[]);
        assert_eq!(config.poll_interval.as_millis(), 5000);
        assert_eq!(config.commit_interval.as_millis(), 30_000);
        assert_eq!(config.error_sleep.as_millis(), 30_000);
        assert_eq!(config.policy, AggregationPolicy::Sum);
        assert_eq!(config.defaults.score, 1);
        assert!(!config.debug);
    }

    #[test]
    fn charset_option_accepts_only_the_supported_encodings() {
        assert_eq!(config(&[("monitor.1.charset", "latin1")]).charset, Charset::Latin1);
        assert_eq!(config(&[("monitor.1.charset", "US-ASCII")]).charset, Charset::Ascii);
        assert_eq!(config(&[]).charset, Charset::Utf8);

        let source = ConfigSource::from_pairs([
            ("monitor.1.setName", "ssh"),
            ("monitor.1.path", "/var/log/secure"),
            ("monitor.1.pattern", ".*"),
            ("monitor.1.charset", "windows-1252"),
        ]);
        let err = LogTailConfig::from_options(source.monitor(1)).expect_err("unsupported charset");
        assert!(matches!(err, IprepError::InvalidOption { ref key, .. } if key == "monitor.1.charset"));
    }

    #[test]
    fn missing_required_options_name_the_key() {
        for missing in ["setName", "path", "pattern"] {
            let pairs: Vec<(String, &str)> = [
                ("setName", "ssh"),
                ("path", "/var/log/secure"),
                ("pattern", ".*"),
            ]
            .into_iter()
            .filter(|(option, _)| *option != missing)
            .map(|(option, value)| (format!("monitor.4.{option}"), value))
            .collect();
            let err = LogTailConfig::from_options(ConfigSource::from_pairs(pairs).monitor(4))
                .expect_err("option is required");
            assert!(
                matches!(err, IprepError::MissingOption { ref key } if *key == format!("monitor.4.{missing}")),
                "unexpected error {err}"
            );
        }
    }

    #[test]
    fn invalid_group_is_reported_against_group_key() {
        let pairs = [
            ("monitor.1.setName", "ssh"),
            ("monitor.1.path", "/var/log/secure"),
            ("monitor.1.pattern", r"from (\S+)"),
            ("monitor.1.group", "3"),
        ];
        let err = LogTailConfig::from_options(ConfigSource::from_pairs(pairs).monitor(1))
            .expect_err("group out of range");
        assert!(matches!(err, IprepError::InvalidOption { ref key, .. } if key == "monitor.1.group"));
    }

    #[test]
    fn reader_buffers_one_observation_per_matching_line() {
        let config = config(&[]);
        let buffer = PendingBuffer::new();
        let mut reader = LogReader::new(&config, &buffer);
        assert_eq!(reader.ingest("connect from 198.51.100.7"), LineOutcome::Buffered);
        assert_eq!(reader.ingest("disconnect by user"), LineOutcome::Ignored);
        assert_eq!(reader.ingest("connect from unknown"), LineOutcome::Rejected);
        assert_eq!(reader.ingest("connect from 198.51.100.8"), LineOutcome::Buffered);
        assert_eq!(buffer.len(), 2);
        assert_eq!(reader.match_count(), 3);
    }

    #[derive(Debug, Clone)]
    enum Line {
        Match(u32),
        Noise(String),
        BadHost(u16),
    }

    fn line_strategy() -> impl Strategy<Value = Line> {
        prop_oneof![
            any::<u32>().prop_map(Line::Match),
            "[a-z ]{0,30}".prop_map(Line::Noise),
            any::<u16>().prop_map(Line::BadHost),
        ]
    }

    fn render(line: &Line) -> String {
        match line {
            Line::Match(ip) => format!("sshd[4242]: connect from {}", IpV4(*ip)),
            Line::Noise(text) => text.clone(),
            Line::BadHost(n) => format!("sshd[4242]: connect from host-{n}.example"),
        }
    }

    proptest! {
        #[test]
        fn one_observation_per_line_with_an_address(
            lines in prop::collection::vec(line_strategy(), 0..60)
        ) {
            let config = config(&[]);
            let buffer = PendingBuffer::new();
            let mut reader = LogReader::new(&config, &buffer);
            for line in &lines {
                reader.ingest(&render(line));
            }
            let expected: Vec<Observation> = lines
                .iter()
                .filter_map(|line| match line {
                    Line::Match(ip) => Some(Observation { ip: IpV4(*ip) }),
                    Line::Noise(_) | Line::BadHost(_) => None,
                })
                .collect();
            prop_assert_eq!(buffer.drain(), expected);
        }
    }

    #[test]
    fn commit_sums_repeated_addresses() {
        let config = config(&[("monitor.1.reputationType", "bad")]);
        let buffer = PendingBuffer::new();
        let mut reader = LogReader::new(&config, &buffer);
        for _ in 0..3 {
            reader.ingest("connect from 198.51.100.7");
        }
        reader.ingest("connect from 203.0.113.9");

        let store = MemoryStore::new();
        let set = store.reputation_set("ssh").expect("set");
        let mut committer = Committer::new(&config, &buffer);
        assert_eq!(committer.commit(set.as_ref()).expect("commit"), 2);

        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        let entries = &batches[0].entries;
        assert_eq!(entries[0].ip, IpV4::parse("198.51.100.7").expect("ip"));
        assert_eq!(entries[0].score, 3);
        assert_eq!(entries[0].reputation, ReputationType::Bad);
        assert_eq!(entries[1].score, 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn coalesced_commit_scores_each_address_once() {
        let config = config(&[("monitor.1.coalesce", "true"), ("monitor.1.score", "5")]);
        let buffer = PendingBuffer::new();
        let mut reader = LogReader::new(&config, &buffer);
        for _ in 0..10 {
            reader.ingest("connect from 198.51.100.7");
        }
        let store = MemoryStore::new();
        let set = store.reputation_set("ssh").expect("set");
        Committer::new(&config, &buffer)
            .commit(set.as_ref())
            .expect("commit");
        assert_eq!(store.batches()[0].entries[0].score, 5);
    }

    #[test]
    fn empty_window_submits_nothing() {
        let config = config(&[]);
        let buffer = PendingBuffer::new();
        let store = MemoryStore::new();
        let set = store.reputation_set("ssh").expect("set");
        let mut committer = Committer::new(&config, &buffer);
        assert_eq!(committer.commit(set.as_ref()).expect("empty commit"), 0);
        assert!(store.batches().is_empty());
    }

    #[test]
    fn unknown_set_fails_the_attempt() {
        let config = config(&[]);
        let buffer = PendingBuffer::new();
        let store = MemoryStore::with_sets(["smtp"]);
        let shutdown = crate::daemon::supervisor::Shutdown::new();
        let err = Committer::new(&config, &buffer)
            .run(&store as &dyn ConnectorFactory, &shutdown)
            .expect_err("set does not resolve");
        assert!(matches!(err, IprepError::SetNotFound { .. }));
    }
}
