//! Flat key-value configuration: `monitor.<ordinal>.<option>` keys loaded from a
//! TOML file (tables flattened to dotted keys) or a properties file.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::core::errors::{IprepError, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "IPREPD_CONFIG";

/// Configuration file used when neither the CLI nor the environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/iprepd/iprepd.toml";

/// Prefix accepted (and stripped) for compatibility with older property files.
const LEGACY_PREFIX: &str = "ipreputation.";

/// Backoff applied between bootstrap passes and by workers without an override.
pub const DEFAULT_ERROR_SLEEP: Duration = Duration::from_secs(30);

/// Immutable flat key-value store, read once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSource {
    values: BTreeMap<String, String>,
}

impl ConfigSource {
    /// Build from explicit pairs. Legacy-prefixed keys are normalized.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(key, value)| (normalize_key(key.as_ref()), value.into()))
            .collect();
        Self { values }
    }

    /// Resolve the configuration path: explicit flag, then `IPREPD_CONFIG`, then the default.
    #[must_use]
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit.map_or_else(
            || {
                std::env::var_os(CONFIG_ENV)
                    .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
            },
            Path::to_path_buf,
        )
    }

    /// Load from disk. Files ending in `.properties` use the properties syntax,
    /// everything else is parsed as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(IprepError::MissingConfig {
                    path: path.to_path_buf(),
                });
            }
            Err(err) => return Err(IprepError::io(path, err)),
        };
        if path.extension().is_some_and(|ext| ext == "properties") {
            Ok(Self::parse_properties(&text))
        } else {
            Self::parse_toml(&text)
        }
    }

    /// Parse TOML, flattening nested tables into dotted keys.
    pub fn parse_toml(text: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(text)?;
        let mut values = BTreeMap::new();
        flatten_table("", &table, &mut values)?;
        Ok(Self::from_pairs(values))
    }

    /// Parse `key=value` / `key: value` lines; `#` and `!` start comments.
    #[must_use]
    pub fn parse_properties(text: &str) -> Self {
        let pairs = text.lines().filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                return None;
            }
            let split = line.find(['=', ':'])?;
            let (key, value) = line.split_at(split);
            Some((key.trim().to_string(), value[1..].trim().to_string()))
        });
        Self::from_pairs(pairs)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Ordinals 1..=N of the declared monitors. The first ordinal without a
    /// `className` ends the enumeration, so a gap truncates the list.
    #[must_use]
    pub fn monitor_ordinals(&self) -> Vec<usize> {
        (1..)
            .take_while(|ordinal| {
                self.values
                    .contains_key(&MonitorOptions::key_for(*ordinal, "className"))
            })
            .collect()
    }

    /// Option accessor scoped to one monitor ordinal.
    #[must_use]
    pub const fn monitor(&self, ordinal: usize) -> MonitorOptions<'_> {
        MonitorOptions {
            source: self,
            ordinal,
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.strip_prefix(LEGACY_PREFIX).unwrap_or(key).to_string()
}

fn flatten_table(
    prefix: &str,
    table: &toml::Table,
    out: &mut BTreeMap<String, String>,
) -> Result<()> {
    for (name, value) in table {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match value {
            toml::Value::Table(inner) => flatten_table(&key, inner, out)?,
            toml::Value::Array(items) => {
                let joined = items
                    .iter()
                    .map(|item| scalar_to_string(&key, item))
                    .collect::<Result<Vec<_>>>()?
                    .join(", ");
                out.insert(key, joined);
            }
            scalar => {
                let text = scalar_to_string(&key, scalar)?;
                out.insert(key, text);
            }
        }
    }
    Ok(())
}

fn scalar_to_string(key: &str, value: &toml::Value) -> Result<String> {
    match value {
        toml::Value::String(text) => Ok(text.clone()),
        toml::Value::Integer(n) => Ok(n.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(dt) => Ok(dt.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => Err(IprepError::ConfigParse {
            context: "toml",
            details: format!("{key}: nested arrays and tables inside arrays are not supported"),
        }),
    }
}

/// Typed getters for `monitor.<ordinal>.*`. Every error names the full key.
#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions<'a> {
    source: &'a ConfigSource,
    ordinal: usize,
}

impl<'a> MonitorOptions<'a> {
    #[must_use]
    pub fn key_for(ordinal: usize, option: &str) -> String {
        format!("monitor.{ordinal}.{option}")
    }

    #[must_use]
    pub fn key(&self, option: &str) -> String {
        Self::key_for(self.ordinal, option)
    }

    #[must_use]
    pub const fn ordinal(&self) -> usize {
        self.ordinal
    }

    #[must_use]
    pub fn get(&self, option: &str) -> Option<&'a str> {
        self.source.get(&self.key(option))
    }

    /// A required, non-blank option.
    pub fn required(&self, option: &str) -> Result<&'a str> {
        self.get(option)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| IprepError::MissingOption {
                key: self.key(option),
            })
    }

    /// Parse an optional value with `FromStr`, falling back to `default`.
    pub fn parse_or<T>(&self, option: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(option) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|err: T::Err| IprepError::invalid(self.key(option), err.to_string())),
        }
    }

    /// `true`/`false`, case-insensitive.
    pub fn bool_or(&self, option: &str, default: bool) -> Result<bool> {
        match self.get(option).map(str::trim) {
            None => Ok(default),
            Some(raw) if raw.eq_ignore_ascii_case("true") => Ok(true),
            Some(raw) if raw.eq_ignore_ascii_case("false") => Ok(false),
            Some(raw) => Err(IprepError::invalid(
                self.key(option),
                format!("expected true or false, got {raw}"),
            )),
        }
    }

    /// A millisecond interval. Zero is rejected: every interval is a sleep.
    pub fn millis_or(&self, option: &str, default_ms: u64) -> Result<Duration> {
        let ms: u64 = self.parse_or(option, default_ms)?;
        if ms == 0 {
            return Err(IprepError::invalid(self.key(option), "must be positive"));
        }
        Ok(Duration::from_millis(ms))
    }
}

/// Which store implementation the daemon connects through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreKind {
    /// Append batches as JSON lines to a file or stdout.
    #[default]
    Spool,
}

/// Daemon-wide settings that live outside the `monitor.*` namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSettings {
    pub store_kind: StoreKind,
    /// Spool destination; `None` writes to stdout.
    pub store_path: Option<PathBuf>,
    /// Restrict which set names resolve; `None` accepts every name.
    pub store_sets: Option<Vec<String>>,
    pub error_sleep: Duration,
}

impl DaemonSettings {
    pub fn from_source(source: &ConfigSource) -> Result<Self> {
        let store_kind = match source.get("store.kind").map(str::trim) {
            None | Some("spool") => StoreKind::Spool,
            Some(other) => {
                return Err(IprepError::invalid(
                    "store.kind",
                    format!("unknown store kind {other}"),
                ));
            }
        };
        let store_path = source
            .get("store.path")
            .map(str::trim)
            .filter(|path| !path.is_empty() && *path != "-")
            .map(PathBuf::from);
        let store_sets = source.get("store.sets").map(split_list);
        let error_sleep = match source.get("daemon.errorSleep") {
            None => DEFAULT_ERROR_SLEEP,
            Some(raw) => {
                let ms: u64 = raw.trim().parse().map_err(|err: std::num::ParseIntError| {
                    IprepError::invalid("daemon.errorSleep", err.to_string())
                })?;
                Duration::from_millis(ms)
            }
        };
        Ok(Self {
            store_kind,
            store_path,
            store_sets,
            error_sleep,
        })
    }
}

/// Split a comma and/or whitespace separated list, dropping empty items.
#[must_use]
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ConfigSource, DaemonSettings, split_list};
    use crate::core::errors::IprepError;

    const SAMPLE: &str = r#"
[store]
path = "/var/spool/iprepd/batches.jsonl"

[monitor.1]
className = "netstat"
setName = "aoserv-daemon"
localPorts = [4582, 443]

[monitor.2]
className = "log"
setName = "ssh"
path = "/var/log/secure"
pattern = '.*from (\S+)$'
group = 1
coalesce = true

[monitor.4]
className = "log"
"#;

    #[test]
    fn toml_tables_flatten_to_dotted_keys() {
        let source = ConfigSource::parse_toml(SAMPLE).expect("valid toml");
        assert_eq!(source.get("monitor.1.setName"), Some("aoserv-daemon"));
        assert_eq!(source.get("monitor.1.localPorts"), Some("4582, 443"));
        assert_eq!(source.get("monitor.2.group"), Some("1"));
        assert_eq!(source.get("monitor.2.coalesce"), Some("true"));
    }

    #[test]
    fn gap_in_ordinals_truncates_enumeration() {
        let source = ConfigSource::parse_toml(SAMPLE).expect("valid toml");
        assert_eq!(source.monitor_ordinals(), vec![1, 2]);
    }

    #[test]
    fn properties_with_legacy_prefix_are_normalized() {
        let source = ConfigSource::parse_properties(
            "# comment\n! other comment\nipreputation.monitor.1.className=log\nmonitor.1.setName : ssh\n\n",
        );
        assert_eq!(source.get("monitor.1.className"), Some("log"));
        assert_eq!(source.get("monitor.1.setName"), Some("ssh"));
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn required_option_error_names_the_key() {
        let source = ConfigSource::from_pairs([("monitor.3.setName", "  ")]);
        let err = source.monitor(3).required("setName").unwrap_err();
        assert!(matches!(err, IprepError::MissingOption { ref key } if key == "monitor.3.setName"));
    }

    #[test]
    fn typed_getters_apply_defaults_and_reject_garbage() {
        let source = ConfigSource::from_pairs([
            ("monitor.1.debug", "TRUE"),
            ("monitor.1.pollInterval", "250"),
            ("monitor.1.score", "many"),
            ("monitor.1.commitInterval", "0"),
        ]);
        let options = source.monitor(1);
        assert!(options.bool_or("debug", false).expect("valid bool"));
        assert!(!options.bool_or("coalesce", false).expect("default"));
        assert_eq!(
            options.millis_or("pollInterval", 5000).expect("valid"),
            Duration::from_millis(250)
        );
        assert_eq!(
            options.millis_or("errorSleep", 30_000).expect("default"),
            Duration::from_secs(30)
        );
        assert!(options.parse_or::<i16>("score", 1).is_err());
        assert!(options.millis_or("commitInterval", 30_000).is_err());
    }

    #[test]
    fn daemon_settings_defaults_to_stdout_spool() {
        let settings = DaemonSettings::from_source(&ConfigSource::default()).expect("defaults");
        assert_eq!(settings.store_path, None);
        assert_eq!(settings.store_sets, None);
        assert_eq!(settings.error_sleep, Duration::from_secs(30));

        let bad = ConfigSource::from_pairs([("store.kind", "grpc")]);
        assert!(DaemonSettings::from_source(&bad).is_err());
    }

    #[test]
    fn list_splitting_accepts_commas_and_spaces() {
        assert_eq!(split_list("22, 80 443,,8080"), vec!["22", "80", "443", "8080"]);
        assert!(split_list(" , ").is_empty());
    }
}
