//! IPR-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, IprepError>;

/// Top-level error type for the IP reputation daemon.
#[derive(Debug, Error)]
pub enum IprepError {
    #[error("[IPR-1001] {key} required")]
    MissingOption { key: String },

    #[error("[IPR-1002] invalid value for {key}: {details}")]
    InvalidOption { key: String, details: String },

    #[error("[IPR-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[IPR-1004] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[IPR-1005] no monitors defined")]
    NoMonitors,

    #[error("[IPR-1006] unknown monitor kind for {key}: {class_name}")]
    UnknownMonitorKind { key: String, class_name: String },

    #[error("[IPR-1007] {failed} of {total} monitors are misconfigured, first: monitor.{first}")]
    MisconfiguredMonitors {
        failed: usize,
        total: usize,
        first: usize,
    },

    #[error("[IPR-2002] invalid IPv4 address: {value}")]
    InvalidAddress { value: String },

    #[error("[IPR-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[IPR-3001] IP reputation set not found: {name}")]
    SetNotFound { name: String },

    #[error("[IPR-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[IPR-3003] command {command} failed: {details}")]
    Command { command: String, details: String },

    #[error("[IPR-3004] reputation store failure: {details}")]
    Store { details: String },

    #[error("[IPR-3006] failed to spawn worker {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[IPR-3999] unrecoverable fault: {details}")]
    Fatal { details: String },
}

impl IprepError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingOption { .. } => "IPR-1001",
            Self::InvalidOption { .. } => "IPR-1002",
            Self::ConfigParse { .. } => "IPR-1003",
            Self::MissingConfig { .. } => "IPR-1004",
            Self::NoMonitors => "IPR-1005",
            Self::UnknownMonitorKind { .. } => "IPR-1006",
            Self::MisconfiguredMonitors { .. } => "IPR-1007",
            Self::InvalidAddress { .. } => "IPR-2002",
            Self::Serialization { .. } => "IPR-2101",
            Self::SetNotFound { .. } => "IPR-3001",
            Self::Io { .. } => "IPR-3002",
            Self::Command { .. } => "IPR-3003",
            Self::Store { .. } => "IPR-3004",
            Self::Spawn { .. } => "IPR-3006",
            Self::Fatal { .. } => "IPR-3999",
        }
    }

    /// Whether a supervised loop may absorb this failure and try again.
    ///
    /// Configuration errors are excluded: they are caught at construction time,
    /// never inside a running worker. `Fatal` is the explicit escalation path.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Command { .. }
                | Self::Store { .. }
                | Self::SetNotFound { .. }
                | Self::Spawn { .. }
                | Self::InvalidAddress { .. }
                | Self::Serialization { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for an invalid option value.
    #[must_use]
    pub fn invalid(key: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.into(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for IprepError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for IprepError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
