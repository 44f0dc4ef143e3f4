//! Reputation vocabulary shared by monitors and stores: addresses, confidence,
//! polarity and the batch entries submitted to a reputation set.

#![allow(missing_docs)]

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{IprepError, Result};

/// Highest score a single entry can carry.
pub const MAX_SCORE: i16 = i16::MAX;

/// How sure the reporter is about an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceType {
    #[default]
    Uncertain,
    Definite,
}

/// Whether an entry counts for or against an address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReputationType {
    #[default]
    Good,
    Bad,
}

impl ConfidenceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uncertain => "UNCERTAIN",
            Self::Definite => "DEFINITE",
        }
    }
}

impl ReputationType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Good => "GOOD",
            Self::Bad => "BAD",
        }
    }
}

impl FromStr for ConfidenceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNCERTAIN" => Ok(Self::Uncertain),
            "DEFINITE" => Ok(Self::Definite),
            other => Err(format!("expected UNCERTAIN or DEFINITE, got {other}")),
        }
    }
}

impl FromStr for ReputationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GOOD" => Ok(Self::Good),
            "BAD" => Ok(Self::Bad),
            other => Err(format!("expected GOOD or BAD, got {other}")),
        }
    }
}

impl fmt::Display for ConfidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ReputationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An IPv4 address in its 32-bit integer form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpV4(pub u32);

impl IpV4 {
    /// Parse a dotted-quad address. Surrounding whitespace is not accepted.
    pub fn parse(value: &str) -> Result<Self> {
        Ipv4Addr::from_str(value)
            .map(|addr| Self(u32::from(addr)))
            .map_err(|_| IprepError::InvalidAddress {
                value: value.to_string(),
            })
    }

    #[must_use]
    pub fn to_addr(self) -> Ipv4Addr {
        Ipv4Addr::from(self.0)
    }
}

impl fmt::Display for IpV4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_addr().fmt(f)
    }
}

impl Serialize for IpV4 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One extracted address, observed "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub ip: IpV4,
}

/// A single entry of a reputation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddReputation {
    pub ip: IpV4,
    pub confidence: ConfidenceType,
    pub reputation: ReputationType,
    pub score: i16,
}

/// Per-monitor defaults stamped onto every entry it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreDefaults {
    pub score: i16,
    pub confidence: ConfidenceType,
    pub reputation: ReputationType,
}

impl ScoreDefaults {
    #[must_use]
    pub const fn entry(&self, ip: IpV4, score: i16) -> AddReputation {
        AddReputation {
            ip,
            confidence: self.confidence,
            reputation: self.reputation,
            score,
        }
    }
}

impl Default for ScoreDefaults {
    fn default() -> Self {
        Self {
            score: 1,
            confidence: ConfidenceType::Uncertain,
            reputation: ReputationType::Good,
        }
    }
}
