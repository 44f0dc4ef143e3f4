//! Line extraction: a full-line regex match whose designated capture group must
//! hold an IPv4 address.

use regex::Regex;
use thiserror::Error;

use crate::core::reputation::{IpV4, Observation};

/// Why a pattern/group pair cannot be used.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("group {requested} requested but pattern has {available} group(s)")]
    Group { requested: usize, available: usize },
}

/// Result of running one line through a [`LineExtractor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction<'a> {
    /// The line does not match the whole pattern.
    NoMatch,
    /// The line matched and the group parsed as an address.
    Observed {
        observation: Observation,
        matched: &'a str,
    },
    /// The line matched but the group was absent or not an address.
    Unparsable { matched: &'a str, error: String },
}

/// Compiled pattern plus the capture group holding the address.
#[derive(Debug, Clone)]
pub struct LineExtractor {
    pattern: Regex,
    source: String,
    group: usize,
}

impl LineExtractor {
    /// Compile `pattern` so that it must match an entire line.
    pub fn new(pattern: &str, group: usize) -> Result<Self, ExtractorError> {
        let compiled = Regex::new(&format!("^(?:{pattern})$"))?;
        // Slot 0 is the implicit whole-match group.
        let available = compiled.captures_len() - 1;
        if group > available {
            return Err(ExtractorError::Group {
                requested: group,
                available,
            });
        }
        Ok(Self {
            pattern: compiled,
            source: pattern.to_string(),
            group,
        })
    }

    /// The pattern as configured, before anchoring.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub const fn group(&self) -> usize {
        self.group
    }

    #[must_use]
    pub fn extract<'a>(&self, line: &'a str) -> Extraction<'a> {
        let Some(captures) = self.pattern.captures(line) else {
            return Extraction::NoMatch;
        };
        let Some(matched) = captures.get(self.group).map(|m| m.as_str()) else {
            return Extraction::Unparsable {
                matched: "",
                error: format!("group {} did not participate in the match", self.group),
            };
        };
        match IpV4::parse(matched) {
            Ok(ip) => Extraction::Observed {
                observation: Observation { ip },
                matched,
            },
            Err(err) => Extraction::Unparsable {
                matched,
                error: err.to_string(),
            },
        }
    }
}
