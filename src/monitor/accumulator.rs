//! Pending observation buffer (one producer, one consumer) and the per-address
//! score accumulator the committer rebuilds every cycle.
//!
//! The buffer is unbounded: if the committer cannot submit for a long time the
//! reader keeps appending, so memory grows with the unreported log volume.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use parking_lot::Mutex;

use crate::core::reputation::{AddReputation, IpV4, Observation, ScoreDefaults};

/// Observations handed from the reader to the committer.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    entries: Mutex<Vec<Observation>>,
}

impl PendingBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, observation: Observation) {
        self.entries.lock().push(observation);
    }

    /// Take everything appended so far, leaving the buffer empty. Append order
    /// is preserved in the returned snapshot.
    #[must_use]
    pub fn drain(&self) -> Vec<Observation> {
        std::mem::take(&mut *self.entries.lock())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// How repeated observations of one address combine within a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPolicy {
    /// Add the score once per observation, saturating at the maximum score.
    Sum,
    /// Each address contributes the score once, however often it was seen.
    Coalesce,
}

impl AggregationPolicy {
    #[must_use]
    pub const fn from_coalesce(coalesce: bool) -> Self {
        if coalesce { Self::Coalesce } else { Self::Sum }
    }
}

/// Address → score map that remembers first-seen order.
#[derive(Debug, Clone)]
pub struct Accumulator {
    policy: AggregationPolicy,
    score: i16,
    order: Vec<IpV4>,
    scores: HashMap<IpV4, i16>,
}

impl Accumulator {
    #[must_use]
    pub fn new(policy: AggregationPolicy, score: i16) -> Self {
        Self {
            policy,
            score,
            order: Vec::new(),
            scores: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.scores.clear();
    }

    pub fn observe(&mut self, ip: IpV4) {
        match self.scores.entry(ip) {
            Entry::Vacant(slot) => {
                slot.insert(self.score);
                self.order.push(ip);
            }
            Entry::Occupied(mut slot) => {
                if self.policy == AggregationPolicy::Sum {
                    let current = *slot.get();
                    slot.insert(current.saturating_add(self.score));
                }
            }
        }
    }

    pub fn extend<I>(&mut self, observations: I)
    where
        I: IntoIterator<Item = Observation>,
    {
        for observation in observations {
            self.observe(observation.ip);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn score_of(&self, ip: IpV4) -> Option<i16> {
        self.scores.get(&ip).copied()
    }

    /// Addresses in first-seen order.
    pub fn addresses(&self) -> impl Iterator<Item = IpV4> + '_ {
        self.order.iter().copied()
    }

    /// One entry per address, in first-seen order.
    #[must_use]
    pub fn batch(&self, defaults: &ScoreDefaults) -> Vec<AddReputation> {
        self.order
            .iter()
            .map(|ip| defaults.entry(*ip, self.scores[ip]))
            .collect()
    }
}
