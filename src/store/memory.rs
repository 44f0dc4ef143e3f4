//! In-memory store that records every submitted batch. Backs the test suites and
//! lets failures be injected at the connect and submit seams.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Connector, ConnectorFactory, ReputationSet};
use crate::core::errors::{IprepError, Result};
use crate::core::reputation::AddReputation;

/// One batch as received by a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBatch {
    pub set: String,
    pub entries: Vec<AddReputation>,
}

#[derive(Debug, Default)]
struct MemoryState {
    known_sets: Option<HashSet<String>>,
    batches: Vec<RecordedBatch>,
    connects: usize,
    failing_connects: usize,
    failing_submits: usize,
}

/// Cloneable handle; clones share one recording.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// A store where every set name resolves.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store where only the listed set names resolve.
    #[must_use]
    pub fn with_sets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        store.state.lock().known_sets = Some(names.into_iter().map(Into::into).collect());
        store
    }

    /// Make a set name resolvable after construction.
    pub fn add_set(&self, name: &str) {
        if let Some(sets) = self.state.lock().known_sets.as_mut() {
            sets.insert(name.to_string());
        }
    }

    /// The next `count` calls to `connect` fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().failing_connects = count;
    }

    /// The next `count` batch submissions fail.
    pub fn fail_next_submits(&self, count: usize) {
        self.state.lock().failing_submits = count;
    }

    #[must_use]
    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.state.lock().batches.clone()
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }
}

impl ConnectorFactory for MemoryStore {
    fn connect(&self) -> Result<Arc<dyn Connector>> {
        let mut state = self.state.lock();
        state.connects += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(IprepError::Store {
                details: "injected connect failure".to_string(),
            });
        }
        drop(state);
        Ok(Arc::new(self.clone()))
    }
}

impl Connector for MemoryStore {
    fn reputation_set(&self, name: &str) -> Result<Arc<dyn ReputationSet>> {
        let state = self.state.lock();
        if state
            .known_sets
            .as_ref()
            .is_some_and(|sets| !sets.contains(name))
        {
            return Err(IprepError::SetNotFound {
                name: name.to_string(),
            });
        }
        drop(state);
        Ok(Arc::new(MemorySet {
            name: name.to_string(),
            store: self.clone(),
        }))
    }
}

struct MemorySet {
    name: String,
    store: MemoryStore,
}

impl ReputationSet for MemorySet {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_reputation(&self, batch: &[AddReputation]) -> Result<()> {
        let mut state = self.store.state.lock();
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(IprepError::Store {
                details: format!("injected submit failure for {}", self.name),
            });
        }
        state.batches.push(RecordedBatch {
            set: self.name.clone(),
            entries: batch.to_vec(),
        });
        Ok(())
    }
}
