//! Boundary to the remote reputation store: connectors resolve named sets, sets
//! accept batches. Local implementations: JSONL spool and in-memory recorder.

use std::sync::Arc;

use crate::core::errors::Result;
use crate::core::reputation::AddReputation;

pub mod memory;
pub mod spool;

/// A named remote collection that accepts scored entries.
pub trait ReputationSet: Send + Sync {
    /// Name the set was resolved under.
    fn name(&self) -> &str;

    /// Submit one batch. Entry order is preserved on the wire.
    fn add_reputation(&self, batch: &[AddReputation]) -> Result<()>;
}

/// An established connection to the store.
pub trait Connector: Send + Sync {
    /// Resolve a set by name; `IprepError::SetNotFound` when it does not exist.
    fn reputation_set(&self, name: &str) -> Result<Arc<dyn ReputationSet>>;
}

/// Produces connections. Called again after every failure instead of caching a
/// connection across error boundaries.
pub trait ConnectorFactory: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn Connector>>;
}
