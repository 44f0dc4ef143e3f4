//! Shared helpers for the integration suites.

#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use ip_reputation_daemon::core::reputation::IpV4;
use ip_reputation_daemon::store::memory::{MemoryStore, RecordedBatch};

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Sum of every score recorded for `ip` in `set`, across all batches.
pub fn total_score(store: &MemoryStore, set: &str, ip: &str) -> i64 {
    let ip = IpV4::parse(ip).expect("test address");
    store
        .batches()
        .iter()
        .filter(|batch| batch.set == set)
        .flat_map(|batch| batch.entries.iter())
        .filter(|entry| entry.ip == ip)
        .map(|entry| i64::from(entry.score))
        .sum()
}

pub fn batches_for(store: &MemoryStore, set: &str) -> Vec<RecordedBatch> {
    store
        .batches()
        .into_iter()
        .filter(|batch| batch.set == set)
        .collect()
}
