//! Log tail monitor end to end: a real file, the reader and committer threads,
//! and an in-memory store.

mod common;

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use common::{batches_for, total_score, wait_until};
use ip_reputation_daemon::core::config::ConfigSource;
use ip_reputation_daemon::core::reputation::ReputationType;
use ip_reputation_daemon::daemon::supervisor::WorkerRuntime;
use ip_reputation_daemon::monitor::build_monitor;
use ip_reputation_daemon::store::ConnectorFactory;
use ip_reputation_daemon::store::memory::MemoryStore;

const WAIT: Duration = Duration::from_secs(10);

fn source_for(path: &std::path::Path, extra: &[(&str, &str)]) -> ConfigSource {
    let path = path.to_string_lossy().into_owned();
    let mut pairs: Vec<(String, String)> = vec![
        ("monitor.1.className".into(), "log".into()),
        ("monitor.1.setName".into(), "ssh".into()),
        ("monitor.1.path".into(), path),
        ("monitor.1.pattern".into(), r".*connect from (\S+)".into()),
        ("monitor.1.group".into(), "1".into()),
        ("monitor.1.pollInterval".into(), "20".into()),
        ("monitor.1.commitInterval".into(), "50".into()),
        ("monitor.1.errorSleep".into(), "20".into()),
    ];
    pairs.extend(extra.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())));
    ConfigSource::from_pairs(pairs)
}

fn append(path: &std::path::Path, text: &str) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .expect("open log for append");
    file.write_all(text.as_bytes()).expect("append");
}

#[test]
fn matching_lines_are_summed_per_address() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("secure");
    std::fs::write(
        &log,
        "sshd: connect from 198.51.100.7\n\
         sshd: session opened\n\
         sshd: connect from 198.51.100.7\n\
         sshd: connect from 198.51.100.7\n",
    )
    .expect("seed log");

    let store = MemoryStore::new();
    let factory: Arc<dyn ConnectorFactory> = Arc::new(store.clone());
    let (runtime, faults) = WorkerRuntime::new();
    let monitor = build_monitor(factory, &source_for(&log, &[]), 1).expect("monitor");
    monitor.start(&runtime).expect("start");
    assert_eq!(runtime.worker_count(), 2);

    assert!(
        wait_until(WAIT, || total_score(&store, "ssh", "198.51.100.7") == 3),
        "expected score 3, batches: {:?}",
        store.batches()
    );

    append(&log, "sshd: connect from 198.51.100.7\nsshd: connect from 203.0.113.9\n");
    assert!(
        wait_until(WAIT, || {
            total_score(&store, "ssh", "198.51.100.7") == 4
                && total_score(&store, "ssh", "203.0.113.9") == 1
        }),
        "appended lines not committed, batches: {:?}",
        store.batches()
    );

    runtime.shutdown().trigger();
    runtime.join_all();
    assert!(faults.try_recv().is_err());
    assert!(
        batches_for(&store, "ssh")
            .iter()
            .all(|batch| !batch.entries.is_empty())
    );
}

#[test]
fn configured_score_and_type_are_stamped_on_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("auth.log");
    std::fs::write(&log, "connect from 192.0.2.10\n").expect("seed log");

    let store = MemoryStore::new();
    let factory: Arc<dyn ConnectorFactory> = Arc::new(store.clone());
    let (runtime, _faults) = WorkerRuntime::new();
    let source = source_for(
        &log,
        &[
            ("monitor.1.score", "7"),
            ("monitor.1.reputationType", "bad"),
        ],
    );
    build_monitor(factory, &source, 1)
        .expect("monitor")
        .start(&runtime)
        .expect("start");

    assert!(wait_until(WAIT, || !store.batches().is_empty()));
    runtime.shutdown().trigger();
    runtime.join_all();

    let entry = store.batches()[0].entries[0];
    assert_eq!(entry.ip.to_string(), "192.0.2.10");
    assert_eq!(entry.score, 7);
    assert_eq!(entry.reputation, ReputationType::Bad);
}

#[test]
fn store_outages_are_retried_by_the_committer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("secure");
    std::fs::write(&log, "connect from 198.51.100.8\n").expect("seed log");

    let store = MemoryStore::new();
    store.fail_next_connects(2);
    let factory: Arc<dyn ConnectorFactory> = Arc::new(store.clone());
    let (runtime, faults) = WorkerRuntime::new();
    build_monitor(factory, &source_for(&log, &[]), 1)
        .expect("monitor")
        .start(&runtime)
        .expect("start");

    assert!(
        wait_until(WAIT, || total_score(&store, "ssh", "198.51.100.8") == 1),
        "committer never recovered"
    );
    assert!(store.connect_count() >= 3);

    runtime.shutdown().trigger();
    runtime.join_all();
    assert!(faults.try_recv().is_err());
}

#[test]
fn a_missing_file_is_retried_until_it_appears() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("late.log");

    let store = MemoryStore::new();
    let factory: Arc<dyn ConnectorFactory> = Arc::new(store.clone());
    let (runtime, faults) = WorkerRuntime::new();
    build_monitor(factory, &source_for(&log, &[]), 1)
        .expect("monitor")
        .start(&runtime)
        .expect("start");

    std::thread::sleep(Duration::from_millis(100));
    std::fs::write(&log, "connect from 203.0.113.50\n").expect("create log");

    assert!(
        wait_until(WAIT, || total_score(&store, "ssh", "203.0.113.50") == 1),
        "reader never picked up the file"
    );
    runtime.shutdown().trigger();
    runtime.join_all();
    assert!(faults.try_recv().is_err());
}

#[test]
fn shutdown_stops_both_workers_promptly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("secure");
    std::fs::write(&log, "").expect("seed log");

    let store = MemoryStore::new();
    let factory: Arc<dyn ConnectorFactory> = Arc::new(store.clone());
    let (runtime, _faults) = WorkerRuntime::new();
    let source = source_for(
        &log,
        &[
            ("monitor.1.pollInterval", "60000"),
            ("monitor.1.commitInterval", "60000"),
        ],
    );
    build_monitor(factory, &source, 1)
        .expect("monitor")
        .start(&runtime)
        .expect("start");

    std::thread::sleep(Duration::from_millis(50));
    let started = std::time::Instant::now();
    runtime.shutdown().trigger();
    runtime.join_all();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(store.batches().is_empty());
}
