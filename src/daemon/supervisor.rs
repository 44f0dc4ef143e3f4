//! Supervised worker loops: cooperative shutdown, retry-with-backoff around a
//! fallible unit of work, and escalation of unrecoverable faults to the daemon.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{error, warn};

use crate::core::errors::{IprepError, Result};

#[derive(Debug, Default)]
struct ShutdownInner {
    requested: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Process-wide cooperative stop flag. Timed waits taken through [`Shutdown::sleep`]
/// return early once it is triggered.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Wait for `duration`. Returns `true` if shutdown was requested before or
    /// during the wait.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock();
        while !self.is_triggered() {
            if self.inner.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_triggered()
    }
}

/// Run `attempt` until shutdown, absorbing retryable failures.
///
/// `attempt` is the outer acquisition step plus its inner steady-state loop; it
/// returns `Ok(())` when it observed shutdown (or its input ended and should be
/// reacquired). A retryable error is logged and followed by `backoff` before the
/// next attempt. Any other error is returned to the caller unabsorbed.
pub fn supervise<F>(worker: &str, backoff: Duration, shutdown: &Shutdown, mut attempt: F) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    loop {
        if shutdown.is_triggered() {
            return Ok(());
        }
        match attempt() {
            Ok(()) => {}
            Err(err) if err.is_retryable() => {
                warn!(
                    worker,
                    code = err.code(),
                    error = %err,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "worker failed; retrying after backoff"
                );
                if shutdown.sleep(backoff) {
                    return Ok(());
                }
            }
            Err(err) => {
                error!(worker, code = err.code(), error = %err, "unrecoverable worker failure");
                return Err(err);
            }
        }
    }
}

/// An unrecoverable failure reported by a worker thread.
#[derive(Debug)]
pub struct WorkerFault {
    pub worker: String,
    pub error: IprepError,
}

/// Shared context handed to monitors when they start: the shutdown flag, the
/// fault channel and the join handles of every spawned worker.
#[derive(Debug, Clone)]
pub struct WorkerRuntime {
    shutdown: Shutdown,
    faults: Sender<WorkerFault>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WorkerRuntime {
    #[must_use]
    pub fn new() -> (Self, Receiver<WorkerFault>) {
        Self::with_shutdown(Shutdown::new())
    }

    #[must_use]
    pub fn with_shutdown(shutdown: Shutdown) -> (Self, Receiver<WorkerFault>) {
        let (faults, receiver) = crossbeam_channel::unbounded();
        let runtime = Self {
            shutdown,
            faults,
            handles: Arc::new(Mutex::new(Vec::new())),
        };
        (runtime, receiver)
    }

    #[must_use]
    pub const fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Spawn a named OS thread running `work`. An `Err` returned by `work` is
    /// forwarded to the fault channel.
    pub fn spawn<F>(&self, name: String, work: F) -> Result<()>
    where
        F: FnOnce(&Shutdown) -> Result<()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let faults = self.faults.clone();
        let worker = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if let Err(error) = work(&shutdown) {
                    // The receiver only disappears when the daemon is already exiting.
                    let _ = faults.send(WorkerFault { worker, error });
                }
            })
            .map_err(|source| IprepError::Spawn { name, source })?;
        self.handles.lock().push(handle);
        Ok(())
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Join every spawned worker. Call after triggering shutdown.
    pub fn join_all(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if handle.join().is_err() {
                error!(worker = %name, "worker panicked");
            }
        }
    }
}
