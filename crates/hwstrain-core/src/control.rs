//! Run control — the keep-running predicate shared by every worker.
//!
//! A run stops when any of these becomes true: the global stop flag was
//! cleared (SIGINT/SIGTERM, or an engine aborting on failure), the bogo-op
//! budget was reached, or the wall-clock deadline passed.  Workers poll
//! [`RunControl::keep_running`] between bursts, never inside one.
//!
//! Creating workers (threads, guarded burst processes) can fail
//! transiently under load; [`RunControl::retry_create`] retries those
//! failures a bounded number of times while the run is still live.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Attempts made to create a worker before giving up.
pub const MAX_CREATE_ATTEMPTS: u32 = 16;

/// Whether a creation failure is worth retrying (EAGAIN, ENOMEM, EINTR).
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EAGAIN | libc::ENOMEM | libc::EINTR)
    ) || matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::OutOfMemory
    )
}

/// Shared stop flag, op counter and limits.
#[derive(Debug)]
pub struct RunControl {
    running: Arc<AtomicBool>,
    counter: AtomicU64,
    /// Stop once this many bogo-ops were counted (0 = unlimited).
    max_ops: u64,
    deadline: Option<Instant>,
}

impl RunControl {
    /// New control with an op budget (0 = unlimited) and no deadline.
    pub fn new(max_ops: u64) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            counter: AtomicU64::new(0),
            max_ops,
            deadline: None,
        }
    }

    /// Stop once `timeout` has elapsed from now.
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Share an externally owned stop flag (e.g. one a signal handler clears).
    pub fn with_stop_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// The stop flag, for wiring into a signal handler.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Whether workers should start another burst.
    pub fn keep_running(&self) -> bool {
        if !self.running.load(Ordering::Relaxed) {
            return false;
        }
        if self.max_ops != 0 && self.counter.load(Ordering::Relaxed) >= self.max_ops {
            return false;
        }
        match self.deadline {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }

    /// Count one completed burst.
    pub fn inc_counter(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Bogo-ops counted so far.
    pub fn bogo_ops(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Ask every worker to stop after its current burst.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Op budget (0 = unlimited).
    pub fn max_ops(&self) -> u64 {
        self.max_ops
    }

    /// Run `create` until it succeeds, retrying transient failures.
    ///
    /// Returns `Ok(None)` when the run was stopped while creation was
    /// failing: the caller should finish without doing any work.
    pub fn retry_create<T>(&self, mut create: impl FnMut() -> io::Result<T>) -> io::Result<Option<T>> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match create() {
                Ok(created) => return Ok(Some(created)),
                Err(_) if !self.keep_running() => return Ok(None),
                Err(e) if attempts < MAX_CREATE_ATTEMPTS && is_transient(&e) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new(0)
    }
}
