//! Timeline signals used to publish stream progress.
//!
//! A timeline signal is a monotonically increasing counter. A stream that executes its
//! operations in order sets the counter to the sequence number of every operation it
//! retires, so "operation `n` is done" is simply "value >= n".

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, TimeoutSnafu};

/// Monotonic counter that waiters can block on.
pub trait TimelineSignal: Send + Sync + std::fmt::Debug {
    fn value(&self) -> u64;

    /// Advance the signal. Values lower than the current one are ignored.
    fn set(&self, value: u64);

    /// Block until the signal reaches `target`; `None` waits forever.
    fn wait(&self, target: u64, timeout: Option<Duration>) -> Result<()>;

    fn is_reached(&self, target: u64) -> bool {
        self.value() >= target
    }
}

/// Timeline signal backed by an atomic and a parking_lot condvar.
#[derive(Debug, Default)]
pub struct CpuTimelineSignal {
    value: AtomicU64,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl CpuTimelineSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(initial: u64) -> Self {
        Self { value: AtomicU64::new(initial), ..Self::default() }
    }
}

impl TimelineSignal for CpuTimelineSignal {
    fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn set(&self, value: u64) {
        // Taking the lock orders the store against a waiter that is between its check and
        // its sleep.
        let _guard = self.mutex.lock();
        self.value.fetch_max(value, Ordering::AcqRel);
        self.condvar.notify_all();
    }

    fn wait(&self, target: u64, timeout: Option<Duration>) -> Result<()> {
        if self.is_reached(target) {
            return Ok(());
        }

        let mut guard = self.mutex.lock();
        match timeout {
            None => {
                while !self.is_reached(target) {
                    self.condvar.wait(&mut guard);
                }
                Ok(())
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !self.is_reached(target) {
                    if self.condvar.wait_until(&mut guard, deadline).timed_out() && !self.is_reached(target) {
                        return TimeoutSnafu { waited_ms: timeout.as_millis() as u64, target, current: self.value() }
                            .fail();
                    }
                }
                Ok(())
            }
        }
    }
}
