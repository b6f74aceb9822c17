//! Counting semaphore used to hand work between emulated ISRs and threads

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{DriverError, Result};

#[derive(Debug)]
struct SemaphoreState {
    count: usize,
    closed: bool,
}

/// Counting semaphore
///
/// `signal` never blocks. `wait` blocks until the count is positive and
/// decrements it. Closing the semaphore releases every waiter with
/// [`DriverError::Closed`].
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    ready: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `count` permits
    pub const fn new(count: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                count,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Add one permit and wake one waiter
    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.count += 1;
        self.ready.notify_one();
    }

    /// Take one permit, blocking until one is available
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] once the semaphore is closed.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(DriverError::Closed);
            }
            if state.count > 0 {
                state.count -= 1;
                return Ok(());
            }
            self.ready.wait(&mut state);
        }
    }

    /// Take one permit, giving up after `timeout`
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] once the semaphore is closed.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(DriverError::Closed);
            }
            if state.count > 0 {
                state.count -= 1;
                return Ok(true);
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return Ok(false);
            }
        }
    }

    /// Take one permit if available
    pub fn try_wait(&self) -> bool {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    /// Release all waiters; later waits fail
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Permits currently available
    pub fn available(&self) -> usize {
        self.state.lock().count
    }
}
