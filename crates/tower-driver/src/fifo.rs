//! Bounded byte FIFO shared between the UART line side and the firmware side
//!
//! Mirrors the firmware ring buffer: `put` blocks while the buffer is full,
//! `get` blocks while it is empty, and every access is serialised.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{DriverError, Result};

/// Capacity of each UART FIFO in bytes.
pub const FIFO_SIZE: usize = 256;

#[derive(Debug)]
struct Ring {
    bytes: VecDeque<u8>,
    closed: bool,
}

/// Thread-safe bounded byte FIFO
#[derive(Debug)]
pub struct Fifo {
    ring: Mutex<Ring>,
    capacity: usize,
    used: Condvar,
    free: Condvar,
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new()
    }
}

impl Fifo {
    /// Create a FIFO of [`FIFO_SIZE`] bytes
    pub fn new() -> Self {
        Self::with_capacity(FIFO_SIZE)
    }

    /// Create a FIFO holding at most `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                bytes: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            used: Condvar::new(),
            free: Condvar::new(),
        }
    }

    /// Append a byte, blocking while the FIFO is full
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] if the FIFO is closed.
    pub fn put(&self, byte: u8) -> Result<()> {
        let mut ring = self.ring.lock();
        loop {
            if ring.closed {
                return Err(DriverError::Closed);
            }
            if ring.bytes.len() < self.capacity {
                ring.bytes.push_back(byte);
                self.used.notify_one();
                return Ok(());
            }
            self.free.wait(&mut ring);
        }
    }

    /// Append a byte if there is room
    pub fn try_put(&self, byte: u8) -> bool {
        let mut ring = self.ring.lock();
        if ring.closed || ring.bytes.len() >= self.capacity {
            return false;
        }
        ring.bytes.push_back(byte);
        self.used.notify_one();
        true
    }

    /// Remove the oldest byte, blocking while the FIFO is empty
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] once the FIFO is closed and drained.
    pub fn get(&self) -> Result<u8> {
        let mut ring = self.ring.lock();
        loop {
            if let Some(byte) = ring.bytes.pop_front() {
                self.free.notify_one();
                return Ok(byte);
            }
            if ring.closed {
                return Err(DriverError::Closed);
            }
            self.used.wait(&mut ring);
        }
    }

    /// Remove the oldest byte, giving up after `timeout`
    ///
    /// Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] once the FIFO is closed and drained.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<u8>> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.ring.lock();
        loop {
            if let Some(byte) = ring.bytes.pop_front() {
                self.free.notify_one();
                return Ok(Some(byte));
            }
            if ring.closed {
                return Err(DriverError::Closed);
            }
            if self.used.wait_until(&mut ring, deadline).timed_out() {
                return Ok(None);
            }
        }
    }

    /// Remove the oldest byte if there is one
    pub fn try_get(&self) -> Option<u8> {
        let mut ring = self.ring.lock();
        let byte = ring.bytes.pop_front()?;
        self.free.notify_one();
        Some(byte)
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.ring.lock().bytes.len()
    }

    /// Whether the FIFO holds no bytes
    pub fn is_empty(&self) -> bool {
        self.ring.lock().bytes.is_empty()
    }

    /// Maximum bytes the FIFO can hold
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wake every blocked caller; puts fail from now on, gets fail once drained
    pub fn close(&self) {
        self.ring.lock().closed = true;
        self.used.notify_all();
        self.free.notify_all();
    }

    /// Whether [`Fifo::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }
}
