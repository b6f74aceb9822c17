//! Periodic interrupt timer and time base
//!
//! PIT0 paces the sampling threads: every period it signals one semaphore
//! per phase. PIT1 is a free-running millisecond time base, modelled here by
//! [`Clock`].

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tower_chip::clock::pit_load_value;
use tracing::{debug, trace};

use crate::error::Result;
use crate::sync::Semaphore;

/// Time base shared by the PIT, the analog simulation and the trip timers
#[derive(Debug, Clone)]
pub enum Clock {
    /// Wall-clock time since creation
    Monotonic(Instant),
    /// Time advanced explicitly (tests, offline simulation)
    Manual(Arc<AtomicU64>),
}

impl Clock {
    /// Clock that follows real time
    pub fn monotonic() -> Self {
        Self::Monotonic(Instant::now())
    }

    /// Clock frozen at zero until [`Clock::advance`] is called
    pub fn manual() -> Self {
        Self::Manual(Arc::new(AtomicU64::new(0)))
    }

    /// Nanoseconds since the clock started
    pub fn elapsed_ns(&self) -> u64 {
        match self {
            #[allow(clippy::cast_possible_truncation)]
            Self::Monotonic(origin) => origin.elapsed().as_nanos() as u64,
            Self::Manual(ns) => ns.load(Ordering::Acquire),
        }
    }

    /// Seconds since the clock started
    #[allow(clippy::cast_precision_loss)]
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_ns() as f64 / 1e9
    }

    /// Milliseconds since the clock started, wrapping like the hardware counter
    #[allow(clippy::cast_possible_truncation)]
    pub fn now_ms(&self) -> u32 {
        (self.elapsed_ns() / 1_000_000) as u32
    }

    /// Move a manual clock forward; a monotonic clock ignores this
    pub fn advance(&self, by: Duration) {
        if let Self::Manual(ns) = self {
            #[allow(clippy::cast_possible_truncation)]
            let by_ns = by.as_nanos() as u64;
            ns.fetch_add(by_ns, Ordering::AcqRel);
        }
    }

    /// Whether time only moves through [`Clock::advance`]
    pub const fn is_manual(&self) -> bool {
        matches!(self, Self::Manual(_))
    }
}

/// Emulated periodic interrupt timer
#[derive(Debug)]
pub struct Pit {
    clock: Clock,
    period_ns: AtomicU32,
    enabled: AtomicBool,
    restart: AtomicBool,
    stop: AtomicBool,
    targets: Vec<Arc<Semaphore>>,
}

impl Pit {
    /// Timer that signals each of `targets` on every period
    pub fn new(clock: Clock, period_ns: u32, targets: Vec<Arc<Semaphore>>) -> Self {
        Self {
            clock,
            period_ns: AtomicU32::new(period_ns),
            enabled: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            targets,
        }
    }

    /// Change the period
    ///
    /// With `restart` the new period starts immediately; otherwise it takes
    /// effect after the current period expires.
    pub fn set(&self, period_ns: u32, restart: bool) {
        let previous = self.period_ns.swap(period_ns, Ordering::AcqRel);
        if previous != period_ns {
            trace!(
                "PIT: period {period_ns} ns (LDVAL {})",
                pit_load_value(period_ns)
            );
        }
        if restart {
            self.restart.store(true, Ordering::Release);
        }
    }

    /// Current period in nanoseconds
    pub fn period_ns(&self) -> u32 {
        self.period_ns.load(Ordering::Acquire)
    }

    /// Start or stop the periodic interrupt
    pub fn enable(&self, enable: bool) {
        self.enabled.store(enable, Ordering::Release);
        debug!("PIT: {}", if enable { "enabled" } else { "disabled" });
    }

    /// Whether the periodic interrupt is running
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Free-running time base in milliseconds
    pub fn time_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    /// Time base shared with the rest of the board
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Interrupt service: signal every target once
    pub fn fire(&self) {
        for target in &self.targets {
            target.signal();
        }
    }

    /// Run the timer on its own thread until [`Pit::stop`]
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned.
    pub fn spawn(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let pit = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("pit".into())
            .spawn(move || pit.run())?;
        Ok(handle)
    }

    /// Stop the timer thread
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn run(&self) {
        let mut deadline = Instant::now() + self.period();
        self.restart.store(false, Ordering::Release);
        while !self.stop.load(Ordering::Acquire) {
            if self.restart.swap(false, Ordering::AcqRel) {
                deadline = Instant::now() + self.period();
            }
            let now = Instant::now();
            if now < deadline {
                thread::sleep((deadline - now).min(Duration::from_millis(5)));
                continue;
            }
            if self.is_enabled() {
                self.fire();
            }
            deadline += self.period();
            // don't try to catch up after a long stall
            if deadline < Instant::now() {
                deadline = Instant::now() + self.period();
            }
        }
        debug!("PIT: stopped");
    }

    fn period(&self) -> Duration {
        Duration::from_nanos(u64::from(self.period_ns().max(1)))
    }
}
