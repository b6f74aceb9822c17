//! Relay runtime: shared state, the per-phase sample/trip cycle and its threads
//!
//! ```text
//!  PIT ──► sampling[n] ──► sample_channel(n) ──► tripping[n] ──► evaluate_channel(n)
//!                            │ window, Irms, f      │               │ TripTimer
//!                            ▼                      │               ▼
//!                       timing output          retune PIT      trip output, flash
//!
//!  UART Rx ──► PacketPort ──► CommandHandler ──► PacketPort ──► UART Tx
//! ```
//!
//! [`RelayState`] holds everything the threads share. Its
//! [`sample_channel`](RelayState::sample_channel) and
//! [`evaluate_channel`](RelayState::evaluate_channel) are the bodies of the
//! sampling and trip threads and can be stepped directly against a manual
//! [`Clock`].

use parking_lot::Mutex;
use std::array;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tower_chip::analog::{SIGNAL_HIGH, SIGNAL_LOW, TIMING_OUTPUT, TRIP_OUTPUT};
use tower_chip::flash::{ERASED_BYTE, ERASED_HALF_WORD};
use tower_chip::protocol::{DEFAULT_TOWER_MODE, DEFAULT_TOWER_NUMBER};
use tower_chip::relay::{
    in_sensitive_band, sample_period_ns, NOMINAL_FREQUENCY, PHASE_COUNT, PICKUP_CURRENT,
    TRACKING_FREQUENCY_MAX, TRACKING_FREQUENCY_MIN,
};
use tracing::{debug, info, warn};

use crate::analog::{AnalogBackend, AnalogInput};
use crate::command::CommandHandler;
use crate::config::RelayConfig;
use crate::dsp;
use crate::error::{DriverError, Result};
use crate::flash::{Flash, FlashVar};
use crate::idmt::{Characteristic, TimerEvent, TripTimer};
use crate::pit::{Clock, Pit};
use crate::sync::Semaphore;
use crate::uart::{PacketPort, Uart};

/// Longest a trip thread sleeps when no phase is timing.
const TRIP_IDLE_WAIT: Duration = Duration::from_millis(500);

/// Flash variables, in allocation order
#[derive(Debug, Clone, Copy)]
struct FlashVars {
    characteristic: FlashVar,
    times_tripped: FlashVar,
    tower_number: FlashVar,
    tower_mode: FlashVar,
}

impl FlashVars {
    fn allocate(flash: &mut Flash) -> Result<Self> {
        Ok(Self {
            characteristic: flash.allocate(1)?,
            times_tripped: flash.allocate(2)?,
            tower_number: flash.allocate(2)?,
            tower_mode: flash.allocate(2)?,
        })
    }

    /// Replace erased values with the factory defaults
    fn apply_defaults(&self, flash: &mut Flash) -> Result<()> {
        if flash.read8(self.characteristic)? == ERASED_BYTE {
            flash.write8(self.characteristic, Characteristic::default().as_byte())?;
        }
        if flash.read16(self.times_tripped)? == ERASED_HALF_WORD {
            flash.write16(self.times_tripped, 0)?;
        }
        if flash.read16(self.tower_number)? == ERASED_HALF_WORD {
            info!("Flash: tower number erased, using {DEFAULT_TOWER_NUMBER:#06x}");
            flash.write16(self.tower_number, DEFAULT_TOWER_NUMBER)?;
        }
        if flash.read16(self.tower_mode)? == ERASED_HALF_WORD {
            flash.write16(self.tower_mode, DEFAULT_TOWER_MODE)?;
        }
        Ok(())
    }
}

/// Highest trip count the flash counter holds; one more would read as erased
pub const MAX_TRIP_COUNT: u16 = ERASED_HALF_WORD - 1;

/// Measurement and timer state of one phase
#[derive(Debug, Default)]
struct Phase {
    input: AnalogInput,
    frequency: Option<f32>,
    timer: TripTimer,
}

/// Result of one sampling step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseReading {
    /// True RMS current over the window (0 until the window is full)
    pub irms: f32,
    /// Frequency from the window's zero crossings
    pub frequency: Option<f32>,
    /// Whether the phase is above pickup
    pub above_pickup: bool,
}

/// State shared by the sampling, trip and packet threads
#[derive(Debug)]
pub struct RelayState {
    clock: Clock,
    backend: Arc<dyn AnalogBackend>,
    flash: Mutex<Flash>,
    vars: FlashVars,
    phases: [Mutex<Phase>; PHASE_COUNT],
    above_pickup: [AtomicBool; PHASE_COUNT],
    active: [AtomicBool; PHASE_COUNT],
    tripped: [AtomicBool; PHASE_COUNT],
    faults: [AtomicBool; PHASE_COUNT],
    sensitive_mode: AtomicBool,
    sampling: [Arc<Semaphore>; PHASE_COUNT],
    tripping: [Arc<Semaphore>; PHASE_COUNT],
    pit: Arc<Pit>,
}

impl RelayState {
    /// Allocate the flash variables, fill erased ones with defaults and
    /// build a PIT ticking at 16 samples per nominal cycle
    ///
    /// `clock` must be the time base `backend` samples against.
    ///
    /// # Errors
    ///
    /// Returns error if the flash variables cannot be allocated or written.
    pub fn new(
        mut flash: Flash,
        backend: Arc<dyn AnalogBackend>,
        clock: Clock,
        sensitive_mode: bool,
    ) -> Result<Self> {
        let vars = FlashVars::allocate(&mut flash)?;
        vars.apply_defaults(&mut flash)?;

        let sampling: [Arc<Semaphore>; PHASE_COUNT] =
            array::from_fn(|_| Arc::new(Semaphore::new(0)));
        let tripping = array::from_fn(|_| Arc::new(Semaphore::new(0)));
        let pit = Arc::new(Pit::new(
            clock.clone(),
            sample_period_ns(NOMINAL_FREQUENCY),
            sampling.to_vec(),
        ));

        Ok(Self {
            clock,
            backend,
            flash: Mutex::new(flash),
            vars,
            phases: array::from_fn(|_| Mutex::new(Phase::default())),
            above_pickup: array::from_fn(|_| AtomicBool::new(false)),
            active: array::from_fn(|_| AtomicBool::new(false)),
            tripped: array::from_fn(|_| AtomicBool::new(false)),
            faults: array::from_fn(|_| AtomicBool::new(false)),
            sensitive_mode: AtomicBool::new(sensitive_mode),
            sampling,
            tripping,
            pit,
        })
    }

    /// Time base
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Sampling timer
    pub const fn pit(&self) -> &Arc<Pit> {
        &self.pit
    }

    /// ADC/DAC the relay drives
    pub fn backend(&self) -> &Arc<dyn AnalogBackend> {
        &self.backend
    }

    // ── Persistent settings ──────────────────────────────────────────────────

    /// Characteristic stored in flash (inverse if the byte is not a valid curve)
    pub fn characteristic(&self) -> Characteristic {
        let byte = self
            .flash
            .lock()
            .read8(self.vars.characteristic)
            .unwrap_or(ERASED_BYTE);
        Characteristic::try_from(byte).unwrap_or_default()
    }

    /// Select the characteristic
    ///
    /// # Errors
    ///
    /// Returns error if the flash write fails.
    pub fn set_characteristic(&self, characteristic: Characteristic) -> Result<()> {
        self.flash
            .lock()
            .write8(self.vars.characteristic, characteristic.as_byte())?;
        info!("Relay: characteristic set to {characteristic}");
        Ok(())
    }

    /// Number of trips recorded in flash (0 when erased)
    pub fn times_tripped(&self) -> u16 {
        match self.flash.lock().read16(self.vars.times_tripped) {
            Ok(ERASED_HALF_WORD) | Err(_) => 0,
            Ok(count) => count,
        }
    }

    /// Add one trip to the flash counter, returning the new count
    ///
    /// The counter stops at [`MAX_TRIP_COUNT`].
    ///
    /// # Errors
    ///
    /// Returns error if the flash write fails.
    pub fn record_trip(&self) -> Result<u16> {
        let mut flash = self.flash.lock();
        let count = match flash.read16(self.vars.times_tripped)? {
            ERASED_HALF_WORD => 1,
            count => count.saturating_add(1).min(MAX_TRIP_COUNT),
        };
        flash.write16(self.vars.times_tripped, count)?;
        Ok(count)
    }

    /// Tower number
    ///
    /// # Errors
    ///
    /// Returns error if the variable cannot be read.
    pub fn tower_number(&self) -> Result<u16> {
        self.flash.lock().read16(self.vars.tower_number)
    }

    /// Store a new tower number
    ///
    /// # Errors
    ///
    /// Returns error if the flash write fails.
    pub fn set_tower_number(&self, number: u16) -> Result<()> {
        self.flash.lock().write16(self.vars.tower_number, number)
    }

    /// Tower mode
    ///
    /// # Errors
    ///
    /// Returns error if the variable cannot be read.
    pub fn tower_mode(&self) -> Result<u16> {
        self.flash.lock().read16(self.vars.tower_mode)
    }

    /// Store a new tower mode
    ///
    /// # Errors
    ///
    /// Returns error if the flash write fails.
    pub fn set_tower_mode(&self, mode: u16) -> Result<()> {
        self.flash.lock().write16(self.vars.tower_mode, mode)
    }

    /// Read one raw byte of the flash phrase
    ///
    /// # Errors
    ///
    /// Returns error if `offset` is outside the phrase.
    pub fn flash_read(&self, offset: usize) -> Result<u8> {
        self.flash.lock().read_byte(offset)
    }

    /// Program one raw byte of the flash phrase
    ///
    /// # Errors
    ///
    /// Returns error if `offset` is outside the phrase or persisting fails.
    pub fn flash_program(&self, offset: usize, value: u8) -> Result<()> {
        self.flash.lock().program_byte(offset, value)
    }

    /// Erase the flash phrase
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails.
    pub fn flash_erase(&self) -> Result<()> {
        self.flash.lock().erase()
    }

    // ── Runtime flags ────────────────────────────────────────────────────────

    /// Whether out-of-band frequencies block timing
    pub fn sensitive_mode(&self) -> bool {
        self.sensitive_mode.load(Ordering::Acquire)
    }

    /// Enable or disable frequency-sensitive mode
    pub fn set_sensitive_mode(&self, enable: bool) {
        self.sensitive_mode.store(enable, Ordering::Release);
        info!("Relay: sensitive mode {}", if enable { "on" } else { "off" });
    }

    /// Phases involved in the most recent fault (0–3)
    pub fn last_fault(&self) -> u8 {
        let count = self
            .faults
            .iter()
            .filter(|f| f.load(Ordering::Acquire))
            .count();
        #[allow(clippy::cast_possible_truncation)]
        let count = count as u8;
        count
    }

    /// Whether `phase` has tripped and not yet dropped out
    ///
    /// # Errors
    ///
    /// Returns error if `phase` is not 0–2.
    pub fn is_tripped(&self, phase: u8) -> Result<bool> {
        Ok(self.tripped[phase_index(phase)?].load(Ordering::Acquire))
    }

    // ── Measurements ─────────────────────────────────────────────────────────

    /// Latest RMS current of `phase`
    ///
    /// # Errors
    ///
    /// Returns error if `phase` is not 0–2.
    pub fn irms(&self, phase: u8) -> Result<f32> {
        Ok(self.phases[phase_index(phase)?].lock().input.value)
    }

    /// Latest frequency of `phase`
    ///
    /// # Errors
    ///
    /// Returns error if `phase` is not 0–2.
    pub fn frequency(&self, phase: u8) -> Result<Option<f32>> {
        Ok(self.phases[phase_index(phase)?].lock().frequency)
    }

    /// Line frequency, taken from phase A
    pub fn line_frequency(&self) -> Option<f32> {
        self.phases[0].lock().frequency
    }

    /// Instantaneous current on any analog input
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist or the conversion fails.
    pub fn instantaneous_current(&self, channel: u8) -> Result<f32> {
        Ok(dsp::instantaneous_current(self.backend.get(channel)?))
    }

    /// Milliseconds until `phase` trips at its present current, if timing
    ///
    /// # Errors
    ///
    /// Returns error if `phase` is not 0–2.
    pub fn remaining_ms(&self, phase: u8) -> Result<Option<u32>> {
        let characteristic = self.characteristic();
        let p = self.phases[phase_index(phase)?].lock();
        Ok(p.timer.remaining_ms(p.input.value, characteristic))
    }

    // ── Sample / trip cycle ──────────────────────────────────────────────────

    /// Take one sample of `phase` and refresh its measurements
    ///
    /// Shifts the window, recomputes the RMS current and frequency, retunes
    /// the PIT to 16 samples per measured cycle and drives the timing output
    /// high while any phase is above pickup.
    ///
    /// # Errors
    ///
    /// Returns error if `phase` is not 0–2 or the converter fails.
    pub fn sample_channel(&self, phase: u8) -> Result<PhaseReading> {
        let idx = phase_index(phase)?;
        let sample = self.backend.get(phase)?;
        let now = self.clock.elapsed_ns();

        let reading = {
            let mut p = self.phases[idx].lock();
            p.input.push(sample, now);
            if p.input.is_full() {
                let window = p.input.chronological();
                let irms = dsp::rms_current(&window);
                p.input.update_value(irms);
                p.frequency = dsp::frequency(&window, &p.input.chronological_times());
            }
            PhaseReading {
                irms: p.input.value,
                frequency: p.frequency,
                above_pickup: p.input.value >= PICKUP_CURRENT,
            }
        };

        if let Some(frequency) = reading.frequency {
            if (TRACKING_FREQUENCY_MIN..=TRACKING_FREQUENCY_MAX).contains(&frequency) {
                self.pit.set(sample_period_ns(frequency), false);
            }
        }

        self.above_pickup[idx].store(reading.above_pickup, Ordering::Release);
        let timing = self.above_pickup.iter().any(|a| a.load(Ordering::Acquire));
        self.backend
            .put(TIMING_OUTPUT, if timing { SIGNAL_HIGH } else { SIGNAL_LOW })?;

        Ok(reading)
    }

    /// Advance the trip timer of `phase` to the present time
    ///
    /// On a trip the trip output goes high, the flash counter is bumped and
    /// the phase is recorded in the last fault. The output returns low once
    /// every phase has dropped out.
    ///
    /// # Errors
    ///
    /// Returns error if `phase` is not 0–2, the converter fails or the
    /// flash counter cannot be written.
    pub fn evaluate_channel(&self, phase: u8) -> Result<TimerEvent> {
        let idx = phase_index(phase)?;
        let characteristic = self.characteristic();
        let sensitive = self.sensitive_mode();
        let now = self.clock.now_ms();

        let (event, irms) = {
            let mut p = self.phases[idx].lock();
            let blocked = sensitive && !p.frequency.is_some_and(in_sensitive_band);
            let irms = p.input.value;
            (p.timer.update(irms, now, characteristic, blocked), irms)
        };

        match event {
            TimerEvent::Started => {
                if !self.active.iter().any(|a| a.load(Ordering::Acquire)) {
                    // a new fault: forget which phases took part in the last one
                    for fault in &self.faults {
                        fault.store(false, Ordering::Release);
                    }
                }
                self.active[idx].store(true, Ordering::Release);
                debug!("Phase {phase}: timing at {irms:.2} A ({characteristic})");
            }
            TimerEvent::Tripped => {
                self.tripped[idx].store(true, Ordering::Release);
                self.faults[idx].store(true, Ordering::Release);
                self.backend.put(TRIP_OUTPUT, SIGNAL_HIGH)?;
                let count = self.record_trip()?;
                warn!("Phase {phase}: TRIP at {irms:.2} A ({characteristic}), trip #{count}");
            }
            TimerEvent::Reset => {
                self.active[idx].store(false, Ordering::Release);
                self.tripped[idx].store(false, Ordering::Release);
                if !self.tripped.iter().any(|t| t.load(Ordering::Acquire)) {
                    self.backend.put(TRIP_OUTPUT, SIGNAL_LOW)?;
                }
                debug!("Phase {phase}: reset at {irms:.2} A");
            }
            TimerEvent::None => {}
        }
        Ok(event)
    }

    /// Drive both relay outputs low
    ///
    /// # Errors
    ///
    /// Returns error if the converter fails.
    pub fn clear_outputs(&self) -> Result<()> {
        self.backend.put(TIMING_OUTPUT, SIGNAL_LOW)?;
        self.backend.put(TRIP_OUTPUT, SIGNAL_LOW)
    }

    fn close(&self) {
        for semaphore in self.sampling.iter().chain(&self.tripping) {
            semaphore.close();
        }
    }
}

fn phase_index(phase: u8) -> Result<usize> {
    let idx = usize::from(phase);
    if idx < PHASE_COUNT {
        Ok(idx)
    } else {
        Err(DriverError::invalid_channel(phase, PHASE_COUNT))
    }
}

/// Running relay: the PIT, three sampling threads, three trip threads and
/// the packet thread
#[derive(Debug)]
pub struct Relay {
    state: Arc<RelayState>,
    port: Arc<PacketPort>,
    threads: Vec<JoinHandle<()>>,
}

impl Relay {
    /// Build the board from `config` and start every thread
    ///
    /// # Errors
    ///
    /// Returns error if the flash image, baud rate or thread creation fails.
    pub fn start(
        config: &RelayConfig,
        backend: Arc<dyn AnalogBackend>,
        clock: Clock,
    ) -> Result<Self> {
        let flash = match &config.flash {
            Some(path) => Flash::open(path)?,
            None => Flash::new(),
        };
        let state = Arc::new(RelayState::new(
            flash,
            backend,
            clock,
            config.sensitive_mode,
        )?);
        let uart = Arc::new(Uart::new(config.baud, config.module_clock)?);
        Self::launch(state, uart)
    }

    /// Start the threads over an existing state and UART
    ///
    /// Sends the startup, version, number and mode packets once running.
    ///
    /// # Errors
    ///
    /// Returns error if a thread cannot be spawned or the UART is closed.
    pub fn launch(state: Arc<RelayState>, uart: Arc<Uart>) -> Result<Self> {
        let port = Arc::new(PacketPort::new(uart));
        let mut threads = Vec::with_capacity(2 * PHASE_COUNT + 2);

        state.clear_outputs()?;

        for phase in 0..PHASE_COUNT {
            #[allow(clippy::cast_possible_truncation)]
            let phase = phase as u8;

            let sampler = Arc::clone(&state);
            threads.push(
                thread::Builder::new()
                    .name(format!("sampling-{phase}"))
                    .spawn(move || sampling_loop(&sampler, phase))?,
            );

            let tripper = Arc::clone(&state);
            threads.push(
                thread::Builder::new()
                    .name(format!("trip-{phase}"))
                    .spawn(move || trip_loop(&tripper, phase))?,
            );
        }

        let handler = CommandHandler::new(Arc::clone(&state));
        let packet_port = Arc::clone(&port);
        threads.push(
            thread::Builder::new()
                .name("packet".into())
                .spawn(move || packet_loop(&packet_port, &handler))?,
        );

        threads.push(state.pit.spawn()?);
        state.pit.enable(true);

        for packet in CommandHandler::new(Arc::clone(&state)).startup_packets()? {
            port.put(&packet)?;
        }

        info!(
            "Relay: running, {} characteristic, {} trip(s) recorded",
            state.characteristic(),
            state.times_tripped()
        );
        Ok(Self {
            state,
            port,
            threads,
        })
    }

    /// Shared state
    pub const fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Packet access to the relay's UART
    pub const fn port(&self) -> &Arc<PacketPort> {
        &self.port
    }

    /// The relay's UART
    pub fn uart(&self) -> &Arc<Uart> {
        self.port.uart()
    }

    /// Stop every thread and wait for it
    pub fn shutdown(self) {
        self.state.pit.enable(false);
        self.state.pit.stop();
        self.state.close();
        self.port.uart().close();
        for handle in self.threads {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if handle.join().is_err() {
                warn!("Relay: thread {name} panicked");
            }
        }
        info!("Relay: stopped");
    }
}

fn sampling_loop(state: &RelayState, phase: u8) {
    let idx = usize::from(phase);
    while state.sampling[idx].wait().is_ok() {
        if let Err(e) = state.sample_channel(phase) {
            warn!("Phase {phase}: sampling failed: {e}");
        }
        state.tripping[idx].signal();
    }
    debug!("Phase {phase}: sampling stopped");
}

fn trip_loop(state: &RelayState, phase: u8) {
    let idx = usize::from(phase);
    loop {
        let timeout = state
            .remaining_ms(phase)
            .ok()
            .flatten()
            .map_or(TRIP_IDLE_WAIT, |ms| Duration::from_millis(u64::from(ms.max(1))));
        if state.tripping[idx].wait_timeout(timeout).is_err() {
            break;
        }
        if let Err(e) = state.evaluate_channel(phase) {
            warn!("Phase {phase}: trip evaluation failed: {e}");
        }
    }
    debug!("Phase {phase}: trip timer stopped");
}

fn packet_loop(port: &PacketPort, handler: &CommandHandler) {
    loop {
        let packet = match port.get() {
            Ok(packet) => packet,
            Err(DriverError::Closed) => break,
            Err(e) => {
                warn!("Packet thread: {e}");
                continue;
            }
        };
        debug!("Rx {packet}");
        for reply in handler.handle(&packet) {
            if port.put(&reply).is_err() {
                return;
            }
        }
    }
    debug!("Packet thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analog::SimulatedAnalog;
    use crate::packet::Packet;
    use std::time::Instant;
    use tower_chip::protocol::command;

    fn state_with(amps: f32) -> (RelayState, Arc<SimulatedAnalog>) {
        let clock = Clock::manual();
        let sim = Arc::new(SimulatedAnalog::balanced(clock.clone(), amps));
        let state = RelayState::new(Flash::new(), sim.clone(), clock, false).unwrap();
        (state, sim)
    }

    /// One PIT period: sample and evaluate every phase
    fn tick(state: &RelayState) -> Vec<TimerEvent> {
        let period = Duration::from_nanos(u64::from(state.pit().period_ns()));
        state.clock().advance(period);
        (0..3)
            .map(|phase| {
                state.sample_channel(phase).unwrap();
                state.evaluate_channel(phase).unwrap()
            })
            .collect()
    }

    #[test]
    fn erased_flash_gets_defaults() {
        let (state, _) = state_with(0.0);
        assert_eq!(state.characteristic(), Characteristic::Inverse);
        assert_eq!(state.times_tripped(), 0);
        assert_eq!(state.tower_number().unwrap(), 0x25C4);
        assert_eq!(state.tower_mode().unwrap(), 1);
        // char u8 at 0, trips at 2, number at 4, mode at 6
        assert_eq!(state.flash_read(4).unwrap(), 0xC4);
        assert_eq!(state.flash_read(5).unwrap(), 0x25);
    }

    #[test]
    fn programmed_flash_kept() {
        let mut flash = Flash::new();
        flash.program_byte(0, 2).unwrap();
        flash.program_byte(4, 0x34).unwrap();
        flash.program_byte(5, 0x12).unwrap();
        let clock = Clock::manual();
        let sim = Arc::new(SimulatedAnalog::new(clock.clone()));
        let state = RelayState::new(flash, sim, clock, false).unwrap();
        assert_eq!(state.characteristic(), Characteristic::ExtremelyInverse);
        assert_eq!(state.tower_number().unwrap(), 0x1234);
    }

    #[test]
    fn trip_counter_saturates() {
        let mut flash = Flash::new();
        // 0xFFFD, little endian at the counter's offset
        flash.program_byte(2, 0xFD).unwrap();
        flash.program_byte(3, 0xFF).unwrap();
        let clock = Clock::manual();
        let sim = Arc::new(SimulatedAnalog::new(clock.clone()));
        let state = RelayState::new(flash, sim, clock, false).unwrap();
        assert_eq!(state.times_tripped(), 0xFFFD);

        assert_eq!(state.record_trip().unwrap(), MAX_TRIP_COUNT);
        assert_eq!(state.times_tripped(), MAX_TRIP_COUNT);
        assert_eq!(state.record_trip().unwrap(), MAX_TRIP_COUNT);
        assert_eq!(state.times_tripped(), MAX_TRIP_COUNT);
    }

    #[test]
    fn measures_load_and_frequency() {
        let (state, sim) = state_with(0.8);
        for _ in 0..32 {
            tick(&state);
        }
        let irms = state.irms(1).unwrap();
        assert!((irms - 0.8).abs() < 0.02, "irms {irms}");
        let f = state.line_frequency().unwrap();
        assert!((f - 50.0).abs() < 0.5, "frequency {f}");
        assert_eq!(sim.output(TIMING_OUTPUT).unwrap(), SIGNAL_LOW);
    }

    #[test]
    fn pit_retunes_to_line_frequency() {
        let (state, sim) = state_with(2.0);
        sim.set_frequency(60.0);
        for _ in 0..64 {
            tick(&state);
        }
        let expected = sample_period_ns(60.0);
        let period = state.pit().period_ns();
        assert!(period.abs_diff(expected) < expected / 50, "period {period}");
    }

    #[test]
    fn pit_holds_period_outside_tracking_band() {
        let nominal = sample_period_ns(NOMINAL_FREQUENCY);
        for line in [35.0f32, 80.0] {
            let (state, sim) = state_with(2.0);
            sim.set_frequency(line);
            let mut measured = Vec::new();
            for _ in 0..64 {
                tick(&state);
                measured.extend(state.line_frequency());
                assert_eq!(state.pit().period_ns(), nominal, "{line} Hz retuned the PIT");
            }
            assert!(
                measured.iter().any(|f| (f - line).abs() < 1.5),
                "{line} Hz measured as {measured:?}"
            );
        }
    }

    #[test]
    fn silent_line_reports_no_frequency() {
        let (state, _) = state_with(0.0);
        for _ in 0..32 {
            tick(&state);
        }
        assert_eq!(state.line_frequency(), None);
        assert_eq!(state.frequency(2).unwrap(), None);
        assert_eq!(
            state.pit().period_ns(),
            sample_period_ns(NOMINAL_FREQUENCY)
        );

        let handler = CommandHandler::new(Arc::new(state));
        assert_eq!(
            handler.handle(&Packet::new(command::DOR, 2, 0, 0)),
            vec![Packet::new(command::DOR, 2, 0, 0)]
        );
        assert_eq!(
            handler.handle(&Packet::new(command::DOR_VALUES, 1, 0, 0)),
            vec![Packet::new(command::DOR_VALUES, 0, 0, 0)]
        );
    }

    #[test]
    fn trip_thread_trips_while_sampling_stalls() {
        let clock = Clock::monotonic();
        let sim = Arc::new(SimulatedAnalog::balanced(clock.clone(), 0.5));
        sim.set_current(0, 20.0).unwrap();
        let state = Arc::new(RelayState::new(Flash::new(), sim.clone(), clock, false).unwrap());
        state.set_characteristic(Characteristic::ExtremelyInverse).unwrap();
        for _ in 0..16 {
            state.sample_channel(0).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        assert!(state.irms(0).unwrap() > PICKUP_CURRENT);
        assert_eq!(state.evaluate_channel(0).unwrap(), TimerEvent::Started);

        // no further samples: only the trip thread's own timeout moves the timer
        let started = Instant::now();
        let trip = {
            let state = Arc::clone(&state);
            thread::spawn(move || trip_loop(&state, 0))
        };
        while !state.is_tripped(0).unwrap() && started.elapsed() < Duration::from_secs(3) {
            thread::sleep(Duration::from_millis(5));
        }
        let tripped_after = started.elapsed();
        state.close();
        trip.join().unwrap();

        assert!(state.is_tripped(0).unwrap(), "no trip after {tripped_after:?}");
        assert!(tripped_after < Duration::from_secs(2), "{tripped_after:?}");
        assert_eq!(state.times_tripped(), 1);
        assert_eq!(sim.output(TRIP_OUTPUT).unwrap(), SIGNAL_HIGH);
    }

    #[test]
    fn overcurrent_trips_and_counts() {
        let (state, sim) = state_with(10.0);
        state.set_characteristic(Characteristic::ExtremelyInverse).unwrap();

        let mut tripped_at = None;
        while state.clock().now_ms() < 2000 {
            if tick(&state).contains(&TimerEvent::Tripped) {
                tripped_at = Some(state.clock().now_ms());
                break;
            }
        }
        // window fills in 20 ms, then 80 / (10² − 1) s ≈ 808 ms
        let tripped_at = tripped_at.expect("relay should trip");
        assert!((790..=900).contains(&tripped_at), "tripped at {tripped_at} ms");
        assert_eq!(sim.output(TIMING_OUTPUT).unwrap(), SIGNAL_HIGH);
        assert_eq!(sim.output(TRIP_OUTPUT).unwrap(), SIGNAL_HIGH);
        assert!(state.times_tripped() >= 1);
        assert!(state.last_fault() >= 1);
    }

    #[test]
    fn dropout_clears_trip_output_but_keeps_fault() {
        let (state, sim) = state_with(20.0);
        state.set_characteristic(Characteristic::ExtremelyInverse).unwrap();
        for _ in 0..400 {
            tick(&state);
        }
        assert_eq!(sim.output(TRIP_OUTPUT).unwrap(), SIGNAL_HIGH);
        assert_eq!(state.last_fault(), 3);
        assert_eq!(state.times_tripped(), 3);

        sim.set_balanced(0.0, 50.0);
        for _ in 0..40 {
            tick(&state);
        }
        assert_eq!(sim.output(TRIP_OUTPUT).unwrap(), SIGNAL_LOW);
        assert_eq!(sim.output(TIMING_OUTPUT).unwrap(), SIGNAL_LOW);
        assert!(!state.is_tripped(0).unwrap());
        assert_eq!(state.last_fault(), 3);
    }

    #[test]
    fn single_phase_fault() {
        let (state, sim) = state_with(0.5);
        sim.set_current(2, 20.0).unwrap();
        for _ in 0..400 {
            tick(&state);
        }
        assert!(state.is_tripped(2).unwrap());
        assert!(!state.is_tripped(0).unwrap());
        assert_eq!(state.last_fault(), 1);
    }

    #[test]
    fn sensitive_mode_blocks_off_band() {
        let (state, sim) = state_with(20.0);
        sim.set_frequency(45.0);
        state.set_sensitive_mode(true);
        for _ in 0..800 {
            tick(&state);
        }
        assert_eq!(state.times_tripped(), 0);
        assert_eq!(sim.output(TRIP_OUTPUT).unwrap(), SIGNAL_LOW);

        state.set_sensitive_mode(false);
        for _ in 0..400 {
            tick(&state);
        }
        assert!(state.times_tripped() > 0);
    }

    #[test]
    fn phase_range_checked() {
        let (state, _) = state_with(0.0);
        assert!(matches!(
            state.sample_channel(3),
            Err(DriverError::InvalidChannel { channel: 3, count: 3 })
        ));
        assert!(state.irms(7).is_err());
    }
}
