//! Analog front end: ADC/DAC backends and per-channel sample windows
//!
//! The relay only talks to the converters through [`AnalogBackend`]. The
//! [`SimulatedAnalog`] backend synthesises three-phase line currents so the
//! whole relay runs, and is tested, without the TWR-ADCDAC-LTC board.

use parking_lot::Mutex;
use std::f64::consts::{PI, SQRT_2};
use std::fmt::Debug;

use tower_chip::analog::{
    amps_to_volts, COUNTS_PER_VOLT, NB_INPUTS, NB_OUTPUTS, SIGNAL_LOW, WINDOW_SIZE,
};
use tower_chip::relay::NOMINAL_FREQUENCY;
use tracing::debug;

use crate::error::{DriverError, Result};
use crate::pit::Clock;

/// ADC/DAC access used by the relay
pub trait AnalogBackend: Debug + Send + Sync {
    /// Read the latest conversion of input `channel`
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist or the conversion fails.
    fn get(&self, channel: u8) -> Result<i16>;

    /// Drive output `channel` to `value`
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist or the write fails.
    fn put(&self, channel: u8, value: i16) -> Result<()>;
}

/// One simulated line current
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waveform {
    /// RMS current in amps
    pub amps_rms: f32,
    /// Frequency in Hz
    pub frequency: f32,
    /// Phase offset in radians
    pub phase: f32,
}

impl Waveform {
    /// Sinusoid of `amps_rms` at `frequency` with `phase` offset
    pub const fn new(amps_rms: f32, frequency: f32, phase: f32) -> Self {
        Self {
            amps_rms,
            frequency,
            phase,
        }
    }

    /// No signal
    pub const fn silent() -> Self {
        Self::new(0.0, NOMINAL_FREQUENCY, 0.0)
    }

    /// ADC counts `t` seconds after the clock started, saturating at the rails
    pub fn counts_at(&self, t: f64) -> i16 {
        let volts_peak = f64::from(amps_to_volts(self.amps_rms)) * SQRT_2;
        let angle = 2.0 * PI * f64::from(self.frequency) * t + f64::from(self.phase);
        let counts = (volts_peak * angle.sin() * f64::from(COUNTS_PER_VOLT)).round();
        #[allow(clippy::cast_possible_truncation)]
        let counts = counts.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        counts
    }
}

/// Software ADC/DAC
///
/// Inputs are sinusoids evaluated against the shared [`Clock`]; outputs are
/// latched so callers can observe the timing and trip signals.
#[derive(Debug)]
pub struct SimulatedAnalog {
    clock: Clock,
    inputs: Mutex<[Waveform; NB_INPUTS]>,
    outputs: Mutex<[i16; NB_OUTPUTS]>,
}

impl SimulatedAnalog {
    /// All inputs silent, all outputs low
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            inputs: Mutex::new([Waveform::silent(); NB_INPUTS]),
            outputs: Mutex::new([SIGNAL_LOW; NB_OUTPUTS]),
        }
    }

    /// Balanced three-phase load of `amps_rms` at the nominal frequency
    pub fn balanced(clock: Clock, amps_rms: f32) -> Self {
        let sim = Self::new(clock);
        sim.set_balanced(amps_rms, NOMINAL_FREQUENCY);
        sim
    }

    /// Set every phase to `amps_rms` at `frequency`, 120° apart
    pub fn set_balanced(&self, amps_rms: f32, frequency: f32) {
        let mut inputs = self.inputs.lock();
        for (phase, input) in inputs.iter_mut().take(3).enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let offset = -2.0 * std::f32::consts::PI / 3.0 * phase as f32;
            *input = Waveform::new(amps_rms, frequency, offset);
        }
    }

    /// Replace the waveform on one input
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist.
    pub fn set_input(&self, channel: u8, waveform: Waveform) -> Result<()> {
        let idx = input_index(channel)?;
        self.inputs.lock()[idx] = waveform;
        debug!(
            "SimulatedAnalog: ch{channel} → {:.2} A @ {:.2} Hz",
            waveform.amps_rms, waveform.frequency
        );
        Ok(())
    }

    /// Change only the RMS current of one input
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist.
    pub fn set_current(&self, channel: u8, amps_rms: f32) -> Result<()> {
        let idx = input_index(channel)?;
        let mut inputs = self.inputs.lock();
        inputs[idx].amps_rms = amps_rms;
        Ok(())
    }

    /// Change the frequency of every input
    pub fn set_frequency(&self, frequency: f32) {
        for input in self.inputs.lock().iter_mut() {
            input.frequency = frequency;
        }
    }

    /// Waveform currently on an input
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist.
    pub fn input(&self, channel: u8) -> Result<Waveform> {
        Ok(self.inputs.lock()[input_index(channel)?])
    }

    /// Last value written to an output
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist.
    pub fn output(&self, channel: u8) -> Result<i16> {
        Ok(self.outputs.lock()[output_index(channel)?])
    }

    /// Time base the waveforms are evaluated against
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }
}

impl AnalogBackend for SimulatedAnalog {
    fn get(&self, channel: u8) -> Result<i16> {
        let waveform = self.input(channel)?;
        Ok(waveform.counts_at(self.clock.elapsed_secs()))
    }

    fn put(&self, channel: u8, value: i16) -> Result<()> {
        let idx = output_index(channel)?;
        let mut outputs = self.outputs.lock();
        if outputs[idx] != value {
            debug!("SimulatedAnalog: out{channel} {} → {value}", outputs[idx]);
        }
        outputs[idx] = value;
        Ok(())
    }
}

fn input_index(channel: u8) -> Result<usize> {
    let idx = usize::from(channel);
    if idx < NB_INPUTS {
        Ok(idx)
    } else {
        Err(DriverError::invalid_channel(channel, NB_INPUTS))
    }
}

fn output_index(channel: u8) -> Result<usize> {
    let idx = usize::from(channel);
    if idx < NB_OUTPUTS {
        Ok(idx)
    } else {
        Err(DriverError::invalid_channel(channel, NB_OUTPUTS))
    }
}

/// Sliding window of one analog input plus its processed value
#[derive(Debug, Clone)]
pub struct AnalogInput {
    /// Latest processed value (RMS current in amps)
    pub value: f32,
    /// Previous processed value
    pub old_value: f32,
    values: [i16; WINDOW_SIZE],
    times: [u64; WINDOW_SIZE],
    filled: usize,
}

impl Default for AnalogInput {
    fn default() -> Self {
        Self {
            value: 0.0,
            old_value: 0.0,
            values: [0; WINDOW_SIZE],
            times: [0; WINDOW_SIZE],
            filled: 0,
        }
    }
}

impl AnalogInput {
    /// Shift the window and store the newest sample at the front
    pub fn push(&mut self, sample: i16, time_ns: u64) {
        self.values.copy_within(0..WINDOW_SIZE - 1, 1);
        self.times.copy_within(0..WINDOW_SIZE - 1, 1);
        self.values[0] = sample;
        self.times[0] = time_ns;
        self.filled = (self.filled + 1).min(WINDOW_SIZE);
    }

    /// Record a new processed value, keeping the previous one
    pub fn update_value(&mut self, value: f32) {
        self.old_value = self.value;
        self.value = value;
    }

    /// Newest sample
    pub const fn latest(&self) -> i16 {
        self.values[0]
    }

    /// Time stamp of the newest sample (ns)
    pub const fn latest_time(&self) -> u64 {
        self.times[0]
    }

    /// Samples collected so far, oldest first
    pub fn chronological(&self) -> Vec<i16> {
        self.values[..self.filled].iter().rev().copied().collect()
    }

    /// Time stamps of [`AnalogInput::chronological`] in seconds
    #[allow(clippy::cast_precision_loss)]
    pub fn chronological_times(&self) -> Vec<f64> {
        self.times[..self.filled]
            .iter()
            .rev()
            .map(|&ns| ns as f64 / 1e9)
            .collect()
    }

    /// Whether the window has been filled once
    pub const fn is_full(&self) -> bool {
        self.filled == WINDOW_SIZE
    }

    /// Samples held (up to the window size)
    pub const fn len(&self) -> usize {
        self.filled
    }

    /// Whether no sample has been taken yet
    pub const fn is_empty(&self) -> bool {
        self.filled == 0
    }
}
