//! ADC/DAC board model (TWR-ADCDAC-LTC).
//!
//! The LTC1859 ADC and LTC2704 DAC are 16-bit bipolar ±10 V converters.
//! 3200 counts correspond to one volt. The current transformer front end
//! produces 350 mV RMS per amp RMS, so `I = V · 20 / 7`.

/// Number of analog input channels on the board.
pub const NB_INPUTS: usize = 4;

/// Number of analog output channels on the board.
pub const NB_OUTPUTS: usize = 4;

/// Samples held in each input's sliding window.
pub const WINDOW_SIZE: usize = 16;

/// ADC/DAC counts per volt.
pub const COUNTS_PER_VOLT: f32 = 3200.0;

/// Amps per volt at the current transformer output.
pub const AMPS_PER_VOLT: f32 = 20.0 / 7.0;

// ── Output channels ──────────────────────────────────────────────────────────

/// DAC channel driven high while any phase is timing.
pub const TIMING_OUTPUT: u8 = 1;

/// DAC channel driven high to trip the circuit breaker.
pub const TRIP_OUTPUT: u8 = 2;

/// Output level for a low signal.
pub const SIGNAL_LOW: i16 = 0;

/// Output level for a high signal (5 V).
pub const SIGNAL_HIGH: i16 = 16000;

/// Convert ADC counts to volts.
#[must_use]
pub fn counts_to_volts(counts: i16) -> f32 {
    f32::from(counts) / COUNTS_PER_VOLT
}

/// Convert volts at the transformer output to amps.
#[must_use]
pub fn volts_to_amps(volts: f32) -> f32 {
    volts * AMPS_PER_VOLT
}

/// Convert amps to volts at the transformer output.
#[must_use]
pub fn amps_to_volts(amps: f32) -> f32 {
    amps / AMPS_PER_VOLT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_amp_is_350_millivolts() {
        assert!((amps_to_volts(1.0) - 0.35).abs() < 1e-6);
        assert!((volts_to_amps(0.35) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn counts_scale() {
        assert!((counts_to_volts(3200) - 1.0).abs() < f32::EPSILON);
        assert!((counts_to_volts(-16000) + 5.0).abs() < f32::EPSILON);
    }
}
