//! Relay protection constants.

/// Number of protected phases (analog inputs 0–2).
pub const PHASE_COUNT: usize = 3;

/// RMS current (amps) above which a phase starts timing towards a trip.
pub const PICKUP_CURRENT: f32 = 1.03;

/// Nominal line frequency (Hz).
pub const NOMINAL_FREQUENCY: f32 = 50.0;

/// Lower edge of the accepted band in sensitive mode (Hz).
pub const SENSITIVE_FREQUENCY_MIN: f32 = 47.5;

/// Upper edge of the accepted band in sensitive mode (Hz).
pub const SENSITIVE_FREQUENCY_MAX: f32 = 52.5;

/// Samples taken per line cycle.
pub const SAMPLES_PER_CYCLE: u32 = 16;

/// Lowest frequency the sampler will retune to (Hz).
pub const TRACKING_FREQUENCY_MIN: f32 = 40.0;

/// Highest frequency the sampler will retune to (Hz).
pub const TRACKING_FREQUENCY_MAX: f32 = 70.0;

/// Sampling period in nanoseconds for a given line frequency.
#[must_use]
pub fn sample_period_ns(frequency: f32) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let period = (1.0e9 / (f64::from(frequency) * f64::from(SAMPLES_PER_CYCLE))) as u32;
    period
}

/// Whether `frequency` lies within the sensitive-mode band.
#[must_use]
pub fn in_sensitive_band(frequency: f32) -> bool {
    (SENSITIVE_FREQUENCY_MIN..=SENSITIVE_FREQUENCY_MAX).contains(&frequency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_sample_period() {
        // 50 Hz × 16 = 800 Hz → 1.25 ms
        assert_eq!(sample_period_ns(NOMINAL_FREQUENCY), 1_250_000);
    }

    #[test]
    fn sensitive_band_edges() {
        assert!(in_sensitive_band(47.5));
        assert!(in_sensitive_band(52.5));
        assert!(!in_sensitive_band(47.4));
        assert!(!in_sensitive_band(53.0));
    }
}
