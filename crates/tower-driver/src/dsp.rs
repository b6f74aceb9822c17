//! Signal processing on the sample windows: true RMS and zero-crossing frequency

use tower_chip::analog::{counts_to_volts, volts_to_amps};

/// True RMS voltage of a window of ADC samples
///
/// Returns 0 for an empty window.
pub fn rms_volts(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| f64::from(counts_to_volts(s)).powi(2))
        .sum();
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let rms = (sum_sq / samples.len() as f64).sqrt() as f32;
    rms
}

/// True RMS current (amps) of a window of ADC samples
pub fn rms_current(samples: &[i16]) -> f32 {
    volts_to_amps(rms_volts(samples))
}

/// Instantaneous current (amps) of one ADC sample
pub fn instantaneous_current(sample: i16) -> f32 {
    volts_to_amps(counts_to_volts(sample))
}

/// Frequency of a zero-mean sinusoid from its first two zero crossings
///
/// `samples` are in chronological order and `times` holds the instant (in
/// seconds) each one was taken, so a window spanning a PIT retune is still
/// measured correctly. Two consecutive crossings are half a period apart.
/// Returns `None` if the window holds fewer than two crossings.
pub fn frequency(samples: &[i16], times: &[f64]) -> Option<f32> {
    let mut crossings = crossing_times(samples, times);
    let first = crossings.next()?;
    let second = crossings.next()?;

    let half_period = second - first;
    if half_period <= 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let freq = (1.0 / (2.0 * half_period)) as f32;
    Some(freq)
}

/// Instants at which the signal changes sign
///
/// Zero samples are skipped: a crossing needs the nearest non-zero samples
/// either side to differ in sign. Adjacent samples are interpolated
/// linearly; a run of zeros between them counts once, at its midpoint.
fn crossing_times<'a>(samples: &'a [i16], times: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
    let len = samples.len().min(times.len());
    let mut last: Option<(usize, i16)> = None;
    samples[..len]
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s != 0)
        .filter_map(move |(j, &b)| {
            let (i, a) = last.replace((j, b))?;
            if (a < 0) == (b < 0) {
                return None;
            }
            if j == i + 1 {
                let (a, b) = (f64::from(a).abs(), f64::from(b).abs());
                Some(times[i] + (times[j] - times[i]) * a / (a + b))
            } else {
                Some((times[i + 1] + times[j - 1]) / 2.0)
            }
        })
}

/// Split a non-negative value into its integer part and `scale`× its fraction
///
/// Both parts saturate at 255, matching the single-byte packet fields.
pub fn split_decimal(value: f32, scale: f32) -> (u8, u8) {
    let value = value.max(0.0);
    let whole = value.trunc();
    let fraction = ((value - whole) * scale).trunc();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let parts = (whole.min(255.0) as u8, fraction.min(255.0) as u8);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analog::Waveform;

    const NOMINAL: f64 = 1.0 / 800.0;

    fn sample(w: Waveform, n: usize, period: f64, start: f64) -> Vec<i16> {
        #[allow(clippy::cast_precision_loss)]
        (0..n).map(|i| w.counts_at(start + i as f64 * period)).collect()
    }

    #[allow(clippy::cast_precision_loss)]
    fn evenly_spaced(n: usize, period: f64, start: f64) -> Vec<f64> {
        (0..n).map(|i| start + i as f64 * period).collect()
    }

    #[test]
    fn rms_of_sinusoid() {
        let w = Waveform::new(1.0, 50.0, 0.3);
        let samples = sample(w, 16, NOMINAL, 0.0);
        let amps = rms_current(&samples);
        assert!((amps - 1.0).abs() < 0.01, "rms {amps}");
    }

    #[test]
    fn rms_of_dc() {
        assert!((rms_volts(&[3200, -3200, 3200]) - 1.0).abs() < 1e-6);
        assert!(rms_volts(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn frequency_at_nominal_rate() {
        let w = Waveform::new(2.0, 50.0, 0.4);
        let samples = sample(w, 16, NOMINAL, 0.0);
        let f = frequency(&samples, &evenly_spaced(16, NOMINAL, 0.0)).unwrap();
        assert!((f - 50.0).abs() < 0.5, "freq {f}");
    }

    #[test]
    fn frequency_off_nominal() {
        for target in [47.0f32, 52.5, 55.0] {
            let w = Waveform::new(5.0, target, 1.0);
            let samples = sample(w, 16, NOMINAL, 0.013);
            let f = frequency(&samples, &evenly_spaced(16, NOMINAL, 0.013)).unwrap();
            assert!((f - target).abs() < 0.75, "target {target} got {f}");
        }
    }

    #[test]
    fn frequency_across_retune() {
        // 60 Hz line: eight samples at 800 Hz, then eight at 960 Hz
        let w = Waveform::new(3.0, 60.0, 0.2);
        let mut times = evenly_spaced(8, NOMINAL, 0.0);
        times.extend(evenly_spaced(8, 1.0 / 960.0, 8.0 * NOMINAL));
        let samples: Vec<i16> = times.iter().map(|&t| w.counts_at(t)).collect();
        let f = frequency(&samples, &times).unwrap();
        assert!((f - 60.0).abs() < 0.75, "freq {f}");
    }

    #[test]
    fn exact_zero_sample_counted_once() {
        // crossings at samples 1 and 9: half a period is 8 samples
        let samples = [-10i16, 0, 10, 20, 30, 40, 30, 20, 10, 0, -10];
        let f = frequency(&samples, &evenly_spaced(11, NOMINAL, 0.0)).unwrap();
        assert!((f - 50.0).abs() < 1e-3, "freq {f}");
    }

    #[test]
    fn zero_run_is_one_crossing() {
        // zeros at 1..=3 → crossing at 2; single zero at 10 → crossing at 10
        let samples = [-10i16, 0, 0, 0, 10, 20, 30, 20, 10, 5, 0, -5];
        let f = frequency(&samples, &evenly_spaced(12, NOMINAL, 0.0)).unwrap();
        assert!((f - 50.0).abs() < 1e-3, "freq {f}");
    }

    #[test]
    fn silent_line_has_no_frequency() {
        let times = evenly_spaced(16, NOMINAL, 0.0);
        assert_eq!(frequency(&[0; 16], &times), None);
        // zeros that only touch the axis are not crossings
        assert_eq!(frequency(&[5, 0, 5, 0, 5, 0, 5, 0], &times), None);
        assert_eq!(frequency(&[0, 0, 5, -5, 0, 0], &times), None);
    }

    #[test]
    fn no_crossings_no_frequency() {
        let times = evenly_spaced(4, 0.001, 0.0);
        assert_eq!(frequency(&[5, 6, 7, 8], &times), None);
        assert_eq!(frequency(&[], &[]), None);
        assert_eq!(frequency(&[5, -5, -6], &times), None);
    }

    #[test]
    fn decimal_split() {
        assert_eq!(split_decimal(49.87, 100.0), (49, 86));
        assert_eq!(split_decimal(50.25, 10.0), (50, 2));
        assert_eq!(split_decimal(-3.0, 100.0), (0, 0));
        assert_eq!(split_decimal(300.5, 100.0), (255, 50));
    }

    #[test]
    fn instantaneous_scaling() {
        // 1 V at the transformer → 20/7 A
        assert!((instantaneous_current(3200) - 20.0 / 7.0).abs() < 1e-5);
    }
}
