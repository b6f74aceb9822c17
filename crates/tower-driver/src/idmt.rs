//! IDMT characteristics and the per-phase trip timer

use tower_chip::idmt::{
    constants, EXTREMELY_INVERSE_MS, INVERSE_MS, TABLE_CURRENTS, TABLE_LEN, VERY_INVERSE_MS,
};
use tower_chip::relay::PICKUP_CURRENT;

/// Current beyond which the trip time stops falling (definite minimum time).
pub const MINIMUM_TIME_CURRENT: f32 = 20.0;

/// IDMT curve selected for the relay (stored in flash)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Characteristic {
    /// Standard inverse, `k = 0.14`, `a = 0.02`
    #[default]
    Inverse = 0,
    /// Very inverse, `k = 13.5`, `a = 1`
    VeryInverse = 1,
    /// Extremely inverse, `k = 80`, `a = 2`
    ExtremelyInverse = 2,
}

impl Characteristic {
    /// All curves in protocol order
    pub const ALL: [Self; 3] = [Self::Inverse, Self::VeryInverse, Self::ExtremelyInverse];

    /// `(k, a)` of `t = k / (I^a − 1)`
    pub const fn constants(self) -> (f64, f64) {
        match self {
            Self::Inverse => constants::INVERSE,
            Self::VeryInverse => constants::VERY_INVERSE,
            Self::ExtremelyInverse => constants::EXTREMELY_INVERSE,
        }
    }

    /// Firmware lookup table (ms at 1.03, 2, 3 … 20)
    pub const fn table(self) -> &'static [u32; TABLE_LEN] {
        match self {
            Self::Inverse => &INVERSE_MS,
            Self::VeryInverse => &VERY_INVERSE_MS,
            Self::ExtremelyInverse => &EXTREMELY_INVERSE_MS,
        }
    }

    /// Protocol byte
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Short name used on the command line
    pub const fn name(self) -> &'static str {
        match self {
            Self::Inverse => "inverse",
            Self::VeryInverse => "very",
            Self::ExtremelyInverse => "extremely",
        }
    }
}

impl TryFrom<u8> for Characteristic {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Inverse),
            1 => Ok(Self::VeryInverse),
            2 => Ok(Self::ExtremelyInverse),
            other => Err(other),
        }
    }
}

impl std::str::FromStr for Characteristic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inverse" | "inv" | "0" => Ok(Self::Inverse),
            "very" | "very-inverse" | "1" => Ok(Self::VeryInverse),
            "extremely" | "extremely-inverse" | "2" => Ok(Self::ExtremelyInverse),
            other => Err(format!("unknown characteristic '{other}'")),
        }
    }
}

impl std::fmt::Display for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inverse => write!(f, "Inverse"),
            Self::VeryInverse => write!(f, "Very inverse"),
            Self::ExtremelyInverse => write!(f, "Extremely inverse"),
        }
    }
}

/// Trip time in ms for `irms`, or `None` below pickup
///
/// Evaluates the curve formula, holding the time constant above
/// [`MINIMUM_TIME_CURRENT`].
pub fn trip_time_ms(characteristic: Characteristic, irms: f32) -> Option<u32> {
    if irms < PICKUP_CURRENT {
        return None;
    }
    let current = irms.min(MINIMUM_TIME_CURRENT);
    let ms = formula_trip_time_ms(characteristic, current);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let ms = ms.round().min(f64::from(u32::MAX)) as u32;
    Some(ms)
}

/// Raw curve `k / (I^a − 1)` in ms (infinite at or below 1 A)
pub fn formula_trip_time_ms(characteristic: Characteristic, irms: f32) -> f64 {
    let (k, a) = characteristic.constants();
    let denominator = f64::from(irms).powf(a) - 1.0;
    if denominator <= 0.0 {
        return f64::INFINITY;
    }
    k / denominator * 1000.0
}

/// Trip time from the firmware lookup table with linear interpolation
///
/// `None` below pickup; the last entry above 20 A.
pub fn table_trip_time_ms(characteristic: Characteristic, irms: f32) -> Option<u32> {
    if irms < PICKUP_CURRENT {
        return None;
    }
    let table = characteristic.table();
    if irms >= TABLE_CURRENTS[TABLE_LEN - 1] {
        return Some(table[TABLE_LEN - 1]);
    }
    let upper = TABLE_CURRENTS.iter().position(|&c| c > irms)?;
    let lower = upper - 1;
    let span = TABLE_CURRENTS[upper] - TABLE_CURRENTS[lower];
    let fraction = f64::from((irms - TABLE_CURRENTS[lower]) / span);
    let (t0, t1) = (f64::from(table[lower]), f64::from(table[upper]));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let ms = (t0 + (t1 - t0) * fraction).round() as u32;
    Some(ms)
}

/// State of one phase's trip timer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerState {
    /// Current below pickup
    Idle,
    /// Timing; `progress` is the fraction of the trip time used so far
    Timing {
        /// 0.0 ..< 1.0
        progress: f64,
    },
    /// Trip issued; held until the current falls below pickup
    Tripped,
}

/// Transition reported by [`TripTimer::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Nothing changed
    None,
    /// Current rose above pickup
    Started,
    /// Trip time elapsed
    Tripped,
    /// Current fell below pickup (or timing was blocked)
    Reset,
}

/// Induction-disc style trip timer for one phase
///
/// Every update adds `Δt / t(I)` to the progress, where `t(I)` is the trip
/// time at the present current. A change of current therefore keeps the
/// fraction already elapsed and runs the remaining fraction at the new
/// rate. The phase trips when progress reaches one.
#[derive(Debug, Clone)]
pub struct TripTimer {
    state: TimerState,
    last_ms: u32,
}

impl Default for TripTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TripTimer {
    /// Idle timer
    pub const fn new() -> Self {
        Self {
            state: TimerState::Idle,
            last_ms: 0,
        }
    }

    /// Current state
    pub const fn state(&self) -> TimerState {
        self.state
    }

    /// Whether the phase is timing towards a trip
    pub const fn is_timing(&self) -> bool {
        matches!(self.state, TimerState::Timing { .. })
    }

    /// Whether the phase has tripped
    pub const fn is_tripped(&self) -> bool {
        matches!(self.state, TimerState::Tripped)
    }

    /// Feed the latest RMS current
    ///
    /// `blocked` suppresses timing (sensitive mode with the frequency out
    /// of band) exactly as a sub-pickup current does.
    pub fn update(
        &mut self,
        irms: f32,
        now_ms: u32,
        characteristic: Characteristic,
        blocked: bool,
    ) -> TimerEvent {
        let trip_time = if blocked {
            None
        } else {
            trip_time_ms(characteristic, irms)
        };

        let Some(trip_time) = trip_time else {
            let was_idle = matches!(self.state, TimerState::Idle);
            self.state = TimerState::Idle;
            self.last_ms = now_ms;
            return if was_idle {
                TimerEvent::None
            } else {
                TimerEvent::Reset
            };
        };

        let elapsed = now_ms.wrapping_sub(self.last_ms);
        self.last_ms = now_ms;

        match self.state {
            TimerState::Idle => {
                self.state = TimerState::Timing { progress: 0.0 };
                TimerEvent::Started
            }
            TimerState::Tripped => TimerEvent::None,
            TimerState::Timing { progress } => {
                let progress = progress + f64::from(elapsed) / f64::from(trip_time.max(1));
                if progress >= 1.0 {
                    self.state = TimerState::Tripped;
                    TimerEvent::Tripped
                } else {
                    self.state = TimerState::Timing { progress };
                    TimerEvent::None
                }
            }
        }
    }

    /// Milliseconds left before a trip at `irms`, if timing
    pub fn remaining_ms(&self, irms: f32, characteristic: Characteristic) -> Option<u32> {
        let TimerState::Timing { progress } = self.state else {
            return None;
        };
        let trip_time = trip_time_ms(characteristic, irms)?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let remaining = ((1.0 - progress) * f64::from(trip_time)).ceil() as u32;
        Some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_pickup_never_trips() {
        assert_eq!(trip_time_ms(Characteristic::Inverse, 1.0), None);
        assert_eq!(trip_time_ms(Characteristic::Inverse, 1.029), None);
        assert!(trip_time_ms(Characteristic::Inverse, 1.03).is_some());
    }

    #[test]
    fn formula_matches_table_at_integer_points() {
        for c in Characteristic::ALL {
            for (i, &amps) in TABLE_CURRENTS.iter().enumerate().skip(1) {
                let formula = trip_time_ms(c, amps).unwrap();
                let table = c.table()[i];
                assert!(formula.abs_diff(table) <= 1, "{c} @ {amps}: {formula} vs {table}");
            }
        }
    }

    #[test]
    fn minimum_time_above_twenty_amps() {
        for c in Characteristic::ALL {
            assert_eq!(trip_time_ms(c, 35.0), trip_time_ms(c, 20.0));
            assert_eq!(table_trip_time_ms(c, 35.0), Some(c.table()[TABLE_LEN - 1]));
        }
        assert_eq!(trip_time_ms(Characteristic::ExtremelyInverse, 50.0), Some(201));
    }

    #[test]
    fn table_interpolates_between_points() {
        // halfway between 4 A (4500) and 5 A (3375)
        assert_eq!(
            table_trip_time_ms(Characteristic::VeryInverse, 4.5),
            Some(3938)
        );
        assert_eq!(table_trip_time_ms(Characteristic::VeryInverse, 1.0), None);
        assert_eq!(
            table_trip_time_ms(Characteristic::Inverse, 1.03),
            Some(236_746)
        );
    }

    #[test]
    fn characteristic_bytes() {
        assert_eq!(Characteristic::try_from(2), Ok(Characteristic::ExtremelyInverse));
        assert_eq!(Characteristic::try_from(3), Err(3));
        assert_eq!(Characteristic::VeryInverse.as_byte(), 1);
        assert_eq!("very".parse::<Characteristic>(), Ok(Characteristic::VeryInverse));
        assert!("steep".parse::<Characteristic>().is_err());
    }

    #[test]
    fn constant_current_trips_on_time() {
        let c = Characteristic::VeryInverse;
        let t = trip_time_ms(c, 10.0).unwrap(); // 1500 ms
        let mut timer = TripTimer::new();
        assert_eq!(timer.update(10.0, 0, c, false), TimerEvent::Started);

        let mut now = 0;
        let mut tripped_at = None;
        while now < 5000 {
            now += 10;
            if timer.update(10.0, now, c, false) == TimerEvent::Tripped {
                tripped_at = Some(now);
                break;
            }
        }
        // summed steps may land a hair under 1.0 at exactly t
        let tripped_at = tripped_at.unwrap();
        assert!((t..=t + 10).contains(&tripped_at), "tripped at {tripped_at}, curve {t}");
        assert!(timer.is_tripped());
    }

    #[test]
    fn dropout_resets_progress() {
        let c = Characteristic::ExtremelyInverse;
        let mut timer = TripTimer::new();
        timer.update(5.0, 0, c, false);
        timer.update(5.0, 2000, c, false);
        assert!(timer.is_timing());
        assert_eq!(timer.update(0.5, 2010, c, false), TimerEvent::Reset);
        assert_eq!(timer.state(), TimerState::Idle);
        assert_eq!(timer.update(0.5, 2020, c, false), TimerEvent::None);
    }

    #[test]
    fn changed_current_keeps_elapsed_fraction() {
        let c = Characteristic::VeryInverse;
        let mut timer = TripTimer::new();
        timer.update(4.0, 0, c, false); // 4500 ms curve
        timer.update(4.0, 2250, c, false); // half way
        assert_eq!(timer.remaining_ms(10.0, c), Some(750)); // half of 1500

        // finish at the higher current
        assert_eq!(timer.update(10.0, 2250 + 749, c, false), TimerEvent::None);
        assert_eq!(timer.update(10.0, 2250 + 760, c, false), TimerEvent::Tripped);
    }

    #[test]
    fn blocked_timer_does_not_time() {
        let c = Characteristic::Inverse;
        let mut timer = TripTimer::new();
        assert_eq!(timer.update(15.0, 0, c, true), TimerEvent::None);
        assert_eq!(timer.update(15.0, 100_000, c, true), TimerEvent::None);
        assert!(!timer.is_timing());
    }

    #[test]
    fn tripped_latches_until_dropout() {
        let c = Characteristic::ExtremelyInverse;
        let mut timer = TripTimer::new();
        timer.update(20.0, 0, c, false);
        assert_eq!(timer.update(20.0, 201, c, false), TimerEvent::Tripped);
        assert_eq!(timer.update(20.0, 400, c, false), TimerEvent::None);
        assert!(timer.is_tripped());
        assert_eq!(timer.update(0.0, 500, c, false), TimerEvent::Reset);
    }
}
