//! IDMT (inverse definite minimum time) trip-time tables.
//!
//! Each curve follows the IEC 60255 form `t = k / (I^a − 1)` seconds, with
//! `I` the RMS current in multiples of the setting. The tables hold the
//! trip time in milliseconds at `I = 1.03` followed by every integer from
//! 2 to 20; the relay interpolates linearly between entries.

/// Number of entries per table.
pub const TABLE_LEN: usize = 20;

/// Current (multiples of setting) of each table entry.
pub const TABLE_CURRENTS: [f32; TABLE_LEN] = [
    1.03, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0,
    17.0, 18.0, 19.0, 20.0,
];

/// Inverse curve, `k = 0.14`, `a = 0.02`.
pub const INVERSE_MS: [u32; TABLE_LEN] = [
    236_746, 10029, 6302, 4980, 4280, 3837, 3528, 3296, 3116, 2971, 2850, 2748, 2660, 2583,
    2516, 2455, 2401, 2352, 2308, 2267,
];

/// Very inverse curve, `k = 13.5`, `a = 1`.
pub const VERY_INVERSE_MS: [u32; TABLE_LEN] = [
    450_000, 13500, 6750, 4500, 3375, 2700, 2250, 1929, 1688, 1500, 1350, 1227, 1125, 1038,
    964, 900, 844, 794, 750, 711,
];

/// Extremely inverse curve, `k = 80`, `a = 2`.
pub const EXTREMELY_INVERSE_MS: [u32; TABLE_LEN] = [
    1_313_629, 26667, 10000, 5333, 3333, 2286, 1667, 1270, 1000, 808, 667, 559, 476, 410, 357,
    314, 278, 248, 222, 201,
];

/// Curve constants `(k, a)`.
pub mod constants {
    /// Inverse.
    pub const INVERSE: (f64, f64) = (0.14, 0.02);
    /// Very inverse.
    pub const VERY_INVERSE: (f64, f64) = (13.5, 1.0);
    /// Extremely inverse.
    pub const EXTREMELY_INVERSE: (f64, f64) = (80.0, 2.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula_ms((k, a): (f64, f64), i: f64) -> f64 {
        k / (i.powf(a) - 1.0) * 1000.0
    }

    #[test]
    fn tables_are_monotonic_decreasing() {
        for table in [INVERSE_MS, VERY_INVERSE_MS, EXTREMELY_INVERSE_MS] {
            assert!(table.windows(2).all(|w| w[0] > w[1]));
        }
    }

    #[test]
    fn integer_entries_match_formula() {
        let curves = [
            (INVERSE_MS, constants::INVERSE),
            (VERY_INVERSE_MS, constants::VERY_INVERSE),
            (EXTREMELY_INVERSE_MS, constants::EXTREMELY_INVERSE),
        ];
        for (table, constants) in curves {
            for idx in 1..TABLE_LEN {
                let expected = formula_ms(constants, f64::from(TABLE_CURRENTS[idx]));
                let got = f64::from(table[idx]);
                assert!(
                    (got - expected).abs() <= 1.0,
                    "entry {idx}: table {got} vs formula {expected:.1}"
                );
            }
        }
    }
}
