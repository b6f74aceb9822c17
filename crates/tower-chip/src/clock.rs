//! Clock arithmetic for the UART baud generator and the PIT.

/// Bus clock feeding UART2 and the PIT (Hz).
pub const BUS_CLOCK_HZ: u32 = 50_000_000;

/// Baud rate used by the Tower protocol.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Largest value of the 13-bit UART SBR field.
pub const UART_SBR_MAX: u32 = 8191;

/// PIT load value for a period in nanoseconds at [`BUS_CLOCK_HZ`].
///
/// One bus tick is 20 ns, so `LDVAL = period / 20 − 1`.
#[must_use]
pub const fn pit_load_value(period_ns: u32) -> u32 {
    (period_ns / 20).saturating_sub(1)
}

/// UART baud rate divisor fields `(sbr, brfa)`.
///
/// `sbr + brfa/32 = module_clock / (16 · baud)`. Returns `None` when the
/// baud rate is zero or the divisor does not fit the 13-bit SBR field.
#[must_use]
pub const fn uart_divisor(baud: u32, module_clock: u32) -> Option<(u16, u8)> {
    if baud == 0 {
        return None;
    }
    let denominator = 16 * baud as u64;
    let sbr = module_clock as u64 / denominator;
    if sbr == 0 || sbr > UART_SBR_MAX as u64 {
        return None;
    }
    let brfa = (32 * module_clock as u64) / denominator - 32 * sbr;
    #[allow(clippy::cast_possible_truncation)]
    let fields = (sbr as u16, brfa as u8);
    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tower_baud_divisor() {
        // 50 MHz / (16 × 115200) = 27.126 → SBR 27, BRFA 4
        assert_eq!(uart_divisor(DEFAULT_BAUD_RATE, BUS_CLOCK_HZ), Some((27, 4)));
    }

    #[test]
    fn divisor_out_of_range() {
        assert_eq!(uart_divisor(0, BUS_CLOCK_HZ), None);
        assert_eq!(uart_divisor(300, BUS_CLOCK_HZ), None); // SBR 10416 > 8191
        assert_eq!(uart_divisor(10_000_000, BUS_CLOCK_HZ), None);
    }

    #[test]
    fn pit_load() {
        // 1.25 ms, sixteen samples of a 50 Hz cycle
        assert_eq!(pit_load_value(1_250_000), 62_499);
        assert_eq!(pit_load_value(0), 0);
    }
}
