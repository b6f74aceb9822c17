//! Flash data phrase.
//!
//! The relay keeps its non-volatile settings in a single 8-byte phrase of the
//! K70 program flash. Writes are read-modify-erase-program cycles of the whole
//! phrase; an erased byte reads `0xFF`.

/// Address of the data phrase in the K70 memory map.
pub const DATA_START: u32 = 0x0008_0000;

/// Size of the data phrase in bytes.
pub const DATA_SIZE: usize = 8;

/// Value of an erased byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Value of an erased half-word.
pub const ERASED_HALF_WORD: u16 = 0xFFFF;

/// Whether `size` is a legal variable width (byte, half-word, word).
#[must_use]
pub const fn is_valid_var_size(size: usize) -> bool {
    matches!(size, 1 | 2 | 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_widths() {
        assert!(is_valid_var_size(2));
        assert!(!is_valid_var_size(3));
        assert!(!is_valid_var_size(8));
    }
}
