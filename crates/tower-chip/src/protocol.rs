//! Tower Serial Communication Protocol.
//!
//! Every packet is five bytes on the wire:
//!
//! ```text
//! [command] [parameter1] [parameter2] [parameter3] [checksum]
//! checksum = command ^ parameter1 ^ parameter2 ^ parameter3
//! ```
//!
//! Bit 7 of the command byte requests an acknowledgement. The Tower echoes
//! the packet with bit 7 set when the command succeeded (ACK) and cleared
//! when it failed (NAK).

/// Bytes in one packet, checksum included.
pub const PACKET_SIZE: usize = 5;

/// Acknowledgement request / ACK bit in the command byte.
pub const ACK_MASK: u8 = 0x80;

// ── Tower standard commands ──────────────────────────────────────────────────

/// Command bytes defined by the Tower protocol document.
pub mod command {
    /// Startup handshake; the Tower answers with startup, version, number and mode.
    pub const STARTUP: u8 = 0x04;
    /// Program one byte of the flash data phrase, or erase it (address 8).
    pub const FLASH_PROGRAM: u8 = 0x07;
    /// Read one byte of the flash data phrase.
    pub const FLASH_READ: u8 = 0x08;
    /// Firmware version (special command).
    pub const VERSION: u8 = 0x09;
    /// Tower number get/set.
    pub const TOWER_NUMBER: u8 = 0x0B;
    /// Tower mode get/set.
    pub const TOWER_MODE: u8 = 0x0D;

    // ── Directional overcurrent relay ────────────────────────────────────────

    /// DOR query/set (characteristic, currents, frequency, trips, last fault).
    pub const DOR: u8 = 0x70;
    /// Per-phase RMS current reply.
    pub const DOR_CURRENT: u8 = 0x71;

    // ── DOR diagnostics ──────────────────────────────────────────────────────

    /// Instantaneous current on one analog input.
    pub const ANALOG_GET: u8 = 0x11;
    /// Assorted relay values (characteristic, frequency, trips, fault, mode).
    pub const DOR_VALUES: u8 = 0x12;
    /// Select the IDMT characteristic.
    pub const SET_CHAR: u8 = 0x13;
    /// Toggle frequency-sensitive mode.
    pub const SET_MODE: u8 = 0x14;
}

// ── Sub-command parameters ───────────────────────────────────────────────────

/// `parameter1` of tower number / tower mode packets.
pub mod access {
    /// Read the stored value.
    pub const GET: u8 = 1;
    /// Overwrite the stored value with `parameter2` (lo) / `parameter3` (hi).
    pub const SET: u8 = 2;
}

/// `parameter1` selectors of the [`command::DOR`] packet.
pub mod dor {
    /// Characteristic get (`0,1,0`) / set (`0,2,c`).
    pub const CHARACTERISTIC: u8 = 0;
    /// Per-phase currents as three [`super::command::DOR_CURRENT`] replies.
    pub const CURRENTS: u8 = 1;
    /// Measured frequency.
    pub const FREQUENCY: u8 = 2;
    /// Times the relay has tripped (persisted).
    pub const TIMES_TRIPPED: u8 = 3;
    /// Number of phases involved in the last fault.
    pub const LAST_FAULT: u8 = 4;

    /// `parameter2` of a characteristic get.
    pub const CHARACTERISTIC_GET: u8 = 1;
    /// `parameter2` of a characteristic set.
    pub const CHARACTERISTIC_SET: u8 = 2;
}

/// `parameter1` selectors of the [`command::DOR_VALUES`] packet.
pub mod dor_values {
    /// Characteristic in use.
    pub const CHARACTERISTIC: u8 = 0;
    /// Frequency of one phase (`parameter2` = channel).
    pub const FREQUENCY: u8 = 1;
    /// Times tripped (low byte).
    pub const TIMES_TRIPPED: u8 = 2;
    /// Last fault type.
    pub const LAST_FAULT: u8 = 3;
    /// Sensitive mode flag.
    pub const SENSITIVE_MODE: u8 = 4;
}

/// Address `parameter1` of a flash program packet that erases the phrase.
pub const FLASH_ERASE_ADDRESS: u8 = 8;

// ── Identity ─────────────────────────────────────────────────────────────────

/// Firmware major version reported by the version packet.
pub const VERSION_MAJOR: u8 = 6;
/// Firmware minor version.
pub const VERSION_MINOR: u8 = 0;
/// `parameter1` of the version reply.
pub const VERSION_TAG: u8 = b'v';
/// `parameter2` of a version request.
pub const VERSION_REQUEST_TAG: u8 = b'x';
/// `parameter3` of a version request (carriage return).
pub const VERSION_REQUEST_END: u8 = 0x0D;

/// Tower number written to erased flash at start-up.
pub const DEFAULT_TOWER_NUMBER: u16 = 0x25C4;
/// Tower mode written to erased flash at start-up.
pub const DEFAULT_TOWER_MODE: u16 = 0x0001;

/// XOR checksum of the four payload bytes.
#[must_use]
pub const fn checksum(command: u8, parameter1: u8, parameter2: u8, parameter3: u8) -> u8 {
    command ^ parameter1 ^ parameter2 ^ parameter3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_xor_of_payload() {
        assert_eq!(checksum(0x04, 0, 0, 0), 0x04);
        assert_eq!(checksum(0x09, b'v', 6, 0), 0x09 ^ 0x76 ^ 0x06);
    }

    #[test]
    fn command_bytes_leave_ack_bit_clear() {
        for cmd in [
            command::STARTUP,
            command::FLASH_PROGRAM,
            command::FLASH_READ,
            command::VERSION,
            command::TOWER_NUMBER,
            command::TOWER_MODE,
            command::DOR,
            command::DOR_CURRENT,
            command::ANALOG_GET,
            command::DOR_VALUES,
            command::SET_CHAR,
            command::SET_MODE,
        ] {
            assert_eq!(cmd & ACK_MASK, 0, "command {cmd:#04x}");
        }
    }
}
