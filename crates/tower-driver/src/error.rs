//! Error types for Tower driver operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Tower driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors raised while decoding packets off the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Frame is not exactly one packet long
    #[error("Packet frame is {len} bytes (expected {expected})")]
    Length {
        /// Bytes supplied
        len: usize,
        /// Bytes in a packet
        expected: usize,
    },

    /// Checksum byte does not match the payload
    #[error("Checksum mismatch: frame carries {actual:#04x}, payload gives {expected:#04x}")]
    Checksum {
        /// Checksum computed from the payload
        expected: u8,
        /// Checksum carried in the frame
        actual: u8,
    },
}

/// Errors that can occur while emulating Tower peripherals or running the relay
#[derive(Debug, Error)]
pub enum DriverError {
    /// Baud rate cannot be produced from the module clock
    #[error("Baud rate {baud} unreachable from a {module_clock} Hz module clock")]
    InvalidBaud {
        /// Requested baud rate
        baud: u32,
        /// Module clock in Hz
        module_clock: u32,
    },

    /// Analog channel index out of range
    #[error("Analog channel {channel} out of range (have {count} channels)")]
    InvalidChannel {
        /// Requested channel
        channel: u8,
        /// Number of channels
        count: usize,
    },

    /// No free, aligned slot left in the flash phrase
    #[error("No room in flash for a {size}-byte variable")]
    FlashFull {
        /// Requested size
        size: usize,
    },

    /// Flash variable width is not 1, 2 or 4 bytes, or does not match the access
    #[error("Invalid flash access width {size}")]
    FlashInvalidSize {
        /// Offending width
        size: usize,
    },

    /// Flash offset outside the data phrase
    #[error("Flash offset {offset} outside the data phrase")]
    FlashOutOfRange {
        /// Offending offset
        offset: usize,
    },

    /// Flash backing file could not be read or written
    #[error("Flash backing file {path}: {source}")]
    FlashBacking {
        /// Backing file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Malformed packet
    #[error("Packet error: {source}")]
    Packet {
        /// Decoding failure
        #[from]
        source: PacketError,
    },

    /// I/O error on a serial link
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {reason}")]
    Config {
        /// Reason for failure
        reason: String,
    },

    /// FIFO or semaphore was closed while waiting on it
    #[error("Channel closed")]
    Closed,
}

impl DriverError {
    /// Create an invalid channel error
    pub fn invalid_channel(channel: u8, count: usize) -> Self {
        Self::InvalidChannel { channel, count }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a flash backing-file error
    pub fn flash_backing(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FlashBacking {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while executing a received command
#[derive(Debug, Error)]
pub enum CommandError {
    /// Command byte not handled by the relay
    #[error("Unknown command {command:#04x}")]
    UnknownCommand {
        /// Command byte with the ACK bit stripped
        command: u8,
    },

    /// Parameters do not match any form of the command
    #[error("Invalid parameters {parameters:02x?} for command {command:#04x}")]
    InvalidParameters {
        /// Command byte with the ACK bit stripped
        command: u8,
        /// `parameter1..=parameter3`
        parameters: [u8; 3],
    },

    /// Peripheral access failed while executing the command
    #[error(transparent)]
    Driver(#[from] DriverError),
}
