//! Tower protocol packets and the incremental frame decoder

use bytes::{Buf, BytesMut};
use tower_chip::protocol::{self, ACK_MASK, PACKET_SIZE};

use crate::error::PacketError;

/// One Tower protocol packet (checksum implied)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Packet {
    /// Command byte, possibly carrying the ACK bit
    pub command: u8,
    /// First parameter
    pub parameter1: u8,
    /// Second parameter
    pub parameter2: u8,
    /// Third parameter
    pub parameter3: u8,
}

impl Packet {
    /// Create a packet
    pub const fn new(command: u8, parameter1: u8, parameter2: u8, parameter3: u8) -> Self {
        Self {
            command,
            parameter1,
            parameter2,
            parameter3,
        }
    }

    /// Create a packet whose second and third parameters carry a half-word (lo, hi)
    pub const fn with_half_word(command: u8, parameter1: u8, value: u16) -> Self {
        let [lo, hi] = value.to_le_bytes();
        Self::new(command, parameter1, lo, hi)
    }

    /// XOR checksum of the payload
    pub const fn checksum(&self) -> u8 {
        protocol::checksum(
            self.command,
            self.parameter1,
            self.parameter2,
            self.parameter3,
        )
    }

    /// Wire form, checksum last
    pub const fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        [
            self.command,
            self.parameter1,
            self.parameter2,
            self.parameter3,
            self.checksum(),
        ]
    }

    /// Decode exactly one frame
    ///
    /// # Errors
    ///
    /// Returns error if the slice is not five bytes or the checksum is wrong.
    pub fn from_bytes(frame: &[u8]) -> Result<Self, PacketError> {
        let &[command, parameter1, parameter2, parameter3, checksum] = frame else {
            return Err(PacketError::Length {
                len: frame.len(),
                expected: PACKET_SIZE,
            });
        };
        let packet = Self::new(command, parameter1, parameter2, parameter3);
        if packet.checksum() != checksum {
            return Err(PacketError::Checksum {
                expected: packet.checksum(),
                actual: checksum,
            });
        }
        Ok(packet)
    }

    /// `parameter1` and `parameter2` as a big-endian half-word
    pub const fn parameter12(&self) -> u16 {
        u16::from_be_bytes([self.parameter1, self.parameter2])
    }

    /// `parameter2` and `parameter3` as a big-endian half-word
    pub const fn parameter23(&self) -> u16 {
        u16::from_be_bytes([self.parameter2, self.parameter3])
    }

    /// `parameter2` (lo) and `parameter3` (hi) as a little-endian half-word
    pub const fn half_word(&self) -> u16 {
        u16::from_le_bytes([self.parameter2, self.parameter3])
    }

    /// Whether the sender asked for an ACK/NAK
    pub const fn is_ack_requested(&self) -> bool {
        self.command & ACK_MASK != 0
    }

    /// Same packet with the ACK bit cleared
    #[must_use]
    pub const fn without_ack(mut self) -> Self {
        self.command &= !ACK_MASK;
        self
    }

    /// Same packet with the ACK bit set
    #[must_use]
    pub const fn with_ack(mut self) -> Self {
        self.command |= ACK_MASK;
        self
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:02x} {:02x} {:02x} {:02x} | {:02x}]",
            self.command,
            self.parameter1,
            self.parameter2,
            self.parameter3,
            self.checksum()
        )
    }
}

/// Incremental frame decoder
///
/// Bytes are fed one at a time as they come out of the receive FIFO. Once
/// five bytes are staged the checksum is tested: a match yields the packet
/// and empties the stage, a mismatch drops the oldest byte so the decoder
/// slides along the stream until it lands on a frame boundary again.
#[derive(Debug)]
pub struct PacketFramer {
    stage: BytesMut,
    discarded: u64,
}

impl Default for PacketFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketFramer {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self {
            stage: BytesMut::with_capacity(PACKET_SIZE),
            discarded: 0,
        }
    }

    /// Feed one byte, returning a packet when a valid frame completes
    pub fn push(&mut self, byte: u8) -> Option<Packet> {
        self.stage.extend_from_slice(&[byte]);
        if self.stage.len() < PACKET_SIZE {
            return None;
        }

        match Packet::from_bytes(&self.stage[..PACKET_SIZE]) {
            Ok(packet) => {
                self.stage.clear();
                Some(packet)
            }
            Err(e) => {
                tracing::debug!("Framer resync: {e}");
                self.stage.advance(1);
                self.discarded += 1;
                None
            }
        }
    }

    /// Feed a run of bytes, collecting every packet that completes
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<Packet> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Bytes currently staged
    pub fn pending(&self) -> usize {
        self.stage.len()
    }

    /// Bytes dropped while resynchronising
    pub const fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.stage.clear();
    }
}
