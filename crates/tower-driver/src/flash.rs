//! Flash data phrase emulation
//!
//! The K70 programs flash a phrase (8 bytes) at a time, so every write reads
//! the phrase, patches the variable, erases the sector and programs the
//! phrase back. Variables are allocated at naturally aligned offsets inside
//! the phrase. An optional backing file keeps the phrase across restarts.

use std::fs;
use std::path::{Path, PathBuf};

use tower_chip::flash::{is_valid_var_size, DATA_SIZE, DATA_START, ERASED_BYTE};
use tracing::{debug, info};

use crate::error::{DriverError, Result};

/// Allocated flash variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashVar {
    offset: usize,
    size: usize,
}

impl FlashVar {
    /// Byte offset inside the phrase
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Width in bytes
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Absolute address in the K70 memory map
    #[allow(clippy::cast_possible_truncation)]
    pub const fn address(&self) -> u32 {
        DATA_START + self.offset as u32
    }
}

/// Emulated flash data phrase
#[derive(Debug)]
pub struct Flash {
    phrase: [u8; DATA_SIZE],
    allocated: [bool; DATA_SIZE],
    backing: Option<PathBuf>,
}

impl Default for Flash {
    fn default() -> Self {
        Self::new()
    }
}

impl Flash {
    /// Erased, volatile flash
    pub const fn new() -> Self {
        Self {
            phrase: [ERASED_BYTE; DATA_SIZE],
            allocated: [false; DATA_SIZE],
            backing: None,
        }
    }

    /// Flash persisted to `path`
    ///
    /// Loads the phrase if the file exists; a missing file starts erased.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or is the wrong size.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut flash = Self::new();
        match fs::read(path) {
            Ok(bytes) => {
                flash.phrase = bytes.as_slice().try_into().map_err(|_| {
                    DriverError::config(format!(
                        "flash image {} is {} bytes (expected {DATA_SIZE})",
                        path.display(),
                        bytes.len()
                    ))
                })?;
                info!("Flash: loaded {}", path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Flash: {} not found, starting erased", path.display());
            }
            Err(e) => return Err(DriverError::flash_backing(path, e)),
        }
        flash.backing = Some(path.to_path_buf());
        Ok(flash)
    }

    /// Reserve a `size`-byte variable at the first free aligned offset
    ///
    /// # Errors
    ///
    /// Returns error if `size` is not 1, 2 or 4, or no aligned slot is free.
    pub fn allocate(&mut self, size: usize) -> Result<FlashVar> {
        if !is_valid_var_size(size) {
            return Err(DriverError::FlashInvalidSize { size });
        }
        let offset = (0..DATA_SIZE)
            .step_by(size)
            .find(|&o| self.allocated[o..o + size].iter().all(|used| !used))
            .ok_or(DriverError::FlashFull { size })?;
        self.allocated[offset..offset + size].fill(true);
        debug!("Flash: allocated {size} byte(s) at offset {offset}");
        Ok(FlashVar { offset, size })
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Read a byte variable
    ///
    /// # Errors
    ///
    /// Returns error if `var` is not one byte wide.
    pub fn read8(&self, var: FlashVar) -> Result<u8> {
        Self::check_width(var, 1)?;
        Ok(self.phrase[var.offset])
    }

    /// Read a half-word variable (little-endian)
    ///
    /// # Errors
    ///
    /// Returns error if `var` is not two bytes wide.
    pub fn read16(&self, var: FlashVar) -> Result<u16> {
        Self::check_width(var, 2)?;
        Ok(u16::from_le_bytes([
            self.phrase[var.offset],
            self.phrase[var.offset + 1],
        ]))
    }

    /// Read a word variable (little-endian)
    ///
    /// # Errors
    ///
    /// Returns error if `var` is not four bytes wide.
    pub fn read32(&self, var: FlashVar) -> Result<u32> {
        Self::check_width(var, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.phrase[var.offset..var.offset + 4]);
        Ok(u32::from_le_bytes(word))
    }

    /// Read any byte of the phrase
    ///
    /// # Errors
    ///
    /// Returns error if `offset` is outside the phrase.
    pub fn read_byte(&self, offset: usize) -> Result<u8> {
        self.phrase
            .get(offset)
            .copied()
            .ok_or(DriverError::FlashOutOfRange { offset })
    }

    /// Copy of the whole phrase
    pub const fn phrase(&self) -> [u8; DATA_SIZE] {
        self.phrase
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Write a byte variable
    ///
    /// # Errors
    ///
    /// Returns error if `var` is not one byte wide or persisting fails.
    pub fn write8(&mut self, var: FlashVar, value: u8) -> Result<()> {
        Self::check_width(var, 1)?;
        self.program(var.offset, &[value])
    }

    /// Write a half-word variable (little-endian)
    ///
    /// # Errors
    ///
    /// Returns error if `var` is not two bytes wide or persisting fails.
    pub fn write16(&mut self, var: FlashVar, value: u16) -> Result<()> {
        Self::check_width(var, 2)?;
        self.program(var.offset, &value.to_le_bytes())
    }

    /// Write a word variable (little-endian)
    ///
    /// # Errors
    ///
    /// Returns error if `var` is not four bytes wide or persisting fails.
    pub fn write32(&mut self, var: FlashVar, value: u32) -> Result<()> {
        Self::check_width(var, 4)?;
        self.program(var.offset, &value.to_le_bytes())
    }

    /// Program any byte of the phrase
    ///
    /// # Errors
    ///
    /// Returns error if `offset` is outside the phrase or persisting fails.
    pub fn program_byte(&mut self, offset: usize, value: u8) -> Result<()> {
        if offset >= DATA_SIZE {
            return Err(DriverError::FlashOutOfRange { offset });
        }
        self.program(offset, &[value])
    }

    /// Erase the phrase to `0xFF`
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails.
    pub fn erase(&mut self) -> Result<()> {
        self.phrase = [ERASED_BYTE; DATA_SIZE];
        debug!("Flash: sector erased");
        self.persist()
    }

    fn program(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut phrase = self.phrase;
        phrase[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.phrase = phrase;
        debug!("Flash: programmed {:02x?} at offset {offset}", bytes);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(path) = &self.backing {
            fs::write(path, self.phrase).map_err(|e| DriverError::flash_backing(path, e))?;
        }
        Ok(())
    }

    fn check_width(var: FlashVar, size: usize) -> Result<()> {
        if var.size == size {
            Ok(())
        } else {
            Err(DriverError::FlashInvalidSize { size })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_erased() {
        let flash = Flash::new();
        assert_eq!(flash.phrase(), [0xFF; DATA_SIZE]);
    }

    #[test]
    fn allocation_is_aligned_and_packed() {
        let mut flash = Flash::new();
        let a = flash.allocate(1).unwrap();
        let b = flash.allocate(2).unwrap();
        let c = flash.allocate(2).unwrap();
        let d = flash.allocate(2).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 2);
        assert_eq!(c.offset(), 4);
        assert_eq!(d.offset(), 6);
        assert_eq!(d.address(), 0x0008_0006);
        // offset 1 is the only hole left
        assert_eq!(flash.allocate(1).unwrap().offset(), 1);
        assert!(matches!(flash.allocate(1), Err(DriverError::FlashFull { size: 1 })));
    }

    #[test]
    fn rejects_odd_sizes() {
        let mut flash = Flash::new();
        assert!(matches!(flash.allocate(3), Err(DriverError::FlashInvalidSize { size: 3 })));
        assert!(matches!(flash.allocate(8), Err(DriverError::FlashInvalidSize { size: 8 })));
    }

    #[test]
    fn word_allocation_needs_aligned_room() {
        let mut flash = Flash::new();
        flash.allocate(1).unwrap();
        let w = flash.allocate(4).unwrap();
        assert_eq!(w.offset(), 4);
        assert!(flash.allocate(4).is_err());
    }

    #[test]
    fn writes_preserve_neighbours() {
        let mut flash = Flash::new();
        let byte = flash.allocate(1).unwrap();
        let half = flash.allocate(2).unwrap();
        let word = flash.allocate(4).unwrap();

        flash.write8(byte, 0x12).unwrap();
        flash.write16(half, 0x25C4).unwrap();
        flash.write32(word, 0xDEAD_BEEF).unwrap();

        assert_eq!(flash.read8(byte).unwrap(), 0x12);
        assert_eq!(flash.read16(half).unwrap(), 0x25C4);
        assert_eq!(flash.read32(word).unwrap(), 0xDEAD_BEEF);
        assert_eq!(flash.read_byte(2).unwrap(), 0xC4);
        assert_eq!(flash.read_byte(3).unwrap(), 0x25);
        assert_eq!(flash.read_byte(1).unwrap(), 0xFF);
    }

    #[test]
    fn width_mismatch_rejected() {
        let mut flash = Flash::new();
        let half = flash.allocate(2).unwrap();
        assert!(flash.write8(half, 1).is_err());
        assert!(flash.read32(half).is_err());
    }

    #[test]
    fn program_and_erase_by_offset() {
        let mut flash = Flash::new();
        flash.program_byte(7, 0x5A).unwrap();
        assert_eq!(flash.read_byte(7).unwrap(), 0x5A);
        assert!(matches!(
            flash.program_byte(8, 0),
            Err(DriverError::FlashOutOfRange { offset: 8 })
        ));
        flash.erase().unwrap();
        assert_eq!(flash.read_byte(7).unwrap(), 0xFF);
    }

    #[test]
    fn backing_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");

        let mut flash = Flash::open(&path).unwrap();
        let var = flash.allocate(2).unwrap();
        flash.write16(var, 7).unwrap();
        drop(flash);

        let mut reopened = Flash::open(&path).unwrap();
        let var = reopened.allocate(2).unwrap();
        assert_eq!(reopened.read16(var).unwrap(), 7);
    }

    #[test]
    fn truncated_backing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");
        std::fs::write(&path, [0u8; 3]).unwrap();
        assert!(matches!(Flash::open(&path), Err(DriverError::Config { .. })));
    }
}
