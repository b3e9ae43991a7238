//! NVM controller register layout and command codes
//!
//! Offsets are relative to the controller's base register address from
//! the device descriptor. These values must match the target silicon's
//! documented NVM controller layout exactly; a wrong constant is a
//! silent correctness bug, not a detectable runtime error.

use bitflags::bitflags;

// ============================================================================
// Register offsets (shared by both generations)
// ============================================================================

/// Control A - command register
pub const CTRLA: u32 = 0x00;
/// Control B
pub const CTRLB: u32 = 0x01;
/// Status register
pub const STATUS: u32 = 0x02;
/// Interrupt control
pub const INTCTRL: u32 = 0x03;
/// Interrupt flags
pub const INTFLAGS: u32 = 0x04;
/// Data register, low byte
pub const DATAL: u32 = 0x06;
/// Data register, high byte
pub const DATAH: u32 = 0x07;
/// Address register, low byte
pub const ADDRL: u32 = 0x08;
/// Address register, high byte
pub const ADDRH: u32 = 0x09;

bitflags! {
    /// STATUS register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NvmStatus: u8 {
        /// Flash erase/write in progress
        const FLASH_BUSY = 1 << 0;
        /// EEPROM erase/write in progress
        const EEPROM_BUSY = 1 << 1;
        /// The last operation was rejected (for example a locked device)
        const WRITE_ERROR = 1 << 2;
    }
}

impl NvmStatus {
    /// Is either memory still busy?
    pub fn busy(self) -> bool {
        self.intersects(Self::FLASH_BUSY | Self::EEPROM_BUSY)
    }
}

// ============================================================================
// CTRLA command codes - generation 0 (page-buffered)
// ============================================================================

/// Command codes for the page-buffered controller
pub mod v0 {
    /// No operation
    pub const NOP: u8 = 0x00;
    /// Commit the page buffer to an already-erased page
    pub const WRITE_PAGE: u8 = 0x01;
    /// Erase the page addressed by the last memory write
    pub const ERASE_PAGE: u8 = 0x02;
    /// Erase, then write the addressed page in one command
    pub const ERASE_WRITE_PAGE: u8 = 0x03;
    /// Reset the page buffer
    pub const PAGE_BUFFER_CLR: u8 = 0x04;
    /// Erase flash and EEPROM (not possible on locked devices)
    pub const CHIP_ERASE: u8 = 0x05;
    /// Erase all of EEPROM
    pub const ERASE_EEPROM: u8 = 0x06;
    /// Write the fuse byte staged in the ADDR/DATA registers
    pub const WRITE_FUSE: u8 = 0x07;
}

// ============================================================================
// CTRLA command codes - generation 1 (unbuffered)
// ============================================================================

/// Command codes for the unbuffered controller
pub mod v1 {
    /// No command - clears a latched command
    pub const NOCMD: u8 = 0x00;
    /// Latch direct flash writes
    pub const FLASH_WRITE: u8 = 0x02;
    /// Erase the flash page addressed by the next memory write
    pub const FLASH_PAGE_ERASE: u8 = 0x08;
    /// Latch EEPROM erase-then-write stores
    pub const EEPROM_ERASE_WRITE: u8 = 0x13;
    /// Erase flash and EEPROM (not possible on locked devices)
    pub const CHIP_ERASE: u8 = 0x20;
    /// Erase all of EEPROM
    pub const EEPROM_ERASE: u8 = 0x30;
}
