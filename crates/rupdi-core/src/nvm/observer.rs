//! Diagnostic observer
//!
//! Operation narration is injected rather than global: controllers
//! forward milestones to an [`NvmObserver`] so hosts can surface
//! progress and tests can assert on the exact event sequence. The same
//! milestones are always mirrored to the `log` facade, so a host that
//! does not care can simply not inject one.

use core::fmt;

/// An operation-level milestone emitted by a controller.
///
/// Delegating operations do not emit their own event; they surface as
/// the operation they delegate to (a generation-0 user-row write
/// appears as the EEPROM-backed generic write, a generation-1 fuse
/// write as [`NvmEvent::WriteEeprom`], and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmEvent {
    /// Chip erase begun.
    ChipErase,
    /// Single flash page erase begun.
    EraseFlashPage {
        /// Start address of the page
        address: u32,
    },
    /// EEPROM erase begun.
    EraseEeprom,
    /// User row erase begun.
    EraseUserRow {
        /// Start address of the user row
        address: u32,
        /// User row size in bytes
        size: u32,
    },
    /// Generic NVM write (flash or user row) begun.
    WriteNvm {
        /// Target address
        address: u32,
        /// Payload length in bytes
        len: usize,
    },
    /// EEPROM erase-write begun.
    WriteEeprom {
        /// Target address
        address: u32,
        /// Payload length in bytes
        len: usize,
    },
    /// Fuse write begun.
    WriteFuse {
        /// Fuse address
        address: u32,
    },
    /// A command code was written to the control register.
    CommandIssued {
        /// The command code
        code: u8,
    },
    /// The latched command was returned to "no command".
    CommandCleared,
}

impl fmt::Display for NvmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChipErase => write!(f, "chip erase using the NVM controller"),
            Self::EraseFlashPage { address } => {
                write!(f, "erase flash page at 0x{:08X}", address)
            }
            Self::EraseEeprom => write!(f, "erase EEPROM"),
            Self::EraseUserRow { address, size } => {
                write!(f, "erase user row at 0x{:08X} ({} bytes)", address, size)
            }
            Self::WriteNvm { address, len } => {
                write!(f, "write {} bytes of NVM at 0x{:08X}", len, address)
            }
            Self::WriteEeprom { address, len } => {
                write!(f, "erase-write {} bytes of EEPROM at 0x{:08X}", len, address)
            }
            Self::WriteFuse { address } => write!(f, "write fuse at 0x{:08X}", address),
            Self::CommandIssued { code } => write!(f, "NVM command 0x{:02X}", code),
            Self::CommandCleared => write!(f, "clear NVM command"),
        }
    }
}

/// Receiver for controller milestones.
pub trait NvmObserver {
    /// Called once per milestone, in protocol order.
    fn event(&mut self, event: &NvmEvent);
}

/// An observer that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoObserver;

impl NvmObserver for NoObserver {
    fn event(&mut self, _event: &NvmEvent) {}
}
