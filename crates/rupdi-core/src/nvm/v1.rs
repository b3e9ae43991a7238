//! Generation-1 controller (unbuffered NVM)
//!
//! Found on the AVR-Dx families. There is no page buffer: a command is
//! latched in CTRLA, stores land directly in NVM while it stays
//! latched, and the command is cleared back to NOCMD afterwards. Fuses
//! are EEPROM-backed and written through the EEPROM path.

use crate::device::Device;
use crate::error::Result;
use crate::link::UpdiLink;
use crate::nvm::observer::{NvmEvent, NvmObserver};
use crate::nvm::{regs, BulkMode, NvmOps, NvmSession, NvmTiming};

/// Unbuffered NVM controller.
pub struct NvmV1<'a, L: UpdiLink> {
    session: NvmSession<'a, L>,
}

impl<'a, L: UpdiLink> NvmV1<'a, L> {
    /// Open a programming session on `device` over `link`.
    pub fn new(link: &'a mut L, device: &'a Device) -> Self {
        Self {
            session: NvmSession::new(link, device),
        }
    }

    /// Like [`new`](Self::new), narrating milestones to `observer`.
    pub fn with_observer(
        link: &'a mut L,
        device: &'a Device,
        observer: &'a mut dyn NvmObserver,
    ) -> Self {
        Self {
            session: NvmSession::with_observer(link, device, observer),
        }
    }

    /// Replace the session timing knobs.
    pub fn set_timing(&mut self, timing: NvmTiming) {
        self.session.timing = timing;
    }

    /// The current session timing knobs.
    pub fn timing(&self) -> NvmTiming {
        self.session.timing
    }

    /// Return the command register to NOCMD.
    ///
    /// Required after every completed operation, except between the
    /// chunks of a bulk run where the latch is deliberately kept.
    fn clear_command(&mut self) -> Result<()> {
        self.session.emit(NvmEvent::CommandCleared);
        self.session
            .link
            .write_byte(self.session.device.nvmctrl_address + regs::CTRLA, regs::v1::NOCMD)
    }

    /// Write data directly to NVM under a latched FLASH_WRITE command.
    ///
    /// Setup (ready-wait plus command latch) runs for single writes
    /// and at flash bank starts; mid-bulk chunks reuse the latch.
    /// Teardown (ready-wait plus NOCMD) runs for everything except
    /// bulk-continue chunks.
    fn write_nvm(
        &mut self,
        address: u32,
        data: &[u8],
        word_access: bool,
        blocksize: usize,
        bulk: BulkMode,
    ) -> Result<()> {
        self.session.emit(NvmEvent::WriteNvm {
            address,
            len: data.len(),
        });

        let fresh_latch =
            bulk.runs_setup() || self.session.device.at_flash_bank_start(address);
        if fresh_latch {
            self.session.wait_flash_ready("before flash write")?;
            self.session.execute_command(regs::v1::FLASH_WRITE)?;
        }

        if word_access {
            self.session.link.write_words(address, data, blocksize)?;
        } else {
            self.session.link.write_data(address, data)?;
        }

        if bulk.runs_teardown() {
            self.session.wait_flash_ready("after flash write")?;
            self.clear_command()?;
        }
        Ok(())
    }
}

impl<L: UpdiLink> NvmOps for NvmV1<'_, L> {
    fn chip_erase(&mut self) -> Result<()> {
        self.session.emit(NvmEvent::ChipErase);

        self.session.wait_flash_ready("before chip erase")?;
        self.session.execute_command(regs::v1::CHIP_ERASE)?;
        self.session.wait_flash_ready("after chip erase")?;
        self.clear_command()
    }

    fn erase_flash_page(&mut self, address: u32) -> Result<()> {
        self.session.emit(NvmEvent::EraseFlashPage { address });

        self.session.wait_flash_ready("before page erase")?;
        self.session.execute_command(regs::v1::FLASH_PAGE_ERASE)?;
        // Dummy write steers the latched erase at this page
        self.session.link.write_data(address, &[0xFF])?;
        self.session.wait_flash_ready("after page erase")?;
        self.clear_command()
    }

    fn erase_eeprom(&mut self) -> Result<()> {
        self.session.emit(NvmEvent::EraseEeprom);

        self.session.wait_flash_ready("before EEPROM erase")?;
        self.session.execute_command(regs::v1::EEPROM_ERASE)?;
        self.session.wait_flash_ready("after EEPROM erase")?;
        self.clear_command()
    }

    fn erase_user_row(&mut self, address: u32, _size: u32) -> Result<()> {
        // Flash-backed on this generation, erased at page granularity;
        // the size is irrelevant
        self.erase_flash_page(address)
    }

    fn write_flash(
        &mut self,
        address: u32,
        data: &[u8],
        blocksize: usize,
        bulk: BulkMode,
    ) -> Result<()> {
        self.write_nvm(address, data, true, blocksize, bulk)
    }

    fn write_user_row(&mut self, address: u32, data: &[u8]) -> Result<()> {
        // Flash-backed, but written byte-wise without the word fast path
        self.write_nvm(address, data, false, 0, BulkMode::Single)
    }

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.session.emit(NvmEvent::WriteEeprom {
            address,
            len: data.len(),
        });

        self.session.wait_flash_ready("before EEPROM write")?;
        self.session.execute_command(regs::v1::EEPROM_ERASE_WRITE)?;
        self.session.link.write_data(address, data)?;
        self.session.wait_flash_ready("after EEPROM write")?;
        self.clear_command()
    }

    fn write_fuse(&mut self, address: u32, data: &[u8]) -> Result<()> {
        // EEPROM-backed on this generation
        self.write_eeprom(address, data)
    }
}
