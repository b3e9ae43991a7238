//! Generation-0 controller (page-buffered NVM)
//!
//! Found on the tinyAVR-0/1 and megaAVR-0 families. Writes go through
//! a page buffer: clear the buffer, load it by storing to the target
//! location, then commit with a page command. Fuses are written
//! through the controller's ADDR/DATA register file.

use log::debug;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::link::UpdiLink;
use crate::nvm::observer::{NvmEvent, NvmObserver};
use crate::nvm::{regs, BulkMode, NvmOps, NvmSession, NvmTiming};

/// Page-buffered NVM controller.
pub struct NvmV0<'a, L: UpdiLink> {
    session: NvmSession<'a, L>,
}

impl<'a, L: UpdiLink> NvmV0<'a, L> {
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

    /// Write one page worth of data through the page buffer.
    ///
    /// The setup phase (ready-wait, buffer clear, ready-wait) runs for
    /// single writes, at flash bank starts, and always for byte-wide
    /// access; mid-bulk word writes skip it. The final ready-wait runs
    /// for everything except bulk-continue chunks, deferring per-page
    /// status polling to the end of a contiguous run.
    fn write_nvm(
        &mut self,
        address: u32,
        data: &[u8],
        word_access: bool,
        command: u8,
        blocksize: usize,
        bulk: BulkMode,
    ) -> Result<()> {
        self.session.emit(NvmEvent::WriteNvm {
            address,
            len: data.len(),
        });

        let fresh_buffer = bulk.runs_setup()
            || !word_access
            || self.session.device.at_flash_bank_start(address);
        if fresh_buffer {
            self.session.wait_flash_ready("before page buffer clear")?;
            self.session.execute_command(regs::v0::PAGE_BUFFER_CLR)?;
            self.session.wait_flash_ready("after page buffer clear")?;
        }

        // Load the page buffer by storing straight to the target location
        if word_access {
            self.session.link.write_words(address, data, blocksize)?;
        } else {
            self.session.link.write_data(address, data)?;
        }

        debug!("committing page at 0x{:08X}", address);
        self.session.execute_command(command)?;
        self.session.commit_pause();

        if bulk.runs_teardown() {
            self.session.wait_flash_ready("after page write")?;
        }
        Ok(())
    }
}

impl<L: UpdiLink> NvmOps for NvmV0<'_, L> {
    fn chip_erase(&mut self) -> Result<()> {
        self.session.emit(NvmEvent::ChipErase);

        self.session.wait_flash_ready("before chip erase")?;
        self.session.execute_command(regs::v0::CHIP_ERASE)?;
        self.session.wait_flash_ready("after chip erase")
    }

    fn erase_flash_page(&mut self, address: u32) -> Result<()> {
        self.session.emit(NvmEvent::EraseFlashPage { address });

        self.session.wait_flash_ready("before page erase")?;
        // Dummy write steers the erase command at this page
        self.session.link.write_data(address, &[0xFF])?;
        self.session.execute_command(regs::v0::ERASE_PAGE)?;
        self.session.wait_flash_ready("after page erase")
    }

    fn erase_eeprom(&mut self) -> Result<()> {
        self.session.emit(NvmEvent::EraseEeprom);

        self.session.wait_flash_ready("before EEPROM erase")?;
        self.session.execute_command(regs::v0::ERASE_EEPROM)?;
        self.session.wait_flash_ready("after EEPROM erase")
    }

    fn erase_user_row(&mut self, address: u32, size: u32) -> Result<()> {
        self.session.emit(NvmEvent::EraseUserRow { address, size });

        self.session.wait_flash_ready("before user row erase")?;
        // The user row is EEPROM-backed on this generation; erasing
        // single EEPROM pages needs a dummy write per location
        for offset in 0..size {
            self.session.link.write_data(address + offset, &[0xFF])?;
        }
        self.session.execute_command(regs::v0::ERASE_PAGE)?;
        self.session.wait_flash_ready("after user row erase")
    }

    fn write_flash(
        &mut self,
        address: u32,
        data: &[u8],
        blocksize: usize,
        bulk: BulkMode,
    ) -> Result<()> {
        self.write_nvm(address, data, true, regs::v0::WRITE_PAGE, blocksize, bulk)
    }

    fn write_user_row(&mut self, address: u32, data: &[u8]) -> Result<()> {
        // EEPROM-backed on this generation
        self.write_eeprom(address, data)
    }

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.write_nvm(
            address,
            data,
            false,
            regs::v0::ERASE_WRITE_PAGE,
            0,
            BulkMode::Single,
        )
    }

    fn write_fuse(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if data.len() != 1 {
            return Err(Error::FuseSize(data.len()));
        }
        self.session.emit(NvmEvent::WriteFuse { address });

        self.session.wait_flash_ready("before fuse write")?;

        let base = self.session.device.nvmctrl_address;
        debug!("load fuse address and data");
        self.session.link.write_byte(base + regs::ADDRL, address as u8)?;
        self.session
            .link
            .write_byte(base + regs::ADDRH, (address >> 8) as u8)?;
        self.session.link.write_byte(base + regs::DATAL, data[0])?;

        self.session.execute_command(regs::v0::WRITE_FUSE)?;
        self.session.wait_flash_ready("after fuse write")
    }
}
