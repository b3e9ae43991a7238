//! rupdi-dummy - In-memory emulated UPDI device for testing
//!
//! This crate provides a dummy memory link that emulates a UPDI
//! target's memory map and NVM controller. It's useful for testing
//! and development without real hardware: writes to the controller's
//! register block execute commands against an in-memory image, and
//! every link transaction is recorded for sequence assertions.

use log::warn;

use rupdi_core::nvm::regs::{self, NvmStatus};
use rupdi_core::{Device, Error, NvmEvent, NvmObserver, NvmVariant, Result, UpdiLink};

/// Configuration for the emulated target
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Descriptor handed to the programming core
    pub device: Device,
    /// Flash size in bytes
    pub flash_size: u32,
    /// EEPROM start address
    pub eeprom_start: u32,
    /// EEPROM size in bytes
    pub eeprom_size: u32,
    /// User row start address
    pub user_row_start: u32,
    /// User row size in bytes
    pub user_row_size: u32,
    /// Fuse file start address
    pub fuses_start: u32,
    /// Fuse file size in bytes
    pub fuses_size: u32,
}

impl DummyConfig {
    /// A tinyAVR-1-like part with the page-buffered controller.
    pub fn tiny() -> Self {
        Self {
            device: Device {
                variant: NvmVariant::V0,
                nvmctrl_address: 0x1000,
                flash_start: 0x8000,
                flash_page_size: 64,
                flash_bank_size: None,
            },
            flash_size: 8 * 1024,
            eeprom_start: 0x1400,
            eeprom_size: 128,
            user_row_start: 0x1300,
            user_row_size: 32,
            fuses_start: 0x1280,
            fuses_size: 11,
        }
    }

    /// An AVR-DA-like part with the unbuffered controller.
    pub fn avr_dx() -> Self {
        Self {
            device: Device {
                variant: NvmVariant::V1,
                nvmctrl_address: 0x1000,
                flash_start: 0x80_0000,
                flash_page_size: 512,
                flash_bank_size: None,
            },
            flash_size: 16 * 1024,
            eeprom_start: 0x1400,
            eeprom_size: 512,
            user_row_start: 0x1080,
            user_row_size: 32,
            fuses_start: 0x1050,
            fuses_size: 16,
        }
    }
}

/// One recorded link transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOp {
    /// Single byte read
    ReadByte {
        /// Target address
        address: u32,
    },
    /// Single byte write
    WriteByte {
        /// Target address
        address: u32,
        /// Byte written
        value: u8,
    },
    /// Byte-run write
    WriteData {
        /// Start address
        address: u32,
        /// Run length in bytes
        len: usize,
    },
    /// Word-run write
    WriteWords {
        /// Start address
        address: u32,
        /// Run length in bytes
        len: usize,
        /// Burst size hint the core passed down
        blocksize: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Flash,
    Eeprom,
    UserRow,
    Fuses,
    Other,
}

/// Emulated UPDI target.
///
/// Implements [`UpdiLink`] over a flat in-memory image. Accesses into
/// the NVM controller's register block are intercepted and executed;
/// everything else lands in the image. Busy and error behavior can be
/// injected to exercise the core's polling paths.
pub struct DummyUpdi {
    config: DummyConfig,
    mem: Vec<u8>,
    // controller state
    ctrla: u8,
    addr_reg: u16,
    datal: u8,
    write_error: bool,
    last_mem_write: Option<u32>,
    // behavior injection
    force_busy: bool,
    force_error: bool,
    busy_reads_left: u32,
    busy_reads_per_command: u32,
    error_on_command: Option<u8>,
    transactions: Vec<LinkOp>,
}

impl DummyUpdi {
    /// Create an emulated target with the given configuration. All
    /// non-volatile memory starts in the erased state (0xFF).
    pub fn new(config: DummyConfig) -> Self {
        let mem_size = (config.device.flash_start + config.flash_size) as usize;
        Self {
            config,
            mem: vec![0xFF; mem_size],
            ctrla: 0,
            addr_reg: 0,
            datal: 0,
            write_error: false,
            last_mem_write: None,
            force_busy: false,
            force_error: false,
            busy_reads_left: 0,
            busy_reads_per_command: 0,
            error_on_command: None,
            transactions: Vec::new(),
        }
    }

    /// Shorthand for [`DummyConfig::tiny`].
    pub fn tiny() -> Self {
        Self::new(DummyConfig::tiny())
    }

    /// Shorthand for [`DummyConfig::avr_dx`].
    pub fn avr_dx() -> Self {
        Self::new(DummyConfig::avr_dx())
    }

    /// The descriptor for this target.
    pub fn device(&self) -> Device {
        self.config.device
    }

    /// The emulation configuration.
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Current flash contents.
    pub fn flash(&self) -> &[u8] {
        self.region_slice(self.config.device.flash_start, self.config.flash_size)
    }

    /// Current EEPROM contents.
    pub fn eeprom(&self) -> &[u8] {
        self.region_slice(self.config.eeprom_start, self.config.eeprom_size)
    }

    /// Current user row contents.
    pub fn user_row(&self) -> &[u8] {
        self.region_slice(self.config.user_row_start, self.config.user_row_size)
    }

    /// Current fuse file contents.
    pub fn fuses(&self) -> &[u8] {
        self.region_slice(self.config.fuses_start, self.config.fuses_size)
    }

    /// The command currently latched in CTRLA.
    pub fn command_register(&self) -> u8 {
        self.ctrla
    }

    /// Every link transaction since the last
    /// [`clear_transactions`](Self::clear_transactions).
    pub fn transactions(&self) -> &[LinkOp] {
        &self.transactions
    }

    /// Forget the recorded transactions.
    pub fn clear_transactions(&mut self) {
        self.transactions.clear();
    }

    /// How many STATUS register reads have been recorded.
    pub fn status_reads(&self) -> usize {
        let status = self.config.device.nvmctrl_address + regs::STATUS;
        self.transactions
            .iter()
            .filter(|op| matches!(op, LinkOp::ReadByte { address } if *address == status))
            .count()
    }

    /// Report busy on every STATUS read, forever.
    pub fn set_force_busy(&mut self, on: bool) {
        self.force_busy = on;
    }

    /// Report a write error on every STATUS read.
    pub fn set_force_error(&mut self, on: bool) {
        self.force_error = on;
    }

    /// Report busy for this many STATUS reads after each command.
    pub fn set_busy_reads_per_command(&mut self, reads: u32) {
        self.busy_reads_per_command = reads;
    }

    /// Raise the write-error status bit whenever this command code is
    /// issued, failing the wait that follows it.
    pub fn set_error_on_command(&mut self, command: Option<u8>) {
        self.error_on_command = command;
    }

    fn region_slice(&self, start: u32, size: u32) -> &[u8] {
        &self.mem[start as usize..(start + size) as usize]
    }

    fn classify(&self, address: u32) -> Region {
        let c = &self.config;
        let within = |start: u32, size: u32| address >= start && address < start + size;
        if within(c.device.flash_start, c.flash_size) {
            Region::Flash
        } else if within(c.eeprom_start, c.eeprom_size) {
            Region::Eeprom
        } else if within(c.user_row_start, c.user_row_size) {
            Region::UserRow
        } else if within(c.fuses_start, c.fuses_size) {
            Region::Fuses
        } else {
            Region::Other
        }
    }

    fn ctrl_reg(&self, address: u32) -> Option<u32> {
        address
            .checked_sub(self.config.device.nvmctrl_address)
            .filter(|offset| *offset < 0x10)
    }

    fn status_bits(&mut self) -> u8 {
        if self.force_error || self.write_error {
            NvmStatus::WRITE_ERROR.bits()
        } else if self.force_busy {
            (NvmStatus::FLASH_BUSY | NvmStatus::EEPROM_BUSY).bits()
        } else if self.busy_reads_left > 0 {
            self.busy_reads_left -= 1;
            NvmStatus::FLASH_BUSY.bits()
        } else {
            0
        }
    }

    fn do_read(&mut self, address: u32) -> Result<u8> {
        if let Some(offset) = self.ctrl_reg(address) {
            let value = match offset {
                regs::STATUS => self.status_bits(),
                regs::CTRLA => self.ctrla,
                regs::ADDRL => self.addr_reg as u8,
                regs::ADDRH => (self.addr_reg >> 8) as u8,
                regs::DATAL => self.datal,
                _ => 0,
            };
            return Ok(value);
        }
        let index = address as usize;
        if index >= self.mem.len() {
            return Err(Error::AddressOutOfBounds(address));
        }
        Ok(self.mem[index])
    }

    fn do_write(&mut self, address: u32, value: u8) -> Result<()> {
        if let Some(offset) = self.ctrl_reg(address) {
            self.reg_write(offset, value);
            return Ok(());
        }
        self.mem_write(address, value)
    }

    fn reg_write(&mut self, offset: u32, value: u8) {
        match offset {
            regs::CTRLA => self.command(value),
            regs::ADDRL => self.addr_reg = (self.addr_reg & 0xFF00) | value as u16,
            regs::ADDRH => self.addr_reg = (self.addr_reg & 0x00FF) | ((value as u16) << 8),
            regs::DATAL => self.datal = value,
            _ => {}
        }
    }

    fn command(&mut self, code: u8) {
        // A new command clears a sticky error from a bad sequence
        self.write_error = false;
        self.ctrla = code;
        if self.error_on_command == Some(code) {
            self.write_error = true;
        }
        match self.config.device.variant {
            NvmVariant::V0 => self.command_v0(code),
            NvmVariant::V1 => self.command_v1(code),
        }
        self.busy_reads_left = self.busy_reads_per_command;
    }

    fn command_v0(&mut self, code: u8) {
        match code {
            regs::v0::CHIP_ERASE => {
                self.fill(self.config.device.flash_start, self.config.flash_size);
                self.fill(self.config.eeprom_start, self.config.eeprom_size);
                self.fill(self.config.user_row_start, self.config.user_row_size);
            }
            regs::v0::ERASE_EEPROM => self.fill(self.config.eeprom_start, self.config.eeprom_size),
            regs::v0::ERASE_PAGE => match self.last_mem_write {
                Some(address) => self.erase_page_containing(address),
                None => warn!("page erase with no preceding address write"),
            },
            regs::v0::WRITE_FUSE => {
                let address = self.addr_reg as u32;
                if self.classify(address) == Region::Fuses {
                    let value = self.datal;
                    self.mem[address as usize] = value;
                } else {
                    warn!("fuse write aimed at 0x{:08X}, outside the fuse file", address);
                    self.write_error = true;
                }
            }
            regs::v0::NOP
            | regs::v0::WRITE_PAGE
            | regs::v0::ERASE_WRITE_PAGE
            | regs::v0::PAGE_BUFFER_CLR => {}
            _ => warn!("unknown v0 NVM command 0x{:02X}", code),
        }
    }

    fn command_v1(&mut self, code: u8) {
        match code {
            regs::v1::CHIP_ERASE => {
                self.fill(self.config.device.flash_start, self.config.flash_size);
                self.fill(self.config.eeprom_start, self.config.eeprom_size);
                self.fill(self.config.user_row_start, self.config.user_row_size);
            }
            regs::v1::EEPROM_ERASE => self.fill(self.config.eeprom_start, self.config.eeprom_size),
            // The remaining commands latch and take effect at store time
            regs::v1::NOCMD
            | regs::v1::FLASH_WRITE
            | regs::v1::FLASH_PAGE_ERASE
            | regs::v1::EEPROM_ERASE_WRITE => {}
            _ => warn!("unknown v1 NVM command 0x{:02X}", code),
        }
    }

    fn mem_write(&mut self, address: u32, value: u8) -> Result<()> {
        let index = address as usize;
        if index >= self.mem.len() {
            return Err(Error::AddressOutOfBounds(address));
        }
        let region = self.classify(address);
        self.last_mem_write = Some(address);
        match self.config.device.variant {
            NvmVariant::V0 => match region {
                // Page-buffer load; flash programming clears bits 1 -> 0
                Region::Flash => self.mem[index] &= value,
                _ => self.mem[index] = value,
            },
            NvmVariant::V1 => match (self.ctrla, region) {
                (regs::v1::FLASH_WRITE, Region::Flash | Region::UserRow) => {
                    self.mem[index] &= value
                }
                (regs::v1::FLASH_PAGE_ERASE, Region::Flash | Region::UserRow) => {
                    self.erase_page_containing(address)
                }
                (regs::v1::EEPROM_ERASE_WRITE, Region::Eeprom | Region::Fuses) => {
                    self.mem[index] = value
                }
                (_, Region::Other) => self.mem[index] = value,
                _ => {
                    warn!(
                        "store to NVM at 0x{:08X} with no matching command latched",
                        address
                    );
                    self.write_error = true;
                }
            },
        }
        Ok(())
    }

    fn erase_page_containing(&mut self, address: u32) {
        match self.classify(address) {
            Region::Flash => {
                let page = self.config.device.flash_page_size;
                let offset = (address - self.config.device.flash_start) / page * page;
                self.fill(self.config.device.flash_start + offset, page);
            }
            Region::UserRow => self.fill(self.config.user_row_start, self.config.user_row_size),
            _ => warn!(
                "page erase aimed at 0x{:08X}, which is not page-erasable",
                address
            ),
        }
    }

    fn fill(&mut self, start: u32, size: u32) {
        for byte in &mut self.mem[start as usize..(start + size) as usize] {
            *byte = 0xFF;
        }
    }
}

impl UpdiLink for DummyUpdi {
    fn read_byte(&mut self, address: u32) -> Result<u8> {
        self.transactions.push(LinkOp::ReadByte { address });
        self.do_read(address)
    }

    fn write_byte(&mut self, address: u32, value: u8) -> Result<()> {
        self.transactions.push(LinkOp::WriteByte { address, value });
        self.do_write(address, value)
    }

    fn write_data(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.transactions.push(LinkOp::WriteData {
            address,
            len: data.len(),
        });
        for (offset, &value) in data.iter().enumerate() {
            self.do_write(address + offset as u32, value)?;
        }
        Ok(())
    }

    fn write_words(&mut self, address: u32, data: &[u8], blocksize: usize) -> Result<()> {
        if data.len() % 2 != 0 {
            return Err(Error::OddWordPayload(data.len()));
        }
        self.transactions.push(LinkOp::WriteWords {
            address,
            len: data.len(),
            blocksize,
        });
        for (offset, &value) in data.iter().enumerate() {
            self.do_write(address + offset as u32, value)?;
        }
        Ok(())
    }
}

/// Observer that records every milestone for later assertions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Vec<NvmEvent>,
}

impl RecordingObserver {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded events, in emission order.
    pub fn events(&self) -> &[NvmEvent] {
        &self.events
    }
}

impl NvmObserver for RecordingObserver {
    fn event(&mut self, event: &NvmEvent) {
        self.events.push(*event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rupdi_core::{BulkMode, Nvm, NvmOps, NvmTiming};
    use std::time::{Duration, Instant};

    /// Keep polling loops snappy; the 10 s production deadline has no
    /// place in a unit test.
    fn fast_timing() -> NvmTiming {
        NvmTiming {
            ready_timeout: Duration::from_millis(50),
            commit_delay: Duration::ZERO,
        }
    }

    fn page_data(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    // ------------------------------------------------------------------
    // Write/read-back across access widths
    // ------------------------------------------------------------------

    #[test]
    fn v0_flash_write_reads_back() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        let data = page_data(64, 0x10);

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_flash(device.flash_start, &data, 0, BulkMode::Single)
            .unwrap();
        drop(nvm);

        assert_eq!(&target.flash()[..64], &data[..]);
        assert!(target.flash()[64..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn v0_eeprom_write_reads_back() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        let data = [0xDE, 0xAD, 0xBE, 0xEF, 0x42];

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_eeprom(0x1400, &data).unwrap();
        drop(nvm);

        assert_eq!(&target.eeprom()[..5], &data[..]);
    }

    #[test]
    fn v1_flash_write_reads_back() {
        let mut target = DummyUpdi::avr_dx();
        let device = target.device();
        let data = page_data(512, 0x33);

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_flash(device.flash_start, &data, 0, BulkMode::Single)
            .unwrap();
        drop(nvm);

        assert_eq!(&target.flash()[..512], &data[..]);
    }

    #[test]
    fn v1_eeprom_write_reads_back() {
        let mut target = DummyUpdi::avr_dx();
        let device = target.device();
        let data = [0x01, 0x02, 0x03];

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_eeprom(0x1400, &data).unwrap();
        drop(nvm);

        assert_eq!(&target.eeprom()[..3], &data[..]);
    }

    // ------------------------------------------------------------------
    // Ready-wait behavior
    // ------------------------------------------------------------------

    #[test]
    fn ready_wait_times_out_against_a_stuck_busy_bit() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        target.set_force_busy(true);

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(NvmTiming {
            ready_timeout: Duration::from_millis(25),
            commit_delay: Duration::ZERO,
        });

        let started = Instant::now();
        let result = nvm.chip_erase();
        let elapsed = started.elapsed();

        assert_eq!(
            result,
            Err(Error::ReadyTimeout {
                during: "before chip erase"
            })
        );
        assert!(elapsed >= Duration::from_millis(25));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn ready_wait_reports_write_error_without_waiting_out_the_deadline() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        target.set_force_error(true);

        // Default 10 s deadline on purpose: the error must cut the wait
        // short on the very first poll
        let started = Instant::now();
        let result = Nvm::new(&mut target, &device).chip_erase();
        let elapsed = started.elapsed();

        assert_eq!(
            result,
            Err(Error::WriteError {
                during: "before chip erase"
            })
        );
        assert!(elapsed < Duration::from_secs(1));
        assert_eq!(target.status_reads(), 1);
    }

    #[test]
    fn ready_wait_rides_out_a_transient_busy_phase() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        target.set_busy_reads_per_command(2);

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.chip_erase().unwrap();
        drop(nvm);

        // One poll before the command, then two busy polls and the
        // ready poll after it
        assert_eq!(target.status_reads(), 4);
    }

    // ------------------------------------------------------------------
    // Bulk fast path
    // ------------------------------------------------------------------

    fn write_pages(target: &mut DummyUpdi, pages: usize, bulk: bool) {
        let device = target.device();
        let page = device.flash_page_size as usize;
        let mut nvm = Nvm::new(target, &device);
        nvm.set_timing(fast_timing());
        for index in 0..pages {
            let address = device.flash_start + (index * page) as u32;
            let data = page_data(page, index as u8);
            let mode = match (bulk, index == pages - 1) {
                (false, _) => BulkMode::Single,
                (true, false) => BulkMode::Continue,
                (true, true) => BulkMode::Final,
            };
            nvm.write_flash(address, &data, 0, mode).unwrap();
        }
    }

    #[test]
    fn v0_bulk_writes_match_single_writes_with_fewer_polls() {
        let mut single = DummyUpdi::tiny();
        let mut bulk = DummyUpdi::tiny();

        write_pages(&mut single, 4, false);
        write_pages(&mut bulk, 4, true);

        assert_eq!(single.flash(), bulk.flash());
        assert!(bulk.status_reads() < single.status_reads());
    }

    #[test]
    fn v1_bulk_writes_match_single_writes_with_fewer_polls() {
        let mut single = DummyUpdi::avr_dx();
        let mut bulk = DummyUpdi::avr_dx();

        write_pages(&mut single, 4, false);
        write_pages(&mut bulk, 4, true);

        assert_eq!(single.flash(), bulk.flash());
        assert!(bulk.status_reads() < single.status_reads());
    }

    #[test]
    fn v0_bank_start_forces_a_buffer_clear_mid_bulk() {
        let mut config = DummyConfig::tiny();
        config.device.flash_bank_size = Some(0x1000);
        let mut target = DummyUpdi::new(config);
        let device = target.device();
        let page = device.flash_page_size as usize;

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        // 0x1000 / 64 = 64 pages per bank; write across the boundary
        for index in 0..66 {
            let address = device.flash_start + (index * page) as u32;
            let mode = if index == 65 {
                BulkMode::Final
            } else {
                BulkMode::Continue
            };
            nvm.write_flash(address, &page_data(page, index as u8), 0, mode)
                .unwrap();
        }
        drop(nvm);

        let ctrla = device.nvmctrl_address + regs::CTRLA;
        let buffer_clears = target
            .transactions()
            .iter()
            .filter(|op| {
                matches!(op, LinkOp::WriteByte { address, value }
                    if *address == ctrla && *value == regs::v0::PAGE_BUFFER_CLR)
            })
            .count();
        // Once at the start of flash, once entering the second bank
        assert_eq!(buffer_clears, 2);
    }

    #[test]
    fn v1_latch_survives_continue_chunks_only() {
        let mut target = DummyUpdi::avr_dx();
        let device = target.device();
        let data = page_data(512, 0x01);

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_flash(device.flash_start, &data, 0, BulkMode::Continue)
            .unwrap();
        drop(nvm);
        assert_eq!(target.command_register(), regs::v1::FLASH_WRITE);

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_flash(device.flash_start + 512, &data, 0, BulkMode::Final)
            .unwrap();
        drop(nvm);
        assert_eq!(target.command_register(), regs::v1::NOCMD);
    }

    // ------------------------------------------------------------------
    // Generation-1 command hygiene
    // ------------------------------------------------------------------

    #[test]
    fn v1_operations_leave_no_command_latched() {
        let mut target = DummyUpdi::avr_dx();
        let device = target.device();

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.chip_erase().unwrap();
        nvm.erase_flash_page(device.flash_start).unwrap();
        nvm.erase_eeprom().unwrap();
        nvm.write_eeprom(0x1400, &[0xAA]).unwrap();
        nvm.write_flash(device.flash_start, &page_data(512, 0), 0, BulkMode::Single)
            .unwrap();
        drop(nvm);

        assert_eq!(target.command_register(), regs::v1::NOCMD);
    }

    // ------------------------------------------------------------------
    // Erase behavior
    // ------------------------------------------------------------------

    #[test]
    fn erasing_an_erased_page_is_idempotent() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.erase_flash_page(device.flash_start).unwrap();
        nvm.erase_flash_page(device.flash_start).unwrap();
        nvm.write_flash(device.flash_start, &[], 0, BulkMode::Single)
            .unwrap();
        drop(nvm);

        assert!(target.flash().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn v0_page_erase_restores_the_erased_value() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        let page = device.flash_page_size as usize;

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_flash(device.flash_start, &page_data(page, 7), 0, BulkMode::Single)
            .unwrap();
        nvm.erase_flash_page(device.flash_start).unwrap();
        drop(nvm);

        assert!(target.flash()[..page].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn chip_erase_clears_flash_and_eeprom() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_flash(device.flash_start, &page_data(64, 1), 0, BulkMode::Single)
            .unwrap();
        nvm.write_eeprom(0x1400, &[0x55; 16]).unwrap();
        nvm.chip_erase().unwrap();
        drop(nvm);

        assert!(target.flash().iter().all(|&b| b == 0xFF));
        assert!(target.eeprom().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn v0_user_row_erase_and_write() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        let row = target.config().user_row_start;
        let row_size = target.config().user_row_size;

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_user_row(row, &[0xAA; 8]).unwrap();
        nvm.erase_user_row(row, row_size).unwrap();
        drop(nvm);
        assert!(target.user_row().iter().all(|&b| b == 0xFF));

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_user_row(row, &[0x5A; 8]).unwrap();
        drop(nvm);
        assert_eq!(&target.user_row()[..8], &[0x5A; 8]);
    }

    #[test]
    fn v1_user_row_erase_and_write() {
        let mut target = DummyUpdi::avr_dx();
        let device = target.device();
        let row = target.config().user_row_start;
        let data = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77];

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        // Size is irrelevant on this generation
        nvm.erase_user_row(row, 0).unwrap();
        nvm.write_user_row(row, &data).unwrap();
        drop(nvm);

        assert_eq!(&target.user_row()[..7], &data[..]);
        assert_eq!(target.command_register(), regs::v1::NOCMD);
    }

    // ------------------------------------------------------------------
    // Exact register sequences
    // ------------------------------------------------------------------

    #[test]
    fn v0_chip_erase_issues_wait_command_wait() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        let status = device.nvmctrl_address + regs::STATUS;
        let ctrla = device.nvmctrl_address + regs::CTRLA;

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.chip_erase().unwrap();
        drop(nvm);

        assert_eq!(
            target.transactions(),
            &[
                LinkOp::ReadByte { address: status },
                LinkOp::WriteByte {
                    address: ctrla,
                    value: regs::v0::CHIP_ERASE
                },
                LinkOp::ReadByte { address: status },
            ]
        );
    }

    #[test]
    fn v0_fuse_write_issues_the_documented_sequence() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        let base = device.nvmctrl_address;

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_fuse(0x1280, &[0x00]).unwrap();
        drop(nvm);

        assert_eq!(
            target.transactions(),
            &[
                LinkOp::ReadByte {
                    address: base + regs::STATUS
                },
                LinkOp::WriteByte {
                    address: base + regs::ADDRL,
                    value: 0x80
                },
                LinkOp::WriteByte {
                    address: base + regs::ADDRH,
                    value: 0x12
                },
                LinkOp::WriteByte {
                    address: base + regs::DATAL,
                    value: 0x00
                },
                LinkOp::WriteByte {
                    address: base + regs::CTRLA,
                    value: regs::v0::WRITE_FUSE
                },
                LinkOp::ReadByte {
                    address: base + regs::STATUS
                },
            ]
        );
        assert_eq!(target.fuses()[0], 0x00);
    }

    #[test]
    fn v0_fuse_write_fails_when_the_post_command_wait_fails() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        target.set_error_on_command(Some(regs::v0::WRITE_FUSE));

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        let result = nvm.write_fuse(0x1280, &[0x00]);

        assert_eq!(
            result,
            Err(Error::WriteError {
                during: "after fuse write"
            })
        );
    }

    #[test]
    fn v0_fuse_write_rejects_multi_byte_payloads_before_touching_the_link() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();

        let mut nvm = Nvm::new(&mut target, &device);
        let result = nvm.write_fuse(0x1280, &[0x00, 0x01]);
        drop(nvm);

        assert_eq!(result, Err(Error::FuseSize(2)));
        assert!(target.transactions().is_empty());
    }

    #[test]
    fn v1_fuse_write_goes_through_the_eeprom_path() {
        let mut target = DummyUpdi::avr_dx();
        let device = target.device();
        let fuses = target.config().fuses_start;

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        nvm.write_fuse(fuses + 1, &[0x5A]).unwrap();
        drop(nvm);

        assert_eq!(target.fuses()[1], 0x5A);
        assert_eq!(target.command_register(), regs::v1::NOCMD);
    }

    // ------------------------------------------------------------------
    // Observer
    // ------------------------------------------------------------------

    #[test]
    fn v0_chip_erase_narrates_deterministically() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        let mut recorder = RecordingObserver::new();

        let mut nvm = Nvm::with_observer(&mut target, &device, &mut recorder);
        nvm.set_timing(fast_timing());
        nvm.chip_erase().unwrap();
        drop(nvm);

        assert_eq!(
            recorder.events(),
            &[
                NvmEvent::ChipErase,
                NvmEvent::CommandIssued {
                    code: regs::v0::CHIP_ERASE
                },
            ]
        );
    }

    #[test]
    fn v1_eeprom_write_narrates_deterministically() {
        let mut target = DummyUpdi::avr_dx();
        let device = target.device();
        let mut recorder = RecordingObserver::new();

        let mut nvm = Nvm::with_observer(&mut target, &device, &mut recorder);
        nvm.set_timing(fast_timing());
        nvm.write_eeprom(0x1400, &[0x01, 0x02]).unwrap();
        drop(nvm);

        assert_eq!(
            recorder.events(),
            &[
                NvmEvent::WriteEeprom {
                    address: 0x1400,
                    len: 2
                },
                NvmEvent::CommandIssued {
                    code: regs::v1::EEPROM_ERASE_WRITE
                },
                NvmEvent::CommandCleared,
            ]
        );
    }

    // ------------------------------------------------------------------
    // Link payload validation
    // ------------------------------------------------------------------

    #[test]
    fn word_stores_reject_odd_payloads() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        let result = nvm.write_flash(device.flash_start, &[0x01, 0x02, 0x03], 0, BulkMode::Single);

        assert_eq!(result, Err(Error::OddWordPayload(3)));
    }

    #[test]
    fn out_of_bounds_stores_propagate_from_the_link() {
        let mut target = DummyUpdi::tiny();
        let device = target.device();
        let end = device.flash_start + target.config().flash_size;

        let mut nvm = Nvm::new(&mut target, &device);
        nvm.set_timing(fast_timing());
        let result = nvm.write_eeprom(end, &[0x00]);

        assert_eq!(result, Err(Error::AddressOutOfBounds(end)));
    }
}
