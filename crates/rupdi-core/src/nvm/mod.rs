//! NVM controller programming algorithm
//!
//! This module sequences register writes and status polls over a
//! [`UpdiLink`] to erase and program flash, EEPROM, the user row, and
//! fuses. Two incompatible controller generations exist in the wild;
//! [`NvmV0`] (page-buffered) and [`NvmV1`] (unbuffered) encode their
//! protocol sequences, and [`Nvm`] dispatches over the closed set of
//! variants based on the device descriptor.
//!
//! All operations are synchronous and block until the register
//! sequence completes or a ready-wait deadline expires. A controller
//! instance must be driven by exactly one logical programming session;
//! the `&mut` receivers make concurrent use impossible to express.

pub mod observer;
pub mod regs;
pub mod v0;
pub mod v1;

pub use observer::{NoObserver, NvmEvent, NvmObserver};
pub use v0::NvmV0;
pub use v1::NvmV1;

use std::thread;
use std::time::Duration;

use log::{debug, error, info, trace};

use crate::device::{Device, NvmVariant};
use crate::error::{Error, Result};
use crate::link::UpdiLink;
use crate::timeout::Timeout;
use regs::NvmStatus;

/// Position of a page write within a bulk programming sequence.
///
/// Bulk mode amortizes the setup (ready-wait plus page-buffer clear or
/// command latch) and teardown (final ready-wait, command clear) cost
/// across a contiguous run of page writes. Per-page status polling is
/// the dominant cost of a programming session over a slow link, so
/// eliding it for the middle of a run shortens uploads measurably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkMode {
    /// A standalone write: full setup and teardown.
    #[default]
    Single,
    /// A middle chunk of a bulk run: setup and teardown both elided.
    Continue,
    /// The last chunk of a bulk run: teardown only.
    Final,
}

impl BulkMode {
    /// Does this chunk unconditionally run the setup phase?
    ///
    /// `Continue` and `Final` may still be forced into setup by a
    /// flash bank boundary or byte-wide access.
    fn runs_setup(self) -> bool {
        matches!(self, BulkMode::Single)
    }

    /// Does this chunk poll for completion and tear down afterwards?
    fn runs_teardown(self) -> bool {
        !matches!(self, BulkMode::Continue)
    }
}

/// Session timing knobs.
///
/// The ready-wait deadline exists to bound blocking on unresponsive
/// hardware. The commit delay papers over the gap between issuing a
/// page commit and the controller raising its busy flag; how long that
/// gap is depends on host-to-device latency, so it is a configurable
/// constant rather than a literal in the protocol code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvmTiming {
    /// Deadline for every ready-wait poll loop.
    pub ready_timeout: Duration,
    /// Pause after issuing a page commit, before trusting STATUS.
    pub commit_delay: Duration,
}

impl Default for NvmTiming {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            commit_delay: Duration::from_millis(1),
        }
    }
}

/// The operation surface shared by every controller generation.
///
/// Callers hand this crate already-prepared address/data pairs; what
/// to program, and in which order, is decided above this interface.
pub trait NvmOps {
    /// Erase the whole device (flash and EEPROM) using the NVM
    /// controller. Not possible on locked devices.
    fn chip_erase(&mut self) -> Result<()>;

    /// Erase the single flash page starting at `address`.
    fn erase_flash_page(&mut self, address: u32) -> Result<()>;

    /// Erase EEPROM only.
    fn erase_eeprom(&mut self) -> Result<()>;

    /// Erase the user row at `address`, `size` bytes long. `size` only
    /// matters on generations where the row is EEPROM-backed and
    /// erases per-location.
    fn erase_user_row(&mut self, address: u32, size: u32) -> Result<()>;

    /// Write one page of flash at `address`.
    ///
    /// `blocksize` is passed through to the link's word-store burst
    /// sizing; `bulk` places this page within a bulk run.
    fn write_flash(&mut self, address: u32, data: &[u8], blocksize: usize, bulk: BulkMode)
        -> Result<()>;

    /// Write the user row at `address`.
    fn write_user_row(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Write EEPROM at `address`. No prior erase is needed; both
    /// generations use an erase-then-write command for EEPROM.
    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Write one fuse byte at `address`.
    fn write_fuse(&mut self, address: u32, data: &[u8]) -> Result<()>;
}

/// Link, descriptor, timing, and observer for one programming session.
///
/// Both controller generations embed one of these; the two shared
/// protocol primitives (ready-wait and command issue) live here.
pub(crate) struct NvmSession<'a, L: UpdiLink> {
    pub(crate) link: &'a mut L,
    pub(crate) device: &'a Device,
    pub(crate) timing: NvmTiming,
    pub(crate) observer: Option<&'a mut dyn NvmObserver>,
}

impl<'a, L: UpdiLink> NvmSession<'a, L> {
    pub(crate) fn new(link: &'a mut L, device: &'a Device) -> Self {
        Self {
            link,
            device,
            timing: NvmTiming::default(),
            observer: None,
        }
    }

    pub(crate) fn with_observer(
        link: &'a mut L,
        device: &'a Device,
        observer: &'a mut dyn NvmObserver,
    ) -> Self {
        Self {
            link,
            device,
            timing: NvmTiming::default(),
            observer: Some(observer),
        }
    }

    /// Narrate a milestone to the log facade and the observer, if any.
    pub(crate) fn emit(&mut self, event: NvmEvent) {
        match event {
            NvmEvent::CommandIssued { .. } | NvmEvent::CommandCleared => debug!("{}", event),
            _ => info!("{}", event),
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.event(&event);
        }
    }

    /// Read the STATUS register once.
    pub(crate) fn read_status(&mut self) -> Result<NvmStatus> {
        let raw = self.link.read_byte(self.device.nvmctrl_address + regs::STATUS)?;
        Ok(NvmStatus::from_bits_truncate(raw))
    }

    /// Poll STATUS until the controller is neither flash- nor
    /// EEPROM-busy, the error bit shows, or the deadline expires.
    ///
    /// Every command issuance must be preceded by one of these; the
    /// controller must never receive a command while busy.
    pub(crate) fn wait_flash_ready(&mut self, during: &'static str) -> Result<()> {
        trace!("wait flash ready {}", during);
        let timeout = Timeout::new(self.timing.ready_timeout);
        while !timeout.expired() {
            let status = self.read_status()?;
            if status.contains(NvmStatus::WRITE_ERROR) {
                error!("NVM error {}", during);
                return Err(Error::WriteError { during });
            }
            if !status.busy() {
                return Ok(());
            }
        }
        error!("wait flash ready timed out {}", during);
        Err(Error::ReadyTimeout { during })
    }

    /// Write a command code to CTRLA.
    ///
    /// Does not wait for completion; callers compose this with
    /// [`wait_flash_ready`](Self::wait_flash_ready).
    pub(crate) fn execute_command(&mut self, command: u8) -> Result<()> {
        self.emit(NvmEvent::CommandIssued { code: command });
        self.link
            .write_byte(self.device.nvmctrl_address + regs::CTRLA, command)
    }

    /// Give the controller a moment after a commit before any STATUS
    /// read is trusted.
    pub(crate) fn commit_pause(&self) {
        thread::sleep(self.timing.commit_delay);
    }
}

/// An NVM controller for one target device, dispatching over the
/// closed set of hardware generations.
///
/// Selected once at session start from the device descriptor; a new
/// generation cannot appear without a code change here anyway.
pub enum Nvm<'a, L: UpdiLink> {
    /// Generation-0 controller (page-buffered NVM).
    PageBuffered(NvmV0<'a, L>),
    /// Generation-1 controller (unbuffered NVM).
    Unbuffered(NvmV1<'a, L>),
}

impl<'a, L: UpdiLink> Nvm<'a, L> {
    /// Build the controller variant matching `device`.
    pub fn new(link: &'a mut L, device: &'a Device) -> Self {
        match device.variant {
            NvmVariant::V0 => Nvm::PageBuffered(NvmV0::new(link, device)),
            NvmVariant::V1 => Nvm::Unbuffered(NvmV1::new(link, device)),
        }
    }

    /// Build the controller variant matching `device`, narrating to
    /// `observer`.
    pub fn with_observer(
        link: &'a mut L,
        device: &'a Device,
        observer: &'a mut dyn NvmObserver,
    ) -> Self {
        match device.variant {
            NvmVariant::V0 => Nvm::PageBuffered(NvmV0::with_observer(link, device, observer)),
            NvmVariant::V1 => Nvm::Unbuffered(NvmV1::with_observer(link, device, observer)),
        }
    }

    /// Replace the session timing knobs.
    pub fn set_timing(&mut self, timing: NvmTiming) {
        match self {
            Nvm::PageBuffered(nvm) => nvm.set_timing(timing),
            Nvm::Unbuffered(nvm) => nvm.set_timing(timing),
        }
    }

    /// The current session timing knobs.
    pub fn timing(&self) -> NvmTiming {
        match self {
            Nvm::PageBuffered(nvm) => nvm.timing(),
            Nvm::Unbuffered(nvm) => nvm.timing(),
        }
    }
}

impl<L: UpdiLink> NvmOps for Nvm<'_, L> {
    fn chip_erase(&mut self) -> Result<()> {
        match self {
            Nvm::PageBuffered(nvm) => nvm.chip_erase(),
            Nvm::Unbuffered(nvm) => nvm.chip_erase(),
        }
    }

    fn erase_flash_page(&mut self, address: u32) -> Result<()> {
        match self {
            Nvm::PageBuffered(nvm) => nvm.erase_flash_page(address),
            Nvm::Unbuffered(nvm) => nvm.erase_flash_page(address),
        }
    }

    fn erase_eeprom(&mut self) -> Result<()> {
        match self {
            Nvm::PageBuffered(nvm) => nvm.erase_eeprom(),
            Nvm::Unbuffered(nvm) => nvm.erase_eeprom(),
        }
    }

    fn erase_user_row(&mut self, address: u32, size: u32) -> Result<()> {
        match self {
            Nvm::PageBuffered(nvm) => nvm.erase_user_row(address, size),
            Nvm::Unbuffered(nvm) => nvm.erase_user_row(address, size),
        }
    }

    fn write_flash(
        &mut self,
        address: u32,
        data: &[u8],
        blocksize: usize,
        bulk: BulkMode,
    ) -> Result<()> {
        match self {
            Nvm::PageBuffered(nvm) => nvm.write_flash(address, data, blocksize, bulk),
            Nvm::Unbuffered(nvm) => nvm.write_flash(address, data, blocksize, bulk),
        }
    }

    fn write_user_row(&mut self, address: u32, data: &[u8]) -> Result<()> {
        match self {
            Nvm::PageBuffered(nvm) => nvm.write_user_row(address, data),
            Nvm::Unbuffered(nvm) => nvm.write_user_row(address, data),
        }
    }

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<()> {
        match self {
            Nvm::PageBuffered(nvm) => nvm.write_eeprom(address, data),
            Nvm::Unbuffered(nvm) => nvm.write_eeprom(address, data),
        }
    }

    fn write_fuse(&mut self, address: u32, data: &[u8]) -> Result<()> {
        match self {
            Nvm::PageBuffered(nvm) => nvm.write_fuse(address, data),
            Nvm::Unbuffered(nvm) => nvm.write_fuse(address, data),
        }
    }
}
