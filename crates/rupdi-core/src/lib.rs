//! rupdi-core - NVM programming core for UPDI-class microcontrollers
//!
//! This crate sequences the register writes and status polls that
//! erase and program flash, EEPROM, the user configuration row, and
//! fuses on devices reached through a memory-mapped control link. Two
//! incompatible NVM controller generations are supported; the caller
//! selects the variant through the device descriptor.
//!
//! The transport below the [`UpdiLink`] trait, descriptor loading,
//! and the decision of what to program are all caller concerns.
//!
//! # Example
//!
//! ```ignore
//! use rupdi_core::{BulkMode, Nvm, NvmOps};
//!
//! fn program_page<L: rupdi_core::UpdiLink>(
//!     link: &mut L,
//!     device: &rupdi_core::Device,
//!     page: &[u8],
//! ) -> rupdi_core::Result<()> {
//!     let mut nvm = Nvm::new(link, device);
//!     nvm.chip_erase()?;
//!     nvm.write_flash(device.flash_start, page, 0, BulkMode::Single)
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod device;
pub mod error;
pub mod link;
pub mod nvm;
pub mod timeout;

pub use device::{Device, NvmVariant};
pub use error::{Error, Result};
pub use link::UpdiLink;
pub use nvm::{BulkMode, NoObserver, Nvm, NvmEvent, NvmObserver, NvmOps, NvmTiming, NvmV0, NvmV1};
