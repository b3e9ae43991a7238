//! Memory link trait
//!
//! The link is the transport boundary of this crate: everything below
//! it (UPDI framing, baud control, USB or serial plumbing) lives in a
//! link implementation, everything above it is register sequencing.
//! The NVM controllers drive a link exclusively through this trait.

use crate::error::Result;

/// Byte- and word-level access to the target's address space.
///
/// One address space covers both the NVM controller's register block
/// and target memory; the controller code distinguishes them only by
/// address. All operations are synchronous and blocking, and any
/// transport failure is surfaced as [`Error::Link`](crate::Error::Link).
pub trait UpdiLink {
    /// Read a single byte from `address`.
    fn read_byte(&mut self, address: u32) -> Result<u8>;

    /// Write a single byte to `address`.
    fn write_byte(&mut self, address: u32, value: u8) -> Result<()>;

    /// Write a run of bytes to consecutive addresses starting at
    /// `address`.
    fn write_data(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Write a run of 16-bit words (little-endian byte pairs) to
    /// consecutive addresses starting at `address`.
    ///
    /// `data` must hold an even number of bytes. `blocksize` is the
    /// link-level burst size in bytes: implementations may split the
    /// run into bursts of this many bytes per transaction; `0` lets
    /// the link choose.
    fn write_words(&mut self, address: u32, data: &[u8], blocksize: usize) -> Result<()>;
}

// Allow trait objects for callers that pick a link at runtime
impl UpdiLink for Box<dyn UpdiLink + Send> {
    fn read_byte(&mut self, address: u32) -> Result<u8> {
        (**self).read_byte(address)
    }

    fn write_byte(&mut self, address: u32, value: u8) -> Result<()> {
        (**self).write_byte(address, value)
    }

    fn write_data(&mut self, address: u32, data: &[u8]) -> Result<()> {
        (**self).write_data(address, data)
    }

    fn write_words(&mut self, address: u32, data: &[u8], blocksize: usize) -> Result<()> {
        (**self).write_words(address, data, blocksize)
    }
}
