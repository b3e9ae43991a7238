//! Error types for rupdi-core
//!
//! Every fallible operation in this crate returns the crate-local
//! [`Result`]. Failures are not retried here; retry policy belongs to
//! the caller.

use thiserror::Error;

/// Result type alias using the core error type
pub type Result<T> = core::result::Result<T, Error>;

/// Core error type
///
/// The `during` context strings name the protocol step that failed
/// ("before chip erase", "after page write", ...) so a failure can be
/// located without a wire trace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A ready-wait deadline expired: the NVM controller was never
    /// observed to leave its busy state.
    #[error("timeout waiting for NVM ready {during}")]
    ReadyTimeout {
        /// Protocol step that was waiting
        during: &'static str,
    },

    /// The status register reported a write error during a ready-wait.
    /// The hardware actively rejected the operation (for example a
    /// locked device), as opposed to being unresponsive.
    #[error("NVM controller reported a write error {during}")]
    WriteError {
        /// Protocol step that was waiting
        during: &'static str,
    },

    /// The memory link itself failed. Link implementations map their
    /// native transport failures into this variant; the core propagates
    /// it without interpretation.
    #[error("memory link transfer failed: {0}")]
    Link(String),

    /// An access fell outside the target's memory map.
    #[error("address 0x{0:08X} is outside the target memory map")]
    AddressOutOfBounds(u32),

    /// A fuse write was given the wrong payload size. The fuse register
    /// file moves exactly one byte per operation.
    #[error("fuse writes take exactly one data byte, got {0}")]
    FuseSize(usize),

    /// A word-access store was given an odd number of bytes.
    #[error("word access requires an even number of bytes, got {0}")]
    OddWordPayload(usize),
}
