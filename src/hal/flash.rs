//! Flash interface used by the emulated config store.
//!
//! # Flash Characteristics
//!
//! - Flash is organized in pages (1 KB on STM32F103 medium density)
//! - Erase operations set all bytes to 0xFF
//! - Write operations can only change bits from 1→0 (must erase first to reset to 1)
//! - Operations are blocking
//!
//! # Safety Invariants
//!
//! - Only one owner per Flash instance (no concurrent access)
//! - Never called from interrupt context

use core::fmt;

/// Flash operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Address or length outside the device
    InvalidAddress,
    /// Erase not aligned to a page boundary
    Unaligned,
    /// Programming failed (or verify mismatch)
    WriteFailed,
    /// Page erase failed
    EraseFailed,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::InvalidAddress => f.write_str("flash address out of range"),
            FlashError::Unaligned => f.write_str("flash erase not page aligned"),
            FlashError::WriteFailed => f.write_str("flash write failed"),
            FlashError::EraseFailed => f.write_str("flash erase failed"),
        }
    }
}

/// Raw flash access.
pub trait FlashInterface {
    /// Read `buf.len()` bytes starting at `address`.
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Program `data` at `address`. The region must have been erased.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Erase the page starting at `address` (sets it to 0xFF).
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError>;

    /// Minimum erasable unit in bytes.
    fn page_size(&self) -> u32;
}
