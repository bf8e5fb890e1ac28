//! Module: config
//!
//! Purpose: Persistent config store used by the HAL backends.
//!
//! Architecture:
//! - ConfigStore: fixed-capacity, byte-addressable store
//! - eeprom.rs: EEPROM emulation over two flash pages (STM32F1)
//! - nvs.rs: RAM shadow committed to one NVS blob (ESP-IDF)
//!
//! Block helpers always go through single-byte accesses. Addresses are
//! assigned by the caller; the store only checks the capacity window.
//!
//! Safety: not reentrant. Never call from interrupt context.

use core::fmt;

use crate::hal::FlashError;

pub mod eeprom;

#[cfg(target_os = "espidf")]
pub mod nvs;

pub use eeprom::{EepromEmulation, EepromLayout, PageStatus};

#[cfg(target_os = "espidf")]
pub use nvs::NvsStore;

/// Value read back from an address that was never written (or was erased).
pub const EMPTY_VALUE: u8 = 0xFF;

/// Config store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Access outside the capacity window
    OutOfRange { address: u16, len: usize },
    /// Store used before `init`
    NotInitialized,
    /// No room left for another entry
    Full,
    /// Page headers in a state `init` cannot repair
    Corrupt,
    /// Underlying flash failed
    Flash(FlashError),
    /// NVS read/write error (raw `esp_err_t`)
    #[cfg(target_os = "espidf")]
    Nvs(i32),
}

impl From<FlashError> for StoreError {
    fn from(e: FlashError) -> Self {
        StoreError::Flash(e)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::OutOfRange { address, len } => {
                write!(f, "config range {}+{} outside the store", address, len)
            }
            StoreError::NotInitialized => f.write_str("config store not initialized"),
            StoreError::Full => f.write_str("config store full"),
            StoreError::Corrupt => f.write_str("config store pages corrupt"),
            StoreError::Flash(e) => write!(f, "config store flash error: {}", e),
            #[cfg(target_os = "espidf")]
            StoreError::Nvs(code) => write!(f, "config store NVS error {}", code),
        }
    }
}

/// What `init` had to do to bring the store online.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Existing content is usable as is.
    Ready,
    /// Blank or unreadable media was formatted.
    Formatted,
    /// The store was full and got erased; all previous content is gone.
    Reformatted,
}

/// What `init` does with a store whose entry counter reached its maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullPolicy {
    /// Erase everything once and continue with an empty store.
    #[default]
    Reformat,
    /// Keep the content and fail `init` with [`StoreError::Full`].
    Refuse,
}

/// Fixed-capacity, byte-addressable persistent store.
pub trait ConfigStore {
    /// Bring the store online.
    fn init(&mut self) -> Result<InitOutcome, StoreError>;

    /// Size of the address window in bytes. A store may hold fewer
    /// non-empty bytes than this; writes past its budget fail with
    /// [`StoreError::Full`].
    fn capacity(&self) -> u16;

    /// Read one byte. Unwritten addresses read [`EMPTY_VALUE`].
    fn read_byte(&mut self, address: u16) -> Result<u8, StoreError>;

    /// Write one byte.
    fn write_byte(&mut self, address: u16, value: u8) -> Result<(), StoreError>;

    /// Erase all content.
    fn format(&mut self) -> Result<(), StoreError>;

    /// Read `dst.len()` bytes starting at `address`, one byte at a time.
    fn read_block(&mut self, dst: &mut [u8], address: u16) -> Result<(), StoreError> {
        check_range(self.capacity(), address, dst.len())?;
        for (offset, byte) in dst.iter_mut().enumerate() {
            *byte = self.read_byte(address + offset as u16)?;
        }
        Ok(())
    }

    /// Write `src` starting at `address`, one byte at a time.
    fn write_block(&mut self, src: &[u8], address: u16) -> Result<(), StoreError> {
        check_range(self.capacity(), address, src.len())?;
        for (offset, byte) in src.iter().enumerate() {
            self.write_byte(address + offset as u16, *byte)?;
        }
        Ok(())
    }
}

/// Check that `address..address + len` lies inside a window of `capacity` bytes.
#[inline]
pub fn check_range(capacity: u16, address: u16, len: usize) -> Result<(), StoreError> {
    if address as usize + len > capacity as usize {
        return Err(StoreError::OutOfRange { address, len });
    }
    Ok(())
}
