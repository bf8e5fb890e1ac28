//! Hardware Abstraction Layer for sensornet nodes.
//!
//! [`Hal`] is everything the protocol core may touch: persistent config,
//! identity, power telemetry, sleep, diagnostics and basic IO. Exactly one
//! backend is compiled in, selected by the resolved feature set, and it is
//! handed to [`Firmware`](crate::runtime::Firmware) by value.
//!
//! Every operation is synchronous. Sleep is the only suspension point.

use core::fmt;

use crate::config::StoreError;

pub mod board;
pub mod flash;
pub mod stm32f1;

#[cfg(target_os = "espidf")]
pub mod esp32s3;

pub use board::{Board, InternalReference, Level, PinMode};
pub use flash::{FlashError, FlashInterface};
pub use stm32f1::Stm32F1Hal;

#[cfg(target_os = "espidf")]
pub use esp32s3::Esp32S3Hal;

/// Raw wake reason: woken by the timer.
pub const WAKE_TIMER: i16 = -1;
/// Raw wake reason: sleep is not supported.
pub const WAKE_NOT_POSSIBLE: i16 = -2;

/// Why a sleep call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed.
    TimerElapsed,
    /// Woken early by this interrupt.
    Interrupt(u8),
    /// The backend cannot power down. Returned immediately.
    NotPossible,
}

impl SleepOutcome {
    /// Numeric wake reason: interrupt number (0..=255), -1 timer,
    /// -2 not possible. Wide enough that no interrupt number goes negative.
    pub fn as_raw(self) -> i16 {
        match self {
            SleepOutcome::TimerElapsed => WAKE_TIMER,
            SleepOutcome::Interrupt(n) => i16::from(n),
            SleepOutcome::NotPossible => WAKE_NOT_POSSIBLE,
        }
    }
}

/// Interrupt edge/level that ends a sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptMode {
    Low,
    Change,
    Rising,
    Falling,
}

/// One wake source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeInterrupt {
    pub interrupt: u8,
    pub mode: InterruptMode,
}

impl WakeInterrupt {
    pub const fn new(interrupt: u8, mode: InterruptMode) -> Self {
        Self { interrupt, mode }
    }
}

/// 16-byte silicon identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniqueId(pub [u8; 16]);

impl UniqueId {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// `init` failures. Fatal to the caller: no persistence is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The config store could not be brought online.
    Store(StoreError),
}

impl From<StoreError> for InitError {
    fn from(e: StoreError) -> Self {
        InitError::Store(e)
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Store(e) => write!(f, "hal init failed: {}", e),
        }
    }
}

/// Per-target hardware contract.
pub trait Hal {
    /// Bring up the console and the config store.
    fn init(&mut self) -> Result<(), InitError>;

    /// Fill `dst` from the config store starting at `address`.
    fn read_config_block(&mut self, dst: &mut [u8], address: u16) -> Result<(), StoreError>;

    /// Store `src` starting at `address`.
    fn write_config_block(&mut self, src: &[u8], address: u16) -> Result<(), StoreError>;

    fn read_config(&mut self, address: u16) -> Result<u8, StoreError> {
        let mut byte = [0u8; 1];
        self.read_config_block(&mut byte, address)?;
        Ok(byte[0])
    }

    fn write_config(&mut self, address: u16, value: u8) -> Result<(), StoreError> {
        self.write_config_block(&[value], address)
    }

    /// Power down for `ms` milliseconds.
    fn sleep(&mut self, ms: u32) -> SleepOutcome;

    /// Power down until `wake` fires or `ms` elapses (`0` = no timeout).
    fn sleep_with_interrupt(&mut self, wake: WakeInterrupt, ms: u32) -> SleepOutcome;

    /// Power down until either interrupt fires or `ms` elapses.
    fn sleep_with_interrupts(&mut self, wake1: WakeInterrupt, wake2: WakeInterrupt, ms: u32) -> SleepOutcome;

    /// Read-only silicon identity. Same value on every call.
    fn unique_id(&self) -> UniqueId;

    /// Supply voltage in mV, if the target can measure it.
    fn cpu_voltage(&mut self) -> Option<u16>;

    /// Core clock in units of 100 kHz.
    fn cpu_frequency(&self) -> u16;

    /// Free RAM in bytes, if the target can tell.
    fn free_memory(&self) -> Option<usize>;

    /// Format and emit one diagnostic line.
    fn debug_print(&mut self, args: fmt::Arguments<'_>);

    fn pin_mode(&mut self, pin: u8, mode: PinMode);
    fn digital_write(&mut self, pin: u8, level: Level);
    fn digital_read(&mut self, pin: u8) -> Level;
    fn watchdog_reset(&mut self);
    fn reboot(&mut self) -> !;

    /// Milliseconds since boot.
    fn millis(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_outcome_raw_values() {
        assert_eq!(SleepOutcome::TimerElapsed.as_raw(), -1);
        assert_eq!(SleepOutcome::NotPossible.as_raw(), -2);
        assert_eq!(SleepOutcome::Interrupt(3).as_raw(), 3);
    }

    #[test]
    fn test_high_interrupt_numbers_stay_distinct() {
        assert_eq!(SleepOutcome::Interrupt(254).as_raw(), 254);
        assert_eq!(SleepOutcome::Interrupt(255).as_raw(), 255);
        assert_ne!(SleepOutcome::Interrupt(255).as_raw(), WAKE_TIMER);
        assert_ne!(SleepOutcome::Interrupt(254).as_raw(), WAKE_NOT_POSSIBLE);
    }

    #[test]
    fn test_unique_id_display() {
        let mut bytes = [0u8; 16];
        bytes[0] = 0xAB;
        bytes[15] = 0x01;
        let mut buf = [0u8; 40];
        let len = crate::logging::format_to_buffer(&mut buf, format_args!("{}", UniqueId(bytes)));
        assert_eq!(&buf[..len], b"AB000000000000000000000000000001");
    }
}
