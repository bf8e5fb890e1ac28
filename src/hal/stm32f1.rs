//! STM32F1 backend (reference HAL).
//!
//! - Config store: EEPROM emulation on the last two 1 KB flash pages
//! - Console: USART at the resolved baud rate, unless `disabled-serial`
//! - Sleep: not supported, every variant returns `NotPossible` immediately
//! - Voltage: internal reference channel (VREFINT)
//! - Free memory: unknown

use core::fmt;

use crate::config::{ConfigStore, EepromEmulation, EepromLayout, FullPolicy, InitOutcome, StoreError};
use crate::features::{Feature, BAUD_RATE, BUILD, SERIAL_OUTPUT_SIZE};
use crate::hal::{
    Board, FlashInterface, Hal, InitError, InternalReference, Level, PinMode, SleepOutcome,
    UniqueId, WakeInterrupt,
};
use crate::logging::{DebugMode, DebugSink};

/// Core clock of the STM32F103 (72 MHz).
pub const F_CPU: u32 = 72_000_000;

/// Address of the 96-bit device id (read as 16 bytes).
pub const UNIQUE_ID_ADDRESS: u32 = 0x1FFF_F7E0;

/// Reference HAL backend.
pub struct Stm32F1Hal<B, F, const N: usize = SERIAL_OUTPUT_SIZE> {
    board: B,
    store: EepromEmulation<F>,
    sink: DebugSink<N>,
    console: bool,
    last_init: Option<InitOutcome>,
}

impl<B, F> Stm32F1Hal<B, F>
where
    B: Board + InternalReference,
    F: FlashInterface,
{
    /// Backend configured from the resolved build flags.
    pub fn for_build(board: B, flash: F) -> Self {
        Self::new(board, flash, DebugMode::for_build())
            .with_console(!BUILD.has(Feature::DisabledSerial))
    }
}

impl<B, F, const N: usize> Stm32F1Hal<B, F, N>
where
    B: Board + InternalReference,
    F: FlashInterface,
{
    pub fn new(board: B, flash: F, mode: DebugMode) -> Self {
        Self {
            board,
            store: EepromEmulation::new(flash, EepromLayout::STM32F1),
            sink: DebugSink::new(mode),
            console: true,
            last_init: None,
        }
    }

    /// Whether `init` opens the console.
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    /// What `init` does when the store is full.
    pub fn with_full_policy(mut self, policy: FullPolicy) -> Self {
        self.store = self.store.with_policy(policy);
        self
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn store(&self) -> &EepromEmulation<F> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EepromEmulation<F> {
        &mut self.store
    }

    /// Result of the last successful `init`.
    pub fn last_init(&self) -> Option<InitOutcome> {
        self.last_init
    }
}

impl<B, F, const N: usize> Hal for Stm32F1Hal<B, F, N>
where
    B: Board + InternalReference,
    F: FlashInterface,
{
    fn init(&mut self) -> Result<(), InitError> {
        if self.console {
            self.board.console_begin(BAUD_RATE);
        }
        let outcome = self.store.init()?;
        self.last_init = Some(outcome);
        Ok(())
    }

    fn read_config_block(&mut self, dst: &mut [u8], address: u16) -> Result<(), StoreError> {
        self.store.read_block(dst, address)
    }

    fn write_config_block(&mut self, src: &[u8], address: u16) -> Result<(), StoreError> {
        self.store.write_block(src, address)
    }

    fn sleep(&mut self, _ms: u32) -> SleepOutcome {
        SleepOutcome::NotPossible
    }

    fn sleep_with_interrupt(&mut self, _wake: WakeInterrupt, _ms: u32) -> SleepOutcome {
        SleepOutcome::NotPossible
    }

    fn sleep_with_interrupts(&mut self, _wake1: WakeInterrupt, _wake2: WakeInterrupt, _ms: u32) -> SleepOutcome {
        SleepOutcome::NotPossible
    }

    fn unique_id(&self) -> UniqueId {
        UniqueId(self.board.read_unique_id())
    }

    fn cpu_voltage(&mut self) -> Option<u16> {
        self.board.millivolts()
    }

    fn cpu_frequency(&self) -> u16 {
        (F_CPU / 100_000) as u16
    }

    fn free_memory(&self) -> Option<usize> {
        None
    }

    fn debug_print(&mut self, args: fmt::Arguments<'_>) {
        let board = &mut self.board;
        let millis = board.millis();
        self.sink.print(millis, args, |bytes| board.console_write(bytes));
    }

    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        self.board.pin_mode(pin, mode);
    }

    fn digital_write(&mut self, pin: u8, level: Level) {
        self.board.digital_write(pin, level);
    }

    fn digital_read(&mut self, pin: u8) -> Level {
        self.board.digital_read(pin)
    }

    fn watchdog_reset(&mut self) {
        self.board.feed_watchdog();
    }

    fn reboot(&mut self) -> ! {
        self.board.system_reset()
    }

    fn millis(&self) -> u32 {
        self.board.millis()
    }
}
