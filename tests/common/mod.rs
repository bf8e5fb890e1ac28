//! Shared test doubles: RAM flash and a scripted board.

#![allow(dead_code)]

use std::collections::HashMap;

use sensornet::config::EepromLayout;
use sensornet::hal::{Board, FlashError, FlashInterface, InternalReference, Level, PinMode};

/// In-memory flash covering one EEPROM layout.
///
/// - Erase sets a page to 0xFF
/// - Writes can only clear bits (like real NOR flash)
/// - Erase counts per page
/// - Power loss: the next write programs only half of its bytes and fails
/// - Reset after erase: the next erase completes, then the call fails
#[derive(Debug, Clone)]
pub struct RamFlash {
    base: u32,
    page_size: u32,
    storage: Vec<u8>,
    erase_counts: Vec<u32>,
    write_count: u32,
    power_loss: bool,
    reset_after_erase: bool,
}

impl RamFlash {
    pub fn new(layout: &EepromLayout) -> Self {
        Self {
            base: layout.base,
            page_size: layout.page_size,
            storage: vec![0xFF; 2 * layout.page_size as usize],
            erase_counts: vec![0; 2],
            write_count: 0,
            power_loss: false,
            reset_after_erase: false,
        }
    }

    pub fn stm32f1() -> Self {
        Self::new(&EepromLayout::STM32F1)
    }

    pub fn contents(&self, address: u32, len: usize) -> Vec<u8> {
        let start = (address - self.base) as usize;
        self.storage[start..start + len].to_vec()
    }

    /// Overwrite raw bytes, ignoring flash rules.
    pub fn poke(&mut self, address: u32, data: &[u8]) {
        let start = (address - self.base) as usize;
        self.storage[start..start + data.len()].copy_from_slice(data);
    }

    pub fn erase_count(&self, page: usize) -> u32 {
        self.erase_counts[page]
    }

    pub fn total_erase_count(&self) -> u32 {
        self.erase_counts.iter().sum()
    }

    pub fn write_count(&self) -> u32 {
        self.write_count
    }

    pub fn simulate_power_loss(&mut self) {
        self.power_loss = true;
    }

    pub fn simulate_reset_after_erase(&mut self) {
        self.reset_after_erase = true;
    }

    fn offset(&self, address: u32, len: usize) -> Result<usize, FlashError> {
        if address < self.base {
            return Err(FlashError::InvalidAddress);
        }
        let start = (address - self.base) as usize;
        if start + len > self.storage.len() {
            return Err(FlashError::InvalidAddress);
        }
        Ok(start)
    }
}

impl FlashInterface for RamFlash {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = self.offset(address, buf.len())?;
        buf.copy_from_slice(&self.storage[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let start = self.offset(address, data.len())?;
        self.write_count += 1;

        let len = if self.power_loss { data.len() / 2 } else { data.len() };
        for (i, byte) in data[..len].iter().enumerate() {
            self.storage[start + i] &= *byte;
        }

        if self.power_loss {
            self.power_loss = false;
            return Err(FlashError::WriteFailed);
        }
        Ok(())
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        let start = self.offset(address, self.page_size as usize)?;
        if start % self.page_size as usize != 0 {
            return Err(FlashError::Unaligned);
        }
        self.storage[start..start + self.page_size as usize].fill(0xFF);
        self.erase_counts[start / self.page_size as usize] += 1;

        if self.reset_after_erase {
            self.reset_after_erase = false;
            return Err(FlashError::EraseFailed);
        }
        Ok(())
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }
}

/// Board double recording everything the HAL does.
#[derive(Debug, Default)]
pub struct TestBoard {
    pub baud_rate: Option<u32>,
    pub console: Vec<u8>,
    pub writes: Vec<Vec<u8>>,
    pub now_ms: u32,
    pub modes: HashMap<u8, PinMode>,
    pub levels: HashMap<u8, Level>,
    pub watchdog_feeds: u32,
    pub unique_id: [u8; 16],
    pub adc_raw: u16,
    pub adc_prepared: u32,
}

impl TestBoard {
    pub fn new() -> Self {
        Self {
            unique_id: *b"\x31\x00\x2A\x00\x0C\x51\x37\x33\x36\x38\x36\x38\x00\x00\x00\x00",
            adc_raw: 1489,
            ..Self::default()
        }
    }

    pub fn console_text(&self) -> String {
        String::from_utf8_lossy(&self.console).into_owned()
    }
}

impl Board for TestBoard {
    fn console_begin(&mut self, baud_rate: u32) {
        self.baud_rate = Some(baud_rate);
    }

    fn console_write(&mut self, bytes: &[u8]) {
        self.console.extend_from_slice(bytes);
        self.writes.push(bytes.to_vec());
    }

    fn millis(&self) -> u32 {
        self.now_ms
    }

    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        self.modes.insert(pin, mode);
    }

    fn digital_write(&mut self, pin: u8, level: Level) {
        self.levels.insert(pin, level);
    }

    fn digital_read(&mut self, pin: u8) -> Level {
        self.levels.get(&pin).copied().unwrap_or(Level::Low)
    }

    fn feed_watchdog(&mut self) {
        self.watchdog_feeds += 1;
    }

    fn system_reset(&mut self) -> ! {
        panic!("system reset requested");
    }

    fn read_unique_id(&self) -> [u8; 16] {
        self.unique_id
    }
}

impl InternalReference for TestBoard {
    fn prepare(&mut self) {
        self.adc_prepared += 1;
    }

    fn sample(&mut self) -> u16 {
        self.adc_raw
    }
}
